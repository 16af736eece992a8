use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::engine::{ConversionEngine, ConversionRequest, EngineError};
use super::models::{Job, JobId};
use super::store::JobStore;

/// Progress once the conversion has been handed to the engine
const DISPATCHED_PROGRESS: u8 = 40;
/// Progress once the output file exists
const WRITTEN_PROGRESS: u8 = 90;
/// How long a timed-out engine gets to stop after cancellation
const WIND_DOWN_GRACE: Duration = Duration::from_secs(30);

/// Executes a single job from QUEUED to a terminal state.
///
/// `run` never returns an error and never panics: whatever goes wrong while
/// converting ends up as a FAILED job with the error text attached.
pub struct JobRunner {
    store: Arc<JobStore>,
    engine: Arc<dyn ConversionEngine>,
    timeout: Duration,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, engine: Arc<dyn ConversionEngine>, timeout: Duration) -> Self {
        Self {
            store,
            engine,
            timeout,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ConversionEngine> {
        &self.engine
    }

    pub async fn run(&self, id: JobId) {
        let job = match self.store.mutate(id, |job| job.start().map(|_| job.clone())) {
            Ok(Ok(job)) => job,
            Ok(Err(e)) => {
                warn!("Not running job {}: {}", id, e);
                return;
            }
            Err(e) => {
                warn!("Not running job: {}", e);
                return;
            }
        };

        info!(
            "Converting {} ({}) from {} to {}",
            job.original_filename(),
            job.category(),
            job.source_extension(),
            job.target_extension()
        );

        let outcome = AssertUnwindSafe(self.execute(&job)).catch_unwind().await;
        let result = outcome.unwrap_or_else(|panic| Err(EngineError::Panicked(panic_message(panic))));
        self.finish(id, result);
    }

    async fn execute(&self, job: &Job) -> Result<(), EngineError> {
        let destination = job.destination_path();
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = PartialOutput::new(destination.clone());
        // Declared after `output` so cancellation happens before cleanup
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();

        if job.is_copy() {
            self.checkpoint(job.id(), DISPATCHED_PROGRESS);
            tokio::fs::copy(job.source_path(), destination).await?;
        } else {
            if !job.category().is_convertible() {
                return Err(EngineError::NotSupported(job.category()));
            }

            let request = ConversionRequest {
                source: job.source_path().clone(),
                destination: destination.clone(),
                category: job.category(),
                target_extension: job.target_extension().to_string(),
                cancel: cancel.clone(),
            };

            self.checkpoint(job.id(), DISPATCHED_PROGRESS);
            let mut convert = self.engine.convert(&request);
            match tokio::time::timeout(self.timeout, &mut convert).await {
                Ok(result) => result?,
                Err(_) => {
                    // The engine must stop before `output` cleans up
                    cancel.cancel();
                    if tokio::time::timeout(WIND_DOWN_GRACE, convert).await.is_err() {
                        warn!(
                            "Engine did not stop within {}s of cancelling job {}",
                            WIND_DOWN_GRACE.as_secs(),
                            job.id()
                        );
                    }
                    return Err(EngineError::TimedOut(self.timeout));
                }
            }
        }

        self.checkpoint(job.id(), WRITTEN_PROGRESS);
        output.keep();
        Ok(())
    }

    fn checkpoint(&self, id: JobId, progress: u8) {
        match self.store.mutate(id, |job| job.advance(progress)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Job {} progress update rejected: {}", id, e),
            Err(e) => warn!("Job progress update failed: {}", e),
        }
    }

    fn finish(&self, id: JobId, result: Result<(), EngineError>) {
        let update = match &result {
            Ok(()) => self.store.mutate(id, |job| job.complete()),
            Err(e) => self.store.mutate(id, |job| job.fail(e.kind(), e.to_string())),
        };

        match (update, result) {
            (Ok(Ok(())), Ok(())) => info!("Completed job {}", id),
            (Ok(Ok(())), Err(e)) => error!("Job {} failed: {}", id, e),
            (Ok(Err(e)), _) => error!("Job {} could not reach a terminal state: {}", id, e),
            (Err(e), _) => error!("Job disappeared while running: {}", e),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "conversion task panicked".to_string()
    }
}

/// Removes a destination file unless the run succeeded.
struct PartialOutput {
    path: PathBuf,
    keep: bool,
}

impl PartialOutput {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.keep {
            remove_quietly(&self.path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable engine for runner, manager and API tests.
    #[derive(Default)]
    pub struct FakeEngine {
        pub delay: Option<Duration>,
        pub failure: Option<String>,
        pub panic: bool,
        pub calls: AtomicUsize,
        pub running: AtomicUsize,
        pub max_running: AtomicUsize,
    }

    impl FakeEngine {
        pub fn succeeding() -> Self {
            Self::default()
        }

        pub fn failing(details: &str) -> Self {
            Self {
                failure: Some(details.to_string()),
                ..Self::default()
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConversionEngine for FakeEngine {
        async fn convert(&self, request: &ConversionRequest) -> Result<(), EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = request.cancel.cancelled() => {
                        self.running.fetch_sub(1, Ordering::SeqCst);
                        return Err(EngineError::Cancelled);
                    }
                }
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panic {
                panic!("engine exploded");
            }
            if let Some(details) = &self.failure {
                tokio::fs::write(&request.destination, b"partial").await?;
                return Err(EngineError::Failed {
                    tool: "fake".to_string(),
                    details: details.clone(),
                });
            }
            tokio::fs::write(&request.destination, b"converted").await?;
            Ok(())
        }
    }
}
