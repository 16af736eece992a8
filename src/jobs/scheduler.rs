use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info_span, Instrument};

use super::models::JobId;
use super::runner::JobRunner;

/// How background runs are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Every submitted job starts immediately on its own task.
    Unbounded,
    /// At most `n` jobs convert at once; the rest wait (still QUEUED) for a
    /// permit.
    Bounded(usize),
}

impl SchedulingStrategy {
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(n) => SchedulingStrategy::Bounded(n.max(1)),
            None => SchedulingStrategy::Unbounded,
        }
    }
}

/// Spawns job runs onto a runtime handle and keeps track of them so shutdown
/// can wait for in-flight conversions.
pub struct Scheduler {
    handle: Handle,
    tracker: TaskTracker,
    permits: Option<Arc<Semaphore>>,
    strategy: SchedulingStrategy,
}

impl Scheduler {
    pub fn new(strategy: SchedulingStrategy, handle: Handle) -> Self {
        let permits = match strategy {
            SchedulingStrategy::Unbounded => None,
            SchedulingStrategy::Bounded(n) => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            handle,
            tracker: TaskTracker::new(),
            permits,
            strategy,
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Run `id` in the background. Returns immediately.
    pub fn schedule(&self, runner: Arc<JobRunner>, id: JobId) {
        let permits = self.permits.clone();
        let task = async move {
            // Permit is held for the whole run and released on drop
            let _permit = match permits {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        error!("Failed to acquire run permit for job {}: {:?}", id, e);
                        return;
                    }
                },
                None => None,
            };
            runner.run(id).await;
        };
        self.tracker
            .spawn_on(task.instrument(info_span!("job", %id)), &self.handle);
    }

    /// Number of scheduled runs that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting new runs and wait for the scheduled ones to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{draft, JobStatus};
    use crate::jobs::runner::testing::FakeEngine;
    use crate::jobs::store::JobStore;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_strategy_limits_concurrent_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = Arc::new(FakeEngine::slow(Duration::from_millis(100)));
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            engine.clone(),
            Duration::from_secs(5),
        ));
        let scheduler = Scheduler::new(SchedulingStrategy::Bounded(2), Handle::current());

        let ids: Vec<JobId> = (0..6)
            .map(|i| {
                let mut d = draft("wav", "mp3");
                d.source_path = dir.path().join(format!("in-{}.wav", i));
                d.destination_path = dir.path().join(format!("out-{}.mp3", i));
                store.create(d)
            })
            .collect();
        for id in &ids {
            scheduler.schedule(Arc::clone(&runner), *id);
        }
        scheduler.drain().await;

        assert_eq!(engine.calls(), 6);
        assert!(engine.max_running.load(Ordering::SeqCst) <= 2);
        for id in ids {
            assert_eq!(store.get(id).unwrap().status(), JobStatus::Completed);
        }
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn limit_maps_to_strategy() {
        assert_eq!(SchedulingStrategy::from_limit(None), SchedulingStrategy::Unbounded);
        assert_eq!(
            SchedulingStrategy::from_limit(Some(3)),
            SchedulingStrategy::Bounded(3)
        );
        assert_eq!(
            SchedulingStrategy::from_limit(Some(0)),
            SchedulingStrategy::Bounded(1)
        );
    }
}
