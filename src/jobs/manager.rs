use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::engine::ConversionEngine;
use super::error::ServiceError;
use super::models::{Job, JobDraft, JobId, JobStatus};
use super::runner::JobRunner;
use super::scheduler::Scheduler;
use super::store::JobStore;
use crate::media::{self, MediaCategory};
use crate::storage::{self, UploadPayload, UploadStorage};

/// Limits applied to every job
#[derive(Debug, Clone, Copy)]
pub struct JobLimits {
    pub max_upload_size: u64,
    pub conversion_timeout: Duration,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            max_upload_size: 50 * 1024 * 1024,
            conversion_timeout: Duration::from_secs(120),
        }
    }
}

/// A conversion request as received from a client.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub payload: Option<UploadPayload>,
    /// Client-side filename of the upload
    pub filename: Option<String>,
    /// Explicit source extension; wins over the filename suffix
    pub file_type: Option<String>,
    pub convert_to: Option<String>,
}

/// Returned as soon as a job is queued.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
    pub file_type: MediaCategory,
    pub filename: String,
    pub converted_filename: String,
}

/// A finished conversion ready to be sent.
#[derive(Debug, Clone)]
pub struct JobArtifact {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub download_name: String,
}

/// Validated form of a submission
struct ConversionPlan {
    category: MediaCategory,
    source_extension: String,
    target_extension: String,
    filename: String,
}

/// Creates jobs, hands them to the scheduler and answers status/result
/// queries. Never waits on a conversion.
pub struct JobManager {
    store: Arc<JobStore>,
    storage: UploadStorage,
    runner: Arc<JobRunner>,
    scheduler: Scheduler,
    limits: JobLimits,
}

impl JobManager {
    pub fn new(
        storage: UploadStorage,
        engine: Arc<dyn ConversionEngine>,
        scheduler: Scheduler,
        limits: JobLimits,
    ) -> Self {
        let store = Arc::new(JobStore::new());
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            engine,
            limits.conversion_timeout,
        ));
        Self {
            store,
            storage,
            runner,
            scheduler,
            limits,
        }
    }

    /// Validate, persist the upload, create a QUEUED job and schedule it.
    ///
    /// # Returns
    /// - `Ok(SubmitReceipt)` - Job queued; conversion runs in the background
    /// - `Err(ServiceError)` - Validation or storage failed, no job created
    pub async fn submit(&self, submission: Submission) -> Result<SubmitReceipt, ServiceError> {
        let Some(payload) = submission.payload.as_ref() else {
            return Err(ServiceError::MissingInput("no file part in the request"));
        };

        let size = payload.size().await?;
        if size > self.limits.max_upload_size {
            return Err(ServiceError::PayloadTooLarge {
                size,
                limit: self.limits.max_upload_size,
            });
        }

        let plan = plan_conversion(&submission)?;
        let stored = self
            .storage
            .persist(plan.category, &plan.filename, &plan.target_extension, payload)
            .await?;

        let id = self.store.create(JobDraft {
            source_path: stored.source_path,
            destination_path: stored.destination_path,
            category: plan.category,
            source_extension: plan.source_extension,
            target_extension: plan.target_extension,
            original_filename: stored.filename.clone(),
            converted_filename: stored.converted_filename.clone(),
        });
        info!(
            "Queued job {} for {} ({}) -> {}",
            id, stored.filename, plan.category, stored.converted_filename
        );

        self.scheduler.schedule(Arc::clone(&self.runner), id);

        Ok(SubmitReceipt {
            job_id: id,
            status: JobStatus::Queued,
            file_type: plan.category,
            filename: stored.filename,
            converted_filename: stored.converted_filename,
        })
    }

    /// Latest snapshot of a job.
    pub fn status(&self, id: JobId) -> Result<Job, ServiceError> {
        self.store
            .get(id)
            .map_err(|_| ServiceError::NotFound(id.to_string()))
    }

    /// The converted artifact, only once the job is COMPLETED.
    pub fn result(&self, id: JobId) -> Result<JobArtifact, ServiceError> {
        let job = self.status(id)?;
        if job.status() != JobStatus::Completed {
            return Err(ServiceError::NotReady {
                id: id.to_string(),
                status: job.status(),
                error: job.error().map(str::to_string),
            });
        }
        Ok(JobArtifact {
            path: job.destination_path().clone(),
            content_type: media::content_type_for(job.target_extension()),
            download_name: job.converted_filename().to_string(),
        })
    }

    pub fn job_count(&self) -> usize {
        self.store.len()
    }

    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    pub fn engine_available(&self) -> bool {
        self.runner.engine().available()
    }

    pub fn upload_root(&self) -> &Path {
        self.storage.root()
    }

    /// Wait for every scheduled conversion to finish. New submissions are
    /// not expected afterwards.
    pub async fn drain(&self) {
        let pending = self.scheduler.in_flight();
        if pending > 0 {
            warn!("Waiting for {} in-flight conversions", pending);
        }
        self.scheduler.drain().await;
    }
}

fn plan_conversion(submission: &Submission) -> Result<ConversionPlan, ServiceError> {
    let raw_filename = submission.filename.as_deref().unwrap_or_default();

    let source_extension = submission
        .file_type
        .as_deref()
        .and_then(media::normalize_extension)
        .or_else(|| {
            Path::new(raw_filename)
                .extension()
                .and_then(|e| e.to_str())
                .and_then(media::normalize_extension)
        })
        .ok_or(ServiceError::MissingExtension)?;

    let category = media::category_for(&source_extension)
        .ok_or_else(|| ServiceError::UnsupportedExtension(source_extension.clone()))?;

    let target_extension = submission
        .convert_to
        .as_deref()
        .and_then(media::normalize_extension)
        .ok_or(ServiceError::MissingInput("no conversion target (`convert_to`) supplied"))?;

    let target_category = media::category_for(&target_extension)
        .ok_or_else(|| ServiceError::UnsupportedTargetExtension(target_extension.clone()))?;

    if target_category != category {
        return Err(ServiceError::MismatchedTargetType {
            target: target_extension,
            source_category: category,
            target_category,
        });
    }

    if raw_filename.trim().is_empty() {
        return Err(ServiceError::MissingInput("uploaded file has no filename"));
    }
    let filename = storage::sanitize_filename(raw_filename)
        .unwrap_or_else(|| format!("upload.{}", source_extension));

    Ok(ConversionPlan {
        category,
        source_extension,
        target_extension,
        filename,
    })
}
