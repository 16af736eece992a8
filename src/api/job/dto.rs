use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use serde::Serialize;

use crate::jobs::{Job, JobId, JobStatus};

/// Multipart upload body for `POST /jobs`.
///
/// Every field is optional here so that missing parts come back as typed
/// `missing_input` errors rather than generic multipart failures.
#[derive(MultipartForm)]
pub struct UploadForm {
    pub file: Option<TempFile>,
    /// Source extension, e.g. `png` or `.png`
    pub file_type: Option<Text<String>>,
    /// Target extension
    pub convert_to: Option<Text<String>>,
}

/// Response for `GET /jobs/{id}`
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id(),
            status: job.status(),
            progress: job.progress(),
            error: job.error().map(str::to_string),
            error_kind: job.error_kind().map(str::to_string),
        }
    }
}
