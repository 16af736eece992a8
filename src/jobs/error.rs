use thiserror::Error;

use super::models::JobStatus;
use crate::media::MediaCategory;

/// Errors returned synchronously by the job manager. Validation errors are
/// raised before any job exists.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    MissingInput(&'static str),

    #[error("could not determine file extension; provide `file_type` (extension) or include an extension in the filename")]
    MissingExtension,

    #[error("unsupported file extension `{0}`")]
    UnsupportedExtension(String),

    #[error("requested conversion target `{0}` is not supported")]
    UnsupportedTargetExtension(String),

    #[error("requested target `{target}` ({target_category}) is not the same media type as the uploaded {source_category} file")]
    MismatchedTargetType {
        target: String,
        source_category: MediaCategory,
        target_category: MediaCategory,
    },

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {id} is not ready (status: {status})")]
    NotReady {
        id: String,
        status: JobStatus,
        error: Option<String>,
    },

    #[error("job file I/O failed: {0}")]
    Storage(#[from] std::io::Error),
}

impl ServiceError {
    /// Machine-readable error kind returned to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::MissingInput(_) => "missing_input",
            ServiceError::MissingExtension => "missing_extension",
            ServiceError::UnsupportedExtension(_) => "unsupported_extension",
            ServiceError::UnsupportedTargetExtension(_) => "unsupported_target_extension",
            ServiceError::MismatchedTargetType { .. } => "mismatched_target_type",
            ServiceError::PayloadTooLarge { .. } => "payload_too_large",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::NotReady { .. } => "not_ready",
            ServiceError::Storage(_) => "storage_failed",
        }
    }

    /// Whether the response should list the supported extension table.
    pub fn lists_supported_extensions(&self) -> bool {
        matches!(
            self,
            ServiceError::UnsupportedExtension(_) | ServiceError::UnsupportedTargetExtension(_)
        )
    }
}
