use actix_multipart::form::MultipartFormConfig;
use actix_multipart::MultipartError;
use actix_web::error::PayloadError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::{error, warn};

use crate::jobs::{JobStatus, ServiceError};
use crate::media;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_extensions: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            supported_extensions: None,
            status: None,
            details: None,
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingInput(_)
            | ServiceError::MissingExtension
            | ServiceError::UnsupportedExtension(_)
            | ServiceError::UnsupportedTargetExtension(_)
            | ServiceError::MismatchedTargetType { .. } => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::NotReady { .. } => StatusCode::CONFLICT,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = ErrorResponse::new(self.kind(), self.to_string());

        match self {
            ServiceError::Storage(e) => {
                error!("Storage error: {}", e);
                // Paths stay in the logs
                body.message = "Failed to access job files".to_string();
            }
            ServiceError::NotReady { status, error, .. } => {
                body.status = Some(*status);
                body.details = error.clone();
            }
            other => warn!("Request rejected ({}): {}", other.kind(), other),
        }

        if self.lists_supported_extensions() {
            body.supported_extensions = Some(media::supported_extensions());
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Multipart limits with JSON errors for the upload endpoint
pub fn multipart_config(max_payload_size: usize) -> MultipartFormConfig {
    MultipartFormConfig::default()
        .total_limit(max_payload_size)
        .memory_limit(max_payload_size)
        .error_handler(move |err, _req| {
            let err_string = err.to_string();
            let response = if is_oversized(&err) {
                warn!("Upload rejected: payload exceeds {} bytes", max_payload_size);
                HttpResponse::PayloadTooLarge().json(ErrorResponse::new(
                    "payload_too_large",
                    format!("Upload exceeds the {} byte limit", max_payload_size),
                ))
            } else {
                warn!("Malformed upload: {}", err_string);
                HttpResponse::BadRequest().json(ErrorResponse::new(
                    "missing_input",
                    format!("Invalid multipart upload: {}", err_string),
                ))
            };
            actix_web::error::InternalError::from_response(err_string, response).into()
        })
}

/// Form limits are reported as a payload overflow.
fn is_oversized(err: &MultipartError) -> bool {
    err.status_code() == StatusCode::PAYLOAD_TOO_LARGE
        || matches!(err, MultipartError::Payload(PayloadError::Overflow))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_overflow_counts_as_oversized() {
        assert!(is_oversized(&MultipartError::Payload(PayloadError::Overflow)));
        assert!(!is_oversized(&MultipartError::Payload(PayloadError::Incomplete(None))));
        assert!(!is_oversized(&MultipartError::Incomplete));
    }
}
