use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::media::MediaCategory;

/// Progress reported as soon as a runner picks a job up.
pub const STARTED_PROGRESS: u8 = 10;

/// Highest progress a job may report before reaching a terminal state.
const MAX_RUNNING_PROGRESS: u8 = 99;

/// Opaque job identifier handed out to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job status enum representing the state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal job transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Everything needed to create a job, minus the identifier and state.
#[derive(Debug, Clone)]
pub struct JobDraft {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub category: MediaCategory,
    pub source_extension: String,
    pub target_extension: String,
    pub original_filename: String,
    pub converted_filename: String,
}

/// A conversion job record.
///
/// Identity and paths are fixed at creation. Status, progress and error only
/// change through the transition methods below, which keep them consistent.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<String>,
    source_path: PathBuf,
    destination_path: PathBuf,
    category: MediaCategory,
    source_extension: String,
    target_extension: String,
    original_filename: String,
    converted_filename: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Job {
    pub fn queued(id: JobId, draft: JobDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            error_kind: None,
            source_path: draft.source_path,
            destination_path: draft.destination_path,
            category: draft.category,
            source_extension: draft.source_extension,
            target_extension: draft.target_extension,
            original_filename: draft.original_filename,
            converted_filename: draft.converted_filename,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_kind(&self) -> Option<&str> {
        self.error_kind.as_deref()
    }

    pub fn source_path(&self) -> &PathBuf {
        &self.source_path
    }

    pub fn destination_path(&self) -> &PathBuf {
        &self.destination_path
    }

    pub fn category(&self) -> MediaCategory {
        self.category
    }

    pub fn source_extension(&self) -> &str {
        &self.source_extension
    }

    pub fn target_extension(&self) -> &str {
        &self.target_extension
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn converted_filename(&self) -> &str {
        &self.converted_filename
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Same source and target extension: the run is a plain copy.
    pub fn is_copy(&self) -> bool {
        self.source_extension == self.target_extension
    }

    /// QUEUED -> IN_PROGRESS. Allowed exactly once.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.expect_status(JobStatus::Queued, JobStatus::InProgress)?;
        self.status = JobStatus::InProgress;
        self.progress = self.progress.max(STARTED_PROGRESS);
        self.touch();
        Ok(())
    }

    /// Record an intermediate checkpoint. Never lowers progress and never
    /// reaches 100 before a terminal state.
    pub fn advance(&mut self, progress: u8) -> Result<(), TransitionError> {
        self.expect_status(JobStatus::InProgress, JobStatus::InProgress)?;
        let progress = progress.min(MAX_RUNNING_PROGRESS);
        if progress > self.progress {
            self.progress = progress;
            self.touch();
        }
        Ok(())
    }

    /// IN_PROGRESS -> COMPLETED.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.expect_status(JobStatus::InProgress, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.error = None;
        self.error_kind = None;
        self.touch();
        Ok(())
    }

    /// IN_PROGRESS -> FAILED. An empty message is replaced so that a failed
    /// job always carries error text.
    pub fn fail(
        &mut self,
        kind: &str,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.expect_status(JobStatus::InProgress, JobStatus::Failed)?;
        let message = message.into();
        let message = if message.trim().is_empty() {
            "conversion failed".to_string()
        } else {
            message
        };
        self.status = JobStatus::Failed;
        self.progress = 100;
        self.error = Some(message);
        self.error_kind = Some(kind.to_string());
        self.touch();
        Ok(())
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
pub(crate) fn draft(source_extension: &str, target_extension: &str) -> JobDraft {
    let category = crate::media::category_for(source_extension).unwrap_or(MediaCategory::Other);
    JobDraft {
        source_path: PathBuf::from(format!("uploads/{}/clip.{}", category, source_extension)),
        destination_path: PathBuf::from(format!(
            "uploads/{}/converted/clip.{}",
            category, target_extension
        )),
        category,
        source_extension: source_extension.to_string(),
        target_extension: target_extension.to_string(),
        original_filename: format!("clip.{}", source_extension),
        converted_filename: format!("clip.{}", target_extension),
    }
}
