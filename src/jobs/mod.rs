pub mod engine;
pub mod error;
pub mod manager;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use engine::{ConversionEngine, ConversionRequest, EngineError, MediaEngine};
pub use error::ServiceError;
pub use manager::{JobArtifact, JobLimits, JobManager, SubmitReceipt, Submission};
pub use models::{Job, JobId, JobStatus};
pub use scheduler::{Scheduler, SchedulingStrategy};
pub use store::JobStore;
