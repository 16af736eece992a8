//! Asynchronous media conversion service.
//!
//! Uploads are validated and stored, a job is queued and converted in the
//! background, and clients poll `/jobs/{id}` until they can download
//! `/jobs/{id}/result`.

pub mod api;
pub mod config;
pub mod jobs;
pub mod media;
pub mod shutdown;
pub mod storage;
