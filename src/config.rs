use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::jobs::{JobLimits, SchedulingStrategy};

/// Command-line overrides. Anything not given falls back to the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "media-job-processor", version, about = "Asynchronous media conversion service")]
pub struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory uploads and converted files are stored under
    #[arg(long)]
    pub upload_root: Option<PathBuf>,

    /// Directory for rolling log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug, Validate)]
pub struct Config {
    /// Bind address
    #[validate(length(min = 1, message = "HOST must not be empty"))]
    pub host: String,

    pub port: u16,

    /// Root directory for uploads and converted artifacts
    pub upload_root: PathBuf,

    /// Directory for rolling log files
    pub log_dir: PathBuf,

    /// Maximum upload size in bytes
    /// Default: 50MB (50 * 1024 * 1024)
    #[validate(range(min = 1, message = "MAX_PAYLOAD_SIZE must be at least 1 byte"))]
    pub max_payload_size: usize,

    /// Ceiling for a single conversion, in seconds
    #[validate(range(min = 1, max = 3600, message = "CONVERSION_TIMEOUT_SECS must be between 1 and 3600"))]
    pub conversion_timeout_secs: u64,

    /// Maximum number of conversions running at once; unset means unbounded
    #[validate(range(min = 1, message = "MAX_CONCURRENT_JOBS must be at least 1"))]
    pub max_concurrent_jobs: Option<usize>,

    /// ffmpeg program name or path
    #[validate(length(min = 1, message = "FFMPEG_PATH must not be empty"))]
    pub ffmpeg_path: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Optional environment variables:
    /// - HOST (default: 127.0.0.1)
    /// - PORT (default: 5000)
    /// - UPLOAD_ROOT (default: ./uploads)
    /// - LOG_DIR (default: logs)
    /// - MAX_PAYLOAD_SIZE: Maximum upload size in bytes (default: 52428800 = 50MB)
    /// - CONVERSION_TIMEOUT_SECS (default: 120)
    /// - MAX_CONCURRENT_JOBS (default: unbounded)
    /// - FFMPEG_PATH (default: ffmpeg)
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let config = Config {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT")?.unwrap_or(5000),
            upload_root: env::var("UPLOAD_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            log_dir: env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
            max_payload_size: parse_var("MAX_PAYLOAD_SIZE")?.unwrap_or(50 * 1024 * 1024),
            conversion_timeout_secs: parse_var("CONVERSION_TIMEOUT_SECS")?.unwrap_or(120),
            max_concurrent_jobs: parse_var("MAX_CONCURRENT_JOBS")?,
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
        };

        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_cli(mut self, cli: Cli) -> Self {
        if let Some(host) = cli.host {
            self.host = host;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(upload_root) = cli.upload_root {
            self.upload_root = upload_root;
        }
        if let Some(log_dir) = cli.log_dir {
            self.log_dir = log_dir;
        }
        self
    }

    pub fn job_limits(&self) -> JobLimits {
        JobLimits {
            max_upload_size: self.max_payload_size as u64,
            conversion_timeout: Duration::from_secs(self.conversion_timeout_secs),
        }
    }

    pub fn scheduling(&self) -> SchedulingStrategy {
        SchedulingStrategy::from_limit(self.max_concurrent_jobs)
    }
}

/// Parse an optional variable; present but malformed is an error.
fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{} has an invalid value: {}", name, raw)),
        _ => Ok(None),
    }
}
