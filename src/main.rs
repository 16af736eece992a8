use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use media_job_processor::api::{cors_headers, health::health_config, job::job_config, validation};
use media_job_processor::config::{Cli, Config};
use media_job_processor::jobs::{ConversionEngine, JobManager, MediaEngine, Scheduler};
use media_job_processor::shutdown::ShutdownCoordinator;
use media_job_processor::storage::UploadStorage;

/// Console output plus daily rotating files split by level, e.g.
/// logs/info.log.2024-12-22, logs/error.log.2024-12-22
fn init_logging(log_dir: &Path) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    let info_file = tracing_appender::rolling::daily(log_dir, "info.log");
    let warn_file = tracing_appender::rolling::daily(log_dir, "warn.log");
    let error_file = tracing_appender::rolling::daily(log_dir, "error.log");

    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()
        .map(|config| config.with_cli(cli))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    std::fs::create_dir_all(&config.log_dir)?;
    init_logging(&config.log_dir);

    info!("Starting media-job-processor");
    info!("Configuration loaded successfully:");
    info!("  - Upload root: {}", config.upload_root.display());
    info!("  - Max payload size: {} bytes", config.max_payload_size);
    info!("  - Conversion timeout: {}s", config.conversion_timeout_secs);
    info!("  - Scheduling: {:?}", config.scheduling());

    let storage = UploadStorage::new(&config.upload_root);
    storage.ensure_root().await?;

    let engine = Arc::new(MediaEngine::new(config.ffmpeg_path.clone()));
    if !engine.available() {
        warn!(
            "{} not found; audio and video jobs will fail until it is installed",
            config.ffmpeg_path
        );
    }

    // Job runs are spawned onto this runtime, not onto the HTTP workers, so
    // they outlive the request that submitted them.
    let scheduler = Scheduler::new(config.scheduling(), Handle::current());
    let manager = web::Data::new(JobManager::new(
        storage,
        engine,
        scheduler,
        config.job_limits(),
    ));

    let max_payload_size = config.max_payload_size;
    let server_manager = manager.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors_headers())
            .app_data(server_manager.clone())
            .app_data(web::PayloadConfig::default().limit(max_payload_size))
            .app_data(validation::multipart_config(max_payload_size))
            .configure(health_config)
            .configure(job_config)
    });

    info!("Server starting on http://{}:{}", config.host, config.port);

    let server = server.bind((config.host.as_str(), config.port))?.run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    ShutdownCoordinator::new(server_handle, server_task, manager)
        .wait_for_shutdown()
        .await
}
