use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use tracing::error;

use crate::jobs::JobManager;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    storage: String,
    converter: String,
    jobs: usize,
    in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn storage_error(manager: &JobManager) -> Option<String> {
    match tokio::fs::metadata(manager.upload_root()).await {
        Ok(meta) if meta.is_dir() => None,
        Ok(_) => Some(format!(
            "{} is not a directory",
            manager.upload_root().display()
        )),
        Err(e) => Some(format!(
            "{} is not accessible: {}",
            manager.upload_root().display(),
            e
        )),
    }
}

fn converter_state(manager: &JobManager) -> String {
    if manager.engine_available() {
        "available".to_string()
    } else {
        // Image jobs still work; audio/video jobs will fail with engine_unavailable
        "ffmpeg_missing".to_string()
    }
}

/// Service index
#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "message": "Media conversion API",
    }))
}

/// Health check endpoint
///
/// Reports upload storage, converter availability and job counters.
#[get("/health")]
async fn health_check(manager: web::Data<JobManager>) -> impl Responder {
    let problem = storage_error(&manager).await;
    let body = HealthResponse {
        status: if problem.is_none() { "healthy" } else { "unhealthy" }.to_string(),
        storage: if problem.is_none() { "ok" } else { "unavailable" }.to_string(),
        converter: converter_state(&manager),
        jobs: manager.job_count(),
        in_flight: manager.in_flight(),
        error: problem,
    };

    if body.error.is_some() {
        error!("Health check failed: {:?}", body.error);
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

/// Readiness check endpoint
///
/// Ready once the upload root exists; returns 503 otherwise.
#[get("/ready")]
async fn readiness_check(manager: web::Data<JobManager>) -> impl Responder {
    match storage_error(&manager).await {
        None => HttpResponse::Ok().json(serde_json::json!({"status": "ready"})),
        Some(e) => {
            error!("Readiness check failed: {}", e);
            HttpResponse::ServiceUnavailable()
                .json(serde_json::json!({"status": "not_ready", "error": e}))
        }
    }
}

/// Liveness check endpoint. Does not check dependencies.
#[get("/live")]
async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "alive"}))
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config
        .service(index)
        .service(health_check)
        .service(readiness_check)
        .service(liveness_check);
}
