use actix_multipart::form::{tempfile::TempFile, MultipartForm};
use actix_web::{
    body::SizedStream,
    get,
    http::header::{ContentDisposition, DispositionParam, DispositionType},
    web::{post, scope, Data, Path, ServiceConfig},
    HttpResponse,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::dto::{JobStatusResponse, UploadForm};
use crate::jobs::{JobId, JobManager, ServiceError, Submission};
use crate::storage::UploadPayload;

/// `POST /jobs` (and `POST /upload`): queue a conversion, answer 202 at once
pub async fn submit_job(
    manager: Data<JobManager>,
    MultipartForm(form): MultipartForm<UploadForm>,
) -> Result<HttpResponse, ServiceError> {
    let UploadForm {
        file,
        file_type,
        convert_to,
    } = form;

    let submission = Submission {
        payload: file
            .as_ref()
            .map(|f| UploadPayload::TempFile(f.file.path().to_path_buf())),
        filename: file.as_ref().and_then(|f| f.file_name.clone()),
        file_type: file_type.map(|t| t.0),
        convert_to: convert_to.map(|t| t.0),
    };

    let outcome = manager.submit(submission).await;

    // The upload has been copied (or rejected); the spooled file can go.
    if let Some(file) = file {
        release_temp_file(file);
    }

    let receipt = outcome?;
    Ok(HttpResponse::Accepted().json(receipt))
}

#[get("/{job_id}")]
async fn job_status(
    manager: Data<JobManager>,
    path: Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let id = parse_job_id(&path)?;
    let job = manager.status(id)?;
    Ok(HttpResponse::Ok().json(JobStatusResponse::from(&job)))
}

#[get("/{job_id}/result")]
async fn job_result(
    manager: Data<JobManager>,
    path: Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let id = parse_job_id(&path)?;
    let artifact = manager.result(id)?;

    let file = tokio::fs::File::open(&artifact.path).await?;
    let size = file.metadata().await?.len();
    debug!(
        "Streaming {} ({} bytes) for job {}",
        artifact.path.display(),
        size,
        id
    );

    Ok(HttpResponse::Ok()
        .content_type(artifact.content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(artifact.download_name)],
        })
        .body(SizedStream::new(size, ReaderStream::new(file))))
}

/// Anything that is not a job id cannot name a job.
fn parse_job_id(raw: &str) -> Result<JobId, ServiceError> {
    raw.parse()
        .map_err(|_| ServiceError::NotFound(raw.to_string()))
}

fn release_temp_file(file: TempFile) {
    let path = file.file.path().to_path_buf();
    if let Err(e) = file.file.close() {
        warn!("Failed to remove spooled upload {}: {}", path.display(), e);
    }
}

pub fn job_config(config: &mut ServiceConfig) {
    config.route("/upload", post().to(submit_job)).service(
        scope("/jobs")
            .route("", post().to(submit_job))
            .service(job_status)
            .service(job_result),
    );
}
