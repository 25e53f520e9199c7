use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobStatus, QualityTier};
use crate::models::submission::{estimate_seconds, JobStatusResponse, UploadForm, UploadResponse};
use crate::services::collaborators::CollaboratorError;
use crate::services::ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("no image field in upload")]
    MissingImage,

    #[error("payload is not a supported image")]
    NotAnImage,

    #[error("unknown quality tier: {0}")]
    InvalidQuality(String),

    #[error("invalid product metadata: {0}")]
    InvalidMetadata(#[from] garde::Report),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl SubmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Multipart(e) => e.status(),
            Self::NotAnImage => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::MissingImage | Self::InvalidQuality(_) | Self::InvalidMetadata(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Ledger(LedgerError::Full(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Split an upload into a validated form and the raw image bytes.
async fn read_upload(multipart: &mut Multipart) -> Result<(UploadForm, Bytes), SubmissionError> {
    let mut form = UploadForm::default();
    let mut payload: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let data = field.bytes().await?;
                image::guess_format(&data).map_err(|_| SubmissionError::NotAnImage)?;
                payload = Some(data);
            }
            "name" => form.name = field.text().await?,
            "price" => form.price = field.text().await?,
            "url" => form.url = field.text().await?,
            "description" => form.description = Some(field.text().await?),
            "quality" => {
                let raw = field.text().await?;
                form.quality = QualityTier::from_str(raw.trim())
                    .map_err(|_| SubmissionError::InvalidQuality(raw))?;
            }
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let payload = payload.ok_or(SubmissionError::MissingImage)?;
    form.validate()?;
    Ok((form, payload))
}

/// POST /upload: Submit a product image and metadata for video generation.
pub async fn upload_product(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, StatusCode> {
    let submit = async {
        let (form, image) = read_upload(&mut multipart).await?;
        let input = form.into_input();
        let quality = input.quality;
        let ahead = state.queue.queue_depth() + state.queue.in_flight();
        let job_id = state.dispatcher.accept(input, Arc::from(image.as_ref()))?;
        Ok::<_, SubmissionError>((job_id, quality, ahead))
    };

    let (job_id, quality, ahead) = submit.await.map_err(|e| {
        tracing::warn!(error = %e, "Upload rejected");
        e.status()
    })?;

    Ok(Json(UploadResponse {
        job_id,
        status: JobStatus::Queued.to_string(),
        estimated_time_secs: estimate_seconds(quality, ahead, state.workers.size()),
        message: "Video generation started".to_string(),
    }))
}

/// GET /status/{job_id}: Latest state of a job, partial artifacts included.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job_id = Uuid::parse_str(&job_id).map_err(|_| StatusCode::NOT_FOUND)?;
    let record = state.ledger.get(job_id).map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(JobStatusResponse::from(record)))
}

/// GET /download/{job_id}/{format}: Stored video for any recorded artifact of a job
/// that has not failed.
pub async fn download_video(
    State(state): State<AppState>,
    Path((job_id, format)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let job_id = Uuid::parse_str(&job_id).map_err(|_| StatusCode::NOT_FOUND)?;
    let record = state.ledger.get(job_id).map_err(|_| StatusCode::NOT_FOUND)?;
    if record.status == JobStatus::Failed {
        return Err(StatusCode::NOT_FOUND);
    }
    let artifact = record
        .artifacts
        .iter()
        .find(|a| a.format == format)
        .ok_or(StatusCode::NOT_FOUND)?;

    let bytes = state.store.fetch(&artifact.reference).await.map_err(|e| match e {
        CollaboratorError::NotFound(_) => StatusCode::NOT_FOUND,
        other => {
            tracing::error!(job_id = %job_id, format = %format, error = %other, "Artifact read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    let disposition = format!("attachment; filename=\"{job_id}_{format}.mp4\"");
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
