use axum::body::Bytes;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use image::{ImageError, ImageReader, Limits};
use std::io::Cursor;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::models::detection::{JobStatusResponse, SubmitResponse};
use crate::models::error_code::ErrorCode;
use crate::models::job::{JobStage, JobStatus, JobUpdate, NewJob};
use crate::routes::error::ApiError;
use crate::services::queue::DetectionTask;
use crate::services::storage::image_key;

/// Largest width or height accepted for a shelf photo.
const MAX_DIMENSION_PX: u32 = 12_000;
/// Decoder allocation ceiling for the validation decode.
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// A validated upload, ready to store.
struct Upload {
    bytes: Vec<u8>,
    content_type: &'static str,
}

/// POST /api/v1/detections: upload a bookshelf photo for detection.
///
/// Validation happens before any job is created. The pipeline itself runs in
/// the worker; callers poll for the result.
pub async fn submit_detection(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("image") {
            upload = Some(read_image(field, state.max_image_bytes).await?);
            break;
        }
    }
    let upload = upload.ok_or_else(|| ApiError::coded(StatusCode::BAD_REQUEST, ErrorCode::InvalidImage))?;

    let key = image_key(&user.owner_id, &Uuid::new_v4().to_string(), upload.content_type);
    state
        .storage
        .upload(&key, &upload.bytes, upload.content_type)
        .await
        .map_err(|e| {
            tracing::error!(owner_id = %user.owner_id, error = %e, "Image upload failed");
            ApiError::coded(StatusCode::SERVICE_UNAVAILABLE, ErrorCode::ServiceUnavailable)
        })?;

    let job = state
        .jobs
        .create(NewJob {
            owner_id: user.owner_id.clone(),
            image_ref: key.clone(),
        })
        .await
        .map_err(|e| {
            tracing::error!(owner_id = %user.owner_id, error = %e, "Failed to create detection job");
            ApiError::internal(ErrorCode::DatabaseError)
        })?;
    metrics::counter!("detection_jobs_total").increment(1);

    let task = DetectionTask {
        job_id: job.id,
        owner_id: user.owner_id,
        household_id: user.household_id,
        image_key: key,
        content_type: upload.content_type.to_string(),
    };

    if let Err(e) = state.dispatcher.dispatch(&task).await {
        tracing::error!(job_id = %job.id, error = %e, "Failed to dispatch detection job");
        let code = ErrorCode::ServiceUnavailable;
        let failed = JobUpdate::failed(JobStage::Failed, code, format!("{} ({})", code.user_message(), e));
        if let Err(e) = state.jobs.update(job.id, failed).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record dispatch failure");
        }
        metrics::counter!("detection_jobs_failed", "code" => code.to_string()).increment(1);
        return Err(ApiError::coded(StatusCode::SERVICE_UNAVAILABLE, code));
    }

    tracing::info!(job_id = %job.id, image_key = %task.image_key, "Detection job queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: JobStatus::Processing,
            progress: 0,
        }),
    ))
}

/// GET /api/v1/detections/{job_id}: poll a detection job.
pub async fn get_detection(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .jobs
        .get(job_id, &user.owner_id)
        .await
        .map_err(|e| {
            tracing::error!(%job_id, error = %e, "Failed to load detection job");
            ApiError::internal(ErrorCode::DatabaseError)
        })?
        .ok_or_else(ApiError::not_found)?;

    Ok(Json(job.into()))
}

async fn read_image(field: Field<'_>, max_bytes: usize) -> Result<Upload, ApiError> {
    if let Some(declared) = field.content_type() {
        if !declared.starts_with("image/") {
            return Err(ApiError::coded(StatusCode::UNSUPPORTED_MEDIA_TYPE, ErrorCode::InvalidImage));
        }
    }

    let bytes = field.bytes().await.map_err(multipart_error)?;
    if bytes.is_empty() {
        return Err(ApiError::coded(StatusCode::BAD_REQUEST, ErrorCode::InvalidImage));
    }
    if bytes.len() > max_bytes {
        return Err(ApiError::coded(StatusCode::PAYLOAD_TOO_LARGE, ErrorCode::ImageTooLarge));
    }

    let content_type = match image::guess_format(&bytes) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::WebP) => "image/webp",
        _ => {
            return Err(ApiError::coded(StatusCode::UNSUPPORTED_MEDIA_TYPE, ErrorCode::InvalidImage));
        }
    };

    // Header sniffing accepts truncated files; a full decode catches them.
    let decoded = bytes.clone();
    tokio::task::spawn_blocking(move || check_decodes(&decoded))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Image validation task failed");
            ApiError::internal(ErrorCode::UnexpectedError)
        })??;

    Ok(Upload {
        bytes: bytes.to_vec(),
        content_type,
    })
}

fn check_decodes(bytes: &[u8]) -> Result<(), ApiError> {
    let corrupt = || ApiError::coded(StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::CorruptImage);

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION_PX);
    limits.max_image_height = Some(MAX_DIMENSION_PX);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|_| corrupt())?;
    reader.limits(limits);

    match reader.decode() {
        Ok(_) => Ok(()),
        Err(ImageError::Limits(_)) => Err(ApiError::coded(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::ImageTooLarge,
        )),
        Err(_) => Err(corrupt()),
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::coded(StatusCode::PAYLOAD_TOO_LARGE, ErrorCode::ImageTooLarge)
    } else {
        ApiError::coded(StatusCode::BAD_REQUEST, ErrorCode::InvalidImage)
    }
}
