use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    response::{IntoResponse, Json, Response},
    http::{header, StatusCode},
    body::Body,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufReader, BufWriter},
};
use tokio_util::io::ReaderStream;
use serde_json::json;
use crate::errors::{AppError, AppResult};
use crate::models::{JobRecord, JobStatus};
use crate::services::results::PREDICTIONS_DIR;
use crate::services::uploads::sanitize_filename;
use crate::state::AppState;

pub async fn process_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut image_path: Option<PathBuf> = None;
    let mut params = state.defaults;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to get next field from multipart form: {}", e);
        AppError::Upload(format!("Failed to process form field: {}", e))
    })? {
        match field.name().unwrap_or("") {
            "file" => {
                image_path = Some(save_upload(&state, field).await?);
            }
            "score_threshold" => {
                params.score_threshold = parse_field_value(field).await?;
            }
            "mask_threshold" => {
                params.mask_threshold = parse_field_value(field).await?;
            }
            "class_count" => {
                params.class_count = parse_field_value(field).await?;
            }
            field_name => {
                tracing::warn!("Unexpected form field: {}", field_name);
            }
        }
    }

    let image_path = image_path.ok_or_else(|| AppError::Upload("No file selected".into()))?;
    params.validate().map_err(AppError::Upload)?;

    let (job_id, record) = state.manager.submit_job(&image_path, params).await;

    Ok(Json(json!({
        "job_id": job_id,
        "status": "started",
        "record": record,
    }))
    .into_response())
}

// Helper function to stream an uploaded file field to disk
async fn save_upload(state: &AppState, mut field: Field<'_>) -> AppResult<PathBuf> {
    let original_name = field
        .file_name()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::Upload("No file selected".into()))?
        .to_string();

    let path = state.uploads.reserve_path(&original_name).await?;

    let file = File::create(&path).await.map_err(|e| {
        tracing::error!("Failed to create file {}: {}", path.display(), e);
        AppError::File(e)
    })?;
    let mut writer = BufWriter::new(file);

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Upload(format!("Failed to read upload: {}", e)))?
    {
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;

    tracing::debug!("Saved upload {} -> {}", original_name, path.display());
    Ok(path)
}

// Helper function to parse form field values
async fn parse_field_value<T>(field: Field<'_>) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value = field.text().await
        .map_err(|e| AppError::Upload(format!("Failed to read field: {}", e)))?;

    value.trim().parse()
        .map_err(|e| AppError::Upload(format!(
            "Failed to parse field value '{}': {}",
            value, e
        )))
}

pub async fn get_job_status(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<JobRecord>> {
    tracing::debug!("Checking status for job: {}", job_id);

    let record = state
        .manager
        .get_job(&job_id)
        .ok_or(AppError::JobNotFound(job_id))?;

    Ok(Json(record))
}

pub async fn cancel_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let success = state.manager.cancel_job(&job_id).await;
    Json(json!({ "success": success, "job_id": job_id }))
}

pub async fn delete_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let success = state.manager.cleanup_job(&job_id).await;
    Json(json!({ "success": success, "job_id": job_id }))
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<BTreeMap<String, JobRecord>> {
    Json(state.manager.list_jobs())
}

pub async fn download_result(
    Path((job_id, filename)): Path<(String, String)>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    tracing::info!("Starting download of {} for job {}", filename, job_id);

    let record = state
        .manager
        .get_job(&job_id)
        .ok_or_else(|| AppError::JobNotFound(job_id.clone()))?;

    if record.status != JobStatus::Completed {
        return Err(AppError::JobNotCompleted(job_id));
    }

    // Only plain file names inside the predictions directory
    if filename.is_empty() || sanitize_filename(&filename) != filename {
        return Err(AppError::Upload(format!("Invalid file name: {}", filename)));
    }

    let file_path = PathBuf::from(&record.output_dir)
        .join(PREDICTIONS_DIR)
        .join(&filename);

    let file = File::open(&file_path).await.map_err(|e| {
        tracing::warn!("Failed to open {}: {}", file_path.display(), e);
        AppError::File(e)
    })?;
    let file_size = file.metadata().await?.len();

    // Stream the file chunk by chunk
    let stream = ReaderStream::new(BufReader::new(file));
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&filename))
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename))
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .body(body)
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            AppError::Internal(format!("Failed to build download response: {}", e))
        })
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

