use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use crate::errors::AppError;

// The IntoResponse trait implementation converts AppError into a JSON error payload.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            // Unknown jobs keep the "not_found" status the front end polls for
            AppError::JobNotFound(job_id) => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "status": "not_found", "job_id": job_id })),
                )
                    .into_response();
            }

            AppError::JobNotCompleted(_) => StatusCode::CONFLICT,

            // Missing files are 404s, anything else on disk is on us
            AppError::File(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            AppError::File(_) => StatusCode::INTERNAL_SERVER_ERROR,

            AppError::Upload(_) => StatusCode::BAD_REQUEST,

            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
