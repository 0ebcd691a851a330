mod job;
mod system;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use crate::state::AppState;

pub use job::{process_upload, get_job_status, cancel_job, delete_job, list_jobs, download_result};
pub use system::{system_status, debug_system};

// Create router with all routes
pub fn build_router(state: AppState, max_file_size: usize) -> Router {
    Router::new()
        // Job routes
        .route("/upload", post(process_upload))
        .route("/api/jobs", get(list_jobs))
        .route("/api/job/:job_id/status", get(get_job_status))
        .route("/api/job/:job_id/cancel", post(cancel_job))
        .route("/api/job/:job_id", delete(delete_job))
        .route("/download/:job_id/:filename", get(download_result))

        // System routes
        .route("/api/system/status", get(system_status))
        .route("/debug/system", get(debug_system))

        // File upload limits from config
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_file_size))
        .layer(TraceLayer::new_for_http())

        .with_state(state)
}
