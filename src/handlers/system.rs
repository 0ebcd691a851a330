use axum::{extract::State, response::Json};
use crate::models::{PipelineDiagnostics, SystemStatus};
use crate::state::AppState;

pub async fn system_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(state.manager.system_status())
}

pub async fn debug_system(State(state): State<AppState>) -> Json<PipelineDiagnostics> {
    Json(state.manager.diagnostics())
}
