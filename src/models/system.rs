use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SystemStatus {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_usage_percent: f32,
    pub active_job_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct PipelineDiagnostics {
    pub tool_available: bool,
    pub tool_path: Option<PathBuf>,
    pub pipeline_dir: PathBuf,
    pub pipeline_dir_exists: bool,
    pub definition_exists: bool,
    pub model_exists: bool,
    pub results_dir: PathBuf,
    pub current_working_dir: Option<PathBuf>,
}
