use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use super::params::AnalysisParams;

// Lifecycle: starting -> running -> {completed | failed | cancelled}, or starting -> failed
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Summary assembled from the pipeline's output directory after a clean exit.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct JobResults {
    pub detected_objects: u32,
    pub prediction_images: Vec<String>,
    pub results_file: Option<String>,
    pub processing_time: String,
    pub input_image: Option<String>,
    pub reported_processing_time: Option<String>,
}

/// What the captured pipeline output says about its own progress.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PipelineLogSummary {
    pub completed_processes: u32,
    pub total_processes: u32,
    pub current_process: Option<String>,
    pub errors: Vec<String>,
}

/// Exportable view of a job. Holds plain data only; the live process handle
/// is kept next to it in the registry and never ends up in here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub params: AnalysisParams,
    pub command: String,
    pub input_path: String,
    pub output_dir: String,
    pub pid: Option<u32>,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub captured_output: String,
    pub error_message: Option<String>,
    pub log_summary: Option<PipelineLogSummary>,
    pub results: Option<JobResults>,
}

impl JobRecord {
    pub fn new(id: String, params: AnalysisParams, input_path: String, output_dir: String) -> Self {
        Self {
            id,
            status: JobStatus::Starting,
            params,
            command: String::new(),
            input_path,
            output_dir,
            pid: None,
            progress: 0,
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            captured_output: String::new(),
            error_message: None,
            log_summary: None,
            results: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Starting.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        let value = serde_json::to_value(JobStatus::Cancelled).unwrap();
        assert_eq!(value, serde_json::json!("cancelled"));
    }

    #[test]
    fn fresh_record_is_starting_without_end_time() {
        let record = JobRecord::new(
            "abc".into(),
            AnalysisParams::default(),
            "/tmp/in.png".into(),
            "/tmp/results_abc".into(),
        );
        assert_eq!(record.status, JobStatus::Starting);
        assert_eq!(record.progress, 0);
        assert!(record.end_time.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "starting");
        assert!(json.get("process").is_none());
    }
}
