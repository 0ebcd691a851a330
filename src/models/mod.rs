mod job;
mod params;
mod system;

pub use job::{JobRecord, JobResults, JobStatus, PipelineLogSummary};
pub use params::AnalysisParams;
pub use system::{PipelineDiagnostics, SystemStatus};
