use crate::config::AnalysisDefaults;
use crate::models::AnalysisParams;
use crate::services::{JobManager, UploadStore};

// Application state shared between handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: JobManager,
    pub uploads: UploadStore,
    pub defaults: AnalysisParams,
}

impl AppState {
    pub fn new(manager: JobManager, uploads: UploadStore, defaults: &AnalysisDefaults) -> Self {
        Self {
            manager,
            uploads,
            defaults: AnalysisParams {
                score_threshold: defaults.score_threshold,
                mask_threshold: defaults.mask_threshold,
                class_count: defaults.class_count,
            },
        }
    }
}
