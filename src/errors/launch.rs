use thiserror::Error;
use std::io;

/// Reasons a job can fail before its watcher ever runs.
///
/// The display text of each variant becomes the job's `error_message`.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("input not found: {0}")]
    InputNotFound(String),

    #[error("pipeline missing: {0}")]
    PipelineMissing(String),

    #[error("model missing: {0}")]
    ModelMissing(String),

    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),
}

pub type LaunchResult<T> = Result<T, LaunchError>;
