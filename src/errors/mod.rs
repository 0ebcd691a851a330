// Error types shared by the job manager and the HTTP layer, built on thiserror.
use thiserror::Error;

pub mod launch;
pub mod response;

pub use launch::{LaunchError, LaunchResult};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} is not completed")]
    JobNotCompleted(String),

    // The #[from] attribute lets `?` turn an io::Error into AppError::File.
    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Custom result type
pub type AppResult<T> = Result<T, AppError>;
