//! Job service for running a microscopy image-analysis pipeline as an
//! external process and reporting its progress and results over HTTP.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod worker;

pub use crate::config::Config;
pub use crate::services::{JobManager, JobRegistry};
pub use crate::state::AppState;
