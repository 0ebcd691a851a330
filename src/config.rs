use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub upload: UploadConfig,
    pub analysis: AnalysisDefaults,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub pipeline_dir: PathBuf,
    pub executable: String,
    pub definition_file: String,
    pub model_path: PathBuf,   // relative paths resolve against pipeline_dir
    pub profile: String,
    pub results_dir: PathBuf,  // per-job output dirs live under here
    pub progress_poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub max_file_size: usize,  // 16MB in bytes
    pub upload_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub max_age_hours: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisDefaults {
    pub score_threshold: f64,
    pub mask_threshold: f64,
    pub class_count: u32,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl PipelineConfig {
    pub fn definition_path(&self) -> PathBuf {
        self.pipeline_dir.join(&self.definition_file)
    }

    pub fn model_artifact_path(&self) -> PathBuf {
        if self.model_path.is_absolute() {
            self.model_path.clone()
        } else {
            self.pipeline_dir.join(&self.model_path)
        }
    }
}
