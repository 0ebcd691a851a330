//! Storage for uploaded images before they are handed to the pipeline.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use chrono::Utc;
use crate::config::UploadConfig;
use crate::errors::{AppError, AppResult};

#[derive(Clone, Debug)]
pub struct UploadStore {
    dir: PathBuf,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.upload_dir.clone(),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_allowed(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.allowed_extensions.contains(&ext.to_lowercase()))
    }

    /// Picks a fresh path for an upload, creating the upload directory if
    /// needed. The stored name is the sanitized original behind a timestamp.
    pub async fn reserve_path(&self, original_name: &str) -> AppResult<PathBuf> {
        let filename = sanitize_filename(original_name);
        if filename.is_empty() || !self.is_allowed(&filename) {
            return Err(AppError::Upload(format!("Invalid file type: {}", original_name)));
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            tracing::error!("Failed to create upload directory {}: {}", self.dir.display(), e);
            AppError::File(e)
        })?;

        // Timestamp plus a short random tag avoids collisions within one second
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let tag = &uuid::Uuid::new_v4().simple().to_string()[..8];
        let path = self.dir.join(format!("{}_{}_{}", timestamp, tag, filename));

        tracing::debug!("Reserved upload path: {}", path.display());
        Ok(path)
    }

    /// Deletes uploaded files older than `max_age`. Returns how many went.
    pub async fn purge_older_than(&self, max_age: Duration) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age > max_age {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Failed to remove old upload {}: {}", entry.path().display(), e),
                }
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} old upload(s) from {}", removed, self.dir.display());
        }
        Ok(removed)
    }
}

// Keeps the final path component and only characters safe in a file name
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}
