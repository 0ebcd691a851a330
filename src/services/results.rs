//! Result extraction for jobs whose pipeline exited cleanly.
//!
//! Missing directories or files are not errors here: the pipeline already
//! succeeded, so whatever can be read is reported and the rest stays empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use crate::models::JobResults;

pub const PREDICTIONS_DIR: &str = "predictions";
pub const RESULTS_FILE: &str = "test_results.txt";

const PREDICTION_PATTERN: &str = "prediction_*";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];
const OBJECT_COUNT_LABELS: &[&str] = &["Detected objects:", "Objects detected:"];
const INPUT_IMAGE_LABEL: &str = "Input image:";
const PROCESSING_TIME_LABEL: &str = "Processing time:";

/// Lists `prediction_*` image files directly inside `dir`, sorted by name.
pub fn prediction_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let pattern = glob::Pattern::new(PREDICTION_PATTERN)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name_matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| pattern.matches(name));
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if name_matches && is_image {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Assembles the results summary for a finished job.
pub fn extract_results(
    output_dir: &Path,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
) -> JobResults {
    let mut results = JobResults {
        processing_time: format_elapsed(start_time, end_time),
        ..Default::default()
    };

    let predictions_dir = output_dir.join(PREDICTIONS_DIR);
    if !predictions_dir.is_dir() {
        tracing::warn!("No predictions directory in {}", output_dir.display());
        return results;
    }

    // Paths are reported relative to the results root so the web layer can link them
    let base = output_dir.parent().unwrap_or(output_dir);
    match prediction_images(&predictions_dir) {
        Ok(images) => {
            results.prediction_images = images
                .iter()
                .map(|path| path.strip_prefix(base).unwrap_or(path).display().to_string())
                .collect();
        }
        Err(e) => tracing::warn!("Failed to list predictions in {}: {}", predictions_dir.display(), e),
    }

    let results_file = predictions_dir.join(RESULTS_FILE);
    if results_file.is_file() {
        results.results_file = Some(
            results_file.strip_prefix(base).unwrap_or(&results_file).display().to_string(),
        );
        match fs::read_to_string(&results_file) {
            Ok(content) => apply_results_file(&content, &mut results),
            Err(e) => tracing::warn!("Failed to read {}: {}", results_file.display(), e),
        }
    }

    tracing::debug!(
        "Extracted {} prediction image(s), {} object(s) from {}",
        results.prediction_images.len(),
        results.detected_objects,
        output_dir.display()
    );
    results
}

// First object-count line wins; an unparsable count is 0
fn apply_results_file(content: &str, results: &mut JobResults) {
    let mut count_seen = false;

    for line in content.lines() {
        if !count_seen {
            if let Some(value) = value_after_any(line, OBJECT_COUNT_LABELS) {
                results.detected_objects = value.parse().unwrap_or(0);
                count_seen = true;
                continue;
            }
        }
        if results.input_image.is_none() {
            if let Some(value) = value_after_any(line, &[INPUT_IMAGE_LABEL]) {
                results.input_image = Some(value.to_string());
                continue;
            }
        }
        if results.reported_processing_time.is_none() {
            if let Some(value) = value_after_any(line, &[PROCESSING_TIME_LABEL]) {
                results.reported_processing_time = Some(value.to_string());
            }
        }
    }
}

fn value_after_any<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    labels.iter().find_map(|label| {
        line.find(label)
            .map(|idx| line[idx + label.len()..].trim())
    })
}

/// Formats `end - start` as `H:MM:SS`, or "Unknown" if there is no sane end.
pub fn format_elapsed(start_time: DateTime<Utc>, end_time: Option<DateTime<Utc>>) -> String {
    let Some(end_time) = end_time else {
        return "Unknown".to_string();
    };
    let elapsed = end_time.signed_duration_since(start_time);
    if elapsed < chrono::Duration::zero() {
        return "Unknown".to_string();
    }

    let secs = elapsed.num_seconds();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
