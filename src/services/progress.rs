//! Best-effort progress estimation.
//!
//! The pipeline tool exposes no authoritative progress signal, so both
//! estimators map observable milestones to fixed checkpoints. They are
//! approximate and will drift if the tool changes its output format or
//! file layout. Neither ever fails.

use std::io;
use std::path::Path;
use crate::models::PipelineLogSummary;
use super::results::{prediction_images, PREDICTIONS_DIR, RESULTS_FILE};

pub const PIPELINE_INFO_DIR: &str = "pipeline_info";

/// Checkpoints matched against a lowercased output line, most specific first.
const OUTPUT_CHECKPOINTS: &[(&str, u8)] = &[
    ("workflow completed", 100),
    ("completed", 80),
    ("running", 30),
    ("executor", 10),
];

/// Maps one line of tool output to a checkpoint, or 0 if nothing matches.
/// Callers keep the max against what they already have.
pub fn estimate_from_line(line: &str) -> u8 {
    let line = line.to_lowercase();
    OUTPUT_CHECKPOINTS
        .iter()
        .find(|(needle, _)| line.contains(needle))
        .map(|(_, progress)| *progress)
        .unwrap_or(0)
}

/// Inspects the job's output directory. Returns `last_known` when the
/// directory cannot be inspected.
pub fn estimate_from_output_dir(output_dir: &Path, last_known: u8) -> u8 {
    match inspect_output_dir(output_dir) {
        Ok(progress) => progress,
        Err(e) => {
            tracing::debug!("Progress inspection of {} failed: {}", output_dir.display(), e);
            last_known
        }
    }
}

fn inspect_output_dir(output_dir: &Path) -> io::Result<u8> {
    let mut progress = 0;

    if output_dir.join(PIPELINE_INFO_DIR).exists() {
        progress = 20;
    }

    let predictions_dir = output_dir.join(PREDICTIONS_DIR);
    if !predictions_dir.is_dir() {
        return Ok(progress);
    }
    progress = 50;

    if prediction_images(&predictions_dir)?.is_empty() {
        return Ok(progress);
    }
    progress = 80;

    if predictions_dir.join(RESULTS_FILE).exists() {
        progress = 100;
    }
    Ok(progress)
}

/// Pulls task counts, the current process and error lines out of captured
/// Nextflow output.
pub fn summarize_log(output: &str) -> PipelineLogSummary {
    let mut summary = PipelineLogSummary::default();

    for line in output.lines() {
        // e.g. "[ab/123456] process > PREDICT (1) [100%] 1 of 1 ✔"
        if let Some((done, total)) = parse_task_counts(line) {
            summary.completed_processes += done;
            summary.total_processes += total;
        }

        if let Some(rest) = line.split("process > ").nth(1) {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
                .collect();
            if !name.is_empty() {
                summary.current_process = Some(name);
            }
        }

        if line.contains("ERROR") {
            summary.errors.push(line.trim().to_string());
        }
    }

    summary
}

fn parse_task_counts(line: &str) -> Option<(u32, u32)> {
    let (_, after_bar) = line.split_once('|')
        .or_else(|| line.rsplit_once(']'))?;
    let mut words = after_bar.split_whitespace().skip_while(|w| w.parse::<u32>().is_err());
    let done = words.next()?.parse().ok()?;
    if words.next()? != "of" {
        return None;
    }
    let total = words
        .next()?
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()?;
    Some((done, total))
}
