//! Builds and starts the external pipeline process.
//!
//! Stdout and stderr are read by two forwarding tasks that push whole lines
//! into one channel, which the watcher consumes as a single merged stream.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use crate::config::PipelineConfig;
use crate::errors::{LaunchError, LaunchResult};
use crate::models::AnalysisParams;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// One item of the merged output stream.
#[derive(Debug)]
pub enum OutputEvent {
    Line(String),
    ReadError(String),
}

/// Fully resolved invocation of the pipeline tool.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchPlan {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct LaunchedProcess {
    pub child: Child,
    pub pid: u32,
    pub output: mpsc::Receiver<OutputEvent>,
}

/// Checks everything that can be checked without running the tool.
pub fn check_inputs(
    config: &PipelineConfig,
    input_path: &Path,
    params: &AnalysisParams,
) -> LaunchResult<()> {
    params.validate().map_err(LaunchError::InvalidParams)?;

    if !input_path.exists() {
        return Err(LaunchError::InputNotFound(input_path.display().to_string()));
    }

    let definition = config.definition_path();
    if !definition.is_file() {
        return Err(LaunchError::PipelineMissing(definition.display().to_string()));
    }

    let model = config.model_artifact_path();
    if !model.exists() {
        return Err(LaunchError::ModelMissing(model.display().to_string()));
    }

    Ok(())
}

/// Runs `<tool> -version` and requires a clean exit.
pub async fn probe_tool(executable: &str) -> LaunchResult<()> {
    let probe = Command::new(executable)
        .arg("-version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(VERSION_PROBE_TIMEOUT, probe)
        .await
        .map_err(|_| LaunchError::ToolUnavailable(format!("{} -version timed out", executable)))?
        .map_err(|e| LaunchError::ToolUnavailable(format!("{}: {}", executable, e)))?;

    if !output.status.success() {
        return Err(LaunchError::ToolUnavailable(format!(
            "{} -version exited with {}",
            executable, output.status
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    tracing::debug!("Pipeline tool available: {}", version.trim());
    Ok(())
}

pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Absolute output directory owned by one job.
pub fn output_dir_for(config: &PipelineConfig, job_id: &str) -> PathBuf {
    absolute(&config.results_dir).join(format!("results_{}", job_id))
}

pub fn build_plan(
    config: &PipelineConfig,
    input_path: &Path,
    output_dir: &Path,
    params: &AnalysisParams,
) -> LaunchPlan {
    let args = vec![
        "run".to_string(),
        config.definition_file.clone(),
        "-profile".to_string(),
        config.profile.clone(),
        "--mode".to_string(),
        "test".to_string(),
        "--test_image".to_string(),
        input_path.display().to_string(),
        "--outdir".to_string(),
        output_dir.display().to_string(),
        "--score_threshold".to_string(),
        params.score_threshold.to_string(),
        "--mask_threshold".to_string(),
        params.mask_threshold.to_string(),
        "--num_classes".to_string(),
        params.class_count.to_string(),
    ];

    LaunchPlan {
        program: config.executable.clone(),
        args,
        working_dir: config.pipeline_dir.clone(),
    }
}

pub async fn create_output_dir(output_dir: &Path) -> LaunchResult<()> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| LaunchError::OutputDir {
            path: output_dir.display().to_string(),
            source,
        })
}

/// Starts the process described by `plan` with its output wired into one channel.
pub fn spawn(plan: &LaunchPlan) -> LaunchResult<LaunchedProcess> {
    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .current_dir(&plan.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a cancel can reach every worker the tool forks
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(LaunchError::Spawn)?;

    // id() is only None once the child has been reaped, which cannot have happened yet
    let pid = child.id().unwrap_or_default();

    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, tx);
    }

    Ok(LaunchedProcess { child, pid, output: rx })
}

// Lossy decoding keeps the pipe drained even if the tool prints invalid UTF-8
fn forward_lines<R>(reader: R, tx: mpsc::Sender<OutputEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(OutputEvent::Line(line)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(OutputEvent::ReadError(e.to_string())).await;
                    break;
                }
            }
        }
    });
}
