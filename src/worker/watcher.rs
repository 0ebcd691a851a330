use std::path::PathBuf;
use chrono::{DateTime, Utc};
use tokio::time::{Duration, MissedTickBehavior};
use crate::services::launcher::{LaunchedProcess, OutputEvent};
use crate::services::process_tree::kill_tree;
use crate::services::progress::{estimate_from_line, estimate_from_output_dir, summarize_log};
use crate::services::registry::{lock, SharedEntry, Termination};
use crate::services::results::extract_results;

// How long to keep reading buffered output after the process has exited
const STREAM_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Everything a watcher needs to know about the job it owns.
pub struct WatchContext {
    pub job_id: String,
    pub entry: SharedEntry,
    pub output_dir: PathBuf,
    pub start_time: DateTime<Utc>,
    pub poll_interval: Duration,
}

/// Spawns the watcher for a freshly launched job together with a supervisor
/// that turns a watcher panic into a failed job.
pub fn spawn_watcher(ctx: WatchContext, process: LaunchedProcess) {
    let job_id = ctx.job_id.clone();
    let entry = ctx.entry.clone();

    let handle = tokio::spawn(watch_job(ctx, process));

    tokio::spawn(async move {
        if let Err(e) = handle.await {
            tracing::error!("Watcher for job {} panicked: {}", job_id, e);
            let process = lock(&entry).process();
            if let Some(process) = process {
                stop_tree(&job_id, process.pid).await;
            }
            lock(&entry).finish(Termination::Failed(format!("watcher panicked: {}", e)));
        }
    });
}

async fn watch_job(ctx: WatchContext, process: LaunchedProcess) {
    let LaunchedProcess { mut child, pid, mut output } = process;
    tracing::info!("Watching job {} (pid {})", ctx.job_id, pid);

    let mut ticker = tokio::time::interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stream_open = true;

    // Drain output until the child exits, sampling the output dir on every tick
    let exit = loop {
        tokio::select! {
            event = output.recv(), if stream_open => match event {
                Some(event) => handle_output(&ctx, event, pid).await,
                None => stream_open = false,
            },
            status = child.wait() => break status,
            _ = ticker.tick() => sample_output_dir(&ctx),
        }
    };

    let status = match exit {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("Failed to wait for job {}: {}", ctx.job_id, e);
            lock(&ctx.entry).finish(Termination::Failed(format!("failed to wait for process: {}", e)));
            stop_tree(&ctx.job_id, pid).await;
            return;
        }
    };

    // Signals have no exit code
    let code = status.code().unwrap_or(-1);
    // Reaped: the pid is no longer ours to signal
    lock(&ctx.entry).process_exited(code);

    // Lines still in the pipes when the process exited
    let drained = tokio::time::timeout(STREAM_DRAIN_GRACE, async {
        while let Some(event) = output.recv().await {
            handle_output(&ctx, event, pid).await;
        }
    })
    .await;
    if drained.is_err() {
        // Workers of the finished run still hold the pipe
        tracing::warn!("Output of job {} still open after exit, stopping leftover processes", ctx.job_id);
        stop_tree(&ctx.job_id, pid).await;
    }

    finalize(&ctx, status.success(), code);
}

async fn handle_output(ctx: &WatchContext, event: OutputEvent, pid: u32) {
    match event {
        OutputEvent::Line(line) => {
            let estimate = estimate_from_line(&line);
            let mut entry = lock(&ctx.entry);
            entry.append_output(&line);
            if entry.bump_progress(estimate) {
                tracing::debug!("Job {} progress {}% from output", ctx.job_id, entry.record().progress);
            }
        }
        OutputEvent::ReadError(e) => {
            // Without its output the job can no longer be observed, so stop it
            let failed = lock(&ctx.entry)
                .finish(Termination::Failed(format!("failed to read process output: {}", e)));
            if failed {
                tracing::error!("Job {} failed reading output: {}", ctx.job_id, e);
                stop_tree(&ctx.job_id, pid).await;
            }
        }
    }
}

// The process table walk blocks, so it runs off the async workers
async fn stop_tree(job_id: &str, pid: u32) {
    match tokio::task::spawn_blocking(move || kill_tree(pid)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!("Failed to stop processes of job {}: {}", job_id, e),
        Err(e) => tracing::error!("Stopping processes of job {} panicked: {}", job_id, e),
    }
}

fn sample_output_dir(ctx: &WatchContext) {
    let last_known = lock(&ctx.entry).record().progress;
    // Filesystem inspection happens outside the job lock
    let estimate = estimate_from_output_dir(&ctx.output_dir, last_known);
    let mut entry = lock(&ctx.entry);
    if entry.bump_progress(estimate) {
        tracing::debug!("Job {} progress {}% from output dir", ctx.job_id, entry.record().progress);
    }
}

fn finalize(ctx: &WatchContext, success: bool, code: i32) {
    let end_time = Utc::now();

    let results = if success {
        Some(extract_results(&ctx.output_dir, ctx.start_time, Some(end_time)))
    } else {
        None
    };

    let mut entry = lock(&ctx.entry);
    let summary = summarize_log(&entry.record().captured_output);
    let first_error = summary.errors.first().cloned();
    entry.set_log_summary(summary);

    let termination = match results {
        Some(results) => Termination::Completed(results),
        None => {
            let message = match first_error {
                Some(line) => format!("process exited with code {}: {}", code, line),
                None => format!("process exited with code {}", code),
            };
            Termination::Failed(message)
        }
    };

    let final_status = match &termination {
        Termination::Completed(_) => "completed",
        Termination::Failed(_) => "failed",
        Termination::Cancelled => "cancelled",
    };

    if entry.finish_at(termination, end_time) {
        if code == 0 {
            tracing::info!("Job {} {} (exit code {})", ctx.job_id, final_status, code);
        } else {
            tracing::error!("Job {} {} (exit code {})", ctx.job_id, final_status, code);
        }
    } else if entry.is_cancelling() {
        tracing::debug!("Job {} exited with {} while being cancelled", ctx.job_id, code);
    } else {
        tracing::debug!(
            "Job {} already {:?} when its process exited with {}",
            ctx.job_id,
            entry.status(),
            code
        );
    }
}
