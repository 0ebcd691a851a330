//! Job lifecycle manager.
//!
//! Owns the pipeline configuration, the injected [`JobRegistry`] and the
//! host monitor, and exposes the operations the HTTP layer calls. Every
//! terminal transition goes through the per-job lock in the registry, so a
//! cancel racing a natural exit records exactly one outcome.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use crate::config::PipelineConfig;
use crate::errors::LaunchResult;
use crate::models::{AnalysisParams, JobRecord, JobStatus, PipelineDiagnostics, SystemStatus};
use crate::worker::{spawn_watcher, WatchContext};
use super::launcher::{self, LaunchPlan, LaunchedProcess};
use super::process_tree::{kill_tree, KillError};
use super::registry::{lock, JobRegistry, SharedEntry, Termination};
use super::system::SystemMonitor;

/// Terminates a job's process tree; returns how many processes were signalled.
pub type TreeKiller = fn(u32) -> Result<usize, KillError>;

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: PipelineConfig,
    registry: JobRegistry,
    monitor: SystemMonitor,
    killer: TreeKiller,
}

impl JobManager {
    pub fn new(config: PipelineConfig, registry: JobRegistry) -> Self {
        Self::with_killer(config, registry, kill_tree)
    }

    /// Like [`JobManager::new`] with a different way of terminating process trees.
    pub fn with_killer(config: PipelineConfig, registry: JobRegistry, killer: TreeKiller) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                registry,
                monitor: SystemMonitor::new(),
                killer,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    /// Creates a job and starts the pipeline for it.
    ///
    /// Always returns an id. Precondition and spawn failures leave the job
    /// in the registry as `failed` rather than being returned as errors.
    pub async fn submit_job(
        &self,
        image_path: impl AsRef<Path>,
        params: AnalysisParams,
    ) -> (String, JobRecord) {
        let config = &self.inner.config;
        let job_id = Uuid::new_v4().to_string();
        let input_path = launcher::absolute(image_path.as_ref());
        let output_dir = launcher::output_dir_for(config, &job_id);

        let record = JobRecord::new(
            job_id.clone(),
            params,
            input_path.display().to_string(),
            output_dir.display().to_string(),
        );
        let start_time = record.start_time;
        let entry = self.inner.registry.insert(record);

        let plan = launcher::build_plan(config, &input_path, &output_dir, &params);
        lock(&entry).set_command(plan.command_line());
        tracing::info!("Submitted job {} for {}", job_id, input_path.display());

        match self.launch(&job_id, &entry, &input_path, &output_dir, &params, &plan).await {
            Ok(Some(process)) => {
                spawn_watcher(
                    WatchContext {
                        job_id: job_id.clone(),
                        entry: entry.clone(),
                        output_dir,
                        start_time,
                        poll_interval: Duration::from_millis(config.progress_poll_interval_ms.max(1)),
                    },
                    process,
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Job {} failed to start: {}", job_id, e);
                lock(&entry).finish(Termination::Failed(e.to_string()));
            }
        }

        let record = lock(&entry).snapshot();
        (job_id, record)
    }

    async fn launch(
        &self,
        job_id: &str,
        entry: &SharedEntry,
        input_path: &Path,
        output_dir: &Path,
        params: &AnalysisParams,
        plan: &LaunchPlan,
    ) -> LaunchResult<Option<LaunchedProcess>> {
        let config = &self.inner.config;

        launcher::check_inputs(config, input_path, params)?;
        launcher::probe_tool(&config.executable).await?;
        // The version probe can take seconds; the job may have been cleaned up since
        if lock(entry).status() != JobStatus::Starting {
            tracing::info!("Job {} was stopped before launch", job_id);
            return Ok(None);
        }
        launcher::create_output_dir(output_dir).await?;

        tracing::info!("Starting pipeline command: {}", plan.command_line());
        tracing::debug!("Working directory: {}", plan.working_dir.display());
        let process = launcher::spawn(plan)?;

        if !lock(entry).attach_process(process.pid) {
            tracing::warn!("Job {} left the starting state before its process attached", job_id);
            if let Err(e) = self.kill(process.pid).await {
                tracing::error!("Failed to stop the process of job {}: {}", job_id, e);
            }
            if let Err(e) = tokio::fs::remove_dir_all(output_dir).await {
                tracing::warn!("Error removing output directory {}: {}", output_dir.display(), e);
            }
            return Ok(None);
        }

        tracing::info!("Job {} started with PID {}", job_id, process.pid);
        Ok(Some(process))
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobRecord> {
        self.inner.registry.snapshot(job_id)
    }

    pub fn list_jobs(&self) -> BTreeMap<String, JobRecord> {
        self.inner.registry.snapshot_all()
    }

    /// Kills a running job's whole process tree and marks it cancelled.
    ///
    /// Returns false for unknown or non-running jobs, for jobs whose process
    /// already exited, and when the kill itself failed (the job is then
    /// marked failed).
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let Some(entry) = self.inner.registry.get(job_id) else {
            tracing::debug!("Cancel requested for unknown job {}", job_id);
            return false;
        };

        let process = {
            let mut entry = lock(&entry);
            match entry.begin_cancel() {
                Some(process) => process,
                None => {
                    tracing::debug!("Job {} is not cancellable ({:?})", job_id, entry.status());
                    return false;
                }
            }
        };

        // Walking the process table blocks; the job lock is not held meanwhile
        let killer = self.inner.killer;
        let task_entry = entry.clone();
        let task_job_id = job_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            let result = killer(process.pid);
            let mut entry = lock(&task_entry);
            match result {
                Ok(killed) => {
                    tracing::info!("Cancelled job {} ({} process(es) killed)", task_job_id, killed);
                    entry.resolve_cancel(Ok(()))
                }
                Err(e) => {
                    tracing::error!("Failed to cancel job {}: {}", task_job_id, e);
                    entry.resolve_cancel(Err(e.to_string()))
                }
            }
        })
        .await;

        match outcome {
            Ok(cancelled) => cancelled,
            Err(e) => {
                tracing::error!("Cancel of job {} panicked: {}", job_id, e);
                lock(&entry).resolve_cancel(Err(format!("cancel panicked: {}", e)))
            }
        }
    }

    async fn kill(&self, pid: u32) -> Result<usize, String> {
        let killer = self.inner.killer;
        match tokio::task::spawn_blocking(move || killer(pid)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Removes a job's output directory and forgets the job. A job that is
    /// still running is cancelled first; one still starting is cancelled
    /// before its process can attach.
    pub async fn cleanup_job(&self, job_id: &str) -> bool {
        let Some(entry) = self.inner.registry.get(job_id) else {
            return false;
        };

        let status = {
            let mut entry = lock(&entry);
            if entry.status() == JobStatus::Starting && entry.finish(Termination::Cancelled) {
                tracing::info!("Cancelled job {} before it started", job_id);
            }
            entry.status()
        };
        if status == JobStatus::Running {
            self.cancel_job(job_id).await;
        }

        let output_dir = PathBuf::from(&lock(&entry).record().output_dir);
        if output_dir.exists() {
            match tokio::fs::remove_dir_all(&output_dir).await {
                Ok(()) => tracing::info!("Removed output directory {}", output_dir.display()),
                Err(e) => tracing::warn!(
                    "Error cleaning up results directory {}: {}",
                    output_dir.display(),
                    e
                ),
            }
        }

        self.inner.registry.remove(job_id);
        tracing::info!("Cleaned up job {}", job_id);
        true
    }

    pub fn active_job_count(&self) -> usize {
        self.inner.registry.count_with_status(JobStatus::Running)
    }

    pub fn system_status(&self) -> SystemStatus {
        self.inner.monitor.sample(self.active_job_count())
    }

    /// Reports whether the pieces the pipeline needs are where the
    /// configuration says they are.
    pub fn diagnostics(&self) -> PipelineDiagnostics {
        let config = &self.inner.config;
        let tool_path = resolve_executable(&config.executable);

        PipelineDiagnostics {
            tool_available: tool_path.is_some(),
            tool_path,
            pipeline_dir: config.pipeline_dir.clone(),
            pipeline_dir_exists: config.pipeline_dir.is_dir(),
            definition_exists: config.definition_path().is_file(),
            model_exists: config.model_artifact_path().exists(),
            results_dir: launcher::absolute(&config.results_dir),
            current_working_dir: std::env::current_dir().ok(),
        }
    }
}

// Same lookup the OS does for a bare program name
fn resolve_executable(executable: &str) -> Option<PathBuf> {
    let candidate = Path::new(executable);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(executable))
        .find(|full| full.is_file())
}
