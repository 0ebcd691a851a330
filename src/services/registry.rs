//! In-memory job registry.
//!
//! Each job lives behind its own mutex so that the watcher and a concurrent
//! `cancel` serialize on the terminal transition for that job only. The map
//! lock is held just long enough to insert, look up or remove an entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use chrono::{DateTime, Utc};
use crate::models::{JobRecord, JobResults, JobStatus, PipelineLogSummary};

/// Upper bound on captured pipeline output kept per job (10 MiB).
pub const MAX_CAPTURED_BYTES: usize = 10 * 1024 * 1024;

/// Highest progress a job can report before it has actually completed.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

/// Reference to the live subprocess. Internal only: it has no Serialize impl
/// and never leaves the registry.
#[derive(Debug, Clone, Copy)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// Outcome of a terminal transition.
pub enum Termination {
    Completed(JobResults),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
pub struct JobEntry {
    record: JobRecord,
    process: Option<ProcessHandle>,
    // Set while a cancel is signalling the tree outside this lock
    cancelling: bool,
}

pub type SharedEntry = Arc<Mutex<JobEntry>>;

impl JobEntry {
    pub fn new(record: JobRecord) -> Self {
        Self { record, process: None, cancelling: false }
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn status(&self) -> JobStatus {
        self.record.status
    }

    /// The only way a record leaves the registry: a clone without the handle.
    pub fn snapshot(&self) -> JobRecord {
        self.record.clone()
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.process
    }

    pub fn set_command(&mut self, command: String) {
        self.record.command = command;
    }

    // starting -> running, once the OS has handed us a pid
    pub fn attach_process(&mut self, pid: u32) -> bool {
        if self.record.status != JobStatus::Starting {
            return false;
        }
        self.process = Some(ProcessHandle { pid });
        self.record.pid = Some(pid);
        self.record.status = JobStatus::Running;
        true
    }

    /// The process has been reaped. Its pid may be reused from here on, so
    /// the handle is dropped and the job can no longer be cancelled.
    pub fn process_exited(&mut self, code: i32) {
        self.process = None;
        self.set_exit_code(code);
    }

    /// Claims the job for cancellation and hands out the handle to signal.
    /// None if the job is not running, its process already exited, or
    /// another cancel is in flight.
    pub fn begin_cancel(&mut self) -> Option<ProcessHandle> {
        if self.record.status != JobStatus::Running || self.cancelling {
            return None;
        }
        let handle = self.process?;
        self.cancelling = true;
        Some(handle)
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling
    }

    /// Records the outcome of a cancel started with [`begin_cancel`].
    /// Returns true only when the job ended up cancelled.
    ///
    /// [`begin_cancel`]: JobEntry::begin_cancel
    pub fn resolve_cancel(&mut self, outcome: Result<(), String>) -> bool {
        self.cancelling = false;
        match outcome {
            Ok(()) => self.finish(Termination::Cancelled),
            Err(message) => {
                self.finish(Termination::Failed(message));
                false
            }
        }
    }

    /// Applies a progress estimate. Progress only moves forward while the
    /// job is running and stays below 100 until completion.
    pub fn bump_progress(&mut self, estimate: u8) -> bool {
        if self.record.status != JobStatus::Running {
            return false;
        }
        let next = estimate.min(MAX_RUNNING_PROGRESS).max(self.record.progress);
        let changed = next != self.record.progress;
        self.record.progress = next;
        changed
    }

    pub fn append_output(&mut self, line: &str) {
        let output = &mut self.record.captured_output;
        if output.len() + line.len() + 1 > MAX_CAPTURED_BYTES {
            return;
        }
        output.push_str(line);
        output.push('\n');
    }

    pub fn set_exit_code(&mut self, code: i32) {
        if self.record.exit_code.is_none() {
            self.record.exit_code = Some(code);
        }
    }

    pub fn set_log_summary(&mut self, summary: PipelineLogSummary) {
        self.record.log_summary = Some(summary);
    }

    /// Moves the job into a terminal state. Returns false (and changes
    /// nothing) if some other writer got there first or a cancel is still
    /// in flight.
    pub fn finish(&mut self, termination: Termination) -> bool {
        self.finish_at(termination, Utc::now())
    }

    pub fn finish_at(&mut self, termination: Termination, end_time: DateTime<Utc>) -> bool {
        if self.record.status.is_terminal() || self.cancelling {
            return false;
        }

        self.process = None;
        self.record.end_time = Some(end_time);
        match termination {
            Termination::Completed(results) => {
                self.record.status = JobStatus::Completed;
                self.record.progress = 100;
                self.record.results = Some(results);
            }
            Termination::Failed(message) => {
                self.record.status = JobStatus::Failed;
                self.record.error_message = Some(message);
            }
            Termination::Cancelled => {
                self.record.status = JobStatus::Cancelled;
            }
        }
        true
    }
}

/// Locks a job entry. A poisoned lock still holds a consistent record since
/// every mutation above is a plain field assignment.
pub fn lock(entry: &Mutex<JobEntry>) -> MutexGuard<'_, JobEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, SharedEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: JobRecord) -> SharedEntry {
        let id = record.id.clone();
        let entry = Arc::new(Mutex::new(JobEntry::new(record)));
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry.clone());
        entry
    }

    pub fn get(&self, job_id: &str) -> Option<SharedEntry> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    pub fn remove(&self, job_id: &str) -> Option<SharedEntry> {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id)
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobRecord> {
        self.get(job_id).map(|entry| lock(&entry).snapshot())
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, JobRecord> {
        // Clone the handles first so no job lock is taken under the map lock
        let entries: Vec<SharedEntry> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        entries
            .iter()
            .map(|entry| {
                let record = lock(entry).snapshot();
                (record.id.clone(), record)
            })
            .collect()
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        let entries: Vec<SharedEntry> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        entries.iter().filter(|entry| lock(entry).status() == status).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
