#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::TempDir;
use gelscan::config::PipelineConfig;
use gelscan::models::{JobRecord, JobStatus};
use gelscan::services::manager::TreeKiller;
use gelscan::{JobManager, JobRegistry};

// Stand-in for the pipeline tool. The content of the input image selects
// what it does, so one script serves every test.
const FAKE_TOOL: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "nextflow version 23.04.1"
  exit 0
fi
IMAGE=""
OUTDIR=""
while [ $# -gt 0 ]; do
  case "$1" in
    --test_image) IMAGE="$2"; shift 2 ;;
    --outdir) OUTDIR="$2"; shift 2 ;;
    *) shift ;;
  esac
done
MODE=$(cat "$IMAGE")
echo "N E X T F L O W  ~  version 23.04.1"
echo "executor >  local (1)"
case "$MODE" in
  success)
    mkdir -p "$OUTDIR/pipeline_info" "$OUTDIR/predictions"
    echo "[ab/123456] process > PREDICT (1) | 1 of 1"
    : > "$OUTDIR/predictions/prediction_0.png"
    printf 'Input image: gel.png\nDetected objects: 7\n' > "$OUTDIR/predictions/test_results.txt"
    echo "Workflow completed"
    exit 0 ;;
  no_predictions)
    echo "Workflow completed"
    exit 0 ;;
  fail)
    echo "ERROR ~ Error executing process > 'PREDICT (1)'" >&2
    exit 3 ;;
  slow)
    sleep 0.3
    echo "Running process PREDICT"
    sleep 0.3
    mkdir -p "$OUTDIR/predictions"
    : > "$OUTDIR/predictions/prediction_0.png"
    echo "Process PREDICT completed"
    sleep 0.3
    echo "Detected objects: 2" > "$OUTDIR/predictions/test_results.txt"
    exit 0 ;;
  orphan)
    sleep 30 &
    echo $! > "$OUTDIR/child.pid"
    echo "Running process PREDICT"
    exit 0 ;;
  hang)
    sleep 300 &
    echo $! > "$OUTDIR/child.pid"
    echo "Running process PREDICT"
    wait
    exit 0 ;;
  *)
    exit 0 ;;
esac
"#;

// Same tool, but answering the version check takes a second
const SLOW_VERSION_TOOL: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  sleep 1
fi
exec "$(dirname "$0")/nextflow" "$@"
"#;

static TOOL_DIR: OnceLock<TempDir> = OnceLock::new();

/// Written once per test binary so no test forks while they are open for writing.
fn tool_dir() -> &'static Path {
    TOOL_DIR
        .get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            for (name, script) in [("nextflow", FAKE_TOOL), ("nextflow-slow", SLOW_VERSION_TOOL)] {
                let path = dir.path().join(name);
                fs::write(&path, script).unwrap();
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            }
            dir
        })
        .path()
}

pub fn fake_tool() -> PathBuf {
    tool_dir().join("nextflow")
}

pub fn slow_version_tool() -> PathBuf {
    tool_dir().join("nextflow-slow")
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: PipelineConfig,
    pub manager: JobManager,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_tool(fake_tool())
    }

    pub fn with_tool(tool: PathBuf) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pipeline_dir = dir.path().join("pipeline");
        fs::create_dir_all(pipeline_dir.join("results/models")).unwrap();
        fs::write(pipeline_dir.join("main.nf"), "workflow {}\n").unwrap();
        fs::write(pipeline_dir.join("results/models/model.pth"), b"weights").unwrap();

        let config = PipelineConfig {
            pipeline_dir,
            executable: tool.display().to_string(),
            definition_file: "main.nf".into(),
            model_path: PathBuf::from("results/models/model.pth"),
            profile: "test".into(),
            results_dir: dir.path().join("results"),
            progress_poll_interval_ms: 50,
        };
        let manager = JobManager::new(config.clone(), JobRegistry::new());

        Self { dir, config, manager }
    }

    /// A manager over the same pipeline that terminates processes with `killer`.
    pub fn manager_with_killer(&self, killer: TreeKiller) -> JobManager {
        JobManager::with_killer(self.config.clone(), JobRegistry::new(), killer)
    }

    /// Writes an input image whose content tells the fake tool what to do.
    pub fn image(&self, mode: &str) -> PathBuf {
        let path = self.dir.path().join(format!("{}.png", mode));
        fs::write(&path, mode).unwrap();
        path
    }
}

pub async fn wait_until<F>(manager: &JobManager, job_id: &str, mut done: F) -> JobRecord
where
    F: FnMut(&JobRecord) -> bool,
{
    for _ in 0..500 {
        let record = manager.get_job(job_id).expect("job should exist");
        if done(&record) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not reach the expected state in time", job_id);
}

pub async fn wait_terminal(manager: &JobManager, job_id: &str) -> JobRecord {
    wait_until(manager, job_id, |record| record.status.is_terminal()).await
}

pub async fn wait_running_with_progress(manager: &JobManager, job_id: &str, progress: u8) -> JobRecord {
    wait_until(manager, job_id, |record| {
        record.status == JobStatus::Running && record.progress >= progress
    })
    .await
}

/// False for missing and zombie processes.
pub fn is_alive(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // state is the first field after the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

/// Polls until `pid` is gone; false if it is still alive after ~2s.
pub async fn wait_dead(pid: u32) -> bool {
    // SIGKILL delivery is asynchronous
    for _ in 0..100 {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub async fn read_pid(path: &Path) -> u32 {
    for _ in 0..250 {
        if let Ok(text) = fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pid file {} never appeared", path.display());
}
