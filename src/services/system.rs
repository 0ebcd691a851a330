//! Host metrics for the system status endpoint.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use thiserror::Error;
use crate::models::SystemStatus;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("no disk mounted at /")]
    NoRootDisk,

    #[error("total memory reported as zero")]
    NoMemory,
}

struct HostMetrics {
    cpu_percent: f32,
    memory_percent: f32,
    disk_usage_percent: f32,
}

/// Keeps one `System` around so CPU usage is measured between calls rather
/// than from a single cold sample.
pub struct SystemMonitor {
    system: Mutex<System>,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_disks_list();
        Self { system: Mutex::new(system) }
    }

    /// Never fails: on any fault every figure is zeroed and the cause is
    /// reported in `error`.
    pub fn sample(&self, active_job_count: usize) -> SystemStatus {
        match self.collect() {
            Ok(metrics) => SystemStatus {
                cpu_percent: metrics.cpu_percent,
                memory_percent: metrics.memory_percent,
                disk_usage_percent: metrics.disk_usage_percent,
                active_job_count,
                error: None,
            },
            Err(e) => {
                tracing::warn!("System metrics unavailable: {}", e);
                SystemStatus {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    fn collect(&self) -> Result<HostMetrics, SystemError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks();

        let total_memory = system.total_memory();
        if total_memory == 0 {
            return Err(SystemError::NoMemory);
        }
        let memory_percent = system.used_memory() as f32 / total_memory as f32 * 100.0;

        let root = system
            .disks()
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .ok_or(SystemError::NoRootDisk)?;
        let disk_usage_percent = if root.total_space() == 0 {
            0.0
        } else {
            let used = root.total_space().saturating_sub(root.available_space());
            used as f32 / root.total_space() as f32 * 100.0
        };

        Ok(HostMetrics {
            cpu_percent: system.global_cpu_info().cpu_usage(),
            memory_percent,
            disk_usage_percent,
        })
    }
}
