//! Process-tree termination through the OS process table.
//!
//! The pipeline tool forks its own workers, so killing only the direct
//! child would leave them running. Jobs are spawned as the leader of their
//! own process group and the whole group is signalled first; that also
//! reaches workers already re-parented after the leader exited. Descendants
//! that moved to another group are collected from parent links before
//! anything is signalled, then killed deepest first.

use std::collections::HashMap;
use sysinfo::{Pid, PidExt, ProcessExt, ProcessRefreshKind, System, SystemExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KillError {
    #[error("failed to kill process {0}")]
    Signal(u32),
    #[error("failed to kill process group {pgid}: {source}")]
    Group {
        pgid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Sends SIGKILL to the process group led by `pid`, then to `pid` and every
/// process descending from it.
///
/// Returns how many processes of the tree were signalled. A root that no
/// longer exists counts as already terminated once its group is gone too.
pub fn kill_tree(pid: u32) -> Result<usize, KillError> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessRefreshKind::new());

    let root = Pid::from_u32(pid);
    if system.process(root).is_none() {
        if kill_group(pid)? {
            tracing::info!("Killed leftover process group {}", pid);
        } else {
            tracing::debug!("Process {} already gone, nothing to kill", pid);
        }
        return Ok(0);
    }

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (child_pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*child_pid);
        }
    }

    let descendants = collect_descendants(root, &children);
    kill_group(pid)?;

    let mut killed = 0;
    for descendant in descendants.iter().rev() {
        match system.process(*descendant) {
            Some(process) if process.kill() => killed += 1,
            // Exited on its own in the meantime
            _ => tracing::debug!("Descendant {} of {} could not be signalled", descendant, pid),
        }
    }

    let root_killed = system.process(root).map(|process| process.kill());
    match root_killed {
        Some(true) => killed += 1,
        Some(false) => {
            // A failed signal on a process that has since vanished is fine
            system.refresh_processes_specifics(ProcessRefreshKind::new());
            if system.process(root).is_some() {
                return Err(KillError::Signal(pid));
            }
        }
        None => {}
    }

    tracing::info!("Killed {} process(es) in the tree rooted at {}", killed, pid);
    Ok(killed)
}

/// SIGKILL to every member of the group `pgid`. Ok(false) when no such
/// group exists.
#[cfg(unix)]
fn kill_group(pgid: u32) -> Result<bool, KillError> {
    let Ok(group) = libc::pid_t::try_from(pgid) else {
        return Ok(false);
    };
    // Safety: killpg only takes plain integers and reports failure via errno.
    let ret = unsafe { libc::killpg(group, libc::SIGKILL) };
    if ret == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(KillError::Group { pgid, source: err })
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> Result<bool, KillError> {
    Ok(false)
}

// Breadth-first, so deeper generations come later in the list
fn collect_descendants(root: Pid, children: &HashMap<Pid, Vec<Pid>>) -> Vec<Pid> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for pid in frontier {
            if let Some(kids) = children.get(&pid) {
                for kid in kids {
                    if *kid != root && !found.contains(kid) {
                        found.push(*kid);
                        next.push(*kid);
                    }
                }
            }
        }
        frontier = next;
    }
    found
}
