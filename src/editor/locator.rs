//! Process-table lookup used to correct the PID of editors that re-exec.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

/// A process whose command line matched a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCandidate {
    pub pid: u32,
    /// Seconds since the Unix epoch
    pub start_time: u64,
}

/// Pick the most recently started candidate. Ties on start time (one second
/// resolution) go to the higher PID.
pub fn youngest(candidates: &[ProcessCandidate]) -> Option<u32> {
    candidates
        .iter()
        .max_by_key(|c| (c.start_time, c.pid))
        .map(|c| c.pid)
}

pub trait ProcessLocator: Send + Sync {
    /// All live processes whose command line contains `pattern`, excluding
    /// the calling process
    fn find(&self, pattern: &str) -> Vec<ProcessCandidate>;

    /// The process most likely to be the instance that was just launched
    fn locate(&self, pattern: &str) -> Option<u32> {
        youngest(&self.find(pattern))
    }
}

/// Scans the process table with sysinfo
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessLocator;

impl ProcessLocator for SysinfoProcessLocator {
    fn find(&self, pattern: &str) -> Vec<ProcessCandidate> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
        );
        let own_pid = sysinfo::get_current_pid().ok();

        let candidates: Vec<ProcessCandidate> = sys
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != own_pid)
            .filter(|(_, process)| {
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                cmdline.contains(pattern)
            })
            .map(|(pid, process)| ProcessCandidate {
                pid: pid.as_u32(),
                start_time: process.start_time(),
            })
            .collect();

        debug!(pattern, matches = candidates.len(), "Scanned process table");
        candidates
    }
}

/// Mock implementation for testing
#[derive(Default, Clone)]
pub struct MockProcessLocator {
    processes: Arc<Mutex<HashMap<String, Vec<ProcessCandidate>>>>,
}

impl MockProcessLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process whose command line matches `pattern`
    pub fn add_process(&self, pattern: &str, pid: u32, start_time: u64) {
        self.processes
            .lock()
            .unwrap()
            .entry(pattern.to_string())
            .or_default()
            .push(ProcessCandidate { pid, start_time });
    }
}

impl ProcessLocator for MockProcessLocator {
    fn find(&self, pattern: &str) -> Vec<ProcessCandidate> {
        self.processes
            .lock()
            .unwrap()
            .get(pattern)
            .cloned()
            .unwrap_or_default()
    }
}
