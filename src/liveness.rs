//! Decides whether a session workspace is still in use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, trace};

use crate::config::TrackingType;
use crate::session::Session;

/// Everything the tracker needs to know about one workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub location: PathBuf,
    pub pid: u32,
    pub tracking: TrackingType,
}

impl From<&Session> for WatchTarget {
    fn from(session: &Session) -> Self {
        Self {
            location: session.location.clone(),
            pid: session.pid,
            tracking: session.editor.tracking_type,
        }
    }
}

/// Side-effect free liveness check
pub trait LivenessTracker: Send + Sync {
    fn is_active(&self, target: &WatchTarget) -> bool;
}

/// Inspects the live process table.
///
/// `pid` tracking: active while the PID exists and is not a zombie.
/// `path` tracking: active while any other process has its working directory,
/// or on Linux an open file descriptor, inside the workspace.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLivenessTracker;

impl SystemLivenessTracker {
    fn pid_alive(pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid)
            .is_some_and(|process| process.status() != ProcessStatus::Zombie)
    }

    fn path_in_use(location: &Path) -> bool {
        let Ok(location) = location.canonicalize() else {
            return false;
        };

        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cwd(UpdateKind::Always),
        );
        let own_pid = sysinfo::get_current_pid().ok();

        for (pid, process) in sys.processes() {
            if Some(*pid) == own_pid || process.status() == ProcessStatus::Zombie {
                continue;
            }
            if process.cwd().is_some_and(|cwd| cwd.starts_with(&location)) {
                trace!(pid = pid.as_u32(), "Process working directory inside workspace");
                return true;
            }
            if holds_open_file(pid.as_u32(), &location) {
                trace!(pid = pid.as_u32(), "Process holds a file inside workspace");
                return true;
            }
        }
        false
    }
}

/// Whether any of the process's file descriptors point inside `location`
#[cfg(target_os = "linux")]
fn holds_open_file(pid: u32, location: &Path) -> bool {
    // Other users' processes are unreadable; treat them as not holding anything
    let Ok(entries) = std::fs::read_dir(format!("/proc/{pid}/fd")) else {
        return false;
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read_link(entry.path()).ok())
        .any(|target| target.starts_with(location))
}

#[cfg(not(target_os = "linux"))]
fn holds_open_file(_pid: u32, _location: &Path) -> bool {
    false
}

impl LivenessTracker for SystemLivenessTracker {
    fn is_active(&self, target: &WatchTarget) -> bool {
        let active = match target.tracking {
            TrackingType::Pid => Self::pid_alive(target.pid),
            TrackingType::Path => Self::path_in_use(&target.location),
        };
        debug!(
            location = %target.location.display(),
            pid = target.pid,
            tracking = %target.tracking,
            active,
            "Liveness check"
        );
        active
    }
}

/// Mock implementation for testing. Workspaces are inactive unless marked.
#[derive(Default, Clone)]
pub struct MockLivenessTracker {
    active: Arc<Mutex<HashMap<PathBuf, bool>>>,
    checks: Arc<Mutex<Vec<WatchTarget>>>,
}

impl MockLivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, location: &Path, active: bool) {
        self.active
            .lock()
            .unwrap()
            .insert(location.to_path_buf(), active);
    }

    /// Every target checked, in order
    pub fn checks(&self) -> Vec<WatchTarget> {
        self.checks.lock().unwrap().clone()
    }
}

impl LivenessTracker for MockLivenessTracker {
    fn is_active(&self, target: &WatchTarget) -> bool {
        self.checks.lock().unwrap().push(target.clone());
        self.active
            .lock()
            .unwrap()
            .get(&target.location)
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(location: &Path, pid: u32, tracking: TrackingType) -> WatchTarget {
        WatchTarget {
            location: location.to_path_buf(),
            pid,
            tracking,
        }
    }

    #[test]
    fn test_pid_tracking_own_process_is_active() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(temp_dir.path(), std::process::id(), TrackingType::Pid);
        assert!(SystemLivenessTracker.is_active(&target));
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_tracking_exited_process_is_inactive() {
        let temp_dir = TempDir::new().unwrap();
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let target = target(temp_dir.path(), pid, TrackingType::Pid);
        assert!(!SystemLivenessTracker.is_active(&target));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_tracking_sees_child_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = temp_dir.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        let target = target(&workspace, 0, TrackingType::Path);

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .current_dir(&workspace)
            .spawn()
            .unwrap();
        let active = SystemLivenessTracker.is_active(&target);
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(active);
        assert!(!SystemLivenessTracker.is_active(&target));
    }

    #[test]
    fn test_path_tracking_missing_directory_is_inactive() {
        let temp_dir = TempDir::new().unwrap();
        let target = target(&temp_dir.path().join("gone"), 0, TrackingType::Path);
        assert!(!SystemLivenessTracker.is_active(&target));
    }

    #[test]
    fn test_mock_tracker_defaults_to_inactive() {
        let tracker = MockLivenessTracker::new();
        let location = PathBuf::from("/tmp/ws");
        let target = target(&location, 1, TrackingType::Path);

        assert!(!tracker.is_active(&target));
        tracker.set_active(&location, true);
        assert!(tracker.is_active(&target));
        assert_eq!(tracker.checks().len(), 2);
    }
}
