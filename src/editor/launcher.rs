//! Starts the configured editor against a workspace directory.
//!
//! The returned PID is approximate. Some editors (VS Code on Linux among
//! them) hand off to a long-lived process and the spawned one exits right
//! away. When the editor config names a `process_match` pattern, the system
//! launcher waits `process_capture_delay_ms` and then takes the most recently
//! started process whose command line contains the pattern. If nothing
//! matches, the directly spawned PID is kept.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::locator::ProcessLocator;
use crate::config::EditorConfig;
use crate::error::SessionError;
use crate::sleeper::Sleeper;

#[async_trait]
pub trait EditorLauncher: Send + Sync {
    /// Start the editor on `workspace` without waiting for it. Returns the
    /// best known PID of the editor process.
    async fn launch(&self, editor: &EditorConfig, workspace: &Path) -> Result<u32, SessionError>;
}

/// Resolve an editor executable on PATH, or accept it as given if absolute
pub fn resolve_executable(exec_path: &str) -> Result<PathBuf, SessionError> {
    which::which(exec_path)
        .map_err(|e| SessionError::EditorLaunchFailed(format!("{exec_path}: {e}")))
}

pub struct SystemEditorLauncher {
    locator: Arc<dyn ProcessLocator>,
    sleeper: Arc<dyn Sleeper>,
    correct_pids: bool,
}

impl SystemEditorLauncher {
    pub fn new(locator: Arc<dyn ProcessLocator>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            locator,
            sleeper,
            correct_pids: cfg!(target_os = "linux"),
        }
    }

    /// Enable or disable PID correction regardless of platform
    pub fn with_pid_correction(mut self, enabled: bool) -> Self {
        self.correct_pids = enabled;
        self
    }

    async fn correct_pid(&self, editor: &EditorConfig, spawned: u32) -> u32 {
        let Some(pattern) = editor.process_match.as_deref() else {
            return spawned;
        };
        if !self.correct_pids {
            return spawned;
        }

        self.sleeper
            .sleep(Duration::from_millis(editor.process_capture_delay_ms))
            .await;

        match self.locator.locate(pattern) {
            Some(pid) => {
                debug!(spawned, pid, pattern, "Corrected editor PID");
                pid
            }
            None => {
                warn!(spawned, pattern, "No process matched editor pattern, keeping spawned PID");
                spawned
            }
        }
    }
}

#[async_trait]
impl EditorLauncher for SystemEditorLauncher {
    #[instrument(skip_all, fields(editor = %editor.name, workspace = %workspace.display()))]
    async fn launch(&self, editor: &EditorConfig, workspace: &Path) -> Result<u32, SessionError> {
        let exec = resolve_executable(&editor.exec_path)?;

        let mut child = Command::new(&exec)
            .args(editor.launch_args())
            .arg(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SessionError::EditorLaunchFailed(format!("{}: {e}", exec.display())))?;

        let spawned = child.id();
        // Reap the child so a quick-exiting launcher does not linger as a zombie
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        let pid = self.correct_pid(editor, spawned).await;
        info!(pid, "Editor started");
        Ok(pid)
    }
}

/// Mock implementation for testing
#[derive(Clone)]
pub struct MockEditorLauncher {
    launches: Arc<Mutex<Vec<(String, PathBuf)>>>,
    next_pid: Arc<Mutex<u32>>,
    fail: Arc<Mutex<bool>>,
}

impl Default for MockEditorLauncher {
    fn default() -> Self {
        Self {
            launches: Arc::new(Mutex::new(Vec::new())),
            next_pid: Arc::new(Mutex::new(10_000)),
            fail: Arc::new(Mutex::new(false)),
        }
    }
}

impl MockEditorLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A launcher whose every launch fails
    pub fn failing() -> Self {
        let mock = Self::new();
        *mock.fail.lock().unwrap() = true;
        mock
    }

    /// Editor name and workspace of every launch, in order
    pub fn launches(&self) -> Vec<(String, PathBuf)> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EditorLauncher for MockEditorLauncher {
    async fn launch(&self, editor: &EditorConfig, workspace: &Path) -> Result<u32, SessionError> {
        if *self.fail.lock().unwrap() {
            return Err(SessionError::EditorLaunchFailed(format!(
                "{}: mock configured to fail",
                editor.exec_path
            )));
        }

        self.launches
            .lock()
            .unwrap()
            .push((editor.name.clone(), workspace.to_path_buf()));

        let mut next_pid = self.next_pid.lock().unwrap();
        let pid = *next_pid;
        *next_pid += 1;
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingType;
    use crate::editor::MockProcessLocator;
    use crate::sleeper::MockSleeper;
    use tempfile::TempDir;

    fn editor(exec_path: &str, process_match: Option<&str>) -> EditorConfig {
        EditorConfig {
            name: "test".to_string(),
            exec_path: exec_path.to_string(),
            args: String::new(),
            process_capture_delay_ms: 1500,
            tracking_type: TrackingType::Pid,
            process_match: process_match.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_missing_executable_fails() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = SystemEditorLauncher::new(
            Arc::new(MockProcessLocator::new()),
            Arc::new(MockSleeper::new()),
        );

        let err = launcher
            .launch(&editor("lt-no-such-editor-binary", None), temp_dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::EditorLaunchFailed(msg) if msg.contains("lt-no-such-editor-binary")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_returns_spawned_pid_without_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let sleeper = Arc::new(MockSleeper::new());
        let launcher =
            SystemEditorLauncher::new(Arc::new(MockProcessLocator::new()), sleeper.clone())
                .with_pid_correction(true);

        let pid = launcher
            .launch(&editor("true", None), temp_dir.path())
            .await
            .unwrap();
        assert!(pid > 0);
        assert_eq!(sleeper.call_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pid_correction_uses_locator() {
        let temp_dir = TempDir::new().unwrap();
        let locator = MockProcessLocator::new();
        locator.add_process("/opt/editor/bin", 111, 10);
        locator.add_process("/opt/editor/bin", 222, 20);
        let sleeper = Arc::new(MockSleeper::new());
        let launcher = SystemEditorLauncher::new(Arc::new(locator), sleeper.clone())
            .with_pid_correction(true);

        let pid = launcher
            .launch(&editor("true", Some("/opt/editor/bin")), temp_dir.path())
            .await
            .unwrap();
        assert_eq!(pid, 222);
        assert_eq!(sleeper.durations(), vec![Duration::from_millis(1500)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pid_correction_falls_back_to_spawned_pid() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = SystemEditorLauncher::new(
            Arc::new(MockProcessLocator::new()),
            Arc::new(MockSleeper::new()),
        )
        .with_pid_correction(true);

        let pid = launcher
            .launch(&editor("true", Some("/opt/editor/bin")), temp_dir.path())
            .await
            .unwrap();
        assert!(pid > 0);
        assert_ne!(pid, 222);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pid_correction_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let locator = MockProcessLocator::new();
        locator.add_process("/opt/editor/bin", 999_999, 10);
        let sleeper = Arc::new(MockSleeper::new());
        let launcher = SystemEditorLauncher::new(Arc::new(locator), sleeper.clone())
            .with_pid_correction(false);

        let pid = launcher
            .launch(&editor("true", Some("/opt/editor/bin")), temp_dir.path())
            .await
            .unwrap();
        assert_ne!(pid, 999_999);
        assert_eq!(sleeper.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_launcher_records_and_fails() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = MockEditorLauncher::new();
        let first = launcher
            .launch(&editor("code", None), temp_dir.path())
            .await
            .unwrap();
        let second = launcher
            .launch(&editor("code", None), temp_dir.path())
            .await
            .unwrap();
        assert_eq!(second, first + 1);
        assert_eq!(launcher.launches().len(), 2);

        let failing = MockEditorLauncher::failing();
        assert!(failing
            .launch(&editor("code", None), temp_dir.path())
            .await
            .is_err());
    }
}
