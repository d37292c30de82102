//! Strategies for starting a session monitor.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::SessionMonitor;
use crate::config::STORAGE_ENV;
use crate::error::SessionError;
use crate::liveness::{LivenessTracker, WatchTarget};
use crate::session::{Session, SessionRegistry};
use crate::sleeper::Sleeper;

/// Hidden subcommand the detached strategy re-executes
pub const MONITOR_COMMAND: &str = "monitor";

#[async_trait]
pub trait MonitorLauncher: Send + Sync {
    /// Start watching `session`. Returns once the monitor is running (detached)
    /// or once it has finished (in-process).
    async fn start(&self, session: &Session) -> Result<(), SessionError>;
}

/// Re-executes the `lt` binary as `lt monitor <delay_ms> <location> <pid> <tracking>`
/// in its own process group with no terminal attached.
///
/// The child runs from the temp dir, so the storage root is handed over as an
/// absolute path through [`STORAGE_ENV`] rather than re-resolved there.
pub struct DetachedMonitorLauncher {
    exe: PathBuf,
    config_path: Option<PathBuf>,
    storage_root: PathBuf,
}

impl DetachedMonitorLauncher {
    pub fn new(exe: PathBuf, config_path: Option<PathBuf>, storage_root: PathBuf) -> Self {
        Self {
            exe,
            config_path,
            storage_root,
        }
    }

    /// Launcher re-executing the running binary
    pub fn current_exe(
        config_path: Option<PathBuf>,
        storage_root: PathBuf,
    ) -> Result<Self, SessionError> {
        Ok(Self::new(std::env::current_exe()?, config_path, storage_root))
    }

    /// Environment passed to the monitor process
    pub fn monitor_env(&self) -> Vec<(&'static str, PathBuf)> {
        let root = if self.storage_root.is_absolute() {
            self.storage_root.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.storage_root)
        };
        vec![(STORAGE_ENV, root)]
    }

    /// Arguments passed to the monitor process
    pub fn monitor_args(&self, session: &Session) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.config_path {
            args.push("--config".to_string());
            args.push(path.to_string_lossy().to_string());
        }
        args.extend([
            MONITOR_COMMAND.to_string(),
            session.editor.process_capture_delay_ms.to_string(),
            session.location.to_string_lossy().to_string(),
            session.pid.to_string(),
            session.editor.tracking_type.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl MonitorLauncher for DetachedMonitorLauncher {
    #[instrument(skip_all, fields(session_id = %session.id))]
    async fn start(&self, session: &Session) -> Result<(), SessionError> {
        let mut cmd = Command::new(&self.exe);
        cmd.args(self.monitor_args(session))
            .envs(self.monitor_env())
            // Must not sit inside the workspace or it would keep it "in use"
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            SessionError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to start monitor process: {e}"),
            ))
        })?;
        info!(monitor_pid = child.id(), "Detached monitor started");
        Ok(())
    }
}

/// Runs the monitor loop inside the calling process until the session is
/// reclaimed
pub struct InProcessMonitorLauncher {
    registry: SessionRegistry,
    tracker: Arc<dyn LivenessTracker>,
    sleeper: Arc<dyn Sleeper>,
}

impl InProcessMonitorLauncher {
    pub fn new(
        registry: SessionRegistry,
        tracker: Arc<dyn LivenessTracker>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            registry,
            tracker,
            sleeper,
        }
    }
}

#[async_trait]
impl MonitorLauncher for InProcessMonitorLauncher {
    async fn start(&self, session: &Session) -> Result<(), SessionError> {
        SessionMonitor::new(
            self.registry.clone(),
            self.tracker.clone(),
            self.sleeper.clone(),
            WatchTarget::from(session),
            Duration::from_millis(session.editor.process_capture_delay_ms),
        )
        .run()
        .await
    }
}

/// Mock implementation for testing
#[derive(Default, Clone)]
pub struct MockMonitorLauncher {
    started: Arc<Mutex<Vec<Session>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockMonitorLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A launcher whose every start fails
    pub fn failing() -> Self {
        let mock = Self::new();
        *mock.fail.lock().unwrap() = true;
        mock
    }

    pub fn started(&self) -> Vec<Session> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitorLauncher for MockMonitorLauncher {
    async fn start(&self, session: &Session) -> Result<(), SessionError> {
        if *self.fail.lock().unwrap() {
            return Err(SessionError::Io(std::io::Error::other(
                "mock monitor configured to fail",
            )));
        }
        self.started.lock().unwrap().push(session.clone());
        Ok(())
    }
}
