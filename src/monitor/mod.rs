//! Session monitor: polls liveness until a workspace is closed, then
//! reclaims the session.
//!
//! ```text
//! Watching --(inactive)--> Inactive --> Reclaiming --> Done
//!     ^  |
//!     +--+ (active)
//! ```
//!
//! The state machine is identical whether it runs in a detached `lt monitor`
//! process or inside the creating process.

mod launcher;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::liveness::{LivenessTracker, WatchTarget};
use crate::session::{reclaim, SessionRegistry};
use crate::sleeper::Sleeper;

pub use launcher::{
    DetachedMonitorLauncher, InProcessMonitorLauncher, MockMonitorLauncher, MonitorLauncher,
    MONITOR_COMMAND,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Watching,
    Inactive,
    Reclaiming,
    Done,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Watching => "watching",
            MonitorState::Inactive => "inactive",
            MonitorState::Reclaiming => "reclaiming",
            MonitorState::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct SessionMonitor {
    registry: SessionRegistry,
    tracker: Arc<dyn LivenessTracker>,
    sleeper: Arc<dyn Sleeper>,
    target: WatchTarget,
    delay: Duration,
    state: MonitorState,
}

impl SessionMonitor {
    pub fn new(
        registry: SessionRegistry,
        tracker: Arc<dyn LivenessTracker>,
        sleeper: Arc<dyn Sleeper>,
        target: WatchTarget,
        delay: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            sleeper,
            target,
            delay,
            state: MonitorState::Watching,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    fn transition(&mut self, next: MonitorState) {
        debug!(from = %self.state, to = %next, "Monitor state change");
        self.state = next;
    }

    /// One poll: wait the delay, check liveness, and reclaim on the first
    /// inactive observation. Returns the state after the tick.
    pub async fn tick(&mut self) -> Result<MonitorState, SessionError> {
        if self.state == MonitorState::Done {
            return Ok(self.state);
        }

        self.sleeper.sleep(self.delay).await;

        if self.tracker.is_active(&self.target) {
            return Ok(self.state);
        }

        self.transition(MonitorState::Inactive);
        self.transition(MonitorState::Reclaiming);
        self.reclaim()?;
        self.transition(MonitorState::Done);
        Ok(self.state)
    }

    fn reclaim(&self) -> Result<(), SessionError> {
        let session = self
            .registry
            .list()?
            .into_iter()
            .find(|s| s.location == self.target.location);

        match session {
            Some(session) => reclaim(&self.registry, &session, session.temporary),
            None => {
                // Already pruned by hand; the directory is not ours to delete
                warn!(
                    location = %self.target.location.display(),
                    "No registered session for workspace, nothing to reclaim"
                );
                Ok(())
            }
        }
    }

    /// Poll until the workspace is reclaimed
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(
            location = %self.target.location.display(),
            pid = self.target.pid,
            tracking = %self.target.tracking,
            delay_ms = self.delay.as_millis() as u64,
            "Monitoring session"
        );
        while self.tick().await? != MonitorState::Done {}
        info!(location = %self.target.location.display(), "Monitor finished");
        Ok(())
    }
}
