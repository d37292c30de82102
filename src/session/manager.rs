//! Orchestrates the session lifecycle over explicitly injected collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::{reclaim, Session, SessionId, SessionRegistry, Source};
use crate::config::{Config, EditorConfig};
use crate::editor::EditorLauncher;
use crate::error::SessionError;
use crate::liveness::{LivenessTracker, WatchTarget};
use crate::monitor::MonitorLauncher;
use crate::source::SourceResolver;
use crate::workspace::WorkspaceProvisioner;

/// Attempts at drawing an id not already in the registry
const MAX_ID_ATTEMPTS: usize = 8;

/// Arguments for [`SessionManager::create_session`]
#[derive(Debug, Clone, Default)]
pub struct CreateSessionArgs {
    /// Raw source string: empty, template name, directory or git URL
    pub source: String,
    /// Force a temporary workspace even when a projects path is configured
    pub force_temp: bool,
    /// Editor name overriding the configured default
    pub editor: Option<String>,
}

/// Result of pruning every inactive session
#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub pruned: Vec<Session>,
    /// Sessions left alone because their workspace is still in use
    pub active: Vec<Session>,
    pub failed: Vec<(Session, SessionError)>,
}

impl PruneOutcome {
    /// Nothing was eligible for pruning
    pub fn is_empty(&self) -> bool {
        self.pruned.is_empty() && self.failed.is_empty()
    }
}

pub struct SessionManager {
    config: Config,
    registry: SessionRegistry,
    resolver: SourceResolver,
    provisioner: WorkspaceProvisioner,
    launcher: Arc<dyn EditorLauncher>,
    tracker: Arc<dyn LivenessTracker>,
    monitor: Arc<dyn MonitorLauncher>,
    temp_root: PathBuf,
}

impl SessionManager {
    pub fn new(
        config: Config,
        registry: SessionRegistry,
        resolver: SourceResolver,
        provisioner: WorkspaceProvisioner,
        launcher: Arc<dyn EditorLauncher>,
        tracker: Arc<dyn LivenessTracker>,
        monitor: Arc<dyn MonitorLauncher>,
    ) -> Self {
        Self {
            config,
            registry,
            resolver,
            provisioner,
            launcher,
            tracker,
            monitor,
            temp_root: std::env::temp_dir(),
        }
    }

    /// Create temporary workspaces under `root` instead of the system temp dir
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Resolve, provision, launch, persist and (for temporary workspaces)
    /// start monitoring a new session.
    ///
    /// The session is only registered once its workspace is fully populated
    /// and the editor has started. A monitor that fails to start is logged
    /// and does not fail creation: the editor is already open on the workspace.
    #[instrument(skip_all, fields(source = %args.source, force_temp = args.force_temp))]
    pub async fn create_session(&self, args: CreateSessionArgs) -> Result<Session, SessionError> {
        let source = self.resolver.resolve(&args.source)?;
        let editor = match &args.editor {
            Some(name) => self.config.get_editor(name)?,
            None => self.config.default_editor()?,
        };
        let id = self.unused_id()?;
        let temporary = self.config.requires_export(args.force_temp);

        let project_name = format!("{}-lt{}", source.short_name(), Utc::now().timestamp());
        let location = self.create_destination(&project_name, &id, temporary)?;

        let pid = match self.provision_and_launch(&source, &editor, &location).await {
            Ok(pid) => pid,
            Err(e) => {
                discard_workspace(&location);
                return Err(e);
            }
        };

        let session = Session {
            id,
            location,
            pid,
            source,
            editor,
            temporary,
            created_at: Utc::now(),
        };
        if let Err(e) = self.registry.add(&session) {
            // The editor is already open on it, so it is left in place
            warn!(
                session_id = %session.id,
                location = %session.location.display(),
                pid = session.pid,
                error = %e,
                "Workspace is not registered and must be removed by hand"
            );
            return Err(e);
        }
        info!(session_id = %session.id, location = %session.location.display(), temporary, "Session created");

        if temporary {
            if let Err(e) = self.monitor.start(&session).await {
                warn!(session_id = %session.id, error = %e, "Session will not be reclaimed automatically");
            }
        }

        Ok(session)
    }

    async fn provision_and_launch(
        &self,
        source: &Source,
        editor: &EditorConfig,
        location: &Path,
    ) -> Result<u32, SessionError> {
        self.provisioner.provision(source, location).await?;
        self.launcher.launch(editor, location).await
    }

    fn unused_id(&self) -> Result<SessionId, SessionError> {
        let existing = self.registry.list()?;
        let mut id = SessionId::generate();
        for _ in 1..MAX_ID_ATTEMPTS {
            if !existing.iter().any(|s| s.id == id) {
                break;
            }
            id = SessionId::generate();
        }
        Ok(id)
    }

    /// Create the empty workspace directory and return its canonical path
    fn create_destination(
        &self,
        project_name: &str,
        id: &SessionId,
        temporary: bool,
    ) -> Result<PathBuf, SessionError> {
        let dest = match self.config.projects_path() {
            Some(projects) if !temporary => projects.join(project_name),
            _ => self.temp_root.join(format!("{project_name}-{id}")),
        };

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(SessionError::storage("create project root"))?;
        }
        match std::fs::create_dir(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SessionError::DestinationExists(dest));
            }
            Err(e) => return Err(SessionError::storage("create project directory")(e)),
        }

        // Liveness and current-session lookups compare against resolved paths
        Ok(dest.canonicalize().unwrap_or(dest))
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, SessionError> {
        self.registry.list()
    }

    pub fn get_session(&self, raw_id: &str) -> Result<Session, SessionError> {
        let id = SessionId::parse(raw_id)
            .ok_or_else(|| SessionError::SessionNotFound(raw_id.to_string()))?;
        self.registry.get(&id)
    }

    /// The session whose workspace contains `cwd`
    pub fn current_session(&self, cwd: &Path) -> Result<Session, SessionError> {
        let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
        self.registry
            .find_by_path(&cwd)?
            .ok_or(SessionError::NotInSession(cwd))
    }

    /// A session by id, or the current one when no id is given
    pub fn show_session(&self, id: Option<&str>, cwd: &Path) -> Result<Session, SessionError> {
        match id {
            Some(id) => self.get_session(id),
            None => self.current_session(cwd),
        }
    }

    pub fn is_active(&self, session: &Session) -> bool {
        self.tracker.is_active(&WatchTarget::from(session))
    }

    /// Remove an inactive session. The workspace is deleted only for
    /// temporary sessions.
    #[instrument(skip(self))]
    pub fn prune_session(&self, raw_id: &str) -> Result<Session, SessionError> {
        let session = self.get_session(raw_id)?;
        self.reclaim_inactive(&session, session.temporary)?;
        Ok(session)
    }

    /// Prune every inactive session, skipping ones still in use
    pub fn prune_all(&self) -> Result<PruneOutcome, SessionError> {
        let mut outcome = PruneOutcome::default();
        for session in self.registry.list()? {
            if self.is_active(&session) {
                outcome.active.push(session);
                continue;
            }
            match reclaim(&self.registry, &session, session.temporary) {
                Ok(()) => outcome.pruned.push(session),
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Failed to prune session");
                    outcome.failed.push((session, e));
                }
            }
        }
        Ok(outcome)
    }

    /// Remove an inactive session and always delete its workspace
    #[instrument(skip(self))]
    pub fn clean_session(&self, raw_id: &str) -> Result<Session, SessionError> {
        let session = self.get_session(raw_id)?;
        self.reclaim_inactive(&session, true)?;
        Ok(session)
    }

    fn reclaim_inactive(&self, session: &Session, delete_workspace: bool) -> Result<(), SessionError> {
        if self.is_active(session) {
            return Err(SessionError::SessionActive(session.id.clone()));
        }
        reclaim(&self.registry, session, delete_workspace)
    }
}

fn discard_workspace(location: &Path) {
    if let Err(e) = std::fs::remove_dir_all(location) {
        warn!(location = %location.display(), error = %e, "Failed to remove abandoned workspace");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingType;
    use crate::editor::MockEditorLauncher;
    use crate::git::{GitClient, MockGitClient};
    use crate::liveness::MockLivenessTracker;
    use crate::monitor::MockMonitorLauncher;
    use crate::session::SourceType;
    use crate::storage::Storage;
    use crate::templates::TemplateStore;
    use tempfile::TempDir;

    struct Harness {
        temp_dir: TempDir,
        manager: SessionManager,
        launcher: MockEditorLauncher,
        tracker: MockLivenessTracker,
        monitor: MockMonitorLauncher,
        templates: TemplateStore,
    }

    fn harness_with(config: Config, launcher: MockEditorLauncher, monitor: MockMonitorLauncher) -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("storage"));
        let git: Arc<dyn GitClient> = Arc::new(MockGitClient::new());
        let templates = TemplateStore::new(storage.clone(), git.clone());
        let tracker = MockLivenessTracker::new();
        let temp_root = temp_dir.path().join("tmp");

        let manager = SessionManager::new(
            config,
            SessionRegistry::new(storage),
            SourceResolver::new(templates.clone()),
            WorkspaceProvisioner::new(templates.clone(), git),
            Arc::new(launcher.clone()),
            Arc::new(tracker.clone()),
            Arc::new(monitor.clone()),
        )
        .with_temp_root(temp_root);

        Harness {
            temp_dir,
            manager,
            launcher,
            tracker,
            monitor,
            templates,
        }
    }

    fn harness() -> Harness {
        harness_with(Config::default(), MockEditorLauncher::new(), MockMonitorLauncher::new())
    }

    #[tokio::test]
    async fn test_create_blank_session() {
        let h = harness();

        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();

        assert_eq!(session.source, Source::blank());
        assert!(session.temporary);
        assert!(session.location.is_dir());
        assert_eq!(std::fs::read_dir(&session.location).unwrap().count(), 0);
        assert_eq!(h.manager.list_sessions().unwrap(), vec![session.clone()]);
        assert_eq!(h.launcher.launches().len(), 1);
        assert_eq!(h.monitor.started(), vec![session]);
    }

    #[tokio::test]
    async fn test_permanent_session_is_not_monitored() {
        let mut config = Config::default();
        let projects = TempDir::new().unwrap();
        config.projects_path = projects.path().to_string_lossy().to_string();
        let h = harness_with(config, MockEditorLauncher::new(), MockMonitorLauncher::new());

        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();

        assert!(!session.temporary);
        assert!(session.location.starts_with(projects.path().canonicalize().unwrap()));
        assert!(h.monitor.started().is_empty());
        assert_eq!(h.manager.list_sessions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_force_temp_overrides_projects_path() {
        let mut config = Config::default();
        let projects = TempDir::new().unwrap();
        config.projects_path = projects.path().to_string_lossy().to_string();
        let h = harness_with(config, MockEditorLauncher::new(), MockMonitorLauncher::new());

        let session = h
            .manager
            .create_session(CreateSessionArgs {
                force_temp: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(session.temporary);
        assert!(!session.location.starts_with(projects.path()));
        assert_eq!(h.monitor.started().len(), 1);
    }

    #[tokio::test]
    async fn test_template_session_copies_without_git() {
        let h = harness();
        let template_dir = h.templates.root().join("starter");
        std::fs::create_dir_all(template_dir.join(".git")).unwrap();
        std::fs::write(template_dir.join("main.go"), "package main").unwrap();

        let session = h
            .manager
            .create_session(CreateSessionArgs {
                source: "starter".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(session.source.source_type, SourceType::Template);
        assert!(session.location.join("main.go").exists());
        assert!(!session.location.join(".git").exists());
    }

    #[tokio::test]
    async fn test_launch_failure_discards_workspace() {
        let h = harness_with(Config::default(), MockEditorLauncher::failing(), MockMonitorLauncher::new());

        let err = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::EditorLaunchFailed(_)));
        assert!(h.manager.list_sessions().unwrap().is_empty());
        let leftovers = std::fs::read_dir(h.temp_dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_monitor_failure_still_returns_session() {
        let h = harness_with(Config::default(), MockEditorLauncher::new(), MockMonitorLauncher::failing());

        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();
        assert_eq!(h.manager.list_sessions().unwrap(), vec![session]);
    }

    #[tokio::test]
    async fn test_invalid_source_creates_nothing() {
        let h = harness();
        let err = h
            .manager
            .create_session(CreateSessionArgs {
                source: "no-such-source-anywhere".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::InvalidSource(_)));
        assert!(h.launcher.launches().is_empty());
        assert!(!h.temp_dir.path().join("tmp").exists());
    }

    #[tokio::test]
    async fn test_unknown_editor_override() {
        let h = harness();
        let err = h
            .manager
            .create_session(CreateSessionArgs {
                editor: Some("ed".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::EditorNotFound(name) if name == "ed"));
    }

    #[tokio::test]
    async fn test_prune_active_session_is_refused() {
        let h = harness();
        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();
        h.tracker.set_active(&session.location, true);

        let err = h.manager.prune_session(session.id.as_str()).unwrap_err();
        assert!(matches!(err, SessionError::SessionActive(id) if id == session.id));
        assert_eq!(h.manager.list_sessions().unwrap(), vec![session.clone()]);
        assert!(session.location.exists());
    }

    #[tokio::test]
    async fn test_prune_inactive_session() {
        let h = harness();
        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();

        h.manager.prune_session(session.id.as_str()).unwrap();
        assert!(h.manager.list_sessions().unwrap().is_empty());
        assert!(!session.location.exists());
    }

    #[tokio::test]
    async fn test_prune_all_skips_active() {
        let h = harness();
        let busy = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();
        let idle = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();
        h.tracker.set_active(&busy.location, true);

        let outcome = h.manager.prune_all().unwrap();
        assert_eq!(outcome.pruned, vec![idle]);
        assert_eq!(outcome.active, vec![busy.clone()]);
        assert_eq!(h.manager.list_sessions().unwrap(), vec![busy]);
        assert!(h.manager.prune_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_deletes_permanent_workspace() {
        let mut config = Config::default();
        let projects = TempDir::new().unwrap();
        config.projects_path = projects.path().to_string_lossy().to_string();
        let h = harness_with(config, MockEditorLauncher::new(), MockMonitorLauncher::new());
        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();

        h.manager.clean_session(session.id.as_str()).unwrap();
        assert!(!session.location.exists());
        assert!(h.manager.list_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_show_current_session_from_nested_dir() {
        let h = harness();
        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();
        let nested = session.location.join("src");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(h.manager.show_session(None, &nested).unwrap(), session);
        assert_eq!(
            h.manager.show_session(Some(session.id.as_str()), h.temp_dir.path()).unwrap(),
            session
        );
        assert!(matches!(
            h.manager.show_session(None, h.temp_dir.path()),
            Err(SessionError::NotInSession(_))
        ));
        assert!(matches!(
            h.manager.show_session(Some("nope00"), h.temp_dir.path()),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_snapshots_editor() {
        let mut config = Config::default();
        config.editors[0].tracking_type = TrackingType::Pid;
        let h = harness_with(config, MockEditorLauncher::new(), MockMonitorLauncher::new());

        let session = h
            .manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap();
        assert_eq!(session.editor.tracking_type, TrackingType::Pid);
        assert_eq!(session.pid, 10_000);
    }

    /// Launches "successfully" but leaves the registry unreadable behind it
    struct RegistryClobberingLauncher {
        registry_file: PathBuf,
    }

    #[async_trait::async_trait]
    impl EditorLauncher for RegistryClobberingLauncher {
        async fn launch(&self, _editor: &EditorConfig, _workspace: &Path) -> Result<u32, SessionError> {
            std::fs::write(&self.registry_file, "not json").unwrap();
            Ok(10_000)
        }
    }

    #[tokio::test]
    async fn test_unregistered_workspace_is_kept_for_the_open_editor() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("storage"));
        let git: Arc<dyn GitClient> = Arc::new(MockGitClient::new());
        let templates = TemplateStore::new(storage.clone(), git.clone());
        let registry = SessionRegistry::new(storage);
        let monitor = MockMonitorLauncher::new();

        let manager = SessionManager::new(
            Config::default(),
            registry.clone(),
            SourceResolver::new(templates.clone()),
            WorkspaceProvisioner::new(templates, git),
            Arc::new(RegistryClobberingLauncher {
                registry_file: registry.path(),
            }),
            Arc::new(MockLivenessTracker::new()),
            Arc::new(monitor.clone()),
        )
        .with_temp_root(temp_dir.path().join("tmp"));

        let err = manager
            .create_session(CreateSessionArgs::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::RegistryCorrupt(_)));
        assert!(monitor.started().is_empty());
        let workspaces: Vec<_> = std::fs::read_dir(temp_dir.path().join("tmp"))
            .unwrap()
            .collect();
        assert_eq!(workspaces.len(), 1);
    }
}
