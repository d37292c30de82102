//! Session records and the services that create, track and reclaim them.

mod id;
mod manager;
mod registry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EditorConfig;
use crate::error::SessionError;

pub use id::{SessionId, ID_LENGTH};
pub use manager::{CreateSessionArgs, PruneOutcome, SessionManager};
pub use registry::{SessionRegistry, SESSIONS_FILE};

/// Where a workspace's initial contents come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Blank,
    Directory,
    Repository,
    Template,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Blank => "blank",
            SourceType::Directory => "directory",
            SourceType::Repository => "repository",
            SourceType::Template => "template",
        };
        f.write_str(name)
    }
}

/// Provenance of a workspace. `value` is empty for blank sources and an
/// absolute path for directory sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "sourceType")]
    pub source_type: SourceType,
    pub value: String,
}

impl Source {
    pub fn blank() -> Self {
        Self {
            source_type: SourceType::Blank,
            value: String::new(),
        }
    }

    pub fn new(source_type: SourceType, value: impl Into<String>) -> Self {
        Self {
            source_type,
            value: value.into(),
        }
    }

    /// A short, filesystem-safe name used to build project directory names
    pub fn short_name(&self) -> String {
        let raw = match self.source_type {
            SourceType::Blank => "blank",
            SourceType::Template => self.value.as_str(),
            SourceType::Directory | SourceType::Repository => self
                .value
                .trim_end_matches('/')
                .rsplit(['/', '\\', ':'])
                .next()
                .unwrap_or_default()
                .trim_end_matches(".git"),
        };

        let sanitized: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();

        if sanitized.is_empty() {
            "project".to_string()
        } else {
            sanitized
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source_type {
            SourceType::Blank => write!(f, "[{}]", self.source_type),
            _ => write!(f, "[{}, {}]", self.source_type, self.value),
        }
    }
}

/// One provisioned workspace bound to an editor process.
///
/// Immutable once persisted; the registry only ever adds or removes whole
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub location: PathBuf,
    /// Approximate editor process id (see `editor::SystemEditorLauncher`)
    pub pid: u32,
    pub source: Source,
    pub editor: EditorConfig,
    /// Workspace lives in a temporary directory and is deleted on reclaim
    #[serde(default)]
    pub temporary: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Whether `path` is this session's workspace or somewhere inside it
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.location)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={}, editor=({}), src={}",
            self.id, self.editor.name, self.source
        )
    }
}

/// Remove a session: its workspace directory first (when `delete_workspace`),
/// then its registry entry.
///
/// A failed deletion leaves the entry in place so the session can be pruned
/// again. The registry never points at a deleted directory as a live session.
pub fn reclaim(
    registry: &SessionRegistry,
    session: &Session,
    delete_workspace: bool,
) -> Result<(), SessionError> {
    if delete_workspace {
        match std::fs::remove_dir_all(&session.location) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SessionError::storage("delete workspace")(e)),
        }
    }
    registry.remove(&session.id)?;
    tracing::info!(
        session_id = %session.id,
        location = %session.location.display(),
        deleted_workspace = delete_workspace,
        "Session reclaimed"
    );
    Ok(())
}

/// Output formats for `lt show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Full,
    Location,
    Pid,
    Editor,
    Json,
}

impl FromStr for DisplayMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(DisplayMode::Full),
            "path" | "location" => Ok(DisplayMode::Location),
            "pid" => Ok(DisplayMode::Pid),
            "editor" => Ok(DisplayMode::Editor),
            "json" => Ok(DisplayMode::Json),
            other => Err(SessionError::InvalidDisplayType(other.to_string())),
        }
    }
}

/// Split `lt show` positionals into an optional session id and a mode.
///
/// A lone argument that names a mode is the mode; otherwise it is an id.
/// With two arguments the first is the id and the second the mode.
pub fn parse_show_args(args: &[String]) -> Result<(Option<String>, DisplayMode), SessionError> {
    match args {
        [] => Ok((None, DisplayMode::Full)),
        [only] => match only.parse::<DisplayMode>() {
            Ok(mode) => Ok((None, mode)),
            Err(_) => Ok((Some(only.clone()), DisplayMode::Full)),
        },
        [id, mode, ..] => Ok((Some(id.clone()), mode.parse()?)),
    }
}

impl DisplayMode {
    /// Render a session in this mode
    pub fn render(self, session: &Session) -> Result<String, SessionError> {
        Ok(match self {
            DisplayMode::Full => session.to_string(),
            DisplayMode::Location => session.location.display().to_string(),
            DisplayMode::Pid => session.pid.to_string(),
            DisplayMode::Editor => session.editor.summary(),
            DisplayMode::Json => serde_json::to_string_pretty(session)
                .map_err(|e| SessionError::RegistryCorrupt(e.to_string()))?,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::config::{Config, TrackingType};

    pub fn session(id: &str, location: &Path) -> Session {
        let mut editor = Config::default().default_editor().unwrap();
        editor.tracking_type = TrackingType::Pid;
        Session {
            id: SessionId::parse(id).unwrap(),
            location: location.to_path_buf(),
            pid: 4242,
            source: Source::blank(),
            editor,
            temporary: true,
            created_at: Utc::now(),
        }
    }
}
