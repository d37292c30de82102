//! Error taxonomy for the session lifecycle.
//!
//! Every variant is surfaced verbatim at the CLI boundary. None of them are
//! retried: they describe bad input, a collision, or a refused operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionId;

/// Errors produced by the session core
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session source '{0}': not a template, directory or git repository")]
    InvalidSource(String),

    #[error("directory {0} does not exist")]
    SourceNotFound(PathBuf),

    #[error("directory {0} contains the workspace destination {1}")]
    SourceContainsDestination(PathBuf, PathBuf),

    #[error("failed to clone repository: {0}")]
    CloneFailed(String),

    #[error("failed to create project directory: {0} already exists")]
    DestinationExists(PathBuf),

    #[error("session with ID {0} already exists")]
    DuplicateSession(SessionId),

    #[error("a session is already registered at {0}")]
    DuplicateLocation(PathBuf),

    #[error("session registry is corrupt: {0}")]
    RegistryCorrupt(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("cannot prune session {0}: directory still being accessed")]
    SessionActive(SessionId),

    #[error("failed to run editor: {0}")]
    EditorLaunchFailed(String),

    #[error("invalid session display type '{0}' (expected full, path, pid, editor or json)")]
    InvalidDisplayType(String),

    #[error("editor {0} not found")]
    EditorNotFound(String),

    #[error("template {0} not found")]
    TemplateNotFound(String),

    #[error("template {0} already exists")]
    TemplateExists(String),

    #[error("git {command} failed: {message}")]
    GitFailed { command: String, message: String },

    #[error("not in a session: {0} is not inside any session workspace")]
    NotInSession(PathBuf),

    #[error("storage error ({operation}): {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Wrap an I/O error with the storage operation that produced it
    pub fn storage(operation: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| SessionError::Storage { operation, source }
    }
}
