//! letstry - disposable development workspaces
//!
//! A session is a workspace directory seeded from a source (blank, local
//! directory, git repository or stored template) and opened in an editor.
//! Temporary sessions are watched by a monitor process and reclaimed once
//! the editor lets go of the workspace.

pub mod config;
pub mod editor;
pub mod error;
pub mod git;
pub mod liveness;
pub mod logging;
pub mod monitor;
pub mod session;
pub mod sleeper;
pub mod source;
pub mod storage;
pub mod templates;
pub mod workspace;

pub use config::Config;
pub use error::SessionError;
pub use session::{CreateSessionArgs, Session, SessionId, SessionManager};
