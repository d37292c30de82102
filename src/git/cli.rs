//! Git CLI wrapper for cloning and refreshing workspaces and templates.
//!
//! Uses the git CLI directly so credential helpers, SSH config and proxies
//! behave exactly as they do for the user.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::SessionError;

/// Git operations needed by workspace provisioning and the template store
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Full clone of `url` into the existing, empty directory `dest`
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), SessionError>;

    /// Fast-forward the checkout at `path` from its upstream
    async fn pull(&self, path: &Path) -> Result<(), SessionError>;
}

/// Real implementation using the system `git` binary
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    /// Execute a git command and return stdout, or stderr as the error text
    async fn run_git(args: &[&str], cwd: &Path) -> Result<String, String> {
        debug!(?args, ?cwd, "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    "git is not installed or not in PATH".to_string()
                } else {
                    e.to_string()
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(stderr.trim().to_string());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitClient for GitCli {
    #[instrument(skip_all, fields(url, dest = %dest.display()))]
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), SessionError> {
        let cwd = dest.parent().unwrap_or(dest);
        let dest_str = dest.to_string_lossy();
        Self::run_git(&["clone", "--", url, &dest_str], cwd)
            .await
            .map(|_| ())
            .map_err(SessionError::CloneFailed)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn pull(&self, path: &Path) -> Result<(), SessionError> {
        if !path.join(".git").exists() {
            return Err(SessionError::GitFailed {
                command: "pull".to_string(),
                message: format!("{} is not a git repository", path.display()),
            });
        }

        Self::run_git(&["pull", "--ff-only"], path)
            .await
            .map(|_| ())
            .map_err(|message| SessionError::GitFailed {
                command: "pull".to_string(),
                message,
            })
    }
}

/// Mock implementation for testing.
///
/// Cloning writes the files registered for a URL into the destination.
/// Unknown URLs fail with the configured error text.
#[derive(Default, Clone)]
pub struct MockGitClient {
    repos: Arc<Mutex<HashMap<String, Vec<(PathBuf, String)>>>>,
    clones: Arc<Mutex<Vec<(String, PathBuf)>>>,
    pulls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockGitClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote and the files a clone of it produces
    pub fn add_repo(&self, url: &str, files: &[(&str, &str)]) {
        self.repos.lock().unwrap().insert(
            url.to_string(),
            files
                .iter()
                .map(|(path, content)| (PathBuf::from(path), (*content).to_string()))
                .collect(),
        );
    }

    pub fn clones(&self) -> Vec<(String, PathBuf)> {
        self.clones.lock().unwrap().clone()
    }

    pub fn pulls(&self) -> Vec<PathBuf> {
        self.pulls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitClient for MockGitClient {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), SessionError> {
        let files = self
            .repos
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| {
                SessionError::CloneFailed(format!("repository '{url}' not found"))
            })?;

        for (relative, content) in files {
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        std::fs::create_dir_all(dest.join(".git"))?;

        self.clones
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));
        Ok(())
    }

    async fn pull(&self, path: &Path) -> Result<(), SessionError> {
        if !path.join(".git").exists() {
            return Err(SessionError::GitFailed {
                command: "pull".to_string(),
                message: format!("{} is not a git repository", path.display()),
            });
        }
        self.pulls.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
