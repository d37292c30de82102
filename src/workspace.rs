//! Fills a freshly created workspace directory from a resolved source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::error::SessionError;
use crate::git::GitClient;
use crate::session::{Source, SourceType};
use crate::templates::TemplateStore;

/// Version-control metadata never copied out of a template
const VCS_DIR: &str = ".git";

/// Recursively copy the contents of `from` into the existing directory `to`.
///
/// With `skip_vcs`, any `.git` directory (at any depth) is left behind.
/// Symlinks are recreated as links on Unix rather than followed. When `to`
/// lies inside `from` it is never descended into.
pub fn copy_tree(from: &Path, to: &Path, skip_vcs: bool) -> Result<(), SessionError> {
    let from = from.canonicalize()?;
    let to = to.canonicalize()?;
    let walker = WalkDir::new(&from)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_dir();
            !(is_dir && entry.path() == to.as_path())
                && !(skip_vcs && is_dir && entry.file_name() == VCS_DIR)
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            SessionError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("filesystem loop while copying workspace")
            }))
        })?;
        let relative = entry
            .path()
            .strip_prefix(&from)
            .map_err(|e| SessionError::Io(std::io::Error::other(e)))?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), SessionError> {
    let points_to = std::fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), SessionError> {
    std::fs::copy(link, target)?;
    Ok(())
}

/// Refuse to copy a directory into a workspace nested inside it
fn ensure_outside(from: &Path, dest: &Path) -> Result<(), SessionError> {
    let from = from.canonicalize()?;
    let dest = dest.canonicalize()?;
    if dest.starts_with(&from) {
        return Err(SessionError::SourceContainsDestination(from, dest));
    }
    Ok(())
}

/// Materializes workspace contents for each source type
#[derive(Clone)]
pub struct WorkspaceProvisioner {
    templates: TemplateStore,
    git: Arc<dyn GitClient>,
}

impl WorkspaceProvisioner {
    pub fn new(templates: TemplateStore, git: Arc<dyn GitClient>) -> Self {
        Self { templates, git }
    }

    /// Fill `dest`, which must already exist and be empty.
    ///
    /// On error `dest` may be partially populated; the caller discards it.
    #[instrument(skip_all, fields(source = %source, dest = %dest.display()))]
    pub async fn provision(&self, source: &Source, dest: &Path) -> Result<(), SessionError> {
        match source.source_type {
            SourceType::Blank => {
                debug!("Blank workspace, nothing to copy");
            }
            SourceType::Directory => {
                let from = PathBuf::from(&source.value);
                if !from.is_dir() {
                    return Err(SessionError::SourceNotFound(from));
                }
                ensure_outside(&from, dest)?;
                copy_tree(&from, dest, false)?;
            }
            SourceType::Repository => {
                self.git.clone_repo(&source.value, dest).await?;
            }
            SourceType::Template => {
                let template = self.templates.require(&source.value)?;
                copy_tree(&template.path, dest, true)?;
            }
        }
        info!("Workspace provisioned");
        Ok(())
    }
}
