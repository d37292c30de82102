//! Named workspace templates kept under `<storage>/templates/`.
//!
//! A template is just a directory. Templates imported from a repository keep
//! their `.git` directory so they can be refreshed with `lt template update`;
//! the workspace provisioner strips it when seeding a session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::SessionError;
use crate::git::GitClient;
use crate::storage::Storage;
use crate::workspace::copy_tree;

/// Storage-relative directory holding all templates
pub const TEMPLATES_DIR: &str = "templates";

/// A stored template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub path: PathBuf,
}

impl Template {
    /// Storage-relative path of this template
    pub fn storage_path(&self) -> String {
        format!("{TEMPLATES_DIR}/{}", self.name)
    }

    /// Whether the template is a git checkout
    pub fn is_repository(&self) -> bool {
        self.path.join(".git").is_dir()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// Template names are single path components
fn validate_name(name: &str) -> Result<(), SessionError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(SessionError::TemplateNotFound(name.to_string()))
    }
}

#[derive(Clone)]
pub struct TemplateStore {
    storage: Storage,
    git: Arc<dyn GitClient>,
}

impl TemplateStore {
    pub fn new(storage: Storage, git: Arc<dyn GitClient>) -> Self {
        Self { storage, git }
    }

    /// Absolute directory holding all templates
    pub fn root(&self) -> PathBuf {
        self.storage.absolute_path(TEMPLATES_DIR)
    }

    /// Look up a template by name. `None` if it does not exist.
    pub fn get(&self, name: &str) -> Option<Template> {
        if validate_name(name).is_err() {
            return None;
        }
        let path = self.root().join(name);
        path.is_dir().then(|| Template {
            name: name.to_string(),
            path,
        })
    }

    /// Look up a template, failing with `TemplateNotFound`
    pub fn require(&self, name: &str) -> Result<Template, SessionError> {
        self.get(name)
            .ok_or_else(|| SessionError::TemplateNotFound(name.to_string()))
    }

    pub fn list(&self) -> Result<Vec<Template>, SessionError> {
        Ok(self
            .storage
            .list_directories(TEMPLATES_DIR)?
            .into_iter()
            .map(|name| Template {
                path: self.root().join(&name),
                name,
            })
            .collect())
    }

    fn reserve(&self, name: &str) -> Result<PathBuf, SessionError> {
        validate_name(name)?;
        if self.get(name).is_some() {
            return Err(SessionError::TemplateExists(name.to_string()));
        }
        let dest = self.root().join(name);
        std::fs::create_dir_all(&dest).map_err(SessionError::storage("create template"))?;
        Ok(dest)
    }

    /// Copy a directory into the store as a new template
    pub fn save(&self, name: &str, from: &Path) -> Result<Template, SessionError> {
        if !from.is_dir() {
            return Err(SessionError::SourceNotFound(from.to_path_buf()));
        }
        let dest = self.reserve(name)?;
        if let Err(e) = copy_tree(from, &dest, false) {
            let _ = std::fs::remove_dir_all(&dest);
            return Err(e);
        }
        info!(template = name, from = %from.display(), "Template saved");
        self.require(name)
    }

    /// Clone a repository into the store as a new template
    pub async fn import(&self, url: &str, name: &str) -> Result<Template, SessionError> {
        let dest = self.reserve(name)?;
        if let Err(e) = self.git.clone_repo(url, &dest).await {
            let _ = std::fs::remove_dir_all(&dest);
            return Err(e);
        }
        info!(template = name, url, "Template imported");
        self.require(name)
    }

    /// Fast-forward a git-backed template from its remote
    pub async fn update(&self, name: &str) -> Result<Template, SessionError> {
        let template = self.require(name)?;
        self.git.pull(&template.path).await?;
        info!(template = name, "Template updated");
        Ok(template)
    }

    pub fn delete(&self, name: &str) -> Result<Template, SessionError> {
        let template = self.require(name)?;
        self.storage.delete_directory(&template.storage_path())?;
        info!(template = name, "Template deleted");
        Ok(template)
    }
}

/// Default template name for a repository URL: its last path segment
pub fn template_name_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url)
        .trim_end_matches(".git")
        .to_string()
}
