//! Storage root shared by the session registry, the template store and the
//! monitor logs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SessionError;

/// A directory owned by letstry, addressed with root-relative names
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn absolute_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    pub fn ensure_root(&self) -> Result<(), SessionError> {
        fs::create_dir_all(&self.root).map_err(SessionError::storage("create storage root"))
    }

    /// Open a file for reading and writing, creating it if missing
    pub fn open_file(&self, name: &str) -> Result<File, SessionError> {
        self.ensure_root()?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.absolute_path(name))
            .map_err(SessionError::storage("open file"))
    }

    /// Open a file, seeding it with `default_content` when it does not exist
    pub fn open_file_with_default(
        &self,
        name: &str,
        default_content: &[u8],
    ) -> Result<File, SessionError> {
        let path = self.absolute_path(name);
        self.ensure_root()?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                debug!(path = %path.display(), "Seeding storage file with default content");
                file.write_all(default_content)
                    .map_err(SessionError::storage("write default content"))?;
                file.sync_all()
                    .map_err(SessionError::storage("sync default content"))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(SessionError::storage("create file")(e)),
        }
        self.open_file(name)
    }

    pub fn directory_exists(&self, name: &str) -> bool {
        self.absolute_path(name).is_dir()
    }

    /// Names of the directories directly under `name`, sorted
    pub fn list_directories(&self, name: &str) -> Result<Vec<String>, SessionError> {
        let dir = self.absolute_path(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(SessionError::storage("list directories"))? {
            let entry = entry.map_err(SessionError::storage("list directories"))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Recursively delete a root-relative directory
    pub fn delete_directory(&self, name: &str) -> Result<(), SessionError> {
        let dir = self.absolute_path(name);
        fs::remove_dir_all(&dir).map_err(SessionError::storage("delete directory"))
    }
}
