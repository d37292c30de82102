//! File-backed session registry.
//!
//! The registry is one JSON array in `<storage>/sessions.json`. Every
//! mutation reads the whole list, changes it in memory and rewrites the whole
//! file. An advisory lock on `sessions.lock` serializes those cycles across
//! processes: shared for reads, exclusive for read-modify-write.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info};

use super::{Session, SessionId};
use crate::error::SessionError;
use crate::storage::Storage;

pub const SESSIONS_FILE: &str = "sessions.json";
const LOCK_FILE: &str = "sessions.lock";

/// Held for the duration of one registry operation
struct RegistryLock {
    file: File,
}

impl RegistryLock {
    fn acquire(path: &Path, exclusive: bool) -> Result<Self, SessionError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(SessionError::storage("open registry lock"))?;

        if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        }
        .map_err(SessionError::storage("lock registry"))?;

        Ok(Self { file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Durable list of known sessions
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    storage: Storage,
}

impl SessionRegistry {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Absolute path of the registry file
    pub fn path(&self) -> PathBuf {
        self.storage.absolute_path(SESSIONS_FILE)
    }

    fn lock(&self, exclusive: bool) -> Result<RegistryLock, SessionError> {
        self.storage.ensure_root()?;
        RegistryLock::acquire(&self.storage.absolute_path(LOCK_FILE), exclusive)
    }

    /// All sessions in insertion order. Creates an empty registry if absent.
    pub fn list(&self) -> Result<Vec<Session>, SessionError> {
        // Seeding the file is a write, so the first read takes the exclusive lock.
        let _lock = self.lock(!self.path().exists())?;
        let mut file = self.open()?;
        Self::decode(&mut file)
    }

    pub fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.list()?
            .into_iter()
            .find(|s| &s.id == id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))
    }

    /// The session whose workspace is `path` or contains it
    pub fn find_by_path(&self, path: &Path) -> Result<Option<Session>, SessionError> {
        Ok(self.list()?.into_iter().find(|s| s.contains(path)))
    }

    /// Append a session, rejecting duplicate ids and locations
    pub fn add(&self, session: &Session) -> Result<(), SessionError> {
        let _lock = self.lock(true)?;
        let mut file = self.open()?;
        let mut sessions = Self::decode(&mut file)?;

        if sessions.iter().any(|s| s.id == session.id) {
            return Err(SessionError::DuplicateSession(session.id.clone()));
        }
        if sessions.iter().any(|s| s.location == session.location) {
            return Err(SessionError::DuplicateLocation(session.location.clone()));
        }

        sessions.push(session.clone());
        Self::rewrite(&mut file, &sessions)?;
        info!(session_id = %session.id, location = %session.location.display(), "Session registered");
        Ok(())
    }

    /// Remove a session by id. Returns whether an entry was removed.
    pub fn remove(&self, id: &SessionId) -> Result<bool, SessionError> {
        let _lock = self.lock(true)?;
        let mut file = self.open()?;
        let mut sessions = Self::decode(&mut file)?;

        let before = sessions.len();
        sessions.retain(|s| &s.id != id);
        let removed = sessions.len() != before;

        Self::rewrite(&mut file, &sessions)?;
        debug!(session_id = %id, removed, "Session removal");
        Ok(removed)
    }

    fn open(&self) -> Result<File, SessionError> {
        self.storage.open_file_with_default(SESSIONS_FILE, b"[]")
    }

    fn decode(file: &mut File) -> Result<Vec<Session>, SessionError> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(SessionError::storage("read sessions file"))?;
        serde_json::from_str(&contents).map_err(|e| SessionError::RegistryCorrupt(e.to_string()))
    }

    fn rewrite(file: &mut File, sessions: &[Session]) -> Result<(), SessionError> {
        let data = serde_json::to_string_pretty(sessions)
            .map_err(|e| SessionError::RegistryCorrupt(e.to_string()))?;

        file.set_len(0)
            .map_err(SessionError::storage("truncate sessions file"))?;
        file.seek(SeekFrom::Start(0))
            .map_err(SessionError::storage("rewind sessions file"))?;
        file.write_all(data.as_bytes())
            .map_err(SessionError::storage("write sessions file"))?;
        file.sync_all()
            .map_err(SessionError::storage("sync sessions file"))?;
        Ok(())
    }
}
