use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::errors::StoreError;
use crate::session::Session;

/// Durable storage for sessions.
///
/// Calls are synchronous; the store runs them on tokio's blocking pool.
pub trait SessionPersistence: Send + Sync + 'static {
    fn save(&self, session: &Session) -> Result<(), StoreError>;

    fn load_all(&self) -> Result<Vec<Session>, StoreError>;

    fn remove(&self, id: &str) -> Result<(), StoreError>;
}

/// One pretty-printed JSON file per session: `<dir>/<id>.json`.
///
/// Writes go to `<id>.json.tmp` first and are renamed into place, so a
/// crash mid-write never leaves a truncated session file behind.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Read a single session file.
    pub fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_file(&path).map(Some)
    }

    fn read_file(path: &Path) -> Result<Session, StoreError> {
        let content = std::fs::read_to_string(path).map_err(Self::io_err(path))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

impl SessionPersistence for JsonFileBackend {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;

        let json = serde_json::to_string_pretty(session).map_err(|source| StoreError::Serialize {
            id: session.id.clone(),
            source,
        })?;
        let path = self.path_for(&session.id);
        let tmp = self.dir.join(format!("{}.json.tmp", session.id));
        std::fs::write(&tmp, json).map_err(Self::io_err(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(Self::io_err(&path))?;
        Ok(())
    }

    /// Load every `*.json` file in the directory. Corrupt files are skipped
    /// with a warning so one bad file cannot block startup.
    fn load_all(&self) -> Result<Vec<Session>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(Self::io_err(&self.dir))?;
        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Self::io_err(&self.dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_file(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(error = %e, "Skipping unreadable session file"),
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

/// Keeps sessions in a map. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self, id: &str) -> Option<Session> {
        self.sessions.lock().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionPersistence for MemoryBackend {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session.id.clone(), session.clone());
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(id);
        }
        Ok(())
    }
}
