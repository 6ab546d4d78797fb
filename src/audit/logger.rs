use super::AuditLogEntry;
use crate::fs::single_segment;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Append-only, session-scoped action log.
///
/// Entries are kept in memory per session in insertion order. With an audit
/// directory configured each entry is also appended as one JSON line to
/// `<dir>/<session_id>.jsonl`.
#[derive(Debug, Default)]
pub struct AuditTrail {
    dir: Option<PathBuf>,
    entries: Mutex<HashMap<String, Vec<AuditLogEntry>>>,
}

impl AuditTrail {
    /// In-memory only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<AuditLogEntry>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// `<dir>/<session_id>.jsonl`; ids that are not a single path segment
    /// are rejected.
    fn session_file(dir: &Path, session_id: &str) -> Result<PathBuf> {
        let name = single_segment(session_id)
            .with_context(|| format!("Invalid audit session id '{}'", session_id))?;
        Ok(dir.join(format!("{}.jsonl", name)))
    }

    /// Append an entry.
    ///
    /// The in-memory record is always kept. A failure to write the JSONL
    /// file is logged and does not fail the caller.
    pub fn record(&self, entry: AuditLogEntry) {
        if let Some(dir) = &self.dir
            && let Err(e) = Self::append_line(dir, &entry)
        {
            warn!(session_id = %entry.session_id, error = %e, "Failed to persist audit entry");
        }
        self.lock()
            .entry(entry.session_id.clone())
            .or_default()
            .push(entry);
    }

    fn append_line(dir: &Path, entry: &AuditLogEntry) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create audit directory {}", dir.display()))?;
        let path = Self::session_file(dir, &entry.session_id)?;
        let line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", line).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Entries for one session, in insertion order.
    pub fn entries_for(&self, session_id: &str) -> Vec<AuditLogEntry> {
        self.lock().get(session_id).cloned().unwrap_or_default()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Load a session's persisted entries into memory, replacing anything
    /// already held for it. Returns the number of entries loaded.
    pub fn load_session(&self, session_id: &str) -> Result<usize> {
        let Some(dir) = &self.dir else {
            return Ok(0);
        };
        let entries = read_jsonl(&Self::session_file(dir, session_id)?)?;
        let count = entries.len();
        self.lock().insert(session_id.to_string(), entries);
        Ok(count)
    }

    /// Entries for a session, loading them from disk first when they are not
    /// in memory yet.
    pub fn history(&self, session_id: &str) -> Result<Vec<AuditLogEntry>> {
        if !self.lock().contains_key(session_id) {
            self.load_session(session_id)?;
        }
        Ok(self.entries_for(session_id))
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<AuditLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read audit log {}", path.display()))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| {
                format!("Failed to parse line {} of {}", i + 1, path.display())
            })
        })
        .collect()
}
