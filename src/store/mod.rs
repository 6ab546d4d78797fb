//! Write-behind session store.
//!
//! Sessions live in a concurrent map that is authoritative for reads and
//! writes. Every mutation marks the session id dirty; a background task
//! flushes dirty sessions to a [`SessionPersistence`] backend on a fixed
//! interval. A failed save puts the id back into the dirty set so the next
//! tick retries it. Shutdown stops the task and then drains whatever is
//! still dirty.

pub mod backend;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{StoreError, WorkflowError};
use crate::session::{Role, Session};

pub use backend::{JsonFileBackend, MemoryBackend, SessionPersistence};

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: Vec<String>,
    pub failed: Vec<String>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    dirty: Mutex<HashSet<String>>,
    backend: Arc<dyn SessionPersistence>,
    /// Serializes flush passes with each other and with removals.
    flush_lock: tokio::sync::Mutex<()>,
}

impl SessionStore {
    /// Open the store, loading every persisted session before returning.
    pub fn open(backend: Arc<dyn SessionPersistence>) -> Result<Self, StoreError> {
        let loaded = backend.load_all()?;
        let sessions = DashMap::new();
        for session in loaded {
            sessions.insert(session.id.clone(), session);
        }
        info!(count = sessions.len(), "Loaded persisted sessions");
        Ok(Self {
            sessions,
            dirty: Mutex::new(HashSet::new()),
            backend,
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Store with no durable backing.
    pub fn in_memory() -> Self {
        Self {
            sessions: DashMap::new(),
            dirty: Mutex::new(HashSet::new()),
            backend: Arc::new(MemoryBackend::new()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_dirty(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.dirty.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn mark_dirty(&self, id: &str) {
        self.lock_dirty().insert(id.to_string());
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.lock_dirty().contains(id)
    }

    pub fn dirty_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_dirty().iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn create(&self, owner_id: Option<String>) -> Session {
        let session = Session::new(owner_id);
        self.insert(session.clone());
        session
    }

    pub fn insert(&self, session: Session) {
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        self.mark_dirty(&id);
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|s| s.value().clone()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Mutate a session in place.
    ///
    /// The session is marked dirty only when `f` succeeds; a closure that
    /// returns an error must leave the session untouched.
    pub fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, WorkflowError>,
    ) -> Result<R, WorkflowError> {
        let result = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| WorkflowError::SessionNotFound { id: id.to_string() })?;
            f(entry.value_mut())?
        };
        self.mark_dirty(id);
        Ok(result)
    }

    pub fn append_message(
        &self,
        id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let content = content.into();
        self.update(id, |session| {
            session.push_message(role, content);
            Ok(())
        })
    }

    /// Remove a session from memory and from the backend.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let _flush = self.flush_lock.lock().await;
        let existed = self.sessions.remove(id).is_some();
        self.lock_dirty().remove(id);
        if existed {
            let backend = Arc::clone(&self.backend);
            let owned = id.to_string();
            run_blocking(move || backend.remove(&owned)).await?;
            info!(session_id = %id, "Session removed");
        }
        Ok(existed)
    }

    /// Run one flush pass now.
    ///
    /// Snapshots and clears the dirty set, then saves each session. Ids that
    /// fail to save are marked dirty again. Errors are logged, never returned.
    pub async fn flush_now(&self) -> FlushReport {
        let _flush = self.flush_lock.lock().await;
        let mut ids: Vec<String> = self.lock_dirty().drain().collect();
        ids.sort();

        let mut report = FlushReport::default();
        for id in ids {
            let Some(snapshot) = self.get(&id) else {
                continue;
            };
            let backend = Arc::clone(&self.backend);
            match run_blocking(move || backend.save(&snapshot)).await {
                Ok(()) => report.flushed.push(id),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Session flush failed; will retry");
                    self.mark_dirty(&id);
                    report.failed.push(id);
                }
            }
        }

        if !report.flushed.is_empty() || !report.failed.is_empty() {
            debug!(
                flushed = report.flushed.len(),
                failed = report.failed.len(),
                "Flush pass finished"
            );
        }
        report
    }

    /// Spawn the periodic flush task. A zero interval disables periodic
    /// flushing; dirty sessions are then written on shutdown only.
    pub fn start_flush_task(self: &Arc<Self>, interval: Duration) -> StoreHandle {
        let cancel = CancellationToken::new();
        let store = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            if interval.is_zero() {
                token.cancelled().await;
                debug!("Flush task stopped");
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        store.flush_now().await;
                    }
                }
            }
            debug!("Flush task stopped");
        });
        info!(interval_ms = interval.as_millis() as u64, "Session flush task started");
        StoreHandle {
            store: Arc::clone(self),
            cancel,
            task,
        }
    }
}

async fn run_blocking<R, F>(f: F) -> Result<R, StoreError>
where
    F: FnOnce() -> Result<R, StoreError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(error = %e, "Store task panicked");
        StoreError::Io {
            path: Default::default(),
            source: std::io::Error::other(e.to_string()),
        }
    })?
}

/// Handle to the background flush task.
pub struct StoreHandle {
    store: Arc<SessionStore>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StoreHandle {
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Stop the periodic task, wait for an in-flight pass to finish, then
    /// flush everything still dirty.
    pub async fn shutdown(self) -> FlushReport {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Flush task ended abnormally");
        }
        let report = self.store.flush_now().await;
        info!(
            flushed = report.flushed.len(),
            failed = report.failed.len(),
            "Final session flush complete"
        );
        report
    }
}
