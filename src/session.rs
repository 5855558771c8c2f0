//! Per-client session state with idle expiry.
//!
//! The store is a shared map behind a reader-writer lock; each session is
//! mutated under its own exclusive latch so concurrent calls from one
//! client stay serialized without blocking other clients. A background
//! sweeper removes sessions idle past the configured timeout.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::hooks::ServerHook;

/// Sweep cadence for expired sessions.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Permission granting every other permission.
pub const ADMIN_PERMISSION: &str = "admin";

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub email: String,
    /// Ordered, duplicate-free.
    pub permissions: Vec<String>,
    pub settings: HashMap<String, String>,
    pub metadata: HashMap<String, Value>,
    pub start_time: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        email: impl Into<String>,
        permissions: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        let mut deduped = Vec::with_capacity(permissions.len());
        for p in permissions {
            if !deduped.contains(&p) {
                deduped.push(p);
            }
        }
        Self {
            id: id.into(),
            user_id: user_id.into(),
            email: email.into(),
            permissions: deduped,
            settings: HashMap::new(),
            metadata: HashMap::new(),
            start_time: now,
            last_active: now,
        }
    }

    /// An unauthenticated placeholder session.
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self::new(id, "", "", Vec::new())
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_empty()
    }

    /// True if the session holds `permission`, or holds admin.
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
            || self.permissions.iter().any(|p| p == ADMIN_PERMISSION)
    }

    pub fn grant(&mut self, permission: impl Into<String>) {
        let permission = permission.into();
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
    }

    fn touch(&mut self) {
        // Monotonic even under clock adjustment.
        self.last_active = self.last_active.max(Utc::now());
    }
}

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Session already exists: {0}")]
    AlreadyExists(String),
    #[error("Session not found: {0}")]
    NotFound(String),
}

struct Slot {
    inner: Mutex<Session>,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Slot>>>,
    timeout: Duration,
    hooks: Arc<dyn ServerHook>,
}

impl SessionStore {
    pub fn new(timeout: Duration, hooks: Arc<dyn ServerHook>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            hooks,
        }
    }

    pub fn create(
        &self,
        id: &str,
        user_id: &str,
        email: &str,
        permissions: Vec<String>,
    ) -> Result<Session, SessionStoreError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(id) {
            return Err(SessionStoreError::AlreadyExists(id.to_string()));
        }
        let session = Session::new(id, user_id, email, permissions);
        sessions.insert(
            id.to_string(),
            Arc::new(Slot {
                inner: Mutex::new(session.clone()),
            }),
        );
        drop(sessions);

        debug!(session_id = %id, user_id = %user_id, "Session created");
        self.hooks.on_session_start(&session);
        Ok(session)
    }

    /// Snapshot a session. Reading counts as activity.
    pub fn get(&self, id: &str) -> Option<Session> {
        let slot = self.sessions.read().get(id).cloned()?;
        let mut session = slot.inner.lock();
        session.touch();
        Some(session.clone())
    }

    /// Mutate a session under its exclusive latch.
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<Session, SessionStoreError>
    where
        F: FnOnce(&mut Session),
    {
        let slot = self
            .sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionStoreError::NotFound(id.to_string()))?;
        let mut session = slot.inner.lock();
        mutate(&mut session);
        session.touch();
        Ok(session.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        let slot = self.sessions.write().remove(id)?;
        let session = slot.inner.lock().clone();
        let duration = (Utc::now() - session.start_time)
            .to_std()
            .unwrap_or_default();
        self.hooks.on_session_end(&session, duration);
        Some(session)
    }

    /// Drop every session idle past the timeout. Returns removed ids.
    pub fn sweep(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, slot)| {
                    let session = slot.inner.lock();
                    (now - session.last_active)
                        .to_std()
                        .map(|idle| idle > self.timeout)
                        .unwrap_or(false)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in &expired {
            if self.remove(id).is_some() {
                info!(session_id = %id, "Session expired");
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Periodic sweeper; runs until the store is dropped by all owners.
    pub fn spawn_sweeper(store: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = store.sweep();
                if !removed.is_empty() {
                    debug!(count = removed.len(), "Swept expired sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::hooks::NoopHook;

    struct EndCounter {
        ends: AtomicUsize,
    }

    impl ServerHook for EndCounter {
        fn on_session_end(&self, _session: &Session, _duration: Duration) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store(timeout: Duration) -> SessionStore {
        SessionStore::new(timeout, Arc::new(NoopHook))
    }

    #[test]
    fn test_admin_is_super_permission() {
        let session = Session::new("s", "u", "u@x", vec!["admin".to_string()]);
        assert!(session.has("anything"));
        assert!(session.has("admin"));

        let limited = Session::new("s", "u", "u@x", vec!["user".to_string()]);
        assert!(limited.has("user"));
        assert!(!limited.has("deploy"));
    }

    #[test]
    fn test_create_conflict() {
        let store = store(Duration::from_secs(60));
        store.create("s1", "u", "u@x", vec![]).unwrap();
        assert!(matches!(
            store.create("s1", "u", "u@x", vec![]),
            Err(SessionStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_get_touches_last_active() {
        let store = store(Duration::from_secs(60));
        let created = store.create("s1", "u", "u@x", vec![]).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let read = store.get("s1").unwrap();
        assert!(read.last_active >= created.last_active);
    }

    #[test]
    fn test_update_and_not_found() {
        let store = store(Duration::from_secs(60));
        store.create("s1", "u", "u@x", vec![]).unwrap();

        let updated = store
            .update("s1", |s| {
                s.settings.insert("k".to_string(), "v".to_string());
            })
            .unwrap();
        assert_eq!(updated.settings.get("k").map(String::as_str), Some("v"));

        assert!(matches!(
            store.update("missing", |_| {}),
            Err(SessionStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_sweep_removes_idle_and_fires_end_once() {
        let counter = Arc::new(EndCounter {
            ends: AtomicUsize::new(0),
        });
        let store = SessionStore::new(Duration::from_millis(10), counter.clone());
        store.create("s1", "u", "u@x", vec![]).unwrap();

        std::thread::sleep(Duration::from_millis(30));
        let removed = store.sweep();
        assert_eq!(removed, vec!["s1".to_string()]);
        assert!(store.get("s1").is_none());
        assert_eq!(counter.ends.load(Ordering::SeqCst), 1);

        // Second sweep is a no-op.
        assert!(store.sweep().is_empty());
        assert_eq!(counter.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sweep_keeps_active() {
        let store = store(Duration::from_secs(60));
        store.create("s1", "u", "u@x", vec![]).unwrap();
        assert!(store.sweep().is_empty());
        assert!(store.get("s1").is_some());
    }

    #[test]
    fn test_permissions_deduped_in_order() {
        let session = Session::new(
            "s",
            "u",
            "u@x",
            vec!["b".to_string(), "a".to_string(), "b".to_string()],
        );
        assert_eq!(session.permissions, vec!["b".to_string(), "a".to_string()]);
    }
}
