//! In-memory session registry: one entry per logical connection slot,
//! plus the "currently selected" session used when a task omits one.

use crate::config::ConnectionConfig;
use crate::connector::ConnectionHandle;
use crate::dialect::Dialect;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// One logical connection slot. The dialect is fixed at creation; switching
/// databases may replace the handle but never the dialect.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub dialect: Dialect,
    pub handle: Option<ConnectionHandle>,
    pub active_database: Option<String>,
    /// Last configuration used to build the handle, carried forward when a
    /// database switch rebuilds it (ssl/encrypt options survive the swap).
    pub config: Option<ConnectionConfig>,
    /// Incremented every time the handle is replaced. Lets callers observe
    /// that an idempotent database re-selection did not rebuild the handle.
    pub handle_generation: u64,
}

impl Session {
    fn new(id: String, dialect: Dialect) -> Self {
        Session {
            id,
            dialect,
            handle: None,
            active_database: None,
            config: None,
            handle_generation: 0,
        }
    }

    /// Replace the live handle, returning the previous one so the caller
    /// can close it. At most one live handle exists per session.
    pub fn replace_handle(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.handle_generation += 1;
        self.handle.replace(handle)
    }

    /// Label shown in the sessions list.
    pub fn label(&self) -> String {
        match &self.config {
            Some(config) if self.handle.is_some() => {
                let username = config.username.as_deref().unwrap_or("");
                let host = config.host.as_deref().unwrap_or("localhost");
                format!("{}:{}@{}", self.dialect, username, host)
            }
            _ => "Session currently empty.".to_string(),
        }
    }
}

/// Shared slot: all mutations to one session's handle or active database
/// happen under this per-session lock, so concurrent tasks on the same
/// session are strictly ordered.
pub type SessionSlot = Arc<Mutex<Session>>;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionSlot>,
    current: Option<String>,
}

/// Registry of sessions. Owned by the task dispatcher and handed to
/// connection managers by reference. Operations are synchronous and
/// infallible; unknown ids yield `None`, never an error.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session for a never-seen id, or return the existing slot.
    /// The dialect of an existing session is never changed.
    pub fn ensure_session(&self, id: &str, dialect: Dialect) -> SessionSlot {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = inner
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id.to_string(), dialect))))
            .clone();
        if inner.current.is_none() {
            inner.current = Some(id.to_string());
        }
        slot
    }

    /// Register a placeholder session with no live handle yet.
    pub async fn add_session(
        &self,
        id: &str,
        dialect: Dialect,
        database: Option<String>,
    ) -> SessionSlot {
        let slot = self.ensure_session(id, dialect);
        {
            let mut session = slot.lock().await;
            if session.handle.is_none() {
                session.active_database = database;
            }
        }
        slot
    }

    pub fn get(&self, id: &str) -> Option<SessionSlot> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.sessions.get(id).cloned()
    }

    pub fn current(&self) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.current.clone()
    }

    pub fn set_current(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.sessions.contains_key(id) {
            inner.current = Some(id.to_string());
        }
    }

    /// Remove a session. If it was current, current moves to an arbitrary
    /// remaining session, or `None` when the registry is empty.
    pub fn delete_session(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let removed = inner.sessions.remove(id).is_some();
        if inner.current.as_deref() == Some(id) {
            inner.current = inner.sessions.keys().next().cloned();
        }
        removed
    }

    pub fn ids(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut ids: Vec<String> = inner.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn slots(&self) -> Vec<(String, SessionSlot)> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut slots: Vec<(String, SessionSlot)> = inner
            .sessions
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    /// Session list payload: `[{id: "<dialect>:<username>@<host>"}]`, with a
    /// placeholder label for sessions that never connected.
    pub async fn list_sessions(&self) -> Value {
        let mut sessions = Vec::new();
        for (id, slot) in self.slots() {
            let session = slot.lock().await;
            sessions.push(json!({ id: session.label() }));
        }
        json!({ "error": null, "sessions": sessions })
    }
}
