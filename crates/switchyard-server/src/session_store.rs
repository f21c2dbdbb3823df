//! Session store collaborator.
//!
//! The router consults the store only when associating a connection and,
//! best effort, when writing the shutdown summary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::{SessionId, StoreError, UserId};

/// A session as reported by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session ID.
    pub session_id: SessionId,
    /// Owning user, if the store tracks one.
    pub user_id: Option<UserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Opaque session data. Shutdown summaries are merged in here.
    #[serde(default)]
    pub data: Value,
}

/// External store of logical sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session; `Ok(None)` when it does not exist.
    async fn get_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Merge `partial` into the session's data.
    async fn update_session(&self, session_id: &SessionId, partial: Value)
    -> Result<(), StoreError>;
}

/// Process-local [`SessionStore`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    get_calls: AtomicU64,
    update_calls: AtomicU64,
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a session and return its record.
    pub fn create_session(
        &self,
        session_id: impl Into<SessionId>,
        user_id: Option<UserId>,
    ) -> SessionRecord {
        let record = SessionRecord {
            session_id: session_id.into(),
            user_id,
            created_at: Utc::now(),
            data: Value::Object(serde_json::Map::new()),
        };
        let _ = self
            .sessions
            .write()
            .insert(record.session_id.clone(), record.clone());
        record
    }

    /// Delete a session. Returns whether it existed.
    pub fn remove_session(&self, session_id: &SessionId) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Snapshot of one session.
    pub fn snapshot(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions.read().get(session_id).cloned()
    }

    /// How many times `get_session` has been called.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::Relaxed)
    }

    /// How many times `update_session` has been called.
    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let _ = self.get_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn update_session(
        &self,
        session_id: &SessionId,
        partial: Value,
    ) -> Result<(), StoreError> {
        let _ = self.update_calls.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.clone()))?;

        match (&mut record.data, partial) {
            (Value::Object(data), Value::Object(fields)) => {
                for (key, value) in fields {
                    let _ = data.insert(key, value);
                }
            }
            (data, partial) => *data = partial,
        }
        Ok(())
    }
}
