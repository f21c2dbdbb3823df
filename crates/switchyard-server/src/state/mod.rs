//! Shared router state: connection records, the session index, and rate
//! windows, kept together behind one lock.
//!
//! Every operation here is synchronous. Callers take the lock, call one of
//! these methods, copy out what they need, and drop the guard before any
//! transport or session-store I/O.

pub mod index;
pub mod slot;
pub mod store;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use switchyard_core::{ConnectionId, RelayError, Result, SessionId};
use tracing::debug;

use crate::rate_limit::{RateLimitConfig, RateLimiter};

pub use index::SessionIndex;
pub use slot::{AgentRole, Slot};
pub use store::{
    ConnectionLimits, ConnectionRecord, ConnectionStatus, ConnectionStore, UserContext,
};

/// Handle to the state shared by every router component.
pub type SharedState = Arc<Mutex<RouterState>>;

/// Per-session recipient lists, in target order.
pub type Targets = Vec<(SessionId, Vec<ConnectionId>)>;

/// What was torn down by [`RouterState::drain`].
#[derive(Debug, Default)]
pub struct DrainSummary {
    /// Indexed connections per session at drain time.
    pub session_counts: BTreeMap<SessionId, usize>,
    /// Every connection that was active.
    pub closed: Vec<ConnectionId>,
    /// Index inconsistencies found before clearing.
    pub inconsistencies: Vec<String>,
}

/// Connection store, session index, and rate limiter.
#[derive(Debug, Default)]
pub struct RouterState {
    /// Connection records.
    pub store: ConnectionStore,
    /// Session → slot → connection index.
    pub index: SessionIndex,
    /// Inbound message windows.
    pub rate: RateLimiter,
}

impl RouterState {
    /// Empty state with the given limits.
    pub fn new(limits: ConnectionLimits, rate: RateLimitConfig) -> Self {
        Self {
            store: ConnectionStore::new(limits),
            index: SessionIndex::new(),
            rate: RateLimiter::new(rate),
        }
    }

    /// Wrap in a [`SharedState`].
    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Associate an active connection with a session under its computed slot.
    ///
    /// Session existence is the caller's concern.
    pub fn associate(
        &mut self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        role: AgentRole,
        pillar: Option<&str>,
    ) -> Result<DateTime<Utc>> {
        if self.store.get_active(connection_id).is_none() {
            return Err(RelayError::ConnectionNotFound(connection_id.clone()));
        }

        let slot = Slot::for_association(role, pillar);
        let linked_at = Utc::now();
        let stored_pillar = slot.pillar().map(str::to_string);
        self.store.bind(
            connection_id,
            session_id.clone(),
            role,
            stored_pillar,
            linked_at,
        )?;
        let previous = self
            .index
            .insert(connection_id.clone(), session_id.clone(), slot);

        if let Some((old_session, _)) = previous.filter(|(old, _)| old != session_id) {
            debug!(
                %connection_id,
                from = %old_session,
                to = %session_id,
                "connection moved between sessions"
            );
            self.forget_if_empty(&old_session);
        }
        Ok(linked_at)
    }

    /// Remove a connection from the index and the store.
    ///
    /// With `session_id` given, nothing is touched unless the connection is
    /// indexed under that session. Returns whether an index entry was removed.
    pub fn unlink(&mut self, connection_id: &ConnectionId, session_id: Option<&SessionId>) -> bool {
        let indexed = self.index.lookup(connection_id).cloned();
        match (session_id, indexed) {
            (Some(expected), Some(actual)) if *expected != actual => false,
            (Some(_), None) => false,
            (_, Some(actual)) => {
                let _ = self.index.remove(connection_id);
                let _ = self.store.remove(connection_id);
                self.forget_if_empty(&actual);
                true
            }
            (None, None) => {
                let _ = self.store.remove(connection_id);
                false
            }
        }
    }

    /// Session and record of an associated, active connection.
    pub fn resolve(&self, connection_id: &ConnectionId) -> Option<(&SessionId, &ConnectionRecord)> {
        let session_id = self.index.lookup(connection_id)?;
        let record = self.store.get_active(connection_id)?;
        Some((session_id, record))
    }

    /// Apply the session's rate window to one inbound message.
    pub fn admit(&mut self, session_id: &SessionId, now: Instant) -> bool {
        self.rate.check_and_record(session_id, now)
    }

    /// Active recipients per target session, deduplicated, in target order.
    pub fn targets(
        &self,
        sessions: &[SessionId],
        role: Option<AgentRole>,
        pillar: Option<&str>,
    ) -> Targets {
        let mut seen = HashSet::new();
        sessions
            .iter()
            .filter(|s| seen.insert(*s))
            .map(|s| {
                let ids = self
                    .index
                    .connections(s, role, pillar)
                    .into_iter()
                    .filter(|c| self.store.get_active(c).is_some())
                    .collect();
                (s.clone(), ids)
            })
            .collect()
    }

    /// Every active connection.
    pub fn all_active(&self) -> Vec<ConnectionId> {
        self.store.active_ids()
    }

    /// Verify, summarize, close, and clear everything.
    pub fn drain(&mut self) -> DrainSummary {
        let inconsistencies = self.index.verify();
        let session_counts = self.index.session_sizes();
        let closed = self.store.active_ids();
        let _ = self.store.close_all();
        self.store.clear();
        self.index.clear();
        self.rate.clear();
        DrainSummary {
            session_counts,
            closed,
            inconsistencies,
        }
    }

    fn forget_if_empty(&mut self, session_id: &SessionId) {
        if !self.index.contains_session(session_id) {
            self.rate.forget(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn state() -> RouterState {
        let mut state = RouterState::new(ConnectionLimits::default(), RateLimitConfig::default());
        for id in ["ws1", "ws2", "ws3"] {
            let _ = state.store.register(id.into(), UserContext::new("alice")).unwrap();
        }
        state
    }

    #[test]
    fn associate_indexes_and_stamps_record() {
        let mut st = state();
        let linked_at = st
            .associate(&"ws1".into(), &"s1".into(), AgentRole::Liaison, Some("content"))
            .unwrap();
        let record = st.store.get(&"ws1".into()).unwrap();
        assert_eq!(record.linked_at, Some(linked_at));
        assert_eq!(record.pillar.as_deref(), Some("content"));
        assert_eq!(st.index.lookup(&"ws1".into()).map(SessionId::as_str), Some("s1"));
    }

    #[test]
    fn guide_pillar_is_not_recorded() {
        let mut st = state();
        let _ = st
            .associate(&"ws1".into(), &"s1".into(), AgentRole::Guide, Some("content"))
            .unwrap();
        assert!(st.store.get(&"ws1".into()).unwrap().pillar.is_none());
    }

    #[test]
    fn associate_unknown_connection() {
        let mut st = state();
        assert_matches!(
            st.associate(&"ghost".into(), &"s1".into(), AgentRole::None, None),
            Err(RelayError::ConnectionNotFound(_))
        );
        assert_eq!(st.index.connection_count(), 0);
    }

    #[test]
    fn unlink_with_mismatched_session_is_noop() {
        let mut st = state();
        let _ = st.associate(&"ws1".into(), &"s1".into(), AgentRole::None, None).unwrap();
        assert!(!st.unlink(&"ws1".into(), Some(&"s2".into())));
        assert!(st.index.lookup(&"ws1".into()).is_some());
        assert!(st.store.get(&"ws1".into()).is_some());
    }

    #[test]
    fn unlink_removes_everything_and_is_idempotent() {
        let mut st = state();
        let _ = st.associate(&"ws1".into(), &"s1".into(), AgentRole::None, None).unwrap();
        assert!(st.unlink(&"ws1".into(), Some(&"s1".into())));
        assert!(st.index.lookup(&"ws1".into()).is_none());
        assert!(st.store.get(&"ws1".into()).is_none());
        assert!(!st.unlink(&"ws1".into(), None));
    }

    #[test]
    fn unlink_of_unassociated_connection_drops_record() {
        let mut st = state();
        assert!(!st.unlink(&"ws2".into(), None));
        assert!(st.store.get(&"ws2".into()).is_none());
    }

    #[test]
    fn last_unlink_forgets_rate_window() {
        let mut st = state();
        let _ = st.associate(&"ws1".into(), &"s1".into(), AgentRole::None, None).unwrap();
        let _ = st.associate(&"ws2".into(), &"s1".into(), AgentRole::Guide, None).unwrap();
        assert!(st.admit(&"s1".into(), Instant::now()));
        assert!(st.unlink(&"ws1".into(), None));
        assert_eq!(st.rate.tracked_sessions(), 1);
        assert!(st.unlink(&"ws2".into(), None));
        assert_eq!(st.rate.tracked_sessions(), 0);
    }

    #[test]
    fn targets_dedupe_and_skip_closed() {
        let mut st = state();
        let _ = st.associate(&"ws1".into(), &"s1".into(), AgentRole::None, None).unwrap();
        let _ = st.associate(&"ws2".into(), &"s1".into(), AgentRole::Guide, None).unwrap();
        assert!(st.store.close(&"ws2".into()));
        let targets = st.targets(&["s1".into(), "s1".into(), "s9".into()], None, None);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].1, vec![ConnectionId::from("ws1")]);
        assert!(targets[1].1.is_empty());
    }

    #[test]
    fn drain_summarizes_then_clears() {
        let mut st = state();
        let _ = st.associate(&"ws1".into(), &"s1".into(), AgentRole::None, None).unwrap();
        let _ = st.associate(&"ws2".into(), &"s1".into(), AgentRole::Guide, None).unwrap();
        let summary = st.drain();
        assert_eq!(summary.session_counts.get(&SessionId::from("s1")), Some(&2));
        assert_eq!(summary.closed.len(), 3);
        assert!(summary.inconsistencies.is_empty());
        assert_eq!(st.store.active_count(), 0);
        assert_eq!(st.index.session_count(), 0);
    }
}
