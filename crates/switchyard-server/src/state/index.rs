//! Session → slot → connection index with an O(1) reverse map.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use switchyard_core::{ConnectionId, SessionId};

use super::slot::{AgentRole, Slot};

type SlotMap = BTreeMap<Slot, BTreeSet<ConnectionId>>;

/// Forward and reverse maps between sessions and connections.
///
/// Every mutation updates both maps together, so a connection is either in
/// exactly one `(session, slot)` position and the reverse map, or in neither.
#[derive(Debug, Default)]
pub struct SessionIndex {
    sessions: HashMap<SessionId, SlotMap>,
    reverse: HashMap<ConnectionId, (SessionId, Slot)>,
}

impl SessionIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `connection_id` at `(session_id, slot)`.
    ///
    /// A connection already indexed elsewhere is moved; its previous
    /// position is returned.
    pub fn insert(
        &mut self,
        connection_id: ConnectionId,
        session_id: SessionId,
        slot: Slot,
    ) -> Option<(SessionId, Slot)> {
        let previous = self.remove(&connection_id);
        let _ = self
            .sessions
            .entry(session_id.clone())
            .or_default()
            .entry(slot.clone())
            .or_default()
            .insert(connection_id.clone());
        let _ = self.reverse.insert(connection_id, (session_id, slot));
        previous
    }

    /// Remove `connection_id` from both maps, pruning emptied entries.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<(SessionId, Slot)> {
        let (session_id, slot) = self.reverse.remove(connection_id)?;
        if let Some(slots) = self.sessions.get_mut(&session_id) {
            if let Some(members) = slots.get_mut(&slot) {
                let _ = members.remove(connection_id);
                if members.is_empty() {
                    let _ = slots.remove(&slot);
                }
            }
            if slots.is_empty() {
                let _ = self.sessions.remove(&session_id);
            }
        }
        Some((session_id, slot))
    }

    /// Session a connection is associated with.
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<&SessionId> {
        self.reverse.get(connection_id).map(|(session_id, _)| session_id)
    }

    /// Connections of `session_id` whose slot passes the filters.
    pub fn connections(
        &self,
        session_id: &SessionId,
        role: Option<AgentRole>,
        pillar: Option<&str>,
    ) -> Vec<ConnectionId> {
        self.sessions
            .get(session_id)
            .map(|slots| {
                slots
                    .iter()
                    .filter(|(slot, _)| slot.matches(role, pillar))
                    .flat_map(|(_, members)| members.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any connection is associated with `session_id`.
    pub fn contains_session(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Every indexed session.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    /// Number of indexed sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of indexed connections.
    pub fn connection_count(&self) -> usize {
        self.reverse.len()
    }

    /// Connection count per session, taken from the forward map.
    pub fn session_sizes(&self) -> BTreeMap<SessionId, usize> {
        self.sessions
            .iter()
            .map(|(session_id, slots)| {
                (session_id.clone(), slots.values().map(BTreeSet::len).sum())
            })
            .collect()
    }

    /// Describe every disagreement between the forward and reverse maps.
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (connection_id, (session_id, slot)) in &self.reverse {
            let present = self
                .sessions
                .get(session_id)
                .and_then(|slots| slots.get(slot))
                .is_some_and(|members| members.contains(connection_id));
            if !present {
                problems.push(format!(
                    "reverse entry {connection_id} -> {session_id} has no forward entry"
                ));
            }
        }

        for (session_id, slots) in &self.sessions {
            if slots.is_empty() {
                problems.push(format!("session {session_id} has an empty slot map"));
            }
            for (slot, members) in slots {
                for connection_id in members {
                    match self.reverse.get(connection_id) {
                        Some((s, sl)) if s == session_id && sl == slot => {}
                        _ => problems.push(format!(
                            "forward entry {session_id}/{slot:?}/{connection_id} \
                             has no matching reverse entry"
                        )),
                    }
                }
            }
        }

        problems
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.reverse.clear();
    }
}
