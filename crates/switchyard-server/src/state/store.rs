//! Connection records and registration limits.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::{ConnectionId, LimitScope, RelayError, Result, SessionId, UserId};

use super::slot::AgentRole;

/// Identity attached to a connection at registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    /// Owning user.
    pub user_id: UserId,
    /// Tenant, when the deployment is multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Free-form caller data, carried but never interpreted.
    #[serde(default)]
    pub metadata: Value,
}

impl UserContext {
    /// Context for `user_id` with no tenant and empty metadata.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: None,
            metadata: Value::Null,
        }
    }
}

/// Whether a connection can still receive traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Registered and usable.
    Active,
    /// Closed; kept only until removed or replaced.
    Closed,
}

impl ConnectionStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// Everything the router knows about one connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Transport-supplied ID.
    pub connection_id: ConnectionId,
    /// Session the connection is associated with.
    pub session_id: Option<SessionId>,
    /// Registering user.
    pub user: UserContext,
    /// Role given at association.
    pub agent_role: AgentRole,
    /// Pillar given at association (liaisons only).
    pub pillar: Option<String>,
    /// Current status.
    pub status: ConnectionStatus,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Time of the most recent association.
    pub linked_at: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    fn new(connection_id: ConnectionId, user: UserContext) -> Self {
        Self {
            connection_id,
            session_id: None,
            user,
            agent_role: AgentRole::None,
            pillar: None,
            status: ConnectionStatus::Active,
            registered_at: Utc::now(),
            linked_at: None,
        }
    }

    /// Whether the connection is active.
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }
}

/// Registration caps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Active connections across all users.
    pub max_connections: usize,
    /// Active connections per user.
    pub max_per_user: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_per_user: 5,
        }
    }
}

/// Owner of all connection records.
#[derive(Debug, Default)]
pub struct ConnectionStore {
    records: HashMap<ConnectionId, ConnectionRecord>,
    limits: ConnectionLimits,
}

impl ConnectionStore {
    /// Empty store enforcing `limits`.
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            records: HashMap::new(),
            limits,
        }
    }

    /// Register a new active connection.
    ///
    /// An active record with the same ID is rejected; a closed one is replaced.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        user: UserContext,
    ) -> Result<ConnectionRecord> {
        if self
            .records
            .get(&connection_id)
            .is_some_and(ConnectionRecord::is_active)
        {
            return Err(RelayError::DuplicateRegistration(connection_id));
        }
        if self.active_count() >= self.limits.max_connections {
            return Err(RelayError::ConnectionLimitExceeded {
                scope: LimitScope::Global,
                limit: self.limits.max_connections,
            });
        }
        if self.active_count_for_user(&user.user_id) >= self.limits.max_per_user {
            return Err(RelayError::ConnectionLimitExceeded {
                scope: LimitScope::User(user.user_id),
                limit: self.limits.max_per_user,
            });
        }

        let record = ConnectionRecord::new(connection_id.clone(), user);
        let _ = self.records.insert(connection_id, record.clone());
        Ok(record)
    }

    /// Record lookup, regardless of status.
    pub fn get(&self, connection_id: &ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(connection_id)
    }

    /// Active record lookup.
    pub fn get_active(&self, connection_id: &ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(connection_id).filter(|r| r.is_active())
    }

    /// Stamp an association onto an active record.
    pub fn bind(
        &mut self,
        connection_id: &ConnectionId,
        session_id: SessionId,
        agent_role: AgentRole,
        pillar: Option<String>,
        linked_at: DateTime<Utc>,
    ) -> Result<()> {
        let record = self
            .records
            .get_mut(connection_id)
            .filter(|r| r.is_active())
            .ok_or_else(|| RelayError::ConnectionNotFound(connection_id.clone()))?;
        record.session_id = Some(session_id);
        record.agent_role = agent_role;
        record.pillar = pillar;
        record.linked_at = Some(linked_at);
        Ok(())
    }

    /// Mark a connection closed. Returns whether it was active.
    pub fn close(&mut self, connection_id: &ConnectionId) -> bool {
        match self.records.get_mut(connection_id) {
            Some(record) if record.is_active() => {
                record.status = ConnectionStatus::Closed;
                true
            }
            _ => false,
        }
    }

    /// Drop a record entirely.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionRecord> {
        self.records.remove(connection_id)
    }

    /// Number of active connections.
    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.is_active()).count()
    }

    /// Number of active connections owned by `user_id`.
    pub fn active_count_for_user(&self, user_id: &UserId) -> usize {
        self.records
            .values()
            .filter(|r| r.is_active() && r.user.user_id == *user_id)
            .count()
    }

    /// IDs of every stored record.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.records.keys().cloned().collect()
    }

    /// IDs of active records.
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.records
            .values()
            .filter(|r| r.is_active())
            .map(|r| r.connection_id.clone())
            .collect()
    }

    /// Active connections grouped by agent role name.
    pub fn count_by_role(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values().filter(|r| r.is_active()) {
            *counts.entry(record.agent_role.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Mark every record closed. Returns how many were active.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for record in self.records.values_mut().filter(|r| r.is_active()) {
            record.status = ConnectionStatus::Closed;
            closed += 1;
        }
        closed
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
