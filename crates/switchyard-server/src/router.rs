//! Inbound message routing: connection → session context.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use switchyard_core::{ConnectionId, RelayError, Result, SessionId, UserId};

use crate::state::{AgentRole, RouterState, SharedState};

/// Key under which the context is attached to routed messages.
pub const SESSION_CONTEXT_KEY: &str = "session_context";

/// Who sent a routed message and where it belongs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionContext {
    /// Session the connection is associated with.
    pub session_id: SessionId,
    /// Registering user.
    pub user_id: UserId,
    /// Role of the sending connection.
    pub agent_role: AgentRole,
    /// Pillar of the sending connection.
    pub pillar: Option<String>,
    /// When the message was routed.
    pub routed_at: DateTime<Utc>,
}

impl SessionContext {
    fn to_value(&self) -> Value {
        json!({
            "session_id": self.session_id.as_str(),
            "user_id": self.user_id.as_str(),
            "agent_role": self.agent_role.as_str(),
            "pillar": self.pillar,
            "routed_at": self.routed_at.to_rfc3339(),
        })
    }
}

/// Resolves connections to their session and decorates inbound messages.
///
/// Reads only in-memory state; the session store is never consulted here.
pub struct MessageRouter {
    state: SharedState,
}

impl MessageRouter {
    /// Router over `state`.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Attach `session_context` to `message`.
    ///
    /// Fails with `NoSession` when the connection is not associated and with
    /// `RateLimited` when the session's inbound window is full.
    pub fn route(&self, connection_id: &ConnectionId, message: Value) -> Result<Value> {
        let context = {
            let mut state = self.state.lock();
            let context = context_of(&state, connection_id)
                .ok_or_else(|| RelayError::NoSession(connection_id.clone()))?;
            if !state.admit(&context.session_id, Instant::now()) {
                return Err(RelayError::RateLimited(context.session_id));
            }
            context
        };
        Ok(decorate(message, &context))
    }
}

fn context_of(state: &RouterState, connection_id: &ConnectionId) -> Option<SessionContext> {
    let (session_id, record) = state.resolve(connection_id)?;
    Some(SessionContext {
        session_id: session_id.clone(),
        user_id: record.user.user_id.clone(),
        agent_role: record.agent_role,
        pillar: record.pillar.clone(),
        routed_at: Utc::now(),
    })
}

/// Objects gain a `session_context` key (replacing any existing one); other
/// values are wrapped as `{"payload": ..., "session_context": ...}`.
fn decorate(message: Value, context: &SessionContext) -> Value {
    let mut fields = match message {
        Value::Object(fields) => fields,
        other => {
            let mut wrapper = Map::new();
            let _ = wrapper.insert("payload".to_string(), other);
            wrapper
        }
    };
    let _ = fields.insert(SESSION_CONTEXT_KEY.to_string(), context.to_value());
    Value::Object(fields)
}
