//! Error types for the connection/session router.
//!
//! [`RelayError`] covers every failure kind the router can report. Public
//! router operations convert these into structured responses using
//! [`RelayError::code`]; only lifecycle and queue faults are returned as
//! `Err` directly.
//!
//! [`StoreError`] is the error type of the external session store
//! collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ConnectionId, SessionId, UserId};

/// Which connection limit was hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    /// Process-wide connection cap.
    Global,
    /// Per-user connection cap.
    User(UserId),
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::User(user) => write!(f, "user {user}"),
        }
    }
}

/// Errors reported by the session store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The session does not exist.
    #[error("session not found: {0}")]
    NotFound(SessionId),
    /// The backing store failed.
    #[error("session store backend error: {0}")]
    Backend(String),
}

/// Errors that can occur while registering, routing, or broadcasting.
#[derive(Debug, Error)]
pub enum RelayError {
    /// `associate` target session is absent from the session store.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Operation on a connection ID that is not registered (or already closed).
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// An active connection with this ID is already registered.
    #[error("connection already registered: {0}")]
    DuplicateRegistration(ConnectionId),

    /// Registration refused because a connection cap was reached.
    #[error("connection limit of {limit} reached ({scope})")]
    ConnectionLimitExceeded {
        /// Which limit was hit.
        scope: LimitScope,
        /// The configured limit.
        limit: usize,
    },

    /// A single transport send failed.
    #[error("send to {connection_id} failed: {reason}")]
    TransportSendFailure {
        /// Target connection.
        connection_id: ConnectionId,
        /// Transport-reported reason.
        reason: String,
    },

    /// An event carried a type the processor does not handle.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The bounded event queue refused an event.
    #[error("event queue full (capacity {capacity})")]
    QueueOverflow {
        /// Queue capacity at the time of the refusal.
        capacity: usize,
    },

    /// The event queue is not accepting events (router not running).
    #[error("event queue closed")]
    QueueClosed,

    /// The connection has no session bound to it.
    #[error("no session bound to connection {0}")]
    NoSession(ConnectionId),

    /// Inbound rate limit exceeded for a session.
    #[error("rate limit exceeded for session {0}")]
    RateLimited(SessionId),

    /// A lifecycle operation was called in the wrong state.
    #[error("invalid lifecycle transition: {operation} while {state}")]
    InvalidState {
        /// Requested operation.
        operation: &'static str,
        /// Current lifecycle state.
        state: String,
    },

    /// The session store collaborator failed.
    #[error(transparent)]
    SessionStore(#[from] StoreError),
}

impl RelayError {
    /// Stable machine-readable code used in structured responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::ConnectionNotFound(_) => "ConnectionNotFound",
            Self::DuplicateRegistration(_) => "DuplicateRegistration",
            Self::ConnectionLimitExceeded { .. } => "ConnectionLimitExceeded",
            Self::TransportSendFailure { .. } => "TransportSendFailure",
            Self::UnknownEventType(_) => "UnknownEventType",
            Self::QueueOverflow { .. } => "QueueOverflow",
            Self::QueueClosed => "QueueClosed",
            Self::NoSession(_) => "no_session",
            Self::RateLimited(_) => "rate_limited",
            Self::InvalidState { .. } => "InvalidState",
            Self::SessionStore(StoreError::NotFound(_)) => "SessionNotFound",
            Self::SessionStore(StoreError::Backend(_)) => "SessionStoreError",
        }
    }

    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QueueOverflow { .. }
                | Self::RateLimited(_)
                | Self::ConnectionLimitExceeded { .. }
                | Self::TransportSendFailure { .. }
                | Self::SessionStore(StoreError::Backend(_))
        )
    }
}

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RelayError>;
