//! Structured results returned by the public router operations.
//!
//! Failures carry the stable code from [`RelayError::code`] in `error`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::{ConnectionId, RelayError};

use crate::state::ConnectionStatus;

/// Result of `register_connection`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Whether the connection was registered.
    pub success: bool,
    /// The ID that was (or failed to be) registered.
    pub connection_id: ConnectionId,
    /// Status of the new record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectionStatus>,
    /// Failure code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegisterResponse {
    pub(crate) fn ok(connection_id: ConnectionId, status: ConnectionStatus) -> Self {
        Self {
            success: true,
            connection_id,
            status: Some(status),
            error: None,
        }
    }

    pub(crate) fn failed(connection_id: ConnectionId, err: &RelayError) -> Self {
        Self {
            success: false,
            connection_id,
            status: None,
            error: Some(err.code().to_string()),
        }
    }
}

/// Result of `associate_connection`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssociateResponse {
    /// Whether the connection is now associated.
    pub success: bool,
    /// Association time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_at: Option<DateTime<Utc>>,
    /// Failure code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssociateResponse {
    pub(crate) fn ok(linked_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            linked_at: Some(linked_at),
            error: None,
        }
    }

    pub(crate) fn failed(err: &RelayError) -> Self {
        Self {
            success: false,
            linked_at: None,
            error: Some(err.code().to_string()),
        }
    }
}

/// Result of `unlink_connection`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkResponse {
    /// Whether an association was removed.
    pub success: bool,
}

/// Result of `route_message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutedMessage {
    /// Whether the message was routed.
    pub success: bool,
    /// The message with `session_context` attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Failure code (`no_session`, `rate_limited`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoutedMessage {
    pub(crate) fn ok(message: Value) -> Self {
        Self {
            success: true,
            message: Some(message),
            error: None,
        }
    }

    pub(crate) fn failed(err: &RelayError) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(err.code().to_string()),
        }
    }
}
