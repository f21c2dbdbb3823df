//! Delivery seam between the router and whatever carries bytes to clients.
//!
//! The router never owns sockets. It hands serialized messages to a
//! [`Transport`] by connection ID and counts the outcome.

pub mod channel;

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::ConnectionId;

pub use channel::ChannelTransport;

/// Result of one send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the connection.
    Delivered,
    /// Not delivered; the reason is for logs only.
    Failed(String),
}

impl SendOutcome {
    /// Whether the message was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Outbound delivery to logical connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one serialized message.
    async fn send(&self, connection_id: &ConnectionId, message: Arc<String>) -> SendOutcome;

    /// Tear down a connection. Called for every connection at shutdown.
    async fn close(&self, _connection_id: &ConnectionId) {}
}
