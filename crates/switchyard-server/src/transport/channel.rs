//! In-process transport backed by one bounded channel per connection.
//!
//! A socket writer task (or a test) attaches a connection and drains the
//! returned receiver. Sends never wait: a full or closed channel counts as a
//! dropped message.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use switchyard_core::ConnectionId;
use tokio::sync::mpsc;
use tracing::debug;

use super::{SendOutcome, Transport};

struct Outbound {
    tx: mpsc::Sender<Arc<String>>,
    dropped: AtomicU64,
}

/// [`Transport`] writing to per-connection `mpsc` channels.
#[derive(Default)]
pub struct ChannelTransport {
    outbound: RwLock<HashMap<ConnectionId, Arc<Outbound>>>,
}

impl ChannelTransport {
    /// Transport with no attached connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection with a buffer of `capacity` messages.
    ///
    /// Re-attaching replaces the previous channel.
    pub fn attach(
        &self,
        connection_id: ConnectionId,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbound = Arc::new(Outbound {
            tx,
            dropped: AtomicU64::new(0),
        });
        let _ = self.outbound.write().insert(connection_id, outbound);
        rx
    }

    /// Detach a connection. Its receiver sees the channel close.
    pub fn detach(&self, connection_id: &ConnectionId) -> bool {
        self.outbound.write().remove(connection_id).is_some()
    }

    /// Messages dropped for a connection because its channel was full or closed.
    pub fn drop_count(&self, connection_id: &ConnectionId) -> u64 {
        self.outbound
            .read()
            .get(connection_id)
            .map_or(0, |o| o.dropped.load(Ordering::Relaxed))
    }

    /// Number of attached connections.
    pub fn attached(&self) -> usize {
        self.outbound.read().len()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, connection_id: &ConnectionId, message: Arc<String>) -> SendOutcome {
        let Some(outbound) = self.outbound.read().get(connection_id).cloned() else {
            return SendOutcome::Failed("not attached".into());
        };
        match outbound.tx.try_send(message) {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => {
                let _ = outbound.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "channel full",
                    mpsc::error::TrySendError::Closed(_) => "channel closed",
                };
                SendOutcome::Failed(reason.into())
            }
        }
    }

    async fn close(&self, connection_id: &ConnectionId) {
        if self.detach(connection_id) {
            debug!(%connection_id, "channel transport detached connection");
        }
    }
}
