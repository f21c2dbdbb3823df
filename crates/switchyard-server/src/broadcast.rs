//! Fan-out of one update to every matching connection of a set of sessions.
//!
//! Recipients are snapshotted under the state lock; the lock is released
//! before any send. Sends within one broadcast run concurrently, each bounded
//! by the configured send timeout. A failed or timed-out send is counted and
//! never stops the rest of the fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::{ConnectionId, RelayError, SessionId};
use tracing::{debug, warn};

use crate::metrics::{BROADCAST_DURATION_SECONDS, BROADCAST_FAILURES_TOTAL, BROADCAST_SENDS_TOTAL};
use crate::state::{AgentRole, SharedState};
use crate::transport::{SendOutcome, Transport};

/// Delivery tally for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDelivery {
    /// Matching active connections found.
    pub connections_found: usize,
    /// Sends delivered.
    pub success: usize,
    /// Sends failed or timed out.
    pub failed: usize,
}

/// Delivery tally across a whole broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastTotals {
    /// Sends attempted.
    pub connections_found: usize,
    /// Sends delivered.
    pub success: usize,
    /// Sends failed or timed out.
    pub failed: usize,
}

impl BroadcastTotals {
    fn add(&mut self, delivery: SessionDelivery) {
        self.connections_found += delivery.connections_found;
        self.success += delivery.success;
        self.failed += delivery.failed;
    }
}

/// Outcome of [`BroadcastCoordinator::broadcast`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    /// `true` when no send failed.
    pub success: bool,
    /// Tally per target session (each target appears once).
    pub per_session_results: BTreeMap<SessionId, SessionDelivery>,
    /// Sum over all sessions.
    pub totals: BroadcastTotals,
}

/// Sends updates to sessions through the [`Transport`].
pub struct BroadcastCoordinator {
    state: SharedState,
    transport: Arc<dyn Transport>,
    send_timeout: Duration,
}

impl BroadcastCoordinator {
    /// Coordinator over `state`, delivering through `transport`.
    pub fn new(state: SharedState, transport: Arc<dyn Transport>, send_timeout: Duration) -> Self {
        Self {
            state,
            transport,
            send_timeout,
        }
    }

    /// Deliver `update` to the matching connections of each target session.
    pub async fn broadcast(
        &self,
        update: &Value,
        sessions: &[SessionId],
        role: Option<AgentRole>,
        pillar: Option<&str>,
    ) -> BroadcastResult {
        let started = Instant::now();
        let targets = self.state.lock().targets(sessions, role, pillar);

        let message = serialize(update);
        let sends = targets
            .iter()
            .flat_map(|(session_id, ids)| ids.iter().map(move |id| (session_id, id)));
        let outcomes = join_all(sends.map(|(session_id, id)| {
            let message = message.clone();
            async move { (session_id, self.send_one(id, message).await) }
        }))
        .await;

        let mut per_session: BTreeMap<SessionId, SessionDelivery> = targets
            .iter()
            .map(|(session_id, ids)| {
                (
                    session_id.clone(),
                    SessionDelivery {
                        connections_found: ids.len(),
                        ..SessionDelivery::default()
                    },
                )
            })
            .collect();
        for (session_id, delivered) in outcomes {
            if let Some(tally) = per_session.get_mut(session_id) {
                if delivered {
                    tally.success += 1;
                } else {
                    tally.failed += 1;
                }
            }
        }

        let mut totals = BroadcastTotals::default();
        for delivery in per_session.values() {
            totals.add(*delivery);
        }
        record(&totals, started);
        debug!(
            sessions = per_session.len(),
            recipients = totals.connections_found,
            failed = totals.failed,
            ?role,
            pillar,
            "broadcast to sessions"
        );

        BroadcastResult {
            success: totals.failed == 0,
            per_session_results: per_session,
            totals,
        }
    }

    /// Deliver `update` to every active connection.
    pub async fn broadcast_all(&self, update: &Value) -> BroadcastTotals {
        let started = Instant::now();
        let ids = self.state.lock().all_active();

        let message = serialize(update);
        let outcomes = join_all(ids.iter().map(|id| self.send_one(id, message.clone()))).await;

        let success = outcomes.iter().filter(|delivered| **delivered).count();
        let totals = BroadcastTotals {
            connections_found: ids.len(),
            success,
            failed: ids.len() - success,
        };
        record(&totals, started);
        debug!(
            recipients = totals.connections_found,
            failed = totals.failed,
            "broadcast to all"
        );
        totals
    }

    async fn send_one(&self, connection_id: &ConnectionId, message: Option<Arc<String>>) -> bool {
        let Some(message) = message else {
            return false;
        };
        let send = self.transport.send(connection_id, message);
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(SendOutcome::Delivered) => true,
            Ok(SendOutcome::Failed(reason)) => {
                let err = RelayError::TransportSendFailure {
                    connection_id: connection_id.clone(),
                    reason,
                };
                warn!(%connection_id, error = %err, "send failed");
                false
            }
            Err(_) => {
                let timeout_ms = self.send_timeout.as_millis() as u64;
                warn!(%connection_id, timeout_ms, "send timed out");
                false
            }
        }
    }
}

/// Serialize once for the whole fan-out. `None` fails every send.
fn serialize(update: &Value) -> Option<Arc<String>> {
    match serde_json::to_string(update) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(error = %e, "failed to serialize broadcast payload");
            None
        }
    }
}

fn record(totals: &BroadcastTotals, started: Instant) {
    counter!(BROADCAST_SENDS_TOTAL).increment(totals.success as u64);
    counter!(BROADCAST_FAILURES_TOTAL).increment(totals.failed as u64);
    histogram!(BROADCAST_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
