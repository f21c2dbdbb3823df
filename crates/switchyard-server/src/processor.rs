//! Single background consumer of the event queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use switchyard_core::RelayError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastCoordinator;
use crate::events::{Event, EventTarget, EventType};
use crate::metrics::EVENTS_PROCESSED_TOTAL;
use crate::state::SharedState;

/// Counters maintained by the processor.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ProcessorStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorSnapshot {
    /// Events fully handled.
    pub processed: u64,
    /// Events discarded (unknown type).
    pub dropped: u64,
    /// Events whose handling panicked.
    pub failed: u64,
}

impl ProcessorStats {
    /// Read all counters.
    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// How one event ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Processed,
    Dropped,
}

/// Drains the event queue in FIFO order and dispatches to the broadcaster.
pub struct EventProcessor {
    state: SharedState,
    broadcaster: Arc<BroadcastCoordinator>,
    stats: Arc<ProcessorStats>,
}

impl EventProcessor {
    /// Processor over `state`, fanning out through `broadcaster`.
    pub fn new(
        state: SharedState,
        broadcaster: Arc<BroadcastCoordinator>,
        stats: Arc<ProcessorStats>,
    ) -> Self {
        Self {
            state,
            broadcaster,
            stats,
        }
    }

    /// Consume events until `cancel` fires or every producer is gone.
    ///
    /// Cancellation wins over pending events: once it fires no further event
    /// is started.
    #[tracing::instrument(skip_all, name = "event_processor")]
    pub async fn run(self, mut rx: mpsc::Receiver<Event>, cancel: CancellationToken) {
        info!("event processor started");
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            let event_type = event.event_type.as_str().to_string();
            match AssertUnwindSafe(self.process(event)).catch_unwind().await {
                Ok(Outcome::Processed) => {
                    let _ = self.stats.processed.fetch_add(1, Ordering::Relaxed);
                    counter!(EVENTS_PROCESSED_TOTAL, "outcome" => "processed").increment(1);
                }
                Ok(Outcome::Dropped) => {
                    let _ = self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    counter!(EVENTS_PROCESSED_TOTAL, "outcome" => "dropped").increment(1);
                }
                Err(_) => {
                    let _ = self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    counter!(EVENTS_PROCESSED_TOTAL, "outcome" => "failed").increment(1);
                    error!(%event_type, "event handling panicked, continuing");
                }
            }
        }
        info!(remaining = rx.len(), "event processor stopped");
    }

    async fn process(&self, event: Event) -> Outcome {
        match event.event_type {
            EventType::StateUpdate => {
                let sessions = match event.target {
                    EventTarget::Sessions(sessions) => sessions,
                    EventTarget::All => self.state.lock().index.session_ids(),
                };
                let result = self
                    .broadcaster
                    .broadcast(&event.payload, &sessions, None, None)
                    .await;
                debug!(
                    sessions = result.per_session_results.len(),
                    success = result.totals.success,
                    failed = result.totals.failed,
                    "state update delivered"
                );
                Outcome::Processed
            }
            EventType::SystemMessage => {
                let totals = self.broadcaster.broadcast_all(&event.payload).await;
                debug!(
                    success = totals.success,
                    failed = totals.failed,
                    "system message delivered"
                );
                Outcome::Processed
            }
            EventType::Other(name) => {
                let err = RelayError::UnknownEventType(name);
                warn!(error = %err, "dropping event");
                Outcome::Dropped
            }
        }
    }
}
