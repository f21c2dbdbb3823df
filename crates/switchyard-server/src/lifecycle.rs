//! Router lifecycle: `Stopped → Running → Draining → Stopped`.
//!
//! The consumer task is stopped through a `CancellationToken`. Shutdown
//! waits a bounded grace period for it and aborts it after that.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use switchyard_core::{RelayError, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::EventQueue;

/// Where the router is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Not accepting events.
    Stopped,
    /// Consumer running, queue open.
    Running,
    /// Shutdown in progress.
    Draining,
}

impl LifecycleState {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Draining => "draining",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed shutdown tore down.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Connections that were active and got closed.
    pub connections_closed: usize,
    /// Sessions whose connection-count summary was written.
    pub sessions_summarized: usize,
    /// Sessions whose summary write failed.
    pub summary_failures: usize,
    /// Whether the consumer stopped within the grace period.
    pub consumer_stopped: bool,
    /// Index inconsistencies logged before clearing.
    pub inconsistencies: usize,
}

/// Handle to the running consumer task.
#[derive(Debug)]
pub struct Consumer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Consumer {
    /// Wrap a spawned task and the token that stops it.
    pub fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { cancel, handle }
    }

    /// Cancel the task and wait up to `grace` for it to finish, then abort.
    ///
    /// Returns whether the task finished on its own.
    pub async fn stop(mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "event consumer ended abnormally");
                true
            }
            Err(_) => {
                let grace_ms = grace.as_millis() as u64;
                warn!(grace_ms, "event consumer did not stop in time, aborting");
                self.handle.abort();
                false
            }
        }
    }
}

/// Lifecycle state plus the resources that exist only while running.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    queue: Option<EventQueue>,
    consumer: Option<Consumer>,
    started_at: Instant,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LifecycleState::Stopped,
            queue: None,
            consumer: None,
            started_at: Instant::now(),
        }
    }
}

impl Lifecycle {
    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Fail unless the router is stopped.
    pub fn ensure_stopped(&self, operation: &'static str) -> Result<()> {
        self.ensure(LifecycleState::Stopped, operation)
    }

    /// `Stopped → Running` with the given queue and consumer.
    pub fn start(&mut self, queue: EventQueue, consumer: Consumer) -> Result<()> {
        self.ensure_stopped("initialize")?;
        self.queue = Some(queue);
        self.consumer = Some(consumer);
        self.state = LifecycleState::Running;
        self.started_at = Instant::now();
        info!("router running");
        Ok(())
    }

    /// `Running → Draining`, closing the queue to producers and handing back
    /// the consumer to stop.
    pub fn begin_drain(&mut self) -> Result<Option<Consumer>> {
        self.ensure(LifecycleState::Running, "shutdown")?;
        self.state = LifecycleState::Draining;
        self.queue = None;
        Ok(self.consumer.take())
    }

    /// `Draining → Stopped`.
    pub fn finish(&mut self) {
        self.state = LifecycleState::Stopped;
        info!("router stopped");
    }

    /// Producer handle while running.
    pub fn queue(&self) -> Result<EventQueue> {
        self.queue.clone().ok_or(RelayError::QueueClosed)
    }

    /// Queue depth and capacity, zero when not running.
    pub fn queue_stats(&self) -> (usize, usize) {
        self.queue
            .as_ref()
            .map_or((0, 0), |q| (q.depth(), q.capacity()))
    }

    /// Time since the router last started (or was created).
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn ensure(&self, expected: LifecycleState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RelayError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }
}
