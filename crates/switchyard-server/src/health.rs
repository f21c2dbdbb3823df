//! Health report served at `/health` and returned by `Switchyard::health`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::lifecycle::LifecycleState;
use crate::processor::ProcessorSnapshot;

/// Live router counters.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `"ok"` while running, otherwise the lifecycle state.
    pub status: String,
    /// Lifecycle state.
    pub lifecycle: LifecycleState,
    /// Seconds since the router last started.
    pub uptime_secs: u64,
    /// Active connections.
    pub active_connections: usize,
    /// Sessions with at least one associated connection.
    pub active_sessions: usize,
    /// Events waiting in the queue.
    pub queue_depth: usize,
    /// Queue capacity (zero when not running).
    pub queue_capacity: usize,
    /// Active connections per agent role.
    pub connections_by_role: BTreeMap<String, usize>,
    /// Events handled.
    pub events_processed: u64,
    /// Events discarded.
    pub events_dropped: u64,
    /// Events whose handling failed.
    pub events_failed: u64,
}

/// Inputs gathered by the router for one report.
#[derive(Debug, Default)]
pub struct HealthInputs {
    /// Lifecycle state.
    pub lifecycle: Option<LifecycleState>,
    /// Time since start.
    pub uptime: Duration,
    /// Active connections.
    pub active_connections: usize,
    /// Indexed sessions.
    pub active_sessions: usize,
    /// Queue depth and capacity.
    pub queue: (usize, usize),
    /// Connections per role.
    pub connections_by_role: BTreeMap<String, usize>,
    /// Processor counters.
    pub processor: ProcessorSnapshot,
}

/// Build a report.
pub fn health_check(inputs: HealthInputs) -> HealthReport {
    let lifecycle = inputs.lifecycle.unwrap_or(LifecycleState::Stopped);
    let status = match lifecycle {
        LifecycleState::Running => "ok".to_string(),
        other => other.to_string(),
    };
    HealthReport {
        status,
        lifecycle,
        uptime_secs: inputs.uptime.as_secs(),
        active_connections: inputs.active_connections,
        active_sessions: inputs.active_sessions,
        queue_depth: inputs.queue.0,
        queue_capacity: inputs.queue.1,
        connections_by_role: inputs.connections_by_role,
        events_processed: inputs.processor.processed,
        events_dropped: inputs.processor.dropped,
        events_failed: inputs.processor.failed,
    }
}
