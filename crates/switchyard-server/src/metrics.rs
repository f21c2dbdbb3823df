//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text exposition.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections registered (counter).
pub const CONNECTIONS_REGISTERED_TOTAL: &str = "switchyard_connections_registered_total";
/// Registrations refused (counter, labels: reason).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "switchyard_connections_rejected_total";
/// Connections unlinked (counter).
pub const CONNECTIONS_UNLINKED_TOTAL: &str = "switchyard_connections_unlinked_total";
/// Active connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "switchyard_connections_active";
/// Successful associations (counter).
pub const ASSOCIATIONS_TOTAL: &str = "switchyard_associations_total";
/// Routed inbound messages (counter, labels: outcome).
pub const MESSAGES_ROUTED_TOTAL: &str = "switchyard_messages_routed_total";
/// Broadcast sends delivered (counter).
pub const BROADCAST_SENDS_TOTAL: &str = "switchyard_broadcast_sends_total";
/// Broadcast sends failed or timed out (counter).
pub const BROADCAST_FAILURES_TOTAL: &str = "switchyard_broadcast_failures_total";
/// Broadcast wall time (histogram).
pub const BROADCAST_DURATION_SECONDS: &str = "switchyard_broadcast_duration_seconds";
/// Events accepted by the queue (counter).
pub const EVENTS_ENQUEUED_TOTAL: &str = "switchyard_events_enqueued_total";
/// Events refused by the queue (counter, labels: reason).
pub const EVENTS_REJECTED_TOTAL: &str = "switchyard_events_rejected_total";
/// Events handled by the processor (counter, labels: outcome).
pub const EVENTS_PROCESSED_TOTAL: &str = "switchyard_events_processed_total";
