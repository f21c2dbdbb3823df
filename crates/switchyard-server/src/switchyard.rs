//! [`Switchyard`]: the router instance callers construct and own.
//!
//! Registration, association, routing and unlinking act on the shared state
//! directly and return structured responses. Outbound events go through the
//! bounded queue to the background processor started by
//! [`Switchyard::initialize`].

use std::sync::Arc;

use futures::future::join_all;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::{Value, json};
use switchyard_core::{ConnectionId, RelayError, Result, SessionId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastCoordinator, BroadcastResult};
use crate::config::RouterConfig;
use crate::events::{Event, EventQueue};
use crate::health::{HealthInputs, HealthReport, health_check};
use crate::lifecycle::{Consumer, Lifecycle, LifecycleState, ShutdownReport};
use crate::metrics::{
    ASSOCIATIONS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_REGISTERED_TOTAL,
    CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_UNLINKED_TOTAL, EVENTS_ENQUEUED_TOTAL,
    EVENTS_REJECTED_TOTAL, MESSAGES_ROUTED_TOTAL,
};
use crate::processor::{EventProcessor, ProcessorStats};
use crate::responses::{AssociateResponse, RegisterResponse, RoutedMessage, UnlinkResponse};
use crate::router::MessageRouter;
use crate::session_store::SessionStore;
use crate::state::{AgentRole, ConnectionRecord, RouterState, SharedState, UserContext};
use crate::transport::Transport;

/// Connection/session router.
pub struct Switchyard {
    config: RouterConfig,
    state: SharedState,
    sessions: Arc<dyn SessionStore>,
    transport: Arc<dyn Transport>,
    router: MessageRouter,
    broadcaster: Arc<BroadcastCoordinator>,
    stats: Arc<ProcessorStats>,
    lifecycle: Mutex<Lifecycle>,
}

impl Switchyard {
    /// Build a stopped router. Call [`initialize`](Self::initialize) to start
    /// event processing.
    pub fn new(
        config: RouterConfig,
        sessions: Arc<dyn SessionStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let state = RouterState::new(config.limits, config.rate_limits).shared();
        let broadcaster = Arc::new(BroadcastCoordinator::new(
            state.clone(),
            transport.clone(),
            config.send_timeout,
        ));
        Self {
            router: MessageRouter::new(state.clone()),
            config,
            state,
            sessions,
            transport,
            broadcaster,
            stats: Arc::new(ProcessorStats::default()),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Configuration in force.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.lock().state()
    }

    // ── Connections ─────────────────────────────────────────────────────

    /// Register a new connection for `user`.
    ///
    /// Refused while shutting down, when the ID is already active, or when a
    /// connection limit is reached.
    pub fn register_connection(
        &self,
        connection_id: impl Into<ConnectionId>,
        user: UserContext,
    ) -> RegisterResponse {
        let connection_id = connection_id.into();

        // Lock order is lifecycle then state; shutdown cannot begin draining
        // between the check and the insert.
        let result = {
            let lifecycle = self.lifecycle.lock();
            if lifecycle.state() == LifecycleState::Draining {
                Err(RelayError::InvalidState {
                    operation: "register_connection",
                    state: lifecycle.state().to_string(),
                })
            } else {
                let mut state = self.state.lock();
                let result = state.store.register(connection_id.clone(), user);
                gauge!(CONNECTIONS_ACTIVE).set(state.store.active_count() as f64);
                result
            }
        };

        match result {
            Ok(record) => {
                counter!(CONNECTIONS_REGISTERED_TOTAL).increment(1);
                info!(%connection_id, user_id = %record.user.user_id, "connection registered");
                RegisterResponse::ok(connection_id, record.status)
            }
            Err(err) => {
                counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => err.code()).increment(1);
                warn!(%connection_id, error = %err, "registration refused");
                RegisterResponse::failed(connection_id, &err)
            }
        }
    }

    /// Associate a registered connection with a session.
    ///
    /// The session must exist in the session store at call time.
    pub async fn associate_connection(
        &self,
        connection_id: &ConnectionId,
        session_id: &SessionId,
        agent_role: Option<AgentRole>,
        pillar: Option<&str>,
    ) -> AssociateResponse {
        match self.sessions.get_session(session_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let err = RelayError::SessionNotFound(session_id.clone());
                debug!(%connection_id, %session_id, "association refused: unknown session");
                return AssociateResponse::failed(&err);
            }
            Err(e) => {
                let err = RelayError::from(e);
                warn!(%connection_id, %session_id, error = %err, "session store lookup failed");
                return AssociateResponse::failed(&err);
            }
        }

        let role = agent_role.unwrap_or_default();
        let result = self
            .state
            .lock()
            .associate(connection_id, session_id, role, pillar);
        match result {
            Ok(linked_at) => {
                counter!(ASSOCIATIONS_TOTAL).increment(1);
                info!(%connection_id, %session_id, %role, ?pillar, "connection associated");
                AssociateResponse::ok(linked_at)
            }
            Err(err) => {
                debug!(%connection_id, %session_id, error = %err, "association refused");
                AssociateResponse::failed(&err)
            }
        }
    }

    /// Connections of a session, optionally filtered by role and pillar.
    pub fn get_session_connections(
        &self,
        session_id: &SessionId,
        agent_role: Option<AgentRole>,
        pillar: Option<&str>,
    ) -> Vec<ConnectionId> {
        self.state
            .lock()
            .index
            .connections(session_id, agent_role, pillar)
    }

    /// Session a connection is associated with.
    pub fn lookup_session(&self, connection_id: &ConnectionId) -> Option<SessionId> {
        self.state.lock().index.lookup(connection_id).cloned()
    }

    /// Record of a connection.
    pub fn connection_info(&self, connection_id: &ConnectionId) -> Option<ConnectionRecord> {
        self.state.lock().store.get(connection_id).cloned()
    }

    /// Remove a connection's association and record.
    ///
    /// With `session_id` given, nothing happens unless the connection is
    /// associated with that session. Repeated calls report `success: false`.
    pub fn unlink_connection(
        &self,
        connection_id: &ConnectionId,
        session_id: Option<&SessionId>,
    ) -> UnlinkResponse {
        let success = {
            let mut state = self.state.lock();
            let success = state.unlink(connection_id, session_id);
            gauge!(CONNECTIONS_ACTIVE).set(state.store.active_count() as f64);
            success
        };
        if success {
            counter!(CONNECTIONS_UNLINKED_TOTAL).increment(1);
            info!(%connection_id, "connection unlinked");
        } else {
            debug!(%connection_id, ?session_id, "nothing to unlink");
        }
        UnlinkResponse { success }
    }

    // ── Messages ────────────────────────────────────────────────────────

    /// Attach session context to an inbound message.
    pub fn route_message(&self, connection_id: &ConnectionId, message: Value) -> RoutedMessage {
        match self.router.route(connection_id, message) {
            Ok(routed) => {
                counter!(MESSAGES_ROUTED_TOTAL, "outcome" => "routed").increment(1);
                RoutedMessage::ok(routed)
            }
            Err(err) => {
                counter!(MESSAGES_ROUTED_TOTAL, "outcome" => err.code()).increment(1);
                debug!(%connection_id, error = %err, "message not routed");
                RoutedMessage::failed(&err)
            }
        }
    }

    /// Deliver `update` now to the matching connections of each session.
    pub async fn broadcast(
        &self,
        update: &Value,
        sessions: &[SessionId],
        agent_role: Option<AgentRole>,
        pillar: Option<&str>,
    ) -> BroadcastResult {
        self.broadcaster
            .broadcast(update, sessions, agent_role, pillar)
            .await
    }

    /// Queue an event for the background processor.
    ///
    /// Fails with `QueueClosed` unless running and with `QueueOverflow` when
    /// the queue stays full past the overflow policy.
    pub async fn enqueue_event(&self, event: Event) -> Result<()> {
        let queue = self.lifecycle.lock().queue()?;
        let event_type = event.event_type.as_str().to_string();
        match queue.enqueue(event).await {
            Ok(()) => {
                counter!(EVENTS_ENQUEUED_TOTAL).increment(1);
                debug!(%event_type, depth = queue.depth(), "event enqueued");
                Ok(())
            }
            Err(err) => {
                counter!(EVENTS_REJECTED_TOTAL, "reason" => err.code()).increment(1);
                warn!(%event_type, error = %err, "event refused");
                Err(err)
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Open the event queue and spawn the processor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn initialize(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.ensure_stopped("initialize")?;

        let (queue, rx) =
            EventQueue::bounded(self.config.event_queue_capacity, self.config.overflow_policy);
        let cancel = CancellationToken::new();
        let processor = EventProcessor::new(
            self.state.clone(),
            self.broadcaster.clone(),
            self.stats.clone(),
        );
        let handle = tokio::spawn(processor.run(rx, cancel.clone()));
        lifecycle.start(queue, Consumer::new(cancel, handle))?;
        info!(
            capacity = self.config.event_queue_capacity,
            policy = ?self.config.overflow_policy,
            "switchyard initialized"
        );
        Ok(())
    }

    /// Stop processing, summarize sessions to the store, close every
    /// connection, and clear all state.
    ///
    /// Events still queued are dropped. Only a running router can be shut
    /// down: while stopped this returns `InvalidState` and connections
    /// registered before `initialize` stay registered.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let consumer = self.lifecycle.lock().begin_drain()?;
        info!("switchyard shutting down");

        let consumer_stopped = match consumer {
            Some(consumer) => consumer.stop(self.config.shutdown_grace).await,
            None => true,
        };

        let summary = self.state.lock().drain();
        gauge!(CONNECTIONS_ACTIVE).set(0.0);
        for problem in &summary.inconsistencies {
            warn!(problem = %problem, "session index inconsistency at shutdown");
        }

        let writes = summary.session_counts.iter().map(|(session_id, count)| async move {
            let partial = json!({
                "active_connections": 0,
                "connections_at_shutdown": count,
            });
            (session_id, self.sessions.update_session(session_id, partial).await)
        });
        let mut summary_failures = 0;
        for (session_id, result) in join_all(writes).await {
            if let Err(e) = result {
                summary_failures += 1;
                warn!(%session_id, error = %e, "failed to write shutdown summary");
            }
        }

        let closes = join_all(summary.closed.iter().map(|id| self.transport.close(id)));
        if tokio::time::timeout(self.config.shutdown_grace, closes).await.is_err() {
            warn!("transport close did not finish within the grace period");
        }

        self.lifecycle.lock().finish();

        let report = ShutdownReport {
            connections_closed: summary.closed.len(),
            sessions_summarized: summary.session_counts.len() - summary_failures,
            summary_failures,
            consumer_stopped,
            inconsistencies: summary.inconsistencies.len(),
        };
        info!(
            connections_closed = report.connections_closed,
            sessions = report.sessions_summarized,
            consumer_stopped,
            "switchyard stopped"
        );
        Ok(report)
    }

    /// Live counters.
    pub fn health(&self) -> HealthReport {
        let (active_connections, active_sessions, connections_by_role) = {
            let state = self.state.lock();
            (
                state.store.active_count(),
                state.index.session_count(),
                state.store.count_by_role(),
            )
        };
        let (lifecycle, uptime, queue) = {
            let lifecycle = self.lifecycle.lock();
            (lifecycle.state(), lifecycle.uptime(), lifecycle.queue_stats())
        };
        health_check(HealthInputs {
            lifecycle: Some(lifecycle),
            uptime,
            active_connections,
            active_sessions,
            queue,
            connections_by_role,
            processor: self.stats.snapshot(),
        })
    }
}
