//! End-to-end behavior of the router through its public surface.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use switchyard_core::{ConnectionId, RelayError, SessionId, StoreError};
use switchyard_server::{
    AgentRole, ChannelTransport, Event, InMemorySessionStore, LifecycleState, QueueOverflowPolicy,
    RouterConfig, SendOutcome, SessionDelivery, SessionRecord, SessionStore, Switchyard, Transport,
    UserContext,
};
use tokio::sync::mpsc;

struct Harness {
    switchyard: Switchyard,
    sessions: Arc<InMemorySessionStore>,
    transport: Arc<ChannelTransport>,
}

fn harness(config: RouterConfig) -> Harness {
    let sessions = Arc::new(InMemorySessionStore::new());
    let _ = sessions.create_session("s1", None);
    let _ = sessions.create_session("s2", None);
    let transport = Arc::new(ChannelTransport::new());
    Harness {
        switchyard: Switchyard::new(config, sessions.clone(), transport.clone()),
        sessions,
        transport,
    }
}

fn id(s: &str) -> ConnectionId {
    ConnectionId::from(s)
}

fn sid(s: &str) -> SessionId {
    SessionId::from(s)
}

async fn recv_json(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("channel closed");
    serde_json::from_str(&message).unwrap()
}

/// Runs the numbered walkthrough: liaison and guide in one session, fan-out,
/// unlink, routing, and association to a missing session.
#[tokio::test]
async fn session_walkthrough() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let mut rx1 = h.transport.attach(id("ws1"), 8);
    let mut rx2 = h.transport.attach(id("ws2"), 8);

    // 1
    assert!(sy.register_connection("ws1", UserContext::new("userA")).success);
    let resp = sy
        .associate_connection(&id("ws1"), &sid("s1"), Some(AgentRole::Liaison), Some("content"))
        .await;
    assert!(resp.success);
    assert!(resp.linked_at.is_some());
    assert_eq!(
        sy.get_session_connections(&sid("s1"), Some(AgentRole::Liaison), Some("content")),
        vec![id("ws1")]
    );

    // 2
    assert!(sy.register_connection("ws2", UserContext::new("userA")).success);
    assert!(
        sy.associate_connection(&id("ws2"), &sid("s1"), Some(AgentRole::Guide), None)
            .await
            .success
    );
    let all: BTreeSet<_> = sy
        .get_session_connections(&sid("s1"), None, None)
        .into_iter()
        .collect();
    assert_eq!(all, BTreeSet::from([id("ws1"), id("ws2")]));

    // 3
    let result = sy.broadcast(&json!({"type": "ping"}), &[sid("s1")], None, None).await;
    assert!(result.success);
    assert_eq!(
        result.per_session_results[&sid("s1")],
        SessionDelivery {
            connections_found: 2,
            success: 2,
            failed: 0,
        }
    );
    assert_eq!(recv_json(&mut rx1).await, json!({"type": "ping"}));
    assert_eq!(recv_json(&mut rx2).await, json!({"type": "ping"}));

    // 4
    assert!(sy.unlink_connection(&id("ws1"), None).success);
    assert!(
        sy.get_session_connections(&sid("s1"), Some(AgentRole::Liaison), Some("content"))
            .is_empty()
    );
    assert_eq!(sy.lookup_session(&id("ws1")), None);

    // 5
    let routed = sy.route_message(&id("ws2"), json!({"hello": "world"}));
    assert!(routed.success);
    let message = routed.message.unwrap();
    assert_eq!(message["hello"], "world");
    assert_eq!(message["session_context"]["session_id"], "s1");
    assert_eq!(message["session_context"]["agent_role"], "guide");

    // 6
    assert!(sy.register_connection("ws3", UserContext::new("userB")).success);
    let resp = sy
        .associate_connection(&id("ws3"), &sid("nonexistent_session"), None, None)
        .await;
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("SessionNotFound"));
    assert_eq!(
        serde_json::to_value(&resp).unwrap(),
        json!({"success": false, "error": "SessionNotFound"})
    );
    assert_eq!(sy.lookup_session(&id("ws3")), None);
}

#[tokio::test]
async fn associated_connection_listed_exactly_once() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let cases = [
        ("a", None, None),
        ("b", Some(AgentRole::Guide), Some("ignored")),
        ("c", Some(AgentRole::Liaison), Some("insights")),
        ("d", Some(AgentRole::Liaison), None),
    ];
    for (conn, role, pillar) in cases {
        let _ = sy.register_connection(conn, UserContext::new(conn));
        assert!(sy.associate_connection(&id(conn), &sid("s1"), role, pillar).await.success);
    }
    // Re-associating the same connection must not duplicate it.
    assert!(
        sy.associate_connection(&id("c"), &sid("s1"), Some(AgentRole::Liaison), Some("insights"))
            .await
            .success
    );

    for (conn, role, pillar) in cases {
        let effective_pillar = if role == Some(AgentRole::Guide) { None } else { pillar };
        let listed = sy.get_session_connections(&sid("s1"), role, effective_pillar);
        assert_eq!(listed.iter().filter(|c| **c == id(conn)).count(), 1, "{conn}");
        let everything = sy.get_session_connections(&sid("s1"), None, None);
        assert_eq!(everything.iter().filter(|c| **c == id(conn)).count(), 1, "{conn}");
        assert_eq!(sy.lookup_session(&id(conn)), Some(sid("s1")));
    }
}

#[tokio::test]
async fn reassociation_moves_between_sessions() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;
    let _ = sy.associate_connection(&id("ws1"), &sid("s2"), None, None).await;

    assert!(sy.get_session_connections(&sid("s1"), None, None).is_empty());
    assert_eq!(sy.get_session_connections(&sid("s2"), None, None), vec![id("ws1")]);
    assert_eq!(sy.lookup_session(&id("ws1")), Some(sid("s2")));
}

#[tokio::test]
async fn unlink_is_idempotent() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;

    assert!(sy.unlink_connection(&id("ws1"), None).success);
    assert!(!sy.unlink_connection(&id("ws1"), None).success);
    assert!(!sy.unlink_connection(&id("never-registered"), None).success);
    assert!(sy.connection_info(&id("ws1")).is_none());
}

#[tokio::test]
async fn unlink_with_wrong_session_is_noop() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;

    assert!(!sy.unlink_connection(&id("ws1"), Some(&sid("s2"))).success);
    assert_eq!(sy.lookup_session(&id("ws1")), Some(sid("s1")));
    assert!(sy.unlink_connection(&id("ws1"), Some(&sid("s1"))).success);
}

#[tokio::test]
async fn broadcast_attempts_one_send_per_connection() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let mut receivers = Vec::new();
    for (conn, session, attached) in [
        ("a1", "s1", true),
        ("a2", "s1", false),
        ("a3", "s1", true),
        ("b1", "s2", true),
        ("b2", "s2", false),
    ] {
        let _ = sy.register_connection(conn, UserContext::new(conn));
        let _ = sy.associate_connection(&id(conn), &sid(session), None, None).await;
        if attached {
            receivers.push(h.transport.attach(id(conn), 4));
        }
    }

    let result = sy
        .broadcast(&json!({"n": 1}), &[sid("s1"), sid("s2"), sid("empty")], None, None)
        .await;
    assert!(!result.success);
    assert_eq!(result.totals.connections_found, 5);
    assert_eq!(result.totals.success + result.totals.failed, 5);
    assert_eq!(result.totals.success, 3);
    assert_eq!(result.per_session_results[&sid("s1")].failed, 1);
    assert_eq!(result.per_session_results[&sid("s2")].failed, 1);
    assert_eq!(
        result.per_session_results[&sid("empty")],
        SessionDelivery::default()
    );
    for rx in &mut receivers {
        assert_eq!(recv_json(rx).await, json!({"n": 1}));
    }
}

#[tokio::test]
async fn broadcast_filters_by_role_and_pillar() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    for (conn, role, pillar) in [
        ("g", AgentRole::Guide, None),
        ("content", AgentRole::Liaison, Some("content")),
        ("insights", AgentRole::Liaison, Some("insights")),
    ] {
        let _ = sy.register_connection(conn, UserContext::new("alice"));
        let _ = sy
            .associate_connection(&id(conn), &sid("s1"), Some(role), pillar)
            .await;
    }
    let mut rx = h.transport.attach(id("insights"), 4);

    let result = sy
        .broadcast(&json!("x"), &[sid("s1")], Some(AgentRole::Liaison), Some("insights"))
        .await;
    assert_eq!(result.totals.connections_found, 1);
    assert_eq!(result.totals.success, 1);
    assert_eq!(recv_json(&mut rx).await, json!("x"));
}

#[tokio::test]
async fn route_unassociated_never_touches_session_store() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let before = h.sessions.get_calls();

    let routed = sy.route_message(&id("ws1"), json!({"hello": "world"}));
    assert!(!routed.success);
    assert_eq!(routed.error.as_deref(), Some("no_session"));
    let routed = sy.route_message(&id("ghost"), json!(1));
    assert_eq!(routed.error.as_deref(), Some("no_session"));

    assert_eq!(h.sessions.get_calls(), before);
    assert_eq!(h.sessions.update_calls(), 0);
}

#[tokio::test]
async fn route_is_rate_limited_per_session() {
    let mut config = RouterConfig::default();
    config.rate_limits.per_second = 3;
    let h = harness(config);
    let sy = &h.switchyard;
    for conn in ["ws1", "ws2"] {
        let _ = sy.register_connection(conn, UserContext::new("alice"));
        let _ = sy.associate_connection(&id(conn), &sid("s1"), None, None).await;
    }

    let outcomes: Vec<_> = (0..4)
        .map(|i| sy.route_message(&id(if i % 2 == 0 { "ws1" } else { "ws2" }), json!(i)))
        .collect();
    assert!(outcomes[..3].iter().all(|o| o.success));
    assert_eq!(outcomes[3].error.as_deref(), Some("rate_limited"));
}

#[tokio::test]
async fn connection_limits_are_enforced() {
    let mut config = RouterConfig::default();
    config.limits.max_connections = 3;
    config.limits.max_per_user = 2;
    let h = harness(config);
    let sy = &h.switchyard;

    assert!(sy.register_connection("a1", UserContext::new("alice")).success);
    assert!(sy.register_connection("a2", UserContext::new("alice")).success);
    let third = sy.register_connection("a3", UserContext::new("alice"));
    assert_eq!(third.error.as_deref(), Some("ConnectionLimitExceeded"));

    assert!(sy.register_connection("b1", UserContext::new("bob")).success);
    let over = sy.register_connection("b2", UserContext::new("bob"));
    assert_eq!(over.error.as_deref(), Some("ConnectionLimitExceeded"));

    let _ = sy.unlink_connection(&id("a1"), None);
    assert!(sy.register_connection("b2", UserContext::new("bob")).success);
}

#[tokio::test]
async fn duplicate_registration_rejected_until_unlinked() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    assert!(sy.register_connection("ws1", UserContext::new("alice")).success);
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;

    let dup = sy.register_connection("ws1", UserContext::new("mallory"));
    assert!(!dup.success);
    assert_eq!(dup.error.as_deref(), Some("DuplicateRegistration"));
    let info = sy.connection_info(&id("ws1")).unwrap();
    assert_eq!(info.user.user_id.as_str(), "alice");
    assert_eq!(sy.lookup_session(&id("ws1")), Some(sid("s1")));

    let _ = sy.unlink_connection(&id("ws1"), None);
    assert!(sy.register_connection("ws1", UserContext::new("mallory")).success);
}

#[tokio::test]
async fn events_processed_in_fifo_order() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;
    let mut rx = h.transport.attach(id("ws1"), 64);
    sy.initialize().unwrap();

    for n in 0..20 {
        sy.enqueue_event(Event::state_update(json!({"seq": n}), vec![sid("s1")]))
            .await
            .unwrap();
    }
    sy.enqueue_event(Event::system_message(json!({"seq": "final"})))
        .await
        .unwrap();

    for n in 0..20 {
        assert_eq!(recv_json(&mut rx).await["seq"], n);
    }
    assert_eq!(recv_json(&mut rx).await["seq"], "final");

    let _ = sy.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_event_types_are_dropped_without_stopping_the_consumer() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;
    let mut rx = h.transport.attach(id("ws1"), 8);
    sy.initialize().unwrap();

    sy.enqueue_event(Event::new("bogus", json!(null), switchyard_server::EventTarget::All))
        .await
        .unwrap();
    sy.enqueue_event(Event::state_update(json!("after"), vec![sid("s1")]))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut rx).await, json!("after"));

    let health = sy.health();
    assert_eq!(health.events_dropped, 1);
    assert_eq!(health.events_processed, 1);
    let _ = sy.shutdown().await.unwrap();
}

#[tokio::test]
async fn full_queue_rejects_with_overflow() {
    let config = RouterConfig {
        event_queue_capacity: 1,
        overflow_policy: QueueOverflowPolicy::Reject,
        ..RouterConfig::default()
    };
    let h = harness(config);
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;
    // Reject never yields, so the consumer cannot run between these enqueues.
    sy.initialize().unwrap();

    let mut outcomes = Vec::new();
    for n in 0..3 {
        outcomes.push(
            sy.enqueue_event(Event::state_update(json!(n), vec![sid("s1")]))
                .await,
        );
    }
    assert!(outcomes[0].is_ok());
    assert_matches!(outcomes[1], Err(RelayError::QueueOverflow { capacity: 1 }));
    let _ = sy.shutdown().await.unwrap();
}

/// Transport whose sends take a fixed time, counting how many started.
struct SlowTransport {
    delay: Duration,
    started: AtomicUsize,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, _connection_id: &ConnectionId, _message: Arc<String>) -> SendOutcome {
        let _ = self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        SendOutcome::Delivered
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_processing_and_closes_everything() {
    let sessions = Arc::new(InMemorySessionStore::new());
    let _ = sessions.create_session("s1", None);
    let _ = sessions.create_session("s2", None);
    let transport = Arc::new(SlowTransport {
        delay: Duration::from_millis(50),
        started: AtomicUsize::new(0),
    });
    let config = RouterConfig {
        shutdown_grace: Duration::from_secs(1),
        ..RouterConfig::default()
    };
    let sy = Switchyard::new(config, sessions.clone(), transport.clone());

    for (conn, session) in [("ws1", "s1"), ("ws2", "s1"), ("ws3", "s2")] {
        let _ = sy.register_connection(conn, UserContext::new("alice"));
        let _ = sy.associate_connection(&id(conn), &sid(session), None, None).await;
    }
    let _ = sy.register_connection("loose", UserContext::new("bob"));

    sy.initialize().unwrap();
    for n in 0..5 {
        sy.enqueue_event(Event::state_update(json!(n), vec![sid("s2")]))
            .await
            .unwrap();
    }
    while transport.started.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let report = sy.shutdown().await.unwrap();
    assert!(report.consumer_stopped);
    assert_eq!(report.connections_closed, 4);
    assert_eq!(report.sessions_summarized, 2);
    assert_eq!(report.summary_failures, 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.started.load(Ordering::SeqCst), 1);

    let health = sy.health();
    assert_eq!(health.active_connections, 0);
    assert_eq!(health.active_sessions, 0);
    assert_eq!(health.events_processed, 1);
    assert_eq!(sy.lifecycle_state(), LifecycleState::Stopped);
    assert_matches!(
        sy.enqueue_event(Event::system_message(json!("late"))).await,
        Err(RelayError::QueueClosed)
    );

    let s1 = sessions.snapshot(&sid("s1")).unwrap();
    assert_eq!(s1.data["active_connections"], 0);
    assert_eq!(s1.data["connections_at_shutdown"], 2);
    let s2 = sessions.snapshot(&sid("s2")).unwrap();
    assert_eq!(s2.data["connections_at_shutdown"], 1);
}

#[tokio::test]
async fn shutdown_detaches_channel_transport() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let mut rx = h.transport.attach(id("ws1"), 4);
    sy.initialize().unwrap();

    let _ = sy.shutdown().await.unwrap();
    assert_eq!(h.transport.attached(), 0);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn stopped_router_accepts_registrations_again() {
    let h = harness(RouterConfig::default());
    let sy = &h.switchyard;
    sy.initialize().unwrap();
    let _ = sy.shutdown().await.unwrap();
    assert!(sy.register_connection("ws1", UserContext::new("alice")).success);
}

/// Session store whose writes always fail.
struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn get_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Err(StoreError::Backend(format!("lookup of {session_id} failed")))
    }

    async fn update_session(
        &self,
        session_id: &SessionId,
        _partial: Value,
    ) -> Result<(), StoreError> {
        Err(StoreError::NotFound(session_id.clone()))
    }
}

#[tokio::test]
async fn session_store_failures_are_reported_not_raised() {
    let transport = Arc::new(ChannelTransport::new());
    let sy = Switchyard::new(RouterConfig::default(), Arc::new(FailingStore), transport);
    let _ = sy.register_connection("ws1", UserContext::new("alice"));

    let resp = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("SessionStoreError"));
    assert_eq!(sy.lookup_session(&id("ws1")), None);
}

/// Transport recording every delivered message in order.
#[derive(Default)]
struct RecordingTransport {
    log: Mutex<Vec<(ConnectionId, String)>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, connection_id: &ConnectionId, message: Arc<String>) -> SendOutcome {
        self.log.lock().push((connection_id.clone(), message.to_string()));
        SendOutcome::Delivered
    }
}

#[tokio::test]
async fn system_messages_reach_unassociated_connections() {
    let sessions = Arc::new(InMemorySessionStore::new());
    let _ = sessions.create_session("s1", None);
    let transport = Arc::new(RecordingTransport::default());
    let sy = Switchyard::new(RouterConfig::default(), sessions, transport.clone());
    let _ = sy.register_connection("bound", UserContext::new("alice"));
    let _ = sy.register_connection("loose", UserContext::new("bob"));
    let _ = sy.associate_connection(&id("bound"), &sid("s1"), None, None).await;
    sy.initialize().unwrap();

    sy.enqueue_event(Event::system_message(json!("maintenance")))
        .await
        .unwrap();
    sy.enqueue_event(Event::state_update(json!("sessions-only"), Vec::new()))
        .await
        .unwrap();
    let everyone = Event::new(
        "state_update",
        json!("everyone-indexed"),
        switchyard_server::EventTarget::All,
    );
    sy.enqueue_event(everyone).await.unwrap();

    while sy.health().events_processed < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let _ = sy.shutdown().await.unwrap();

    let log = transport.log.lock();
    let mut recipients: Vec<_> = log
        .iter()
        .filter(|(_, m)| m == "\"maintenance\"")
        .map(|(c, _)| c.as_str().to_string())
        .collect();
    recipients.sort();
    assert_eq!(recipients, ["bound", "loose"]);
    assert!(!log.iter().any(|(_, m)| m == "\"sessions-only\""));
    let indexed: Vec<_> = log
        .iter()
        .filter(|(_, m)| m == "\"everyone-indexed\"")
        .map(|(c, _)| c.as_str().to_string())
        .collect();
    assert_eq!(indexed, ["bound"]);
}

#[tokio::test(start_paused = true)]
async fn registration_refused_once_shutdown_begins() {
    let sessions = Arc::new(InMemorySessionStore::new());
    let _ = sessions.create_session("s1", None);
    let transport = Arc::new(SlowTransport {
        delay: Duration::from_millis(200),
        started: AtomicUsize::new(0),
    });
    let config = RouterConfig {
        shutdown_grace: Duration::from_secs(1),
        ..RouterConfig::default()
    };
    let sy = Switchyard::new(config, sessions, transport.clone());
    let _ = sy.register_connection("ws1", UserContext::new("alice"));
    let _ = sy.associate_connection(&id("ws1"), &sid("s1"), None, None).await;

    sy.initialize().unwrap();
    sy.enqueue_event(Event::state_update(json!(1), vec![sid("s1")]))
        .await
        .unwrap();
    while transport.started.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let late = async {
        while sy.lifecycle_state() != LifecycleState::Draining {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        sy.register_connection("late", UserContext::new("bob"))
    };
    let (report, late) = tokio::join!(sy.shutdown(), late);

    assert!(!late.success);
    assert_eq!(late.error.as_deref(), Some("InvalidState"));
    let report = report.unwrap();
    assert_eq!(report.connections_closed, 1);
    assert!(sy.connection_info(&id("late")).is_none());
    assert_eq!(sy.health().active_connections, 0);
}
