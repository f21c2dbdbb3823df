//! Outbound events and the bounded queue that carries them to the processor.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::{RelayError, Result, SessionId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

/// Kind of an outbound event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Session state changed; fan out to the target sessions.
    StateUpdate,
    /// Operator notice; fan out to every active connection.
    SystemMessage,
    /// Anything else. Dropped by the processor.
    Other(String),
}

impl EventType {
    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::StateUpdate => "state_update",
            Self::SystemMessage => "system_message",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "state_update" => Self::StateUpdate,
            "system_message" => Self::SystemMessage,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        match t {
            EventType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which sessions an event is for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    /// Every indexed session.
    All,
    /// The listed sessions.
    Sessions(Vec<SessionId>),
}

/// One queued outbound event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Kind.
    pub event_type: EventType,
    /// Opaque body delivered to clients.
    pub payload: Value,
    /// Recipients.
    pub target: EventTarget,
    /// When the event was created.
    pub enqueued_at: DateTime<Utc>,
}

impl Event {
    /// Build an event.
    pub fn new(event_type: impl Into<EventType>, payload: Value, target: EventTarget) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            target,
            enqueued_at: Utc::now(),
        }
    }

    /// State update for specific sessions.
    pub fn state_update(payload: Value, sessions: Vec<SessionId>) -> Self {
        Self::new(EventType::StateUpdate, payload, EventTarget::Sessions(sessions))
    }

    /// System message for every connection.
    pub fn system_message(payload: Value) -> Self {
        Self::new(EventType::SystemMessage, payload, EventTarget::All)
    }
}

/// What `enqueue` does when the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueOverflowPolicy {
    /// Fail at once with `QueueOverflow`.
    Reject,
    /// Wait up to `timeout` for space, then fail with `QueueOverflow`.
    Wait {
        /// Longest producer wait.
        timeout: Duration,
    },
}

impl Default for QueueOverflowPolicy {
    fn default() -> Self {
        Self::Wait {
            timeout: Duration::from_millis(50),
        }
    }
}

/// Producer half of the bounded event queue.
#[derive(Clone, Debug)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    capacity: usize,
    policy: QueueOverflowPolicy,
}

impl EventQueue {
    /// Create a queue of `capacity` (at least 1) and return its consumer half.
    pub fn bounded(capacity: usize, policy: QueueOverflowPolicy) -> (Self, mpsc::Receiver<Event>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                capacity,
                policy,
            },
            rx,
        )
    }

    /// Append an event, applying the overflow policy.
    pub async fn enqueue(&self, event: Event) -> Result<()> {
        match self.policy {
            QueueOverflowPolicy::Reject => self.try_enqueue(event),
            QueueOverflowPolicy::Wait { timeout } => {
                self.tx
                    .send_timeout(event, timeout)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => RelayError::QueueOverflow {
                            capacity: self.capacity,
                        },
                        SendTimeoutError::Closed(_) => RelayError::QueueClosed,
                    })
            }
        }
    }

    /// Append an event without waiting.
    pub fn try_enqueue(&self, event: Event) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::QueueOverflow {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => RelayError::QueueClosed,
        })
    }

    /// Events currently waiting.
    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
