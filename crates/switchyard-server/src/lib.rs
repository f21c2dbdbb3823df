//! # switchyard-server
//!
//! Connection/session routing for real-time transports.
//!
//! - Connection registry with role/pillar slots and a session index
//! - Inbound message routing with session context and rate limiting
//! - Concurrent fan-out of updates to a session's connections
//! - Bounded event queue drained by a cancellable background consumer
//! - Admin HTTP surface: `/health` and Prometheus `/metrics`

#![deny(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod processor;
pub mod rate_limit;
pub mod responses;
pub mod router;
pub mod server;
pub mod session_store;
pub mod state;
pub mod switchyard;
pub mod transport;

pub use broadcast::{BroadcastCoordinator, BroadcastResult, BroadcastTotals, SessionDelivery};
pub use config::RouterConfig;
pub use events::{Event, EventQueue, EventTarget, EventType, QueueOverflowPolicy};
pub use health::HealthReport;
pub use lifecycle::{LifecycleState, ShutdownReport};
pub use responses::{AssociateResponse, RegisterResponse, RoutedMessage, UnlinkResponse};
pub use router::{SESSION_CONTEXT_KEY, SessionContext};
pub use server::{AdminServer, AppState};
pub use session_store::{InMemorySessionStore, SessionRecord, SessionStore};
pub use state::{AgentRole, ConnectionRecord, ConnectionStatus, Slot, UserContext};
pub use switchyard::Switchyard;
pub use transport::{ChannelTransport, SendOutcome, Transport};
