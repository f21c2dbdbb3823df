//! Runtime configuration of a [`Switchyard`](crate::Switchyard) instance.

use std::time::Duration;

use switchyard_settings::{OverflowPolicySetting, SwitchyardSettings};

use crate::events::QueueOverflowPolicy;
use crate::rate_limit::RateLimitConfig;
use crate::state::ConnectionLimits;

/// Knobs the router reads at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Bounded event queue capacity.
    pub event_queue_capacity: usize,
    /// Behaviour of `enqueue_event` on a full queue.
    pub overflow_policy: QueueOverflowPolicy,
    /// Upper bound on a single transport send.
    pub send_timeout: Duration,
    /// How long shutdown waits for the consumer before aborting it.
    pub shutdown_grace: Duration,
    /// Registration caps.
    pub limits: ConnectionLimits,
    /// Inbound message limits per session.
    pub rate_limits: RateLimitConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            overflow_policy: QueueOverflowPolicy::default(),
            send_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            limits: ConnectionLimits::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl From<&SwitchyardSettings> for RouterConfig {
    fn from(settings: &SwitchyardSettings) -> Self {
        let router = &settings.router;
        let overflow_policy = match router.overflow_policy {
            OverflowPolicySetting::Reject => QueueOverflowPolicy::Reject,
            OverflowPolicySetting::Wait => QueueOverflowPolicy::Wait {
                timeout: Duration::from_millis(router.enqueue_wait_ms),
            },
        };
        Self {
            event_queue_capacity: router.event_queue_capacity,
            overflow_policy,
            send_timeout: Duration::from_millis(router.send_timeout_ms),
            shutdown_grace: Duration::from_millis(router.shutdown_grace_ms),
            limits: ConnectionLimits {
                max_connections: settings.limits.max_connections,
                max_per_user: settings.limits.max_connections_per_user,
            },
            rate_limits: RateLimitConfig {
                per_second: settings.limits.messages_per_second,
                per_minute: settings.limits.messages_per_minute,
            },
        }
    }
}
