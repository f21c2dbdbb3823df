//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields get their compiled default.

use serde::{Deserialize, Serialize};
use switchyard_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "router": { "overflowPolicy": "reject" },
///   "limits": { "maxConnectionsPerUser": 3 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchyardSettings {
    /// Settings schema version.
    pub version: String,
    /// Admin HTTP surface.
    pub server: ServerSettings,
    /// Event queue and delivery behaviour.
    pub router: RouterSettings,
    /// Connection caps and inbound rate limits.
    pub limits: LimitSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for SwitchyardSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            router: RouterSettings::default(),
            limits: LimitSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SwitchyardSettings {
    /// Reject values that would leave the router unusable.
    pub fn validate(&self) -> Result<()> {
        if self.router.event_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "router.eventQueueCapacity must be greater than 0".into(),
            ));
        }
        if self.router.send_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "router.sendTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.limits.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "limits.maxConnections must be greater than 0".into(),
            ));
        }
        if self.limits.max_connections_per_user == 0 {
            return Err(SettingsError::InvalidValue(
                "limits.maxConnectionsPerUser must be greater than 0".into(),
            ));
        }
        if self.limits.messages_per_second == 0 {
            return Err(SettingsError::InvalidValue(
                "limits.messagesPerSecond must be greater than 0".into(),
            ));
        }
        if self.limits.messages_per_minute == 0 {
            return Err(SettingsError::InvalidValue(
                "limits.messagesPerMinute must be greater than 0".into(),
            ));
        }
        if self.limits.messages_per_minute < self.limits.messages_per_second {
            return Err(SettingsError::InvalidValue(format!(
                "limits.messagesPerMinute ({}) is below limits.messagesPerSecond ({})",
                self.limits.messages_per_minute, self.limits.messages_per_second
            )));
        }
        Ok(())
    }
}

/// Admin HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

/// What `enqueue` does when the event queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicySetting {
    /// Fail immediately.
    Reject,
    /// Wait up to `enqueueWaitMs` for space, then fail.
    #[default]
    Wait,
}

/// Event queue and delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    /// Bounded event queue capacity.
    pub event_queue_capacity: usize,
    /// Overflow behaviour of `enqueue`.
    pub overflow_policy: OverflowPolicySetting,
    /// Producer wait before overflow under the `wait` policy.
    pub enqueue_wait_ms: u64,
    /// Upper bound on a single transport send.
    pub send_timeout_ms: u64,
    /// How long shutdown waits for the event consumer before aborting it.
    pub shutdown_grace_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            overflow_policy: OverflowPolicySetting::Wait,
            enqueue_wait_ms: 50,
            send_timeout_ms: 5_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Connection caps and inbound rate limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitSettings {
    /// Maximum active connections across all users.
    pub max_connections: usize,
    /// Maximum active connections per user.
    pub max_connections_per_user: usize,
    /// Routed messages allowed per session per second.
    pub messages_per_second: u32,
    /// Routed messages allowed per session per minute.
    pub messages_per_minute: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_connections_per_user: 5,
            messages_per_second: 10,
            messages_per_minute: 100,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
