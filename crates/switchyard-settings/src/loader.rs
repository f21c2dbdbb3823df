//! Settings loading: compiled defaults, then the user file, then `SWITCHYARD_*`
//! environment overrides. The merged result is validated before it is
//! handed back.
//!
//! Merge rules for the user file:
//! - objects merge per key, recursively
//! - arrays and scalars from the file replace the default
//! - `null` in the file keeps the default

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{OverflowPolicySetting, SwitchyardSettings};

/// Path of the user settings file (`~/.switchyard/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchyard").join("settings.json")
}

/// Load settings from [`settings_path`].
pub fn load_settings() -> Result<SwitchyardSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, apply env overrides, and validate.
///
/// A missing file yields defaults; an unreadable or malformed file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchyardSettings> {
    let defaults = serde_json::to_value(SwitchyardSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: SwitchyardSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursively merge `source` over `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SWITCHYARD_*` overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_env_overrides<F>(settings: &mut SwitchyardSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("SWITCHYARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("SWITCHYARD_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("SWITCHYARD_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.router.event_queue_capacity = v;
    }
    if let Some(v) = env.string("SWITCHYARD_OVERFLOW_POLICY") {
        match parse_overflow_policy(&v) {
            Some(policy) => settings.router.overflow_policy = policy,
            None => warn!(
                key = "SWITCHYARD_OVERFLOW_POLICY",
                value = %v,
                "unknown overflow policy, ignoring"
            ),
        }
    }
    if let Some(v) = env.u64("SWITCHYARD_SEND_TIMEOUT_MS", 1, 600_000) {
        settings.router.send_timeout_ms = v;
    }
    if let Some(v) = env.u64("SWITCHYARD_SHUTDOWN_GRACE_MS", 0, 600_000) {
        settings.router.shutdown_grace_ms = v;
    }
    if let Some(v) = env.usize("SWITCHYARD_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.limits.max_connections = v;
    }
    if let Some(v) = env.usize("SWITCHYARD_MAX_CONNECTIONS_PER_USER", 1, 10_000) {
        settings.limits.max_connections_per_user = v;
    }
    if let Some(v) = env.string("SWITCHYARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(json) = env.string("SWITCHYARD_LOG_JSON") {
        match parse_bool(&json) {
            Some(true) => settings.logging.format = switchyard_core::logging::LogFormat::Json,
            Some(false) => settings.logging.format = switchyard_core::logging::LogFormat::Compact,
            None => warn!(
                key = "SWITCHYARD_LOG_JSON",
                value = %json,
                "invalid boolean env var, ignoring"
            ),
        }
    }
}

// ── Pure parsers ────────────────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `reject` or `wait`, any case.
pub fn parse_overflow_policy(val: &str) -> Option<OverflowPolicySetting> {
    match val.to_lowercase().as_str() {
        "reject" => Some(OverflowPolicySetting::Reject),
        "wait" => Some(OverflowPolicySetting::Wait),
        _ => None,
    }
}

/// Parse a `u16` within `[min, max]`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `[min, max]`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `[min, max]`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let parsed = parse_u16_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        parsed
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        parsed
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.string(name)?;
        let parsed = parse_usize_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        parsed
    }
}
