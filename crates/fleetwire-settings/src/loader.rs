//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FleetSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `FLEETWIRE_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::FleetSettings;

/// Resolve the default settings path (`~/.fleetwire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".fleetwire").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<FleetSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<FleetSettings> {
    let defaults = serde_json::to_value(FleetSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut FleetSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules; invalid values are logged and
/// ignored (falling back to file/default):
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Lists are comma separated, blank entries dropped
pub fn apply_overrides(settings: &mut FleetSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Node ────────────────────────────────────────────────────────
    if let Some(v) = env.string("FLEETWIRE_NODE_ID") {
        settings.node.id = Some(v);
    }
    if let Some(v) = env.list("FLEETWIRE_MODULES") {
        settings.modules = v;
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.string("FLEETWIRE_RELAY_HOST") {
        settings.relay.host = v;
    }
    if let Some(v) = env.u16("FLEETWIRE_RELAY_PORT", 1, 65535) {
        settings.relay.port = v;
    }
    if let Some(v) = env.i64("FLEETWIRE_RELAY_PRIORITY") {
        settings.relay.priority = v;
    }
    if let Some(v) = env.usize("FLEETWIRE_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.relay.max_connections = v;
    }
    if let Some(v) = env.bool("FLEETWIRE_METRICS") {
        settings.relay.metrics = v;
    }

    // ── Rig ─────────────────────────────────────────────────────────
    if let Some(v) = env.u64("FLEETWIRE_ANNOUNCE_INTERVAL", 1, 86_400) {
        settings.rig.announce_interval_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("FLEETWIRE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("FLEETWIRE_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Check constraints that span several fields.
pub fn validate(settings: &FleetSettings) -> Result<()> {
    let relay = &settings.relay;
    if relay.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "relay.heartbeatIntervalSecs must be at least 1".into(),
        ));
    }
    if relay.heartbeat_timeout_secs < relay.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(format!(
            "relay.heartbeatTimeoutSecs ({}) is shorter than relay.heartbeatIntervalSecs ({})",
            relay.heartbeat_timeout_secs, relay.heartbeat_interval_secs
        )));
    }
    if relay.send_queue == 0 || settings.rig.send_queue == 0 {
        return Err(SettingsError::InvalidValue("send queues must hold at least one frame".into()));
    }
    if settings.rig.announce_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "rig.announceIntervalSecs must be at least 1".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma separated list, dropping blank entries.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        self.string(name).map(|v| parse_list(&v))
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn i64(&self, name: &str) -> Option<i64> {
        self.parsed(name, "i64", |v| v.parse().ok())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
