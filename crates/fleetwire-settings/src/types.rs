//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`: missing
//! fields take their compiled default, so a settings file only needs the
//! values it changes.

use fleetwire_core::SubscriptionManifest;
use serde::{Deserialize, Serialize};

/// Port relays listen on unless configured otherwise.
pub const DEFAULT_RELAY_PORT: u16 = 29_203;

/// Root settings type.
///
/// ```json
/// {
///   "node": { "id": "a1b2c3d4" },
///   "modules": ["rig"],
///   "rig": { "relays": [{ "host": "10.0.0.2", "port": 29203, "priority": 1 }] }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetSettings {
    /// Identity of this process.
    pub node: NodeSettings,
    /// Modules to start, by identifier (`relay`, `rig`).
    pub modules: Vec<String>,
    /// Relay (broker) settings.
    pub relay: RelaySettings,
    /// Rig (client) settings.
    pub rig: RigSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            node: NodeSettings::default(),
            modules: vec!["rig".to_string()],
            relay: RelaySettings::default(),
            rig: RigSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Identity of this process within the fleet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSettings {
    /// Stable node identity. Generated at startup when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Relay listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Priority advertised to rigs; lower wins.
    pub priority: i64,
    /// Maximum concurrently attached links.
    pub max_connections: usize,
    /// Interval between server Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a link is dropped, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-link outbound queue capacity.
    pub send_queue: usize,
    /// Serve Prometheus metrics on `/metrics`.
    pub metrics: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_RELAY_PORT,
            priority: 0,
            max_connections: 4096,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 4 * 1024 * 1024,
            send_queue: 256,
            metrics: true,
        }
    }
}

/// A relay the rig may connect to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCandidate {
    /// Relay host or IP.
    pub host: String,
    /// Relay port.
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Advertised priority; lower wins.
    #[serde(default)]
    pub priority: i64,
}

fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}

/// Rig connector settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RigSettings {
    /// Manifest presented to the relay.
    pub subscriptions: SubscriptionManifest,
    /// Relays announced to the failover selector.
    pub relays: Vec<RelayCandidate>,
    /// Interval between relay announcements, in seconds.
    pub announce_interval_secs: u64,
    /// Outbound queue capacity.
    pub send_queue: usize,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            subscriptions: SubscriptionManifest::new()
                .subscribe("machine", ["action"])
                .subscribe("fee", ["update"]),
            relays: Vec::new(),
            announce_interval_secs: 30,
            send_queue: 256,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = FleetSettings::default();
        assert_eq!(settings.modules, vec!["rig"]);
        assert_eq!(settings.relay.port, DEFAULT_RELAY_PORT);
        assert_eq!(settings.relay.priority, 0);
        assert!(settings.node.id.is_none());
        assert_eq!(
            settings.rig.subscriptions.entries(),
            vec![("fee", "update"), ("machine", "action")]
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: FleetSettings =
            serde_json::from_str(r#"{"relay": {"priority": 3}}"#).unwrap();
        assert_eq!(settings.relay.priority, 3);
        assert_eq!(settings.relay.port, DEFAULT_RELAY_PORT);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn camel_case_field_names() {
        let value = serde_json::to_value(FleetSettings::default()).unwrap();
        assert!(value["relay"]["maxConnections"].is_number());
        assert!(value["rig"]["announceIntervalSecs"].is_number());
        assert!(value["node"].get("id").is_none());
    }

    #[test]
    fn relay_candidate_defaults_port() {
        let candidate: RelayCandidate = serde_json::from_str(r#"{"host": "10.0.0.2"}"#).unwrap();
        assert_eq!(candidate.port, DEFAULT_RELAY_PORT);
        assert_eq!(candidate.priority, 0);
    }
}
