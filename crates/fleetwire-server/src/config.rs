//! Listener configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a relay listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrently attached links; further upgrades get 503.
    pub max_connections: usize,
    /// Interval between server Ping frames in seconds.
    pub heartbeat_interval_secs: u64,
    /// Drop a link after this many seconds without Pong or other activity.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-link outbound queue capacity.
    pub send_queue: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 4096,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 4 * 1024 * 1024, // 4 MB
            send_queue: 256,
        }
    }
}

impl ListenerConfig {
    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_any_port() {
        let cfg = ListenerConfig::default();
        assert_eq!(cfg.bind_address(), "127.0.0.1:0");
    }

    #[test]
    fn default_heartbeat_timeout_exceeds_interval() {
        let cfg = ListenerConfig::default();
        assert!(cfg.heartbeat_timeout_secs > cfg.heartbeat_interval_secs);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ListenerConfig {
            host: "0.0.0.0".into(),
            port: 29203,
            send_queue: 8,
            ..ListenerConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ListenerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bind_address(), "0.0.0.0:29203");
        assert_eq!(back.send_queue, 8);
    }
}
