//! Connector configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an outbound [`Connector`](crate::Connector).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Outbound queue capacity per link.
    pub send_queue: usize,
    /// Give up on a handshake after this many seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            send_queue: 256,
            connect_timeout_secs: 10,
        }
    }
}

impl ConnectorConfig {
    /// Handshake timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ConnectorConfig = serde_json::from_str(r#"{"send_queue": 8}"#).unwrap();
        assert_eq!(cfg.send_queue, 8);
        assert_eq!(cfg.connect_timeout_secs, 10);
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let cfg = ConnectorConfig {
            connect_timeout_secs: 0,
            ..ConnectorConfig::default()
        };
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(1));
    }
}
