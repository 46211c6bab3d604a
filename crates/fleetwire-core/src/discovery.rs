//! The service-discovery contract.
//!
//! Discovery itself happens outside the fabric. Relays publish a
//! [`ServiceAdvert`] as their service payload; rigs receive
//! `(protocol, DiscoveredService)` callbacks and feed them to their
//! failover selector.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::NodeId;

/// Protocol identifier relays are announced under.
pub const RELAY_PROTOCOL: &str = "relay";

/// A service announced by discovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredService {
    /// Address the service is reachable at.
    pub ip: String,
    /// Port the service listens on.
    pub port: u16,
    /// Free-form payload published by the service.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl DiscoveredService {
    /// Create a service record.
    pub fn new(ip: impl Into<String>, port: u16, payload: Map<String, Value>) -> Self {
        Self {
            ip: ip.into(),
            port,
            payload,
        }
    }

    /// Advertised priority, if the payload carries an integer one.
    pub fn priority(&self) -> Option<i64> {
        self.payload.get("priority").and_then(Value::as_i64)
    }
}

/// Payload a relay publishes about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAdvert {
    /// Node identity of the relay.
    pub id: NodeId,
    /// Priority; lower is preferred by rigs.
    pub priority: i64,
}

impl ServiceAdvert {
    /// Render as a discovery payload map.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        let _ = payload.insert("id".to_owned(), Value::String(self.id.to_string()));
        let _ = payload.insert("priority".to_owned(), Value::from(self.priority));
        payload
    }
}

/// Receives `(protocol, service)` announcements from a discovery source.
pub trait DiscoveryListener: Send + Sync {
    /// A service was announced or re-announced.
    fn on_service(&self, protocol: &str, service: &DiscoveredService);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn advert_payload_shape() {
        let advert = ServiceAdvert {
            id: NodeId::from_raw("a1b2c3d4"),
            priority: 2,
        };
        let service = DiscoveredService::new("10.0.0.2", 29203, advert.to_payload());
        assert_eq!(service.priority(), Some(2));
        assert_eq!(service.payload["id"], "a1b2c3d4");
    }

    #[test]
    fn priority_must_be_an_integer() {
        let mut payload = Map::new();
        let _ = payload.insert("priority".into(), json!("high"));
        let service = DiscoveredService::new("10.0.0.2", 29203, payload);
        assert_eq!(service.priority(), None);

        let service = DiscoveredService::new("10.0.0.2", 29203, Map::new());
        assert_eq!(service.priority(), None);
    }

    #[test]
    fn negative_priority_is_kept() {
        let service = DiscoveredService::new(
            "10.0.0.2",
            29203,
            json!({"priority": -3}).as_object().cloned().unwrap(),
        );
        assert_eq!(service.priority(), Some(-3));
    }
}
