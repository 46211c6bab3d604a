//! The envelope: the one message unit carried over every link.
//!
//! On the wire an envelope is a JSON text frame:
//!
//! ```text
//! { "event": str, "method": str, "payload": any?, "to": identity | "one"?, "from": identity? }
//! ```
//!
//! `event` is exposed as [`Envelope::topic`] and `from` as
//! [`Envelope::sender`]. Lifecycle envelopes synthesized in-process carry
//! [`Envelope::local`] and are never serialized with that flag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::ConnectionId;

/// Matches any topic or any method at registration/subscription time.
pub const WILDCARD: &str = "*";

/// Topic of the lifecycle envelopes every link emits locally.
pub const CONNECTION_TOPIC: &str = "connection";

/// Lifecycle method dispatched once a link is established.
pub const OPEN_METHOD: &str = "open";

/// Lifecycle method dispatched once a link has terminated.
pub const CLOSED_METHOD: &str = "closed";

/// Reserved `to` value selecting exactly one subscriber.
pub const ONE_DESTINATION: &str = "one";

/// Explicit addressing of an envelope.
///
/// An envelope with no destination is routed by subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    /// Deliver to the first matching subscriber other than the sender.
    One,
    /// Deliver only to this connection.
    Connection(ConnectionId),
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        if value == ONE_DESTINATION {
            Self::One
        } else {
            Self::Connection(ConnectionId::from_raw(value))
        }
    }
}

impl From<Destination> for String {
    fn from(value: Destination) -> Self {
        match value {
            Destination::One => ONE_DESTINATION.to_owned(),
            Destination::Connection(id) => id.into_inner(),
        }
    }
}

impl From<ConnectionId> for Destination {
    fn from(id: ConnectionId) -> Self {
        Self::Connection(id)
    }
}

/// A single message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic of the message (wire name `event`).
    #[serde(rename = "event")]
    pub topic: String,
    /// Method within the topic.
    pub method: String,
    /// Opaque application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Explicit destination; `None` means route by subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Destination>,
    /// Originating connection (wire name `from`), stamped on receipt.
    #[serde(rename = "from", default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ConnectionId>,
    /// Synthesized in-process rather than received from the wire.
    #[serde(skip)]
    pub local: bool,
}

impl Envelope {
    /// Create an envelope with no payload or addressing.
    pub fn new(topic: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            method: method.into(),
            payload: None,
            to: None,
            sender: None,
            local: false,
        }
    }

    /// Create a local `connection/<method>` lifecycle envelope.
    pub fn lifecycle(method: &str, payload: Value) -> Self {
        Self {
            local: true,
            ..Self::new(CONNECTION_TOPIC, method).with_payload(payload)
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the destination.
    #[must_use]
    pub fn addressed_to(mut self, to: impl Into<Destination>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Set the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: ConnectionId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Parse one inbound text frame.
    ///
    /// `event` and `method` must both be present as strings. An empty `to`
    /// is treated as absent.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::NotJson)?;
        let Value::Object(fields) = &value else {
            return Err(ProtocolError::NotAnObject);
        };
        for field in ["event", "method"] {
            if !fields.get(field).is_some_and(Value::is_string) {
                return Err(ProtocolError::MissingField(field));
            }
        }

        let mut envelope: Self = serde_json::from_value(value).map_err(ProtocolError::Malformed)?;
        if matches!(&envelope.to, Some(Destination::Connection(id)) if id.as_str().is_empty()) {
            envelope.to = None;
        }
        Ok(envelope)
    }

    /// Serialize to a wire frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this is a `connection/*` lifecycle envelope.
    pub fn is_lifecycle(&self) -> bool {
        self.local && self.topic == CONNECTION_TOPIC
    }
}

/// The registry/subscription keys an envelope matches, in tier order:
/// `(T, M)`, `(T, *)`, `(*, M)`, `(*, *)`.
///
/// A key that repeats an earlier one (when `T` or `M` is itself `*`) is
/// listed once.
pub fn match_tiers<'a>(topic: &'a str, method: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut tiers = Vec::with_capacity(4);
    for key in [
        (topic, method),
        (topic, WILDCARD),
        (WILDCARD, method),
        (WILDCARD, WILDCARD),
    ] {
        if !tiers.contains(&key) {
            tiers.push(key);
        }
    }
    tiers
}
