//! Priority-based relay selection.
//!
//! The selector tracks the best (lowest) priority relay it is linked to.
//! A discovered relay is connected to when nothing is linked, or when it
//! beats the current priority; anything else is ignored. A
//! `connection/closed` for the tracked link generation returns the
//! selector to [`FailoverState::Disconnected`] so the next announcement
//! reconnects.
//!
//! ```text
//! discovered 5 -> connect (Disconnected)
//! discovered 3 -> connect (3 < 5)
//! discovered 3 -> keep
//! discovered 7 -> keep
//! discovered 2 -> connect (2 < 3)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::{
    CLOSED_METHOD, CONNECTION_TOPIC, Delivery, DiscoveredService, DiscoveryListener, Dispatcher,
    EnvelopeHandler, HandlerError, RELAY_PROTOCOL,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connector::Connector;
use crate::handshake::ClientHandshake;

/// Opens a link to a relay and returns its generation.
pub trait RelayOpener: Send + Sync {
    /// Start linking to `host:port`.
    fn open_relay(&self, host: &str, port: u16) -> u64;
}

/// Opens relay links through a shared [`Connector`] with a fixed handshake.
pub struct ConnectorOpener {
    connector: Arc<Connector>,
    handshake: ClientHandshake,
}

impl ConnectorOpener {
    /// Open through `connector`, presenting `handshake`.
    pub fn new(connector: Arc<Connector>, handshake: ClientHandshake) -> Self {
        Self {
            connector,
            handshake,
        }
    }
}

impl RelayOpener for ConnectorOpener {
    fn open_relay(&self, host: &str, port: u16) -> u64 {
        self.connector.open(host, port, &self.handshake)
    }
}

/// Link state as seen by the selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailoverState {
    /// No tracked link.
    #[default]
    Disconnected,
    /// Linked (or linking) to a relay.
    Connected {
        /// Priority of the relay.
        priority: i64,
        /// Generation of the link.
        link: u64,
    },
}

/// What the selector did with one announcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailoverDecision {
    /// Not a relay, or no usable priority.
    Ignored,
    /// Not better than the current relay.
    Kept,
    /// A new link was opened.
    Opened {
        /// Priority of the relay now tracked.
        priority: i64,
        /// Generation of the new link.
        link: u64,
    },
}

/// Shared failover state.
///
/// Register [`FailoverTracker::install`] in the connector's dispatcher
/// before building the connector, then hand a clone to the
/// [`FailoverSelector`].
#[derive(Clone, Debug, Default)]
pub struct FailoverTracker {
    state: Arc<Mutex<FailoverState>>,
}

impl FailoverTracker {
    /// Start disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> FailoverState {
        *self.state.lock()
    }

    /// Return to `Disconnected` if `link` is the tracked generation.
    pub fn reset(&self, link: u64) -> bool {
        let mut state = self.state.lock();
        match *state {
            FailoverState::Connected { link: tracked, priority } if tracked == link => {
                info!(link, priority, "tracked relay link closed");
                *state = FailoverState::Disconnected;
                true
            }
            _ => {
                debug!(link, "ignoring close of untracked relay link");
                false
            }
        }
    }

    /// Register the reset handler under `connection/closed`.
    pub fn install(&self, dispatcher: &mut Dispatcher) {
        dispatcher.register(
            CONNECTION_TOPIC,
            CLOSED_METHOD,
            ResetOnClose {
                tracker: self.clone(),
            },
        );
    }
}

struct ResetOnClose {
    tracker: FailoverTracker,
}

#[async_trait]
impl EnvelopeHandler for ResetOnClose {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let envelope = delivery.envelope();
        if !envelope.local {
            return Ok(());
        }
        let link = envelope
            .payload
            .as_ref()
            .and_then(|payload| payload.get("link"))
            .and_then(Value::as_u64)
            .ok_or_else(|| HandlerError::failed("closed notification without link generation"))?;
        let _ = self.tracker.reset(link);
        Ok(())
    }
}

/// Chooses which discovered relay to link to.
pub struct FailoverSelector<O> {
    tracker: FailoverTracker,
    opener: O,
}

impl<O: RelayOpener> FailoverSelector<O> {
    /// Create a selector over `tracker`, opening links through `opener`.
    pub fn new(tracker: FailoverTracker, opener: O) -> Self {
        Self { tracker, opener }
    }

    /// The tracker this selector updates.
    pub fn tracker(&self) -> &FailoverTracker {
        &self.tracker
    }

    /// Consider one discovery announcement.
    ///
    /// Deciding and opening happen under the tracker lock, so a close of
    /// the new link can only be observed after its generation is tracked.
    pub fn on_discovered(&self, protocol: &str, service: &DiscoveredService) -> FailoverDecision {
        if protocol != RELAY_PROTOCOL {
            debug!(protocol, ip = %service.ip, "ignoring non-relay service");
            return FailoverDecision::Ignored;
        }
        let Some(priority) = service.priority() else {
            warn!(
                ip = %service.ip,
                port = service.port,
                "ignoring relay without integer priority"
            );
            return FailoverDecision::Ignored;
        };

        let mut state = self.tracker.state.lock();
        match *state {
            FailoverState::Connected {
                priority: current, ..
            } if priority >= current => {
                debug!(priority, current, ip = %service.ip, "keeping current relay");
                return FailoverDecision::Kept;
            }
            FailoverState::Connected {
                priority: current, ..
            } => {
                info!(priority, current, ip = %service.ip, port = service.port, "switching to better relay");
            }
            FailoverState::Disconnected => {
                info!(priority, ip = %service.ip, port = service.port, "connecting to relay");
            }
        }

        let link = self.opener.open_relay(&service.ip, service.port);
        *state = FailoverState::Connected { priority, link };
        FailoverDecision::Opened { priority, link }
    }
}

impl<O: RelayOpener> DiscoveryListener for FailoverSelector<O> {
    fn on_service(&self, protocol: &str, service: &DiscoveredService) {
        let _ = self.on_discovered(protocol, service);
    }
}
