//! Relay-side routing of inbound envelopes to other links.
//!
//! The router is registered under `(*, *)` and sees every envelope that
//! arrives from the wire:
//!
//! - `to` names a connection: forward to it if attached, else drop
//! - `to` is `"one"`: forward to the first matching subscriber that is not
//!   the sender
//! - no `to`: forward to every matching subscriber except the sender, each
//!   once even when it matches several tiers
//!
//! Forwarding never waits on a slow peer. A full or closed queue fails that
//! peer only and delivery continues to the rest.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::telemetry::{ENVELOPES_DROPPED_TOTAL, ENVELOPES_FORWARDED_TOTAL};
use fleetwire_core::{
    ConnectionId, Delivery, Destination, Dispatcher, EnvelopeHandler, Envelope, HandlerError,
    Link, WILDCARD,
};
use metrics::counter;
use tracing::{debug, warn};

use crate::hub::LinkHub;

/// Result of routing one envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Links the envelope was enqueued for.
    pub delivered: Vec<ConnectionId>,
    /// Links whose queue rejected the envelope.
    pub failed: Vec<ConnectionId>,
}

/// Forwards envelopes between attached links.
pub struct BrokerRouter {
    hub: Arc<LinkHub>,
}

impl BrokerRouter {
    /// Create a router over `hub`.
    pub fn new(hub: Arc<LinkHub>) -> Self {
        Self { hub }
    }

    /// Register a router for `hub` under `(*, *)`.
    pub fn install(dispatcher: &mut Dispatcher, hub: Arc<LinkHub>) {
        dispatcher.register(WILDCARD, WILDCARD, Self::new(hub));
    }

    /// Route one envelope received from `envelope.sender`.
    pub fn route(&self, envelope: &Envelope) -> Result<RouteOutcome, serde_json::Error> {
        let frame = Arc::new(envelope.to_text()?);
        let sender = envelope.sender.as_ref();
        let mut outcome = RouteOutcome::default();

        match &envelope.to {
            Some(Destination::Connection(target)) => match self.hub.get(target) {
                Some(link) => forward(&link, &frame, "direct", &mut outcome),
                None => {
                    counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "unknown_destination")
                        .increment(1);
                    debug!(
                        to = %target,
                        topic = %envelope.topic,
                        method = %envelope.method,
                        "no link for direct destination, dropping"
                    );
                }
            },
            Some(Destination::One) => {
                let target = self
                    .hub
                    .candidates(&envelope.topic, &envelope.method)
                    .into_iter()
                    .find(|link| Some(link.id()) != sender);
                if let Some(link) = target {
                    forward(&link, &frame, "one", &mut outcome);
                } else {
                    debug!(
                        topic = %envelope.topic,
                        method = %envelope.method,
                        "no subscriber for single delivery"
                    );
                }
            }
            None => {
                for link in self.hub.candidates(&envelope.topic, &envelope.method) {
                    if Some(link.id()) != sender {
                        forward(&link, &frame, "broadcast", &mut outcome);
                    }
                }
            }
        }

        Ok(outcome)
    }
}

fn forward(link: &Link, frame: &Arc<String>, route: &'static str, outcome: &mut RouteOutcome) {
    match link.try_send_text(Arc::clone(frame)) {
        Ok(()) => {
            counter!(ENVELOPES_FORWARDED_TOTAL, "route" => route).increment(1);
            outcome.delivered.push(link.id().clone());
        }
        Err(error) => {
            counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "send_failed").increment(1);
            warn!(
                conn_id = %link.id(),
                route,
                dropped_total = link.drop_count(),
                %error,
                "failed to forward envelope"
            );
            outcome.failed.push(link.id().clone());
        }
    }
}

#[async_trait]
impl EnvelopeHandler for BrokerRouter {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let envelope = delivery.envelope();
        if envelope.local {
            return Ok(());
        }
        let _ = self.route(envelope)?;
        Ok(())
    }
}
