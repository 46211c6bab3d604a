//! The `rig` module: a mining node linked to the best relay available.
//!
//! On every new link the rig announces itself with `machines/update`.
//! Operator commands (`machine/action`) and fee switches (`fee/update`)
//! routed to it are logged; acting on them belongs to the miner
//! supervisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwire_client::{
    ClientHandshake, Connector, ConnectorConfig, ConnectorOpener, FailoverSelector,
    FailoverTracker, StaticDiscovery,
};
use fleetwire_core::{
    ConnectionId, Delivery, Dispatcher, Envelope, HandlerError, NodeId, OPEN_METHOD,
    CONNECTION_TOPIC, handler_fn,
};
use fleetwire_settings::RigSettings;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Module, ModuleContext};

/// Registry identifier.
pub const NAME: &str = "rig";

/// Connector, failover selector, and the discovery feeding them.
#[derive(Default)]
pub struct RigModule {
    connector: Option<Arc<Connector>>,
    tracker: Option<FailoverTracker>,
    discovery: Option<(CancellationToken, JoinHandle<()>)>,
}

impl RigModule {
    /// The failover tracker, once started.
    #[cfg(test)]
    pub fn tracker(&self) -> Option<&FailoverTracker> {
        self.tracker.as_ref()
    }
}

/// Announcement sent on each new link.
fn machines_update(node_id: &NodeId) -> Envelope {
    let mut machines = serde_json::Map::new();
    let _ = machines.insert(
        node_id.to_string(),
        json!({"status": "online", "version": env!("CARGO_PKG_VERSION")}),
    );
    Envelope::new("machines", "update").with_payload(machines.into())
}

fn rig_dispatcher(node_id: &NodeId, tracker: &FailoverTracker) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    tracker.install(&mut dispatcher);

    let announce = machines_update(node_id);
    dispatcher.register(
        CONNECTION_TOPIC,
        OPEN_METHOD,
        handler_fn(move |delivery: Delivery| {
            let announce = announce.clone();
            async move { delivery.send(&announce).await.map_err(HandlerError::from) }
        }),
    );

    for (topic, method) in [("machine", "action"), ("fee", "update")] {
        dispatcher.register(
            topic,
            method,
            handler_fn(|delivery: Delivery| async move {
                let envelope = delivery.envelope();
                info!(
                    topic = %envelope.topic,
                    method = %envelope.method,
                    from = envelope.sender.as_ref().map_or("", ConnectionId::as_str),
                    payload = %envelope.payload.clone().unwrap_or_default(),
                    "command received"
                );
                Ok(())
            }),
        );
    }
    dispatcher
}

fn discovery(settings: &RigSettings) -> StaticDiscovery {
    let relays = settings
        .relays
        .iter()
        .map(|candidate| StaticDiscovery::relay(&candidate.host, candidate.port, candidate.priority))
        .collect();
    StaticDiscovery::new(relays, Duration::from_secs(settings.announce_interval_secs))
}

#[async_trait]
impl Module for RigModule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn start(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let settings = &ctx.settings.rig;
        let tracker = FailoverTracker::new();
        let connector = Arc::new(Connector::new(
            ConnectorConfig {
                send_queue: settings.send_queue,
                ..ConnectorConfig::default()
            },
            rig_dispatcher(&ctx.node_id, &tracker),
        ));

        let handshake = ClientHandshake::new(
            ConnectionId::from(ctx.node_id.clone()),
            settings.subscriptions.clone(),
        );
        let selector = Arc::new(FailoverSelector::new(
            tracker.clone(),
            ConnectorOpener::new(Arc::clone(&connector), handshake),
        ));

        let discovery = discovery(settings);
        if discovery.relays().is_empty() {
            warn!("no relays configured, rig will stay disconnected");
        }
        let cancel = CancellationToken::new();
        let task = discovery.spawn(selector, cancel.clone());
        info!(
            node_id = %ctx.node_id,
            relays = settings.relays.len(),
            "rig started"
        );

        self.connector = Some(connector);
        self.tracker = Some(tracker);
        self.discovery = Some((cancel, task));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some((cancel, task)) = self.discovery.take() {
            cancel.cancel();
            let _ = task.await;
        }
        if let Some(connector) = self.connector.take() {
            connector.close().await;
        }
        if let Some(tracker) = self.tracker.take() {
            debug!(state = ?tracker.state(), "rig stopped");
        }
    }
}
