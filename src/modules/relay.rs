//! The `relay` module: a broker other nodes link to.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use fleetwire_core::{Dispatcher, ServiceAdvert};
use fleetwire_server::{BrokerRouter, LinkHub, Listener, ListenerConfig, ListenerHandle};
use fleetwire_settings::RelaySettings;
use tracing::{info, warn};

use super::{Module, ModuleContext};

/// Registry identifier.
pub const NAME: &str = "relay";

/// Listener plus broker router over one hub.
#[derive(Default)]
pub struct RelayModule {
    hub: Option<Arc<LinkHub>>,
    handle: Option<ListenerHandle>,
}

impl RelayModule {
    /// Address the listener is bound to, once started.
    #[cfg(test)]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.handle.as_ref().map(ListenerHandle::local_addr)
    }

    /// The hub links attach to, once started.
    #[cfg(test)]
    pub fn hub(&self) -> Option<&Arc<LinkHub>> {
        self.hub.as_ref()
    }
}

fn listener_config(settings: &RelaySettings) -> ListenerConfig {
    ListenerConfig {
        host: settings.host.clone(),
        port: settings.port,
        max_connections: settings.max_connections,
        heartbeat_interval_secs: settings.heartbeat_interval_secs,
        heartbeat_timeout_secs: settings.heartbeat_timeout_secs,
        max_message_size: settings.max_message_size,
        send_queue: settings.send_queue,
    }
}

#[async_trait]
impl Module for RelayModule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn start(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let settings = &ctx.settings.relay;
        let hub = Arc::new(LinkHub::new());
        let mut dispatcher = Dispatcher::new();
        BrokerRouter::install(&mut dispatcher, Arc::clone(&hub));

        let mut listener = Listener::new(listener_config(settings), dispatcher, Arc::clone(&hub));
        if settings.metrics {
            match fleetwire_server::metrics::install_recorder() {
                Ok(handle) => listener = listener.with_metrics(handle),
                Err(error) => warn!(%error, "metrics recorder unavailable, /metrics disabled"),
            }
        }

        let handle = listener
            .serve()
            .await
            .with_context(|| format!("failed to bind relay on {}:{}", settings.host, settings.port))?;

        let advert = ServiceAdvert {
            id: ctx.node_id.clone(),
            priority: settings.priority,
        };
        info!(
            local_addr = %handle.local_addr(),
            payload = %serde_json::Value::Object(advert.to_payload()),
            "relay advertised"
        );

        self.hub = Some(hub);
        self.handle = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close().await;
        }
        if let Some(hub) = self.hub.take() {
            info!(links = hub.connection_count(), "relay stopped accepting");
        }
    }
}
