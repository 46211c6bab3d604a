//! `Listener`: the relay's accept loop.
//!
//! Every path upgrades to a link except `/health` and `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use fleetwire_core::Dispatcher;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ListenerConfig;
use crate::handshake::Handshake;
use crate::health::{HealthResponse, health_check};
use crate::hub::LinkHub;
use crate::session::run_link_session;
use crate::shutdown::ShutdownCoordinator;

/// How long [`ListenerHandle::close`] waits for the accept loop to stop.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state handed to every route and link session.
#[derive(Clone)]
pub(crate) struct ListenerState {
    pub(crate) config: Arc<ListenerConfig>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) hub: Arc<LinkHub>,
    /// One permit per accepted link, held until its session ends.
    pub(crate) slots: Arc<Semaphore>,
    pub(crate) metrics: Option<PrometheusHandle>,
    pub(crate) start_time: Instant,
}

/// Accepts inbound links and feeds their envelopes to a dispatcher.
pub struct Listener {
    state: ListenerState,
}

impl Listener {
    /// Create a listener.
    ///
    /// `dispatcher` is frozen from here on. Links attach to `hub`; pass the
    /// same hub to a [`BrokerRouter`](crate::BrokerRouter) registered in
    /// `dispatcher` to make this a relay.
    pub fn new(config: ListenerConfig, dispatcher: Dispatcher, hub: Arc<LinkHub>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS)));
        Self {
            state: ListenerState {
                config: Arc::new(config),
                dispatcher: Arc::new(dispatcher),
                hub,
                slots,
                metrics: None,
                start_time: Instant::now(),
            },
        }
    }

    /// Serve Prometheus text on `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// The hub links attach to.
    pub fn hub(&self) -> &Arc<LinkHub> {
        &self.state.hub
    }

    /// The listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.state.config
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/", get(upgrade_handler))
            .route("/{*path}", get(upgrade_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and start accepting links.
    pub async fn serve(&self) -> std::io::Result<ListenerHandle> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_address()).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = ShutdownCoordinator::new();
        let token = shutdown.token();
        let router = self.router();
        let task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(%error, "listener stopped with error");
            }
        });

        info!(%local_addr, "listener started");
        Ok(ListenerHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// Handle to a running listener.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownCoordinator,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting new links.
    ///
    /// Links already accepted keep running until they end on their own.
    pub async fn close(self) {
        self.shutdown
            .graceful_shutdown(vec![self.task], Some(CLOSE_TIMEOUT))
            .await;
        info!(local_addr = %self.local_addr, "listener closed");
    }
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<ListenerState>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let Ok(slot) = Arc::clone(&state.slots).try_acquire_owned() else {
        warn!(
            max_connections = state.config.max_connections,
            "rejecting link, relay at capacity"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "relay at capacity").into_response();
    };

    let handshake = Handshake::from_request(&headers, &uri);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| serve_slot(socket, handshake, state, slot))
}

/// Run a link session while holding its capacity slot.
async fn serve_slot(
    socket: axum::extract::ws::WebSocket,
    handshake: Handshake,
    state: ListenerState,
    _slot: OwnedSemaphorePermit,
) {
    run_link_session(socket, handshake, state).await;
}

async fn health_handler(State(state): State<ListenerState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.hub.connection_count(),
        state.hub.subscriber_count(),
    ))
}

async fn metrics_handler(State(state): State<ListenerState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
