//! `Connector`: the rig's outbound link to a relay.
//!
//! A connector owns at most one live link. [`Connector::open`] starts a
//! background task that performs the handshake, dispatches a local
//! `connection/open`, then feeds every received envelope to the
//! dispatcher. When the task ends for any reason (refused, relay closed,
//! transport error, cancelled) it dispatches a local `connection/closed` and
//! exits. Reconnecting is left to the caller.
//!
//! Every link gets a generation number, carried in its lifecycle payloads
//! as `link`, so a closed notification can be matched to the open that
//! caused it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fleetwire_core::telemetry::{
    LINK_DURATION_SECONDS, LINKS_ACTIVE, LINKS_CLOSED_TOTAL, LINKS_OPENED_TOTAL,
};
use fleetwire_core::{
    CLOSED_METHOD, ConnectionId, Delivery, Dispatcher, Envelope, Link, LinkError, OPEN_METHOD,
    SenderStamp, dispatch_frame,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ConnectorConfig;
use crate::errors::ConnectError;
use crate::handshake::ClientHandshake;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a cancelled link may spend sending its Close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// State shared between the connector and its link tasks.
struct Shared {
    dispatcher: Arc<Dispatcher>,
    established: RwLock<Option<Established>>,
}

#[derive(Clone)]
struct Established {
    generation: u64,
    link: Arc<Link>,
}

/// The task behind one `open`.
struct ActiveLink {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveLink {
    async fn finish(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            warn!(generation = self.generation, %error, "relay link task failed");
        }
    }
}

/// Link tasks owned by a connector: the newest one plus those it
/// superseded that may still be winding down.
#[derive(Default)]
struct LinkTasks {
    current: Option<ActiveLink>,
    superseded: Vec<ActiveLink>,
}

impl LinkTasks {
    fn drain(&mut self) -> Vec<ActiveLink> {
        let mut all = std::mem::take(&mut self.superseded);
        all.extend(self.current.take());
        all
    }
}

/// Maintains one outbound link and feeds its envelopes to a dispatcher.
pub struct Connector {
    config: ConnectorConfig,
    shared: Arc<Shared>,
    next_generation: AtomicU64,
    tasks: Mutex<LinkTasks>,
}

impl Connector {
    /// Create a connector. `dispatcher` is frozen from here on.
    pub fn new(config: ConnectorConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                dispatcher: Arc::new(dispatcher),
                established: RwLock::new(None),
            }),
            next_generation: AtomicU64::new(0),
            tasks: Mutex::new(LinkTasks::default()),
        }
    }

    /// Open a link to `ws://host:port/` in the background.
    ///
    /// Returns the generation of the new link. A link started by an earlier
    /// `open` is cancelled and emits its own `connection/closed`. Must be
    /// called from within a tokio runtime.
    pub fn open(&self, host: &str, port: u16, handshake: &ClientHandshake) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tasks = self.tasks.lock();
        tasks.superseded.retain(|link| !link.task.is_finished());
        if let Some(previous) = tasks.current.take() {
            debug!(
                superseded = previous.generation,
                generation, "cancelling previous relay link"
            );
            previous.cancel.cancel();
            tasks.superseded.push(previous);
        }

        let cancel = CancellationToken::new();
        let task = LinkTask {
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            host: host.to_owned(),
            port,
            handshake: handshake.clone(),
            generation,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run_link(task));
        tasks.current = Some(ActiveLink {
            generation,
            cancel,
            task,
        });
        generation
    }

    /// Cancel every link task, superseded ones included, and wait for all
    /// of them to finish.
    pub async fn close(&self) {
        let links = self.tasks.lock().drain();
        for link in links {
            link.finish().await;
        }
    }

    /// Send an envelope over the established link.
    ///
    /// Fails with [`LinkError::NotConnected`] when no link is established.
    /// Nothing is queued for a later link.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), LinkError> {
        let link = self
            .shared
            .established
            .read()
            .as_ref()
            .map(|established| Arc::clone(&established.link))
            .ok_or(LinkError::NotConnected)?;
        link.send(envelope).await
    }

    /// Whether a link is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.established.read().is_some()
    }

    /// Generation of the established link, if any.
    pub fn connected_generation(&self) -> Option<u64> {
        self.shared
            .established
            .read()
            .as_ref()
            .map(|established| established.generation)
    }

    /// The dispatcher envelopes are fed to.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        for link in self.tasks.get_mut().drain() {
            link.cancel.cancel();
        }
    }
}

struct LinkTask {
    shared: Arc<Shared>,
    config: ConnectorConfig,
    host: String,
    port: u16,
    handshake: ClientHandshake,
    generation: u64,
    cancel: CancellationToken,
}

impl LinkTask {
    fn relay(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn lifecycle_payload(&self) -> Value {
        json!({
            "relay": self.relay(),
            "link": self.generation,
            "headers": self.handshake.headers(),
        })
    }

    async fn connect(&self) -> Result<WsStream, ConnectError> {
        let request = self.handshake.request(&self.host, self.port)?;
        let timeout = self.config.connect_timeout();
        let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;
        Ok(ws)
    }

    async fn dispatch_lifecycle(&self, method: &str, link: Option<Arc<Link>>) {
        let envelope = Envelope::lifecycle(method, self.lifecycle_payload());
        let _ = self
            .shared
            .dispatcher
            .dispatch(&Delivery::new(envelope, link))
            .await;
    }
}

#[instrument(skip_all, fields(relay = %task.relay(), link = task.generation))]
async fn run_link(task: LinkTask) {
    let connected = tokio::select! {
        () = task.cancel.cancelled() => None,
        result = task.connect() => match result {
            Ok(ws) => Some(ws),
            Err(error) => {
                warn!(%error, "relay connection failed");
                None
            }
        },
    };
    let Some(ws) = connected.filter(|_| !task.cancel.is_cancelled()) else {
        task.dispatch_lifecycle(CLOSED_METHOD, None).await;
        return;
    };

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (link, mut send_rx) =
        Link::channel(ConnectionId::from_raw(task.relay()), task.config.send_queue);
    *task.shared.established.write() = Some(Established {
        generation: task.generation,
        link: Arc::clone(&link),
    });

    info!(identity = %task.handshake.identity(), "relay link opened");
    counter!(LINKS_OPENED_TOTAL, "role" => "rig").increment(1);
    gauge!(LINKS_ACTIVE, "role" => "rig").increment(1.0);

    let writer_cancel = task.cancel.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => break,
                frame = send_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::text(String::clone(&text))).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    task.dispatch_lifecycle(OPEN_METHOD, Some(Arc::clone(&link)))
        .await;

    let mut writer_done = false;
    let reason = loop {
        tokio::select! {
            () = task.cancel.cancelled() => break "cancelled",
            _ = &mut writer => {
                writer_done = true;
                break "write failed";
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = dispatch_frame(text.as_str(), &link, SenderStamp::Wire, &task.shared.dispatcher).await;
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        let _ = dispatch_frame(text, &link, SenderStamp::Wire, &task.shared.dispatcher).await;
                    }
                    Err(_) => warn!(len = data.len(), "dropping non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break "closed by relay",
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "relay link read failed");
                    break "transport error";
                }
            },
        }
    };

    if !writer_done {
        if task.cancel.is_cancelled() {
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut writer).await;
        }
        writer.abort();
    }

    {
        let mut established = task.shared.established.write();
        if established
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(&current.link, &link))
        {
            *established = None;
        }
    }
    let age = link.age();
    info!(reason, age_secs = age.as_secs(), "relay link closed");
    counter!(LINKS_CLOSED_TOTAL, "role" => "rig").increment(1);
    gauge!(LINKS_ACTIVE, "role" => "rig").decrement(1.0);
    histogram!(LINK_DURATION_SECONDS, "role" => "rig").record(age.as_secs_f64());

    task.dispatch_lifecycle(CLOSED_METHOD, Some(link)).await;
}
