//! Link state and the frame-to-dispatch step shared by every receive loop.
//!
//! A [`Link`] is the send half of one duplex connection: outbound frames go
//! through a bounded channel to the connection's writer task. The receive
//! half stays with the task that owns the socket, which hands each text
//! frame to [`dispatch_frame`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::envelope::{Destination, Envelope};
use crate::errors::LinkError;
use crate::ids::ConnectionId;
use crate::telemetry::{ENVELOPES_MALFORMED_TOTAL, ENVELOPES_RECEIVED_TOTAL};

/// One established duplex connection.
pub struct Link {
    id: ConnectionId,
    /// Send channel to the connection's writer task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this link was established.
    connected_at: Instant,
    /// Whether the peer has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of frames dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
}

impl Link {
    /// Create a link around the writer task's channel.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a link plus the receiver its writer task drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(id, tx)), rx)
    }

    /// Identity of the link.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Send an envelope, waiting for queue space.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), LinkError> {
        let text = envelope.to_text()?;
        self.tx
            .send(Arc::new(text))
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Send an envelope without waiting.
    ///
    /// A full or closed queue fails immediately and increments the drop
    /// counter.
    pub fn try_send(&self, envelope: &Envelope) -> Result<(), LinkError> {
        let text = envelope.to_text()?;
        self.try_send_text(Arc::new(text))
    }

    /// Enqueue an already serialized frame without waiting.
    pub fn try_send_text(&self, text: Arc<String>) -> Result<(), LinkError> {
        match self.tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                match err {
                    TrySendError::Full(_) => Err(LinkError::Full),
                    TrySendError::Closed(_) => Err(LinkError::Closed),
                }
            }
        }
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Total frames dropped for this link.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the link as alive (pong or other activity received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or link establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the peer was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Link age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}

/// An envelope handed to a handler, with the link it arrived on.
///
/// Lifecycle envelopes of a link that never came up carry no link; sends
/// through such a delivery fail with [`LinkError::NotConnected`].
#[derive(Clone, Debug)]
pub struct Delivery {
    envelope: Envelope,
    link: Option<Arc<Link>>,
}

impl Delivery {
    /// Pair an envelope with its link.
    pub fn new(envelope: Envelope, link: Option<Arc<Link>>) -> Self {
        Self { envelope, link }
    }

    /// The envelope being delivered.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// The link the envelope arrived on.
    pub fn link(&self) -> Option<&Arc<Link>> {
        self.link.as_ref()
    }

    /// Send an envelope back over the same link.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), LinkError> {
        let link = self.link.as_ref().ok_or(LinkError::NotConnected)?;
        link.send(envelope).await
    }

    /// Send over the same link, addressed to this envelope's sender.
    pub async fn reply(
        &self,
        topic: &str,
        method: &str,
        payload: Option<Value>,
    ) -> Result<(), LinkError> {
        let mut envelope = Envelope::new(topic, method);
        envelope.payload = payload;
        envelope.to = self.envelope.sender.clone().map(Destination::Connection);
        self.send(&envelope).await
    }
}

/// Who an inbound envelope is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderStamp {
    /// Overwrite `from` with the link identity (relay side).
    Link,
    /// Keep `from` as it arrived on the wire (client side).
    Wire,
}

/// Parse one text frame and dispatch it.
///
/// Malformed frames are logged and dropped; `None` is returned and the
/// link stays open.
pub async fn dispatch_frame(
    text: &str,
    link: &Arc<Link>,
    stamp: SenderStamp,
    dispatcher: &Dispatcher,
) -> Option<DispatchReport> {
    let mut envelope = match Envelope::from_text(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            counter!(ENVELOPES_MALFORMED_TOTAL, "kind" => error.kind()).increment(1);
            warn!(conn_id = %link.id(), %error, "dropping malformed frame");
            return None;
        }
    };
    if stamp == SenderStamp::Link {
        envelope.sender = Some(link.id().clone());
    }
    counter!(ENVELOPES_RECEIVED_TOTAL).increment(1);

    let delivery = Delivery::new(envelope, Some(Arc::clone(link)));
    Some(dispatcher.dispatch(&delivery).await)
}
