//! One accepted link, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use fleetwire_core::telemetry::{
    LINK_DURATION_SECONDS, LINKS_ACTIVE, LINKS_CLOSED_TOTAL, LINKS_OPENED_TOTAL,
};
use fleetwire_core::{
    CLOSED_METHOD, ConnectionId, Delivery, Envelope, Link, OPEN_METHOD, SenderStamp,
    dispatch_frame,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument, warn};

use crate::handshake::Handshake;
use crate::server::ListenerState;

/// Run a link for an upgraded socket.
///
/// 1. Attaches the link and its subscriptions to the hub
/// 2. Starts the writer: queued outbound frames plus periodic Pings,
///    dropping the link when the peer stays silent too long
/// 3. Dispatches a local `connection/open`
/// 4. Dispatches every inbound frame, in order, stamped with the link
///    identity
/// 5. Detaches the link, then dispatches a local `connection/closed`
#[instrument(skip_all, fields(conn_id))]
pub(crate) async fn run_link_session(ws: WebSocket, handshake: Handshake, state: ListenerState) {
    let id = handshake
        .identity
        .clone()
        .unwrap_or_else(ConnectionId::generate);
    let _ = tracing::Span::current().record("conn_id", id.as_str());

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (link, mut send_rx) = Link::channel(id.clone(), state.config.send_queue);

    if state.hub.attach(Arc::clone(&link), &handshake.manifest).is_some() {
        info!(conn_id = %id, "identity reconnected");
    }
    info!(
        conn_id = %id,
        path = %handshake.path,
        subscriptions = handshake.manifest.entries().len(),
        "link opened"
    );
    counter!(LINKS_OPENED_TOTAL, "role" => "relay").increment(1);
    gauge!(LINKS_ACTIVE, "role" => "relay").increment(1.0);

    // Outbound forwarder with periodic Ping frames.
    let ping_every = Duration::from_secs(state.config.heartbeat_interval_secs.max(1));
    let pong_timeout = Duration::from_secs(state.config.heartbeat_timeout_secs);
    let outbound_link = Arc::clone(&link);
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_link.check_alive()
                        && outbound_link.last_pong_elapsed() > pong_timeout
                    {
                        warn!(conn_id = %outbound_link.id(), "peer unresponsive for {pong_timeout:?}, dropping link");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let payload = handshake.lifecycle_payload();
    let open = Envelope::lifecycle(OPEN_METHOD, payload.clone()).with_sender(id.clone());
    let _ = state
        .dispatcher
        .dispatch(&Delivery::new(open, Some(Arc::clone(&link))))
        .await;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => {
                        debug!(conn_id = %id, %error, "read failed");
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => {
                        link.mark_alive();
                        let _ = dispatch_frame(text.as_str(), &link, SenderStamp::Link, &state.dispatcher).await;
                    }
                    Message::Binary(data) => {
                        link.mark_alive();
                        if let Ok(text) = std::str::from_utf8(&data) {
                            let _ = dispatch_frame(text, &link, SenderStamp::Link, &state.dispatcher).await;
                        } else {
                            warn!(conn_id = %id, len = data.len(), "dropping non-UTF8 binary frame");
                        }
                    }
                    Message::Ping(_) | Message::Pong(_) => link.mark_alive(),
                    Message::Close(_) => {
                        debug!(conn_id = %id, "peer sent close frame");
                        break;
                    }
                }
            }
            _ = &mut outbound => break,
        }
    }

    outbound.abort();
    let detached = state.hub.detach(&link);
    let age = link.age();
    info!(conn_id = %id, superseded = !detached, age_secs = age.as_secs(), "link closed");
    counter!(LINKS_CLOSED_TOTAL, "role" => "relay").increment(1);
    gauge!(LINKS_ACTIVE, "role" => "relay").decrement(1.0);
    histogram!(LINK_DURATION_SECONDS, "role" => "relay").record(age.as_secs_f64());

    let closed = Envelope::lifecycle(CLOSED_METHOD, payload).with_sender(id);
    let _ = state
        .dispatcher
        .dispatch(&Delivery::new(closed, Some(link)))
        .await;
}
