//! End-to-end relay tests using real `WebSocket` clients.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use fleetwire_core::{Delivery, Dispatcher, Envelope, HandlerError, handler_fn};
use fleetwire_server::{BrokerRouter, LinkHub, Listener, ListenerConfig, ListenerHandle};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Relay {
    url: String,
    hub: Arc<LinkHub>,
    lifecycle: Arc<Mutex<Vec<Envelope>>>,
    handle: ListenerHandle,
}

async fn boot_relay() -> Relay {
    boot_relay_with(ListenerConfig::default(), |_| {}).await
}

/// Boot a relay with a broker router plus a recorder for lifecycle envelopes.
async fn boot_relay_with(config: ListenerConfig, extra: impl FnOnce(&mut Dispatcher)) -> Relay {
    let hub = Arc::new(LinkHub::new());
    let lifecycle = Arc::new(Mutex::new(Vec::new()));

    let mut dispatcher = Dispatcher::new();
    BrokerRouter::install(&mut dispatcher, Arc::clone(&hub));
    let sink = Arc::clone(&lifecycle);
    dispatcher.register(
        "connection",
        "*",
        handler_fn(move |delivery: Delivery| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(delivery.envelope().clone());
                Ok(())
            }
        }),
    );
    extra(&mut dispatcher);

    let listener = Listener::new(config, dispatcher, Arc::clone(&hub));
    let handle = listener.serve().await.unwrap();
    Relay {
        url: format!("ws://{}/", handle.local_addr()),
        hub,
        lifecycle,
        handle,
    }
}

async fn connect(url: &str, id: &str, manifest: Option<&str>) -> WsStream {
    let mut request = url.into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("Miner-ID", HeaderValue::from_str(id).unwrap());
    if let Some(manifest) = manifest {
        let _ = request
            .headers_mut()
            .insert("Subscribe", HeaderValue::from_str(manifest).unwrap());
    }
    let (ws, _) = connect_async(request).await.unwrap();
    ws
}

/// Wait until `check` holds, polling the hub.
async fn wait_until(check: impl Fn() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Read the next text frame as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert no text frame arrives for a short while.
async fn assert_quiet(ws: &mut WsStream) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, ws.next()).await {
        panic!("unexpected frame: {text}");
    }
}

#[tokio::test]
async fn broadcast_reaches_subscribers_except_sender() {
    let relay = boot_relay().await;
    let mut a = connect(&relay.url, "rig-a", Some(r#"{"stats":["push"]}"#)).await;
    let mut b = connect(&relay.url, "rig-b", Some(r#"{"stats":["push"]}"#)).await;
    let mut c = connect(&relay.url, "rig-c", Some(r#"{"fee":["update"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 3).await;

    send(&mut a, json!({"event": "stats", "method": "push", "payload": {"hashrate": 91}})).await;

    let got = read_json(&mut b).await;
    assert_eq!(got["event"], "stats");
    assert_eq!(got["from"], "rig-a");
    assert_eq!(got["payload"]["hashrate"], 91);
    assert_quiet(&mut a).await;
    assert_quiet(&mut c).await;

    relay.handle.close().await;
}

#[tokio::test]
async fn wildcard_subscriber_receives_once() {
    let relay = boot_relay().await;
    let mut a = connect(&relay.url, "dash", None).await;
    let mut b = connect(&relay.url, "rig-b", Some("{'stats':['push','*'],'*':['*']}")).await;
    wait_until(|| relay.hub.connection_count() == 2).await;

    send(&mut a, json!({"event": "stats", "method": "push"})).await;
    let _ = read_json(&mut b).await;
    assert_quiet(&mut b).await;

    relay.handle.close().await;
}

#[tokio::test]
async fn one_delivers_to_first_subscriber_only() {
    let relay = boot_relay().await;
    let mut b = connect(&relay.url, "rig-b", Some(r#"{"stats":["query"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 1).await;
    let mut c = connect(&relay.url, "rig-c", Some(r#"{"stats":["query"]}"#)).await;
    let mut a = connect(&relay.url, "rig-a", Some(r#"{"stats":["query"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 3).await;

    send(&mut a, json!({"event": "stats", "method": "query", "to": "one"})).await;

    let got = read_json(&mut b).await;
    assert_eq!(got["to"], "one");
    assert_eq!(got["from"], "rig-a");
    assert_quiet(&mut c).await;
    assert_quiet(&mut a).await;

    relay.handle.close().await;
}

#[tokio::test]
async fn direct_delivery_ignores_subscriptions() {
    let relay = boot_relay().await;
    let mut dash = connect(&relay.url, "dashboard", None).await;
    let mut rig = connect(&relay.url, "rig-9", None).await;
    let mut other = connect(&relay.url, "rig-1", Some(r#"{"machine":["action"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 3).await;

    send(
        &mut dash,
        json!({"event": "machine", "method": "action", "to": "rig-9", "payload": {"restart": true}}),
    )
    .await;

    let got = read_json(&mut rig).await;
    assert_eq!(got["to"], "rig-9");
    assert_eq!(got["from"], "dashboard");
    assert_eq!(got["payload"]["restart"], true);
    assert_quiet(&mut other).await;

    relay.handle.close().await;
}

#[tokio::test]
async fn malformed_frames_keep_link_open() {
    let relay = boot_relay().await;
    let mut a = connect(&relay.url, "rig-a", None).await;
    let mut b = connect(&relay.url, "rig-b", Some(r#"{"stats":["push"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 2).await;

    a.send(Message::text("not valid json")).await.unwrap();
    a.send(Message::text("[1, 2, 3]")).await.unwrap();
    send(&mut a, json!({"method": "push"})).await;
    send(&mut a, json!({"event": "stats", "method": "push"})).await;

    let got = read_json(&mut b).await;
    assert_eq!(got["event"], "stats");
    assert_eq!(relay.hub.connection_count(), 2);

    relay.handle.close().await;
}

#[tokio::test]
async fn query_manifest_wins_over_header() {
    let relay = boot_relay().await;
    let mut a = connect(&relay.url, "rig-a", None).await;
    let url = format!(
        "{}?subscribe=%7B%22fee%22%3A%5B%22update%22%5D%7D",
        relay.url
    );
    let mut b = connect(&url, "rig-b", Some(r#"{"stats":["push"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 2).await;

    send(&mut a, json!({"event": "stats", "method": "push"})).await;
    send(&mut a, json!({"event": "fee", "method": "update"})).await;

    let got = read_json(&mut b).await;
    assert_eq!(got["event"], "fee");
    assert_quiet(&mut b).await;

    relay.handle.close().await;
}

#[tokio::test]
async fn lifecycle_envelopes_and_cleanup_on_close() {
    let relay = boot_relay().await;
    let mut a = connect(&relay.url, "rig-a", Some(r#"{"stats":["push"]}"#)).await;
    wait_until(|| relay.lifecycle.lock().len() == 1).await;
    assert_eq!(relay.hub.subscriber_count(), 1);

    a.close(None).await.unwrap();
    wait_until(|| relay.lifecycle.lock().len() == 2).await;
    assert_eq!(relay.hub.connection_count(), 0);
    assert_eq!(relay.hub.subscriber_count(), 0);

    let seen = relay.lifecycle.lock().clone();
    assert_eq!(seen[0].method, "open");
    assert_eq!(seen[1].method, "closed");
    for envelope in &seen {
        assert!(envelope.local);
        assert_eq!(envelope.sender.as_ref().map(|id| id.as_str()), Some("rig-a"));
        let payload = envelope.payload.as_ref().unwrap();
        assert_eq!(payload["path"], "/");
        assert_eq!(payload["headers"]["miner-id"], "rig-a");
    }

    relay.handle.close().await;
}

#[tokio::test]
async fn lifecycle_is_not_forwarded_to_peers() {
    let relay = boot_relay().await;
    let mut watcher = connect(&relay.url, "watcher", Some(r#"{"*":["*"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 1).await;

    let other = connect(&relay.url, "rig-a", None).await;
    wait_until(|| relay.lifecycle.lock().len() == 2).await;
    drop(other);

    assert_quiet(&mut watcher).await;
    relay.handle.close().await;
}

#[tokio::test]
async fn relay_handler_replies_to_sender() {
    let relay = boot_relay_with(ListenerConfig::default(), |dispatcher| {
        dispatcher.register(
            "stats",
            "query",
            handler_fn(|delivery: Delivery| async move {
                delivery
                    .reply("stats", "result", Some(json!({"rigs": 12})))
                    .await
                    .map_err(HandlerError::from)
            }),
        );
    })
    .await;
    let mut a = connect(&relay.url, "rig-a", None).await;
    wait_until(|| relay.hub.connection_count() == 1).await;

    send(&mut a, json!({"event": "stats", "method": "query"})).await;
    let got = read_json(&mut a).await;
    assert_eq!(got["method"], "result");
    assert_eq!(got["to"], "rig-a");
    assert_eq!(got["payload"]["rigs"], 12);

    relay.handle.close().await;
}

#[tokio::test]
async fn anonymous_links_get_ephemeral_identity() {
    let relay = boot_relay().await;
    let (_ws, _) = connect_async(relay.url.as_str()).await.unwrap();
    wait_until(|| relay.hub.connection_count() == 1).await;

    let ids = relay.hub.connection_ids();
    assert!(ids[0].as_str().starts_with("conn_"));

    relay.handle.close().await;
}

#[tokio::test]
async fn upgrades_beyond_capacity_are_rejected() {
    let config = ListenerConfig {
        max_connections: 1,
        ..ListenerConfig::default()
    };
    let relay = boot_relay_with(config, |_| {}).await;
    let _first = connect(&relay.url, "rig-a", None).await;
    wait_until(|| relay.hub.connection_count() == 1).await;

    let second = connect_async(relay.url.as_str()).await;
    assert_matches!(
        second,
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) if response.status() == 503
    );

    relay.handle.close().await;
}

#[tokio::test]
async fn accepted_links_survive_listener_close() {
    let relay = boot_relay().await;
    let mut a = connect(&relay.url, "rig-a", None).await;
    let mut b = connect(&relay.url, "rig-b", Some(r#"{"fee":["update"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 2).await;

    relay.handle.close().await;

    send(&mut a, json!({"event": "fee", "method": "update"})).await;
    let got = read_json(&mut b).await;
    assert_eq!(got["event"], "fee");
}

#[tokio::test]
async fn concurrent_upgrades_respect_capacity() {
    let config = ListenerConfig {
        max_connections: 2,
        ..ListenerConfig::default()
    };
    let relay = boot_relay_with(config, |_| {}).await;

    let attempts = (0..6).map(|_| connect_async(relay.url.as_str()));
    let results = futures::future::join_all(attempts).await;
    let (accepted, rejected): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    assert_eq!(accepted.len(), 2);
    for result in rejected {
        assert_matches!(
            result,
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) if response.status() == 503
        );
    }
    wait_until(|| relay.hub.connection_count() == 2).await;

    // A closed link frees its slot.
    let mut accepted = accepted.into_iter().map(Result::unwrap);
    let (mut first, _) = accepted.next().unwrap();
    first.close(None).await.unwrap();
    wait_until(|| relay.hub.connection_count() == 1).await;
    let _third = timeout(TIMEOUT, async {
        loop {
            match connect_async(relay.url.as_str()).await {
                Ok((ws, _)) => break ws,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .expect("slot was not released");
    wait_until(|| relay.hub.connection_count() == 2).await;

    relay.handle.close().await;
}

#[tokio::test]
async fn silent_peer_is_dropped_after_heartbeat_timeout() {
    let config = ListenerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ListenerConfig::default()
    };
    let relay = boot_relay_with(config, |_| {}).await;

    // Never polled, so Pings go unanswered.
    let _silent = connect(&relay.url, "rig-quiet", Some(r#"{"stats":["push"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 1).await;

    timeout(Duration::from_secs(10), async {
        while relay.hub.connection_count() != 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("silent peer was not dropped");
    assert_eq!(relay.hub.subscriber_count(), 0);
    wait_until(|| relay.lifecycle.lock().len() == 2).await;

    let seen = relay.lifecycle.lock().clone();
    assert_eq!(seen[1].method, "closed");
    assert_eq!(seen[1].sender.as_ref().map(|id| id.as_str()), Some("rig-quiet"));

    relay.handle.close().await;
}

#[tokio::test]
async fn oversized_frame_drops_the_link() {
    let config = ListenerConfig {
        max_message_size: 1024,
        ..ListenerConfig::default()
    };
    let relay = boot_relay_with(config, |_| {}).await;
    let mut big = connect(&relay.url, "rig-big", None).await;
    let mut watcher = connect(&relay.url, "watcher", Some(r#"{"stats":["push"]}"#)).await;
    wait_until(|| relay.hub.connection_count() == 2).await;

    let filler = "x".repeat(4096);
    send(&mut big, json!({"event": "stats", "method": "push", "payload": filler})).await;

    wait_until(|| relay.hub.get(&fleetwire_core::ConnectionId::from_raw("rig-big")).is_none()).await;
    wait_until(|| {
        relay
            .lifecycle
            .lock()
            .iter()
            .any(|e| e.method == "closed" && e.sender.as_ref().is_some_and(|id| id.as_str() == "rig-big"))
    })
    .await;
    assert_quiet(&mut watcher).await;
    assert_eq!(relay.hub.connection_count(), 1);

    // Frames within the limit still flow.
    let mut small = connect(&relay.url, "rig-small", None).await;
    wait_until(|| relay.hub.connection_count() == 2).await;
    send(&mut small, json!({"event": "stats", "method": "push", "payload": 1})).await;
    assert_eq!(read_json(&mut watcher).await["from"], "rig-small");

    relay.handle.close().await;
}
