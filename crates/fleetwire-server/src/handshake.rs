//! Handshake parsing for inbound links.
//!
//! The upgrade request may declare an identity (`Miner-ID` header) and a
//! subscription manifest (`subscribe` query parameter, else `Subscribe`
//! header). A manifest that fails to parse is logged and treated as empty;
//! the link is still accepted.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, Uri};
use fleetwire_core::handshake::{IDENTITY_HEADER, SUBSCRIBE_HEADER, SUBSCRIBE_QUERY};
use fleetwire_core::{ConnectionId, SubscriptionManifest};
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use tracing::warn;

/// What an inbound link declared about itself.
#[derive(Clone, Debug, PartialEq)]
pub struct Handshake {
    /// Caller-declared identity, if any.
    pub identity: Option<ConnectionId>,
    /// Declared subscriptions.
    pub manifest: SubscriptionManifest,
    /// Request headers (lowercase names).
    pub headers: BTreeMap<String, String>,
    /// Percent-decoded request path including the query.
    pub path: String,
}

impl Handshake {
    /// Extract the handshake from an upgrade request.
    pub fn from_request(headers: &HeaderMap, uri: &Uri) -> Self {
        let identity = headers
            .get(IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ConnectionId::from_raw);

        let raw_manifest = uri
            .query()
            .and_then(|query| query_param(query, SUBSCRIBE_QUERY))
            .or_else(|| {
                headers
                    .get(SUBSCRIBE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            });

        let manifest = match raw_manifest {
            Some(raw) => SubscriptionManifest::parse(&raw).unwrap_or_else(|error| {
                warn!(
                    identity = ?identity,
                    manifest = %raw,
                    %error,
                    "ignoring unparsable subscription manifest"
                );
                SubscriptionManifest::new()
            }),
            None => SubscriptionManifest::new(),
        };

        let mut header_map: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else { continue };
            let _ = header_map
                .entry(name.as_str().to_owned())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_owned());
        }

        let raw_path = uri
            .path_and_query()
            .map_or_else(|| uri.path(), |pq| pq.as_str());
        let path = percent_decode_str(raw_path).decode_utf8_lossy().into_owned();

        Self {
            identity,
            manifest,
            headers: header_map,
            path,
        }
    }

    /// Payload of the link's `connection/open` and `connection/closed`
    /// envelopes.
    pub fn lifecycle_payload(&self) -> Value {
        json!({
            "headers": self.headers,
            "path": self.path,
        })
    }
}

/// First value of `key` in a query string, form-decoded.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (form_decode(name) == key).then(|| form_decode(value))
    })
}

fn form_decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
