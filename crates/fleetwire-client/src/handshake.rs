//! What a rig presents when it opens a link.

use std::collections::BTreeMap;

use fleetwire_core::handshake::{IDENTITY_HEADER, SUBSCRIBE_HEADER};
use fleetwire_core::{ConnectionId, SubscriptionManifest};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

use crate::errors::ConnectError;

/// Identity, subscriptions, and extra headers sent on every open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientHandshake {
    identity: ConnectionId,
    manifest: SubscriptionManifest,
    extra_headers: BTreeMap<String, String>,
}

impl ClientHandshake {
    /// Present as `identity` with `manifest`.
    pub fn new(identity: impl Into<ConnectionId>, manifest: SubscriptionManifest) -> Self {
        Self {
            identity: identity.into(),
            manifest,
            extra_headers: BTreeMap::new(),
        }
    }

    /// Send an additional header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// Identity sent as `Miner-ID`.
    pub fn identity(&self) -> &ConnectionId {
        &self.identity
    }

    /// Manifest sent as `Subscribe`.
    pub fn manifest(&self) -> &SubscriptionManifest {
        &self.manifest
    }

    /// Every header this handshake sends.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.extra_headers.clone();
        let _ = headers.insert(IDENTITY_HEADER.to_owned(), self.identity.to_string());
        let _ = headers.insert(SUBSCRIBE_HEADER.to_owned(), self.manifest.to_header_value());
        headers
    }

    /// Build the upgrade request for `ws://host:port/`.
    pub fn request(&self, host: &str, port: u16) -> Result<Request, ConnectError> {
        let mut request = relay_url(host, port).into_client_request()?;
        for (name, value) in self.headers() {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConnectError::InvalidHeader(name.clone()))?;
            let value =
                HeaderValue::from_str(&value).map_err(|_| ConnectError::InvalidHeader(name))?;
            let _ = request.headers_mut().insert(header, value);
        }
        Ok(request)
    }
}

/// `ws://` URL of a relay; IPv6 literals are bracketed.
pub fn relay_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("ws://[{host}]:{port}/")
    } else {
        format!("ws://{host}:{port}/")
    }
}
