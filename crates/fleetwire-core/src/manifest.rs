//! Subscription manifests.
//!
//! A manifest maps topics to the methods a connection wants to receive,
//! e.g. `{"machine": ["action"], "fee": ["update"], "*": ["ping"]}`. It is
//! declared once at handshake time and stays fixed for the life of the link.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The manifest text could not be parsed.
#[derive(Debug, Error)]
#[error("invalid subscription manifest: {0}")]
pub struct ManifestError(#[from] serde_json::Error);

/// Topic → methods a connection subscribes to. Either side may be `*`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionManifest(BTreeMap<String, Vec<String>>);

impl SubscriptionManifest {
    /// An empty manifest: the connection receives only directly addressed
    /// envelopes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse manifest text as presented in a handshake.
    ///
    /// Single quotes are accepted in place of double quotes, so both
    /// `{"fee":["update"]}` and `{'fee':['update']}` parse.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let normalized = raw.replace('\'', "\"");
        Ok(serde_json::from_str(&normalized)?)
    }

    /// Add `methods` under `topic`.
    #[must_use]
    pub fn subscribe<I, S>(mut self, topic: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(topic.into())
            .or_default()
            .extend(methods.into_iter().map(Into::into));
        self
    }

    /// Every `(topic, method)` pair, duplicates removed.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries = Vec::new();
        for (topic, methods) in &self.0 {
            for method in methods {
                let key = (topic.as_str(), method.as_str());
                if !entries.contains(&key) {
                    entries.push(key);
                }
            }
        }
        entries
    }

    /// Whether no topic is subscribed.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Render as the JSON text sent in the `Subscribe` header.
    pub fn to_header_value(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_owned())
    }
}

impl From<BTreeMap<String, Vec<String>>> for SubscriptionManifest {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}
