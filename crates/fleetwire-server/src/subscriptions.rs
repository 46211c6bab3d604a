//! Reverse index from `(topic, method)` to subscribed connections.

use std::collections::HashMap;

use fleetwire_core::envelope::match_tiers;
use fleetwire_core::{ConnectionId, SubscriptionManifest};

/// topic → method → subscribers in subscription order.
///
/// A connection appears at most once per key. Keys with no subscribers
/// left are pruned.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    index: HashMap<String, HashMap<String, Vec<ConnectionId>>>,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` under every key of `manifest`.
    pub fn insert(&mut self, id: &ConnectionId, manifest: &SubscriptionManifest) {
        for (topic, method) in manifest.entries() {
            let subscribers = self
                .index
                .entry(topic.to_owned())
                .or_default()
                .entry(method.to_owned())
                .or_default();
            if !subscribers.contains(id) {
                subscribers.push(id.clone());
            }
        }
    }

    /// Remove `id` from every key. Returns how many keys referenced it.
    pub fn remove(&mut self, id: &ConnectionId) -> usize {
        let mut removed = 0;
        self.index.retain(|_, methods| {
            methods.retain(|_, subscribers| {
                let before = subscribers.len();
                subscribers.retain(|sub| sub != id);
                removed += before - subscribers.len();
                !subscribers.is_empty()
            });
            !methods.is_empty()
        });
        removed
    }

    /// Subscribers under exactly `(topic, method)`.
    pub fn subscribers(&self, topic: &str, method: &str) -> &[ConnectionId] {
        self.index
            .get(topic)
            .and_then(|methods| methods.get(method))
            .map_or(&[], Vec::as_slice)
    }

    /// Every subscriber matching an envelope, in tier order then
    /// subscription order, each identity once.
    pub fn candidates(&self, topic: &str, method: &str) -> Vec<ConnectionId> {
        let mut candidates: Vec<ConnectionId> = Vec::new();
        for (tier_topic, tier_method) in match_tiers(topic, method) {
            for id in self.subscribers(tier_topic, tier_method) {
                if !candidates.contains(id) {
                    candidates.push(id.clone());
                }
            }
        }
        candidates
    }

    /// Number of distinct subscribed connections.
    pub fn subscriber_count(&self) -> usize {
        let mut seen: Vec<&ConnectionId> = Vec::new();
        for subscribers in self.index.values().flat_map(HashMap::values) {
            for id in subscribers {
                if !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen.len()
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
