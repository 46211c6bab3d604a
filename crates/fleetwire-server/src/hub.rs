//! Registry of attached links and their subscriptions.
//!
//! Links and the subscription table sit behind one lock so that attaching
//! or detaching a link and looking up routing candidates never observe a
//! half-applied edit. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use fleetwire_core::{ConnectionId, Link, SubscriptionManifest};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::subscriptions::SubscriptionTable;

#[derive(Default)]
struct HubState {
    links: HashMap<ConnectionId, Arc<Link>>,
    table: SubscriptionTable,
}

/// Attached links keyed by identity, plus the subscription table.
#[derive(Default)]
pub struct LinkHub {
    state: RwLock<HubState>,
}

impl LinkHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link and its subscriptions.
    ///
    /// A link already attached under the same identity is superseded: its
    /// subscriptions are replaced and it is returned to the caller. The
    /// superseded link keeps running but is no longer routable.
    pub fn attach(&self, link: Arc<Link>, manifest: &SubscriptionManifest) -> Option<Arc<Link>> {
        let id = link.id().clone();
        let mut state = self.state.write();
        let previous = state.links.insert(id.clone(), link);
        if previous.is_some() {
            let _ = state.table.remove(&id);
            warn!(conn_id = %id, "identity re-attached, previous link superseded");
        }
        state.table.insert(&id, manifest);
        debug!(conn_id = %id, links = state.links.len(), "link attached");
        previous
    }

    /// Unregister a link and drop its subscriptions.
    ///
    /// Returns `false` when `link` is not the one currently attached under
    /// its identity (already detached, or superseded by a newer link).
    pub fn detach(&self, link: &Arc<Link>) -> bool {
        let mut state = self.state.write();
        let current = state
            .links
            .get(link.id())
            .is_some_and(|attached| Arc::ptr_eq(attached, link));
        if !current {
            return false;
        }
        let _ = state.links.remove(link.id());
        let _ = state.table.remove(link.id());
        debug!(conn_id = %link.id(), links = state.links.len(), "link detached");
        true
    }

    /// The link attached under `id`.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Link>> {
        self.state.read().links.get(id).cloned()
    }

    /// Links subscribed to `(topic, method)` across all tiers, in tier
    /// order, each once.
    pub fn candidates(&self, topic: &str, method: &str) -> Vec<Arc<Link>> {
        let state = self.state.read();
        state
            .table
            .candidates(topic, method)
            .iter()
            .filter_map(|id| state.links.get(id).cloned())
            .collect()
    }

    /// Identities of every attached link.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state.read().links.keys().cloned().collect()
    }

    /// Number of attached links.
    pub fn connection_count(&self) -> usize {
        self.state.read().links.len()
    }

    /// Number of attached links with at least one subscription.
    pub fn subscriber_count(&self) -> usize {
        self.state.read().table.subscriber_count()
    }
}
