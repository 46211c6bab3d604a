//! A discovery source that announces a fixed list of relays.

use std::sync::Arc;
use std::time::Duration;

use fleetwire_core::{DiscoveredService, DiscoveryListener, RELAY_PROTOCOL};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Re-announces configured relays on a fixed interval.
///
/// The first round goes out immediately. Repeating the announcements is
/// what lets a rig whose link dropped find its way back.
#[derive(Clone, Debug)]
pub struct StaticDiscovery {
    relays: Vec<DiscoveredService>,
    interval: Duration,
}

impl StaticDiscovery {
    /// Announce `relays` every `interval`.
    pub fn new(relays: Vec<DiscoveredService>, interval: Duration) -> Self {
        Self {
            relays,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Build the service record for a relay announced with `priority`.
    pub fn relay(host: impl Into<String>, port: u16, priority: i64) -> DiscoveredService {
        let mut payload = Map::new();
        let _ = payload.insert("priority".to_owned(), Value::from(priority));
        DiscoveredService::new(host, port, payload)
    }

    /// Relays announced each round.
    pub fn relays(&self) -> &[DiscoveredService] {
        &self.relays
    }

    /// Announce every relay once.
    pub fn announce(&self, listener: &dyn DiscoveryListener) {
        for service in &self.relays {
            debug!(ip = %service.ip, port = service.port, "announcing relay");
            listener.on_service(RELAY_PROTOCOL, service);
        }
    }

    /// Announce on every tick until `cancel` fires.
    pub fn spawn(
        self,
        listener: Arc<dyn DiscoveryListener>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => self.announce(listener.as_ref()),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String, Option<i64>)>>,
    }

    impl DiscoveryListener for Recorder {
        fn on_service(&self, protocol: &str, service: &DiscoveredService) {
            self.seen
                .lock()
                .push((protocol.to_owned(), service.ip.clone(), service.priority()));
        }
    }

    fn discovery() -> StaticDiscovery {
        StaticDiscovery::new(
            vec![
                StaticDiscovery::relay("10.0.0.1", 29203, 2),
                StaticDiscovery::relay("10.0.0.2", 29203, 0),
            ],
            Duration::from_secs(30),
        )
    }

    #[test]
    fn announce_reports_each_relay_in_order() {
        let recorder = Recorder::default();
        discovery().announce(&recorder);
        let seen = recorder.seen.lock();
        assert_eq!(
            *seen,
            vec![
                ("relay".to_owned(), "10.0.0.1".to_owned(), Some(2)),
                ("relay".to_owned(), "10.0.0.2".to_owned(), Some(0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_repeats_until_cancelled() {
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let handle = discovery().spawn(recorder.clone(), cancel.clone());

        tokio::time::sleep(Duration::from_secs(65)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Ticks at 0s, 30s and 60s.
        assert_eq!(recorder.seen.lock().len(), 6);
    }
}
