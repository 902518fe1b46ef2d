//! Keeps the price stream subscribed to exactly the held channel symbols.

use posmon_core::{SourceError, StreamSource, Venue};
use posmon_telemetry::Metrics;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub subscribed: BTreeSet<String>,
    pub unsubscribed: BTreeSet<String>,
    /// Calls that failed; retried by the next pass.
    pub failed: Vec<SourceError>,
}

impl SubscriptionDiff {
    pub fn is_noop(&self) -> bool {
        self.subscribed.is_empty() && self.unsubscribed.is_empty() && self.failed.is_empty()
    }
}

/// Tracks the active subscription set and diffs it against what is required.
pub struct SubscriptionManager {
    venue: Venue,
    stream: Arc<dyn StreamSource>,
    active: BTreeSet<String>,
}

impl SubscriptionManager {
    pub fn new(venue: Venue, stream: Arc<dyn StreamSource>) -> Self {
        Self {
            venue,
            stream,
            active: BTreeSet::new(),
        }
    }

    pub fn active(&self) -> &BTreeSet<String> {
        &self.active
    }

    /// Subscribe `required - active`, unsubscribe `active - required`.
    ///
    /// The active set only advances by calls that succeeded, so a failure is
    /// re-issued on the next pass. An unchanged `required` makes no calls.
    pub async fn reconcile(&mut self, required: &BTreeSet<String>) -> SubscriptionDiff {
        let mut diff = SubscriptionDiff::default();

        let to_add: BTreeSet<String> = required.difference(&self.active).cloned().collect();
        let to_remove: BTreeSet<String> = self.active.difference(required).cloned().collect();

        if !to_add.is_empty() {
            match self.stream.subscribe(&to_add).await {
                Ok(()) => {
                    info!(venue = %self.venue, symbols = ?to_add, "Subscribed");
                    self.active.extend(to_add.iter().cloned());
                    diff.subscribed = to_add;
                }
                Err(e) => {
                    warn!(venue = %self.venue, symbols = ?to_add, error = %e, "Subscribe failed");
                    diff.failed.push(e);
                }
            }
        }

        if !to_remove.is_empty() {
            match self.stream.unsubscribe(&to_remove).await {
                Ok(()) => {
                    info!(venue = %self.venue, symbols = ?to_remove, "Unsubscribed");
                    self.active.retain(|s| !to_remove.contains(s));
                    diff.unsubscribed = to_remove;
                }
                Err(e) => {
                    warn!(venue = %self.venue, symbols = ?to_remove, error = %e, "Unsubscribe failed");
                    diff.failed.push(e);
                }
            }
        }

        Metrics::active_subscriptions(self.venue.as_str(), self.active.len());
        diff
    }

    /// Unsubscribe everything. Used on shutdown.
    pub async fn release_all(&mut self) {
        if self.active.is_empty() {
            return;
        }
        match self.stream.unsubscribe(&self.active).await {
            Ok(()) => debug!(venue = %self.venue, count = self.active.len(), "Released subscriptions"),
            Err(e) => debug!(venue = %self.venue, error = %e, "Release skipped"),
        }
        self.active.clear();
        Metrics::active_subscriptions(self.venue.as_str(), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use posmon_core::SourceResult;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Subscribe(BTreeSet<String>),
        Unsubscribe(BTreeSet<String>),
    }

    #[derive(Default)]
    struct RecordingStream {
        calls: Mutex<Vec<Call>>,
        fail_subscribe: Mutex<bool>,
    }

    #[async_trait]
    impl StreamSource for RecordingStream {
        async fn subscribe(&self, symbols: &BTreeSet<String>) -> SourceResult<()> {
            self.calls.lock().push(Call::Subscribe(symbols.clone()));
            if *self.fail_subscribe.lock() {
                return Err(SourceError::Transient("socket down".into()));
            }
            Ok(())
        }

        async fn unsubscribe(&self, symbols: &BTreeSet<String>) -> SourceResult<()> {
            self.calls.lock().push(Call::Unsubscribe(symbols.clone()));
            Ok(())
        }
    }

    fn set(symbols: &[&str]) -> BTreeSet<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reconcile_issues_only_the_diff() {
        let stream = Arc::new(RecordingStream::default());
        let mut manager = SubscriptionManager::new(Venue::Binance, stream.clone());

        manager.reconcile(&set(&["BTCUSDT", "ETHUSDT"])).await;
        let diff = manager.reconcile(&set(&["ETHUSDT", "SOLUSDT"])).await;

        assert_eq!(diff.subscribed, set(&["SOLUSDT"]));
        assert_eq!(diff.unsubscribed, set(&["BTCUSDT"]));
        assert_eq!(manager.active(), &set(&["ETHUSDT", "SOLUSDT"]));
        assert_eq!(
            *stream.calls.lock(),
            vec![
                Call::Subscribe(set(&["BTCUSDT", "ETHUSDT"])),
                Call::Subscribe(set(&["SOLUSDT"])),
                Call::Unsubscribe(set(&["BTCUSDT"])),
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_required_makes_no_calls() {
        let stream = Arc::new(RecordingStream::default());
        let mut manager = SubscriptionManager::new(Venue::Binance, stream.clone());

        manager.reconcile(&set(&["BTCUSDT"])).await;
        let diff = manager.reconcile(&set(&["BTCUSDT"])).await;

        assert!(diff.is_noop());
        assert_eq!(stream.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_retried() {
        let stream = Arc::new(RecordingStream::default());
        *stream.fail_subscribe.lock() = true;
        let mut manager = SubscriptionManager::new(Venue::Bitget, stream.clone());

        let diff = manager.reconcile(&set(&["BTCUSDT"])).await;
        assert_eq!(diff.failed.len(), 1);
        assert!(manager.active().is_empty());

        *stream.fail_subscribe.lock() = false;
        let diff = manager.reconcile(&set(&["BTCUSDT"])).await;
        assert_eq!(diff.subscribed, set(&["BTCUSDT"]));
        assert_eq!(stream.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_release_all() {
        let stream = Arc::new(RecordingStream::default());
        let mut manager = SubscriptionManager::new(Venue::Binance, stream.clone());
        manager.reconcile(&set(&["BTCUSDT", "ETHUSDT"])).await;

        manager.release_all().await;
        assert!(manager.active().is_empty());
        assert_eq!(
            stream.calls.lock().last(),
            Some(&Call::Unsubscribe(set(&["BTCUSDT", "ETHUSDT"])))
        );
    }
}
