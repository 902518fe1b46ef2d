//! Viewer fan-out.
//!
//! Each viewer owns a `watch` receiver: the publisher never blocks on a slow
//! viewer, and a viewer that falls behind only ever sees the latest view.
//! A viewer whose receiver is gone is removed on the next publish; the
//! others are unaffected.

use crate::view::{MergedView, ViewSource};
use dashmap::DashMap;
use parking_lot::Mutex;
use posmon_telemetry::Metrics;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

pub type ViewerId = u64;

/// A computed view together with its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub view: MergedView,
    pub json: String,
}

impl Published {
    fn compute(source: &dyn ViewSource) -> serde_json::Result<Self> {
        let view = source.view();
        let json = view.to_json()?;
        Ok(Self { view, json })
    }
}

/// Registration returned by [`BroadcastHub::add_viewer`]. The receiver
/// already holds the current view.
#[derive(Debug)]
pub struct ViewerSubscription {
    pub id: ViewerId,
    pub receiver: watch::Receiver<Arc<Published>>,
}

pub struct BroadcastHub {
    label: String,
    source: Arc<dyn ViewSource>,
    viewers: DashMap<ViewerId, watch::Sender<Arc<Published>>>,
    next_id: AtomicU64,
    /// Last view pushed to every viewer. Held for the whole publish so that
    /// concurrent publishers deliver in order.
    last: Mutex<Option<Arc<Published>>>,
    closed: AtomicBool,
}

impl BroadcastHub {
    pub fn new(label: impl Into<String>, source: Arc<dyn ViewSource>) -> Self {
        Self {
            label: label.into(),
            source,
            viewers: DashMap::new(),
            next_id: AtomicU64::new(1),
            last: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Recompute the view and push it to every viewer.
    ///
    /// Identical consecutive views are pushed once. Returns the number of
    /// viewers the view was delivered to.
    pub fn publish(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let mut last = self.last.lock();

        let published = match Published::compute(self.source.as_ref()) {
            Ok(published) => published,
            Err(e) => {
                warn!(hub = %self.label, error = %e, "Failed to encode view");
                return 0;
            }
        };
        if last.as_ref().is_some_and(|prev| prev.json == published.json) {
            trace!(hub = %self.label, "View unchanged, not pushed");
            return 0;
        }
        let published = Arc::new(published);

        let mut delivered = 0;
        let mut gone = Vec::new();
        for viewer in self.viewers.iter() {
            if viewer.value().send(published.clone()).is_ok() {
                delivered += 1;
            } else {
                gone.push(*viewer.key());
            }
        }
        for id in gone {
            if self.viewers.remove(&id).is_some() {
                debug!(hub = %self.label, viewer = id, "Viewer dropped after failed delivery");
                Metrics::viewer_dropped(&self.label);
            }
        }

        *last = Some(published);
        Metrics::published(&self.label);
        Metrics::viewers_connected(&self.label, self.viewers.len());
        trace!(hub = %self.label, delivered, "Published view");
        delivered
    }

    /// Register a viewer. Its receiver starts out holding a freshly computed
    /// view. After [`close_all`](Self::close_all) the receiver is returned
    /// already closed.
    pub fn add_viewer(&self) -> ViewerSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _last = self.last.lock();

        let initial = Published::compute(self.source.as_ref()).unwrap_or_else(|e| {
            warn!(hub = %self.label, error = %e, "Failed to encode view for new viewer");
            Published {
                view: MergedView::default(),
                json: String::new(),
            }
        });
        let (tx, rx) = watch::channel(Arc::new(initial));

        if !self.is_closed() {
            self.viewers.insert(id, tx);
            debug!(hub = %self.label, viewer = id, viewers = self.viewers.len(), "Viewer added");
            Metrics::viewers_connected(&self.label, self.viewers.len());
        }
        ViewerSubscription { id, receiver: rx }
    }

    pub fn remove_viewer(&self, id: ViewerId) {
        if self.viewers.remove(&id).is_some() {
            debug!(hub = %self.label, viewer = id, "Viewer removed");
            Metrics::viewers_connected(&self.label, self.viewers.len());
        }
    }

    /// The current view, computed now.
    pub fn current(&self) -> MergedView {
        self.source.view()
    }

    /// Stop publishing and close every viewer's receiver.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        let count = self.viewers.len();
        self.viewers.clear();
        Metrics::viewers_connected(&self.label, 0);
        debug!(hub = %self.label, count, "Closed all viewers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::PositionView;
    use chrono::Utc;
    use posmon_core::{Position, PositionSide, Price, Size, Venue};
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct SwitchableSource {
        open: parking_lot::RwLock<bool>,
    }

    impl ViewSource for SwitchableSource {
        fn view(&self) -> MergedView {
            if !*self.open.read() {
                return MergedView::default();
            }
            let position = Position {
                symbol: "BTCUSDT".to_string(),
                side: PositionSide::Long,
                size: Size::new(dec!(1)),
                entry_price: Price::new(dec!(100)),
                liquidation_price: None,
                margin_amount: None,
                margin_type: None,
                last_known_pnl: None,
                updated_at: Utc::now(),
            };
            MergedView::new(vec![PositionView::new(Venue::Binance, &position, None)])
        }
    }

    fn hub() -> (BroadcastHub, Arc<SwitchableSource>) {
        let source = Arc::new(SwitchableSource::default());
        (BroadcastHub::new("test", source.clone()), source)
    }

    #[test]
    fn test_new_viewer_gets_current_view() {
        let (hub, source) = hub();
        *source.open.write() = true;

        let viewer = hub.add_viewer();
        assert_eq!(viewer.receiver.borrow().view.len(), 1);
        assert_eq!(hub.viewer_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_viewer() {
        let (hub, source) = hub();
        let mut a = hub.add_viewer();
        let mut b = hub.add_viewer();

        *source.open.write() = true;
        assert_eq!(hub.publish(), 2);

        a.receiver.changed().await.unwrap();
        b.receiver.changed().await.unwrap();
        assert_eq!(a.receiver.borrow().view.len(), 1);
        assert_eq!(b.receiver.borrow().view.len(), 1);
    }

    #[test]
    fn test_dropped_viewer_removed_others_unaffected() {
        let (hub, source) = hub();
        let dropped = hub.add_viewer();
        let kept = hub.add_viewer();
        drop(dropped.receiver);

        *source.open.write() = true;
        assert_eq!(hub.publish(), 1);
        assert_eq!(hub.viewer_count(), 1);
        assert!(kept.receiver.has_changed().unwrap());
    }

    #[test]
    fn test_identical_view_published_once() {
        let (hub, _source) = hub();
        let viewer = hub.add_viewer();

        assert_eq!(hub.publish(), 1);
        assert_eq!(hub.publish(), 0);
        assert!(viewer.receiver.has_changed().unwrap());
    }

    #[test]
    fn test_close_all_closes_receivers() {
        let (hub, _source) = hub();
        let viewer = hub.add_viewer();

        hub.close_all();
        assert_eq!(hub.viewer_count(), 0);
        assert!(viewer.receiver.has_changed().is_err());
        assert_eq!(hub.publish(), 0);

        let late = hub.add_viewer();
        assert!(late.receiver.has_changed().is_err());
    }

    #[test]
    fn test_remove_viewer() {
        let (hub, _source) = hub();
        let viewer = hub.add_viewer();
        hub.remove_viewer(viewer.id);
        assert_eq!(hub.viewer_count(), 0);
    }
}
