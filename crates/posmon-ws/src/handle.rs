//! Subscription handle for a running price stream.
//!
//! The handle owns nothing but the shared desired set. Changing it wakes the
//! connection task, which diffs against what the live socket has subscribed
//! and sends the difference (or reconnects, depending on policy). The same
//! set is replayed in full on every reconnect, so a change made while the
//! stream is down is not lost.

use crate::connection::ListenerState;
use async_trait::async_trait;
use parking_lot::RwLock;
use posmon_core::{SourceError, SourceResult, StreamSource};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct StreamHandle {
    desired: Arc<watch::Sender<BTreeSet<String>>>,
    state: Arc<RwLock<ListenerState>>,
}

impl StreamHandle {
    pub(crate) fn new(
        desired: Arc<watch::Sender<BTreeSet<String>>>,
        state: Arc<RwLock<ListenerState>>,
    ) -> Self {
        Self { desired, state }
    }

    /// Channel symbols the stream should be subscribed to.
    pub fn desired(&self) -> BTreeSet<String> {
        self.desired.borrow().clone()
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    fn ensure_running(&self) -> SourceResult<()> {
        if self.state() == ListenerState::Shutdown {
            return Err(SourceError::Transient("price stream is shut down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamSource for StreamHandle {
    async fn subscribe(&self, symbols: &BTreeSet<String>) -> SourceResult<()> {
        self.ensure_running()?;
        if symbols.is_empty() {
            return Ok(());
        }
        self.desired.send_if_modified(|set| {
            let before = set.len();
            set.extend(symbols.iter().cloned());
            set.len() != before
        });
        debug!(?symbols, "Subscription requested");
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &BTreeSet<String>) -> SourceResult<()> {
        self.ensure_running()?;
        if symbols.is_empty() {
            return Ok(());
        }
        self.desired.send_if_modified(|set| {
            let before = set.len();
            set.retain(|s| !symbols.contains(s));
            set.len() != before
        });
        debug!(?symbols, "Unsubscription requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (StreamHandle, watch::Receiver<BTreeSet<String>>, Arc<RwLock<ListenerState>>) {
        let (tx, rx) = watch::channel(BTreeSet::new());
        let state = Arc::new(RwLock::new(ListenerState::Disconnected));
        (StreamHandle::new(Arc::new(tx), state.clone()), rx, state)
    }

    fn set(symbols: &[&str]) -> BTreeSet<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe_update_desired_set() {
        let (handle, mut rx, _) = handle();

        handle.subscribe(&set(&["BTCUSDT", "ETHUSDT"])).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), set(&["BTCUSDT", "ETHUSDT"]));

        handle.unsubscribe(&set(&["BTCUSDT"])).await.unwrap();
        assert_eq!(handle.desired(), set(&["ETHUSDT"]));
    }

    #[tokio::test]
    async fn test_noop_change_does_not_wake_stream() {
        let (handle, mut rx, _) = handle();
        handle.subscribe(&set(&["BTCUSDT"])).await.unwrap();
        rx.borrow_and_update();

        handle.subscribe(&set(&["BTCUSDT"])).await.unwrap();
        handle.unsubscribe(&set(&["XRPUSDT"])).await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_rejected_after_shutdown() {
        let (handle, _rx, state) = handle();
        *state.write() = ListenerState::Shutdown;
        let err = handle.subscribe(&set(&["BTCUSDT"])).await.unwrap_err();
        assert!(matches!(err, SourceError::Transient(_)));
    }
}
