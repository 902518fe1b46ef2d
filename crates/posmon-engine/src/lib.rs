//! Position/price reconciliation and broadcast engine.
//!
//! One [`VenueEngine`] per venue keeps a coherent per-symbol view by merging
//! two independent inputs and pushes it to any number of viewers:
//!
//! ```text
//!   SnapshotSource ──poll──▶ Reconciler ──┬──▶ PositionStore ─┐
//!   (REST, every 3s)                      │                    │
//!                                         ├─▶ SubscriptionManager ──▶ StreamSource
//!                                         │                    │          │
//!   price stream ──StreamEvent──▶ PriceListener ──▶ PriceCache ┤          │
//!        ▲                                                     │          │
//!        └────────────────── subscribe / unsubscribe ──────────┼──────────┘
//!                                                              ▼
//!                                         BroadcastHub ── recompute MergedView
//!                                              │
//!                                  ┌───────────┼───────────┐
//!                                  ▼           ▼           ▼
//!                               viewer      viewer      viewer
//! ```
//!
//! The Reconciler is the only writer of the PositionStore; the PriceListener
//! is the only inserter into the PriceCache (the Reconciler purges entries for
//! closed positions). Both publish after mutating.

pub mod broadcast;
pub mod engine;
pub mod error;
pub mod listener;
pub mod reconciler;
pub mod state;
pub mod subscription;
pub mod view;

pub use broadcast::{BroadcastHub, Published, ViewerId, ViewerSubscription};
pub use engine::{VenueEngine, VenueEngineConfig};
pub use error::{EngineError, EngineResult};
pub use listener::PriceListener;
pub use reconciler::{CycleOutcome, Reconciler};
pub use state::{EngineState, PositionStore, PriceCache, SnapshotDiff};
pub use subscription::{SubscriptionDiff, SubscriptionManager};
pub use view::{MergedView, PositionView, UnifiedView, ViewSource, EMPTY_VIEW_MESSAGE};
