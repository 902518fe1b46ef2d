//! Shared per-venue state: the position store and the price cache.
//!
//! Both maps live behind their own `RwLock` inside one [`EngineState`].
//! Whenever both are needed the position lock is taken first. A tick is
//! inserted while the position read lock is held, so a close that purges the
//! cache cannot interleave with it and leave a price behind for a symbol that
//! is no longer held.

use crate::view::{MergedView, PositionView, ViewSource};
use parking_lot::RwLock;
use posmon_core::{ChannelMapping, Position, PositionKey, PriceTick, Venue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Authoritative open positions for one venue, ordered by symbol then side.
#[derive(Debug)]
pub struct PositionStore {
    mapping: ChannelMapping,
    positions: BTreeMap<PositionKey, Position>,
    channels: BTreeSet<String>,
}

impl PositionStore {
    pub fn new(mapping: ChannelMapping) -> Self {
        Self {
            mapping,
            positions: BTreeMap::new(),
            channels: BTreeSet::new(),
        }
    }

    pub fn get(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Channel symbols held by at least one side.
    pub fn held_channels(&self) -> &BTreeSet<String> {
        &self.channels
    }

    pub fn holds_channel(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn channel_of(&self, position: &Position) -> String {
        self.mapping.apply(&position.symbol)
    }

    fn replace(&mut self, positions: BTreeMap<PositionKey, Position>) {
        self.channels = positions
            .values()
            .map(|p| self.mapping.apply(&p.symbol))
            .collect();
        self.positions = positions;
    }
}

/// Latest mark per channel symbol.
#[derive(Debug, Default)]
pub struct PriceCache {
    ticks: HashMap<String, PriceTick>,
}

impl PriceCache {
    pub fn get(&self, channel: &str) -> Option<&PriceTick> {
        self.ticks.get(channel)
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    fn insert(&mut self, tick: PriceTick) {
        self.ticks.insert(tick.symbol.clone(), tick);
    }

    /// Drop every entry whose channel is not in `held`; returns what was dropped.
    fn retain_held(&mut self, held: &BTreeSet<String>) -> BTreeSet<String> {
        let purged: BTreeSet<String> = self
            .ticks
            .keys()
            .filter(|channel| !held.contains(*channel))
            .cloned()
            .collect();
        for channel in &purged {
            self.ticks.remove(channel);
        }
        purged
    }
}

/// What one snapshot changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub opened: Vec<PositionKey>,
    pub updated: Vec<PositionKey>,
    pub closed: Vec<PositionKey>,
    /// Price cache entries removed because no side holds the channel anymore.
    pub purged_channels: BTreeSet<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty()
            && self.updated.is_empty()
            && self.closed.is_empty()
            && self.purged_channels.is_empty()
    }
}

/// Position store and price cache for one venue.
#[derive(Debug)]
pub struct EngineState {
    venue: Venue,
    mapping: ChannelMapping,
    positions: RwLock<PositionStore>,
    prices: RwLock<PriceCache>,
}

impl EngineState {
    pub fn new(venue: Venue) -> Self {
        let mapping = venue.channel_mapping();
        Self {
            venue,
            mapping,
            positions: RwLock::new(PositionStore::new(mapping)),
            prices: RwLock::new(PriceCache::default()),
        }
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn mapping(&self) -> ChannelMapping {
        self.mapping
    }

    /// Replace the store with `candidate` and purge prices for channels that
    /// are no longer held on either side.
    pub fn apply_snapshot(&self, candidate: BTreeMap<PositionKey, Position>) -> SnapshotDiff {
        let mut positions = self.positions.write();

        let mut diff = SnapshotDiff::default();
        for (key, position) in &candidate {
            match positions.get(key) {
                None => diff.opened.push(key.clone()),
                Some(current) if !current.same_figures(position) => {
                    diff.updated.push(key.clone())
                }
                Some(_) => {}
            }
        }
        diff.closed = positions
            .positions
            .keys()
            .filter(|key| !candidate.contains_key(*key))
            .cloned()
            .collect();

        positions.replace(candidate);

        let mut prices = self.prices.write();
        diff.purged_channels = prices.retain_held(positions.held_channels());

        if !diff.closed.is_empty() || !diff.purged_channels.is_empty() {
            debug!(
                venue = %self.venue,
                closed = ?diff.closed,
                purged = ?diff.purged_channels,
                "Positions closed"
            );
        }
        diff
    }

    /// Cache `tick` if its channel is held. Returns whether it was applied.
    pub fn apply_tick(&self, tick: PriceTick) -> bool {
        let positions = self.positions.read();
        if !positions.holds_channel(&tick.symbol) {
            trace!(venue = %self.venue, symbol = %tick.symbol, "Dropping tick for unheld symbol");
            return false;
        }
        self.prices.write().insert(tick);
        true
    }

    /// Apply a batch of ticks; returns how many were cached.
    pub fn apply_ticks(&self, ticks: Vec<PriceTick>) -> usize {
        ticks
            .into_iter()
            .filter(|tick| self.apply_tick(tick.clone()))
            .count()
    }

    /// Channel symbols the price stream must be subscribed to.
    pub fn required_channels(&self) -> BTreeSet<String> {
        self.positions.read().held_channels().clone()
    }

    pub fn position_count(&self) -> usize {
        self.positions.read().len()
    }

    pub fn position(&self, key: &PositionKey) -> Option<Position> {
        self.positions.read().get(key).cloned()
    }

    pub fn price(&self, channel: &str) -> Option<PriceTick> {
        self.prices.read().get(channel).cloned()
    }

    pub fn cached_price_count(&self) -> usize {
        self.prices.read().len()
    }

    /// Rows for every position joined with its cached mark and fresh PnL.
    pub fn merged_view(&self) -> MergedView {
        let positions = self.positions.read();
        let prices = self.prices.read();
        let rows = positions
            .iter()
            .map(|position| {
                let tick = prices.get(&positions.channel_of(position));
                PositionView::new(self.venue, position, tick)
            })
            .collect();
        MergedView::new(rows)
    }
}

impl ViewSource for EngineState {
    fn view(&self) -> MergedView {
        self.merged_view()
    }
}
