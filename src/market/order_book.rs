use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;

/// One price level of the ladder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// REST depth snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Streamed depth diff covering update ids `first_update_id..=final_update_id`
#[derive(Debug, Clone, PartialEq)]
pub struct DepthUpdate {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Result of offering a diff to the book
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Book not live yet, diff queued for replay
    Buffered,
    /// Already covered by the book
    Stale,
    Applied,
    /// Contiguity break mid-stream, diff dropped
    Gap { expected: u64, first_update_id: u64 },
    /// First diff after the snapshot does not straddle it; needs a fresh snapshot
    ResyncRequired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookPhase {
    #[default]
    Buffering,
    Live,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Bid,
    Ask,
}

/// Bid/ask ladder kept consistent with the exchange from a snapshot plus
/// an ordered stream of diffs.
///
/// Bids are kept descending, asks ascending, at most one level per price and
/// never a level with quantity <= 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    last_update_id: u64,
    #[serde(default)]
    phase: BookPhase,
    #[serde(skip)]
    first_update_done: bool,
    #[serde(skip)]
    pending: VecDeque<DepthUpdate>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.phase == BookPhase::Live
    }

    pub fn phase(&self) -> BookPhase {
        self.phase
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Number of diffs waiting for a snapshot
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop all state and go back to buffering
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Install ground truth and replay diffs buffered while not live, oldest
    /// first. Returns `ResyncRequired` if the replay hit a boundary gap, in
    /// which case the book is back to buffering.
    pub fn install_snapshot(&mut self, snapshot: DepthSnapshot) -> SyncOutcome {
        self.bids = normalize(snapshot.bids, Side::Bid);
        self.asks = normalize(snapshot.asks, Side::Ask);
        self.last_update_id = snapshot.last_update_id;
        self.phase = BookPhase::Live;
        self.first_update_done = false;

        let pending = std::mem::take(&mut self.pending);
        let mut applied = 0usize;
        for update in pending {
            match self.apply_update(update) {
                SyncOutcome::Applied => applied += 1,
                SyncOutcome::ResyncRequired => {
                    self.reset();
                    return SyncOutcome::ResyncRequired;
                }
                SyncOutcome::Gap {
                    expected,
                    first_update_id,
                } => {
                    tracing::debug!(expected, first_update_id, "gap while replaying buffered depth");
                }
                SyncOutcome::Stale | SyncOutcome::Buffered => {}
            }
        }

        tracing::debug!(
            last_update_id = self.last_update_id,
            replayed = applied,
            "order book live"
        );
        SyncOutcome::Applied
    }

    /// Offer one diff to the book
    pub fn apply_update(&mut self, update: DepthUpdate) -> SyncOutcome {
        if self.phase == BookPhase::Buffering {
            self.pending.push_back(update);
            return SyncOutcome::Buffered;
        }

        if update.final_update_id <= self.last_update_id {
            return SyncOutcome::Stale;
        }

        let next = self.last_update_id + 1;
        if !self.first_update_done {
            if !(update.first_update_id <= next && next <= update.final_update_id) {
                return SyncOutcome::ResyncRequired;
            }
            self.first_update_done = true;
        } else if update.first_update_id != next {
            return SyncOutcome::Gap {
                expected: next,
                first_update_id: update.first_update_id,
            };
        }

        for level in update.bids {
            merge_level(&mut self.bids, level, Side::Bid);
        }
        for level in update.asks {
            merge_level(&mut self.asks, level, Side::Ask);
        }
        self.last_update_id = update.final_update_id;

        SyncOutcome::Applied
    }

    /// Ask notional (quantity * `last_price`) of levels priced below
    /// `last_price * (1 + band)`. Zero when the book is not live.
    pub fn ask_notional_within(&self, last_price: f64, band: f64) -> f64 {
        if !self.is_live() {
            return 0.0;
        }
        let ceiling = last_price * (1.0 + band);
        self.asks
            .iter()
            .take_while(|level| level.price < ceiling)
            .map(|level| level.quantity)
            .sum::<f64>()
            * last_price
    }

    /// Bid notional of levels priced above `last_price * (1 - band)`
    pub fn bid_notional_within(&self, last_price: f64, band: f64) -> f64 {
        if !self.is_live() {
            return 0.0;
        }
        let floor = last_price * (1.0 - band);
        self.bids
            .iter()
            .take_while(|level| level.price > floor)
            .map(|level| level.quantity)
            .sum::<f64>()
            * last_price
    }
}

fn side_order(side: Side, a: f64, b: f64) -> Ordering {
    let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    match side {
        Side::Bid => ord.reverse(),
        Side::Ask => ord,
    }
}

fn normalize(mut levels: Vec<PriceLevel>, side: Side) -> Vec<PriceLevel> {
    levels.retain(|level| level.quantity > 0.0);
    levels.sort_by(|a, b| side_order(side, a.price, b.price));
    // last occurrence of a price wins
    let mut out: Vec<PriceLevel> = Vec::with_capacity(levels.len());
    for level in levels {
        match out.last_mut() {
            Some(prev) if prev.price == level.price => *prev = level,
            _ => out.push(level),
        }
    }
    out
}

fn merge_level(levels: &mut Vec<PriceLevel>, level: PriceLevel, side: Side) {
    let position = levels.binary_search_by(|probe| side_order(side, probe.price, level.price));
    match position {
        Ok(index) => {
            if level.quantity <= 0.0 {
                levels.remove(index);
            } else {
                levels[index].quantity = level.quantity;
            }
        }
        Err(index) => {
            if level.quantity > 0.0 {
                levels.insert(index, level);
            }
        }
    }
}
