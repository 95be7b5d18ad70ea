//! Locally maintained order book
//!
//! Each side is a `BTreeMap<Fixed, Fixed>` (price -> size). Snapshots
//! replace a side, deltas upsert or delete single levels (size 0 removes).
//! Views are always sorted: bids descending, asks ascending.

use serde::{Deserialize, Serialize};
use sriquant_core::{iso8601, Fixed};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One side of the book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSide {
    levels: BTreeMap<Fixed, Fixed>,
    descending: bool,
    depth: Option<usize>,
}

impl BookSide {
    pub fn bids(depth: Option<usize>) -> Self {
        Self {
            levels: BTreeMap::new(),
            descending: true,
            depth,
        }
    }

    pub fn asks(depth: Option<usize>) -> Self {
        Self {
            levels: BTreeMap::new(),
            descending: false,
            depth,
        }
    }

    /// Upsert a level; a zero size removes it
    pub fn store(&mut self, price: Fixed, size: Fixed) {
        if size.is_zero() {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, size);
        }
    }

    /// Replace every level
    pub fn replace<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = (Fixed, Fixed)>,
    {
        self.levels.clear();
        for (price, size) in levels {
            self.store(price, size);
        }
    }

    /// Sorted levels, truncated to the side's depth
    pub fn levels(&self) -> Vec<(Fixed, Fixed)> {
        let take = self.depth.unwrap_or(usize::MAX);
        if self.descending {
            self.levels.iter().rev().take(take).map(|(p, s)| (*p, *s)).collect()
        } else {
            self.levels.iter().take(take).map(|(p, s)| (*p, *s)).collect()
        }
    }

    pub fn best(&self) -> Option<(Fixed, Fixed)> {
        let best = if self.descending {
            self.levels.iter().next_back()
        } else {
            self.levels.iter().next()
        };
        best.map(|(p, s)| (*p, *s))
    }

    pub fn get(&self, price: &Fixed) -> Option<Fixed> {
        self.levels.get(price).copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    fn truncated(&self, n: usize) -> Self {
        let levels = self.levels().into_iter().take(n).collect();
        Self {
            levels,
            descending: self.descending,
            depth: Some(n),
        }
    }
}

/// Parsed book payload, either a snapshot or a delta
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookUpdate {
    pub symbol: String,
    pub bids: Vec<(Fixed, Fixed)>,
    pub asks: Vec<(Fixed, Fixed)>,
    pub timestamp: Option<i64>,
    pub nonce: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: BookSide,
    pub asks: BookSide,
    pub timestamp: Option<i64>,
    pub datetime: Option<String>,
    pub nonce: Option<u64>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>, depth: Option<usize>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BookSide::bids(depth),
            asks: BookSide::asks(depth),
            timestamp: None,
            datetime: None,
            nonce: None,
        }
    }

    /// Replace both sides. Returns false, leaving the book untouched, when
    /// the snapshot is older than the current state.
    pub fn reset(&mut self, snapshot: BookUpdate) -> bool {
        if let (Some(current), Some(incoming)) = (self.timestamp, snapshot.timestamp) {
            if incoming < current {
                warn!(
                    "⚠️  Ignoring stale {} order book snapshot ({} < {})",
                    self.symbol, incoming, current
                );
                return false;
            }
        }
        self.bids.replace(snapshot.bids);
        self.asks.replace(snapshot.asks);
        self.nonce = snapshot.nonce;
        self.set_timestamp(snapshot.timestamp);
        true
    }

    /// Apply level updates. Returns false when the delta's nonce is not
    /// newer than the book's.
    pub fn apply_delta(&mut self, delta: BookUpdate) -> bool {
        if let (Some(current), Some(incoming)) = (self.nonce, delta.nonce) {
            if incoming <= current {
                debug!(
                    "Dropping {} order book delta {} (book at {})",
                    self.symbol, incoming, current
                );
                return false;
            }
        }
        for (price, size) in delta.bids {
            self.bids.store(price, size);
        }
        for (price, size) in delta.asks {
            self.asks.store(price, size);
        }
        if delta.nonce.is_some() {
            self.nonce = delta.nonce;
        }
        if delta.timestamp.is_some() {
            self.set_timestamp(delta.timestamp);
        }
        true
    }

    fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.timestamp = timestamp;
        self.datetime = timestamp.and_then(iso8601);
    }

    /// Copy holding at most `n` levels per side
    pub fn limit(&self, n: usize) -> OrderBook {
        OrderBook {
            symbol: self.symbol.clone(),
            bids: self.bids.truncated(n),
            asks: self.asks.truncated(n),
            timestamp: self.timestamp,
            datetime: self.datetime.clone(),
            nonce: self.nonce,
        }
    }

    pub fn best_bid(&self) -> Option<(Fixed, Fixed)> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<(Fixed, Fixed)> {
        self.asks.best()
    }

    pub fn spread(&self) -> Option<Fixed> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => ask.checked_sub(bid).ok(),
            _ => None,
        }
    }
}
