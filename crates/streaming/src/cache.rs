//! Bounded caches for streamed records
//!
//! Three fixed-capacity containers that drop their oldest entry on overflow:
//!
//! - [`ArrayCache`]: append by arrival (trades)
//! - [`ArrayCacheByTimestamp`]: one slot per timestamp, later records for
//!   the same timestamp replace the slot (candles)
//! - [`ArrayCacheBySymbolById`]: upsert by `(symbol, id)`, an updated entry
//!   moves to the end (orders)
//!
//! With new-updates tracking enabled, [`get_limit`](ArrayCache::get_limit)
//! reports how many records arrived since the previous read so a watcher
//! only receives what is new.

use std::collections::{HashMap, HashSet, VecDeque};

/// Identity of a cached record
pub trait CacheRecord {
    fn symbol(&self) -> Option<&str>;
    fn timestamp(&self) -> Option<i64>;
    fn id(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Default, Clone)]
struct Tally {
    count: usize,
    seen: HashSet<String>,
}

impl Tally {
    fn record(&mut self, key: Option<&str>) {
        match key {
            Some(key) => {
                if self.seen.insert(key.to_string()) {
                    self.count += 1;
                }
            }
            None => self.count += 1,
        }
    }
}

/// Counts records appended since the last read, per symbol and overall
#[derive(Debug, Default, Clone)]
struct NewUpdates {
    by_symbol: HashMap<String, Tally>,
    all: Tally,
    clear_by_symbol: HashSet<String>,
    clear_all: bool,
}

impl NewUpdates {
    fn record(&mut self, symbol: Option<&str>, key: Option<&str>) {
        if self.clear_all {
            *self = Self::default();
        }
        let symbol = symbol.unwrap_or_default();
        if self.clear_by_symbol.remove(symbol) {
            self.by_symbol.remove(symbol);
        }
        self.by_symbol
            .entry(symbol.to_string())
            .or_default()
            .record(key);
        let global_key = key.map(|key| format!("{symbol}:{key}"));
        self.all.record(global_key.as_deref());
    }

    fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        let pending = match symbol {
            None => {
                self.clear_all = true;
                Some(self.all.count)
            }
            Some(symbol) => {
                self.clear_by_symbol.insert(symbol.to_string());
                self.by_symbol.get(symbol).map(|tally| tally.count)
            }
        };
        match (pending, limit) {
            (None, limit) => limit,
            (Some(pending), Some(limit)) => Some(pending.min(limit)),
            (Some(pending), None) => Some(pending),
        }
    }
}

/// Append-only cache ordered by arrival
#[derive(Debug, Clone)]
pub struct ArrayCache<T> {
    items: VecDeque<T>,
    max_size: usize,
    new_updates: Option<NewUpdates>,
}

impl<T: CacheRecord + Clone> ArrayCache<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            new_updates: None,
        }
    }

    pub fn with_new_updates(mut self, enabled: bool) -> Self {
        self.new_updates = enabled.then(NewUpdates::default);
        self
    }

    pub fn append(&mut self, item: T) {
        if self.max_size > 0 && self.items.len() == self.max_size {
            self.items.pop_front();
        }
        if let Some(tracker) = self.new_updates.as_mut() {
            tracker.record(item.symbol(), None);
        }
        self.items.push_back(item);
    }

    /// Number of records a reader should take: the new-update count capped
    /// by `limit`, or `limit` itself when tracking is off
    pub fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        match self.new_updates.as_mut() {
            Some(tracker) => tracker.get_limit(symbol, limit),
            None => limit,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Ordered copy of the contents
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Cache with one slot per timestamp
#[derive(Debug, Clone)]
pub struct ArrayCacheByTimestamp<T> {
    items: VecDeque<T>,
    timestamps: HashSet<i64>,
    max_size: usize,
    new_updates: Option<NewUpdates>,
}

impl<T: CacheRecord + Clone> ArrayCacheByTimestamp<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.min(1024)),
            timestamps: HashSet::new(),
            max_size,
            new_updates: None,
        }
    }

    pub fn with_new_updates(mut self, enabled: bool) -> Self {
        self.new_updates = enabled.then(NewUpdates::default);
        self
    }

    pub fn append(&mut self, item: T) {
        let timestamp = item.timestamp();
        if let Some(tracker) = self.new_updates.as_mut() {
            let key = timestamp.map(|ts| ts.to_string());
            tracker.record(None, key.as_deref());
        }

        if let Some(ts) = timestamp {
            if self.timestamps.contains(&ts) {
                // In-progress candles update the most recent slots
                if let Some(slot) = self
                    .items
                    .iter_mut()
                    .rev()
                    .find(|existing| existing.timestamp() == Some(ts))
                {
                    *slot = item;
                    return;
                }
            }
        }

        if self.max_size > 0 && self.items.len() == self.max_size {
            if let Some(evicted) = self.items.pop_front() {
                if let Some(ts) = evicted.timestamp() {
                    self.timestamps.remove(&ts);
                }
            }
        }
        if let Some(ts) = timestamp {
            self.timestamps.insert(ts);
        }
        self.items.push_back(item);
    }

    pub fn get_limit(&mut self, limit: Option<usize>) -> Option<usize> {
        match self.new_updates.as_mut() {
            Some(tracker) => tracker.get_limit(None, limit),
            None => limit,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.timestamps.clear();
    }
}

/// Cache keyed by `(symbol, id)` with upsert semantics
#[derive(Debug, Clone)]
pub struct ArrayCacheBySymbolById<T> {
    items: VecDeque<T>,
    index: HashSet<(String, String)>,
    max_size: usize,
    new_updates: Option<NewUpdates>,
}

fn identity<T: CacheRecord>(item: &T) -> Option<(String, String)> {
    item.id()
        .map(|id| (item.symbol().unwrap_or_default().to_string(), id.to_string()))
}

impl<T: CacheRecord + Clone> ArrayCacheBySymbolById<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.min(1024)),
            index: HashSet::new(),
            max_size,
            new_updates: None,
        }
    }

    pub fn with_new_updates(mut self, enabled: bool) -> Self {
        self.new_updates = enabled.then(NewUpdates::default);
        self
    }

    pub fn append(&mut self, item: T) {
        let key = identity(&item);
        if let Some(tracker) = self.new_updates.as_mut() {
            tracker.record(item.symbol(), item.id());
        }

        if let Some(key) = &key {
            if self.index.contains(key) {
                if let Some(position) = self
                    .items
                    .iter()
                    .position(|existing| identity(existing).as_ref() == Some(key))
                {
                    self.items.remove(position);
                }
                self.items.push_back(item);
                return;
            }
        }

        if self.max_size > 0 && self.items.len() == self.max_size {
            if let Some(evicted) = self.items.pop_front() {
                if let Some(evicted_key) = identity(&evicted) {
                    self.index.remove(&evicted_key);
                }
            }
        }
        if let Some(key) = key {
            self.index.insert(key);
        }
        self.items.push_back(item);
    }

    pub fn get(&self, symbol: &str, id: &str) -> Option<&T> {
        self.items
            .iter()
            .rev()
            .find(|item| item.id() == Some(id) && item.symbol().unwrap_or_default() == symbol)
    }

    pub fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        match self.new_updates.as_mut() {
            Some(tracker) => tracker.get_limit(symbol, limit),
            None => limit,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }
}

/// Records at or after `since`, keeping the most recent `limit`
pub fn filter_by_since_limit<T: CacheRecord + Clone>(
    items: &[T],
    since: Option<i64>,
    limit: Option<usize>,
) -> Vec<T> {
    filter_by_symbol_since_limit(items, None, since, limit)
}

pub fn filter_by_symbol_since_limit<T: CacheRecord + Clone>(
    items: &[T],
    symbol: Option<&str>,
    since: Option<i64>,
    limit: Option<usize>,
) -> Vec<T> {
    let filtered: Vec<T> = items
        .iter()
        .filter(|item| symbol.is_none_or(|symbol| item.symbol() == Some(symbol)))
        .filter(|item| since.is_none_or(|since| item.timestamp().is_some_and(|ts| ts >= since)))
        .cloned()
        .collect();
    match limit {
        Some(limit) if filtered.len() > limit => filtered[filtered.len() - limit..].to_vec(),
        _ => filtered,
    }
}
