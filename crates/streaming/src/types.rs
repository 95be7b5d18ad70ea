//! Normalized streaming records
//!
//! Every push payload is parsed into one of these types before it enters a
//! cache. Prices and amounts are exact `Fixed` decimals.

use crate::cache::CacheRecord;
use crate::errors::{ExchangeError, Result};
use crate::orderbook::OrderBook;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sriquant_core::Fixed;
use std::collections::{BTreeMap, HashMap};

/// Spot or derivatives venue a market trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    #[default]
    Spot,
    Swap,
}

/// Exchange market: unified `symbol` (`BTC/USDT`) and exchange `id` (`BTC-USDT`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub symbol: String,
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub market_type: MarketType,
}

impl Market {
    pub fn new(id: &str, base: &str, quote: &str, market_type: MarketType) -> Self {
        Self {
            id: id.to_string(),
            symbol: format!("{base}/{quote}"),
            base: base.to_string(),
            quote: quote.to_string(),
            market_type,
        }
    }

    /// Best-effort market for an exchange id that is not loaded
    pub fn from_id(id: &str) -> Self {
        let (base, quote) = id
            .split_once(['-', '_', '/'])
            .unwrap_or((id, ""));
        Self {
            id: id.to_string(),
            symbol: if quote.is_empty() {
                id.to_string()
            } else {
                format!("{base}/{quote}")
            },
            base: base.to_string(),
            quote: quote.to_string(),
            market_type: MarketType::Spot,
        }
    }
}

/// Loaded markets indexed by unified symbol and by exchange id
#[derive(Debug, Clone, Default)]
pub struct Markets {
    by_symbol: HashMap<String, Market>,
    by_id: HashMap<String, String>,
}

impl Markets {
    pub fn new(markets: impl IntoIterator<Item = Market>) -> Self {
        let mut loaded = Self::default();
        for market in markets {
            loaded.by_id.insert(market.id.clone(), market.symbol.clone());
            loaded.by_symbol.insert(market.symbol.clone(), market);
        }
        loaded
    }

    pub fn market(&self, symbol: &str) -> Result<&Market> {
        self.by_symbol
            .get(symbol)
            .ok_or_else(|| ExchangeError::BadSymbol(format!("market symbol {symbol} not found")))
    }

    /// Resolve an exchange id, falling back to a synthetic market
    pub fn safe_market(&self, id: &str) -> Market {
        self.by_id
            .get(id)
            .and_then(|symbol| self.by_symbol.get(symbol))
            .cloned()
            .unwrap_or_else(|| Market::from_id(id))
    }

    pub fn safe_symbol(&self, id: &str) -> String {
        self.safe_market(id).symbol
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.by_symbol.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Some(Side::Buy),
            "sell" | "ask" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakerOrMaker {
    Taker,
    Maker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub cost: Fixed,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<String>,
    pub order: Option<String>,
    pub symbol: String,
    pub timestamp: Option<i64>,
    pub datetime: Option<String>,
    pub side: Option<Side>,
    pub price: Fixed,
    pub amount: Fixed,
    pub cost: Option<Fixed>,
    pub taker_or_maker: Option<TakerOrMaker>,
    pub fee: Option<Fee>,
}

impl CacheRecord for Trade {
    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ticker {
    pub symbol: String,
    pub timestamp: Option<i64>,
    pub datetime: Option<String>,
    pub high: Option<Fixed>,
    pub low: Option<Fixed>,
    pub bid: Option<Fixed>,
    pub bid_volume: Option<Fixed>,
    pub ask: Option<Fixed>,
    pub ask_volume: Option<Fixed>,
    pub open: Option<Fixed>,
    pub close: Option<Fixed>,
    pub last: Option<Fixed>,
    pub change: Option<Fixed>,
    pub percentage: Option<Fixed>,
    pub base_volume: Option<Fixed>,
    pub quote_volume: Option<Fixed>,
}

/// One candle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub symbol: String,
    pub timestamp: i64,
    pub open: Fixed,
    pub high: Fixed,
    pub low: Fixed,
    pub close: Fixed,
    pub volume: Fixed,
}

impl CacheRecord for Ohlcv {
    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Map an exchange status string
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "NEW" | "PENDING" | "PARTIALLY_FILLED" | "PARTIALLYFILLED" | "OPEN" => {
                Some(OrderStatus::Open)
            }
            "FILLED" | "CLOSED" => Some(OrderStatus::Closed),
            "CANCELED" | "CANCELLED" | "PENDING_CANCEL" => Some(OrderStatus::Canceled),
            "EXPIRED" => Some(OrderStatus::Expired),
            "REJECTED" | "FAILED" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub timestamp: Option<i64>,
    pub datetime: Option<String>,
    pub side: Option<Side>,
    pub order_type: Option<String>,
    pub price: Option<Fixed>,
    pub amount: Option<Fixed>,
    pub filled: Option<Fixed>,
    pub remaining: Option<Fixed>,
    pub average: Option<Fixed>,
    pub status: Option<OrderStatus>,
}

impl CacheRecord for Order {
    fn symbol(&self) -> Option<&str> {
        Some(&self.symbol)
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

/// Free / used / total amounts of one currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Balance {
    pub free: Option<Fixed>,
    pub used: Option<Fixed>,
    pub total: Option<Fixed>,
}

impl Balance {
    /// Fill in whichever of free/used/total is missing
    pub fn complete(mut self) -> Self {
        match (self.free, self.used, self.total) {
            (Some(free), Some(used), None) => self.total = free.checked_add(used).ok(),
            (Some(free), None, Some(total)) => self.used = total.checked_sub(free).ok(),
            (None, Some(used), Some(total)) => self.free = total.checked_sub(used).ok(),
            _ => {}
        }
        self
    }
}

/// Balances of one account type, keyed by currency code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Balances {
    pub account: String,
    pub timestamp: Option<i64>,
    pub datetime: Option<String>,
    pub currencies: BTreeMap<String, Balance>,
}

impl Balances {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, currency: &str) -> Option<&Balance> {
        self.currencies.get(currency)
    }

    /// Merge a partial update over the current balances
    pub fn merge(&mut self, update: Balances) {
        self.timestamp = update.timestamp.or(self.timestamp);
        self.datetime = update.datetime.or(self.datetime.take());
        for (currency, balance) in update.currencies {
            self.currencies.insert(currency, balance.complete());
        }
    }
}

/// Value a watch future resolves with
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    OrderBook(OrderBook),
    Trades(Vec<Trade>),
    Ticker(Ticker),
    Ohlcv(Vec<Ohlcv>),
    Orders(Vec<Order>),
    Balance(Balances),
    Message(Value),
}

impl StreamUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamUpdate::OrderBook(_) => "orderbook",
            StreamUpdate::Trades(_) => "trades",
            StreamUpdate::Ticker(_) => "ticker",
            StreamUpdate::Ohlcv(_) => "ohlcv",
            StreamUpdate::Orders(_) => "orders",
            StreamUpdate::Balance(_) => "balance",
            StreamUpdate::Message(_) => "message",
        }
    }
}
