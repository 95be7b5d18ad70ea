//! Exchange traits defining the streaming interface
//!
//! Every method registers interest under a message hash, makes sure the
//! subscribe frame went out once, and suspends until the dispatcher
//! resolves that hash.

use crate::errors::Result;
use crate::orderbook::OrderBook;
use crate::types::{Balances, Ohlcv, Order, Ticker, Trade};
use async_trait::async_trait;

/// Subscription-driven market and account data
#[async_trait(?Send)]
pub trait StreamingExchange {
    /// Exchange identifier
    fn id(&self) -> &str;

    /// Order book truncated to `limit` levels per side
    async fn watch_order_book(&self, symbol: &str, limit: Option<usize>) -> Result<OrderBook>;

    /// Public trades at or after `since`, most recent `limit`
    async fn watch_trades(
        &self,
        symbol: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Trade>>;

    async fn watch_ticker(&self, symbol: &str) -> Result<Ticker>;

    /// Candles for a unified timeframe such as `1m` or `1h`
    async fn watch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Ohlcv>>;

    /// Private order updates, optionally for one symbol
    async fn watch_orders(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Order>>;

    /// Private fills, optionally for one symbol
    async fn watch_my_trades(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Trade>>;

    /// Balances of one account (`spot` or `contract`)
    async fn watch_balance(&self, account: Option<&str>) -> Result<Balances>;

    /// Close every connection
    async fn close(&self);
}
