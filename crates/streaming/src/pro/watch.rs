//! `watch_*` / `unwatch_*` entry points

use super::{hash, is_spot, ProExchange};
use crate::cache::{filter_by_since_limit, filter_by_symbol_since_limit};
use crate::errors::{ExchangeError, Result};
use crate::orderbook::OrderBook;
use crate::traits::StreamingExchange;
use crate::types::{Balances, Ohlcv, Order, StreamUpdate, Ticker, Trade};
use async_trait::async_trait;
use sriquant_core::PerfTimer;
use url::Url;

fn unexpected(update: &StreamUpdate, expected: &str) -> ExchangeError {
    ExchangeError::InvalidResponse(format!("expected {expected} update, got {}", update.kind()))
}

impl ProExchange {
    fn exchange_timeframe(&self, url: &Url, timeframe: &str) -> Result<String> {
        let table = if is_spot(url) {
            &self.core.config.spot_timeframes
        } else {
            &self.core.config.contract_timeframes
        };
        table
            .get(timeframe)
            .cloned()
            .ok_or_else(|| ExchangeError::NotSupported(format!("timeframe {timeframe} is not supported")))
    }

    fn order_book_depth(&self, limit: Option<usize>) -> Result<usize> {
        let limit = limit.unwrap_or(self.core.config.default_order_book_limit);
        if !self.core.config.order_book_limits.contains(&limit) {
            return Err(ExchangeError::BadRequest(format!(
                "{} watch_order_book limit argument must be one of {:?}",
                self.core.config.id, self.core.config.order_book_limits
            )));
        }
        Ok(limit)
    }

    fn order_topics(url: &Url) -> &'static [&'static str] {
        if is_spot(url) {
            &["order", "stopOrder"]
        } else {
            &["order"]
        }
    }

    fn fill_topic(url: &Url) -> &'static str {
        if is_spot(url) {
            "ticketInfo"
        } else {
            "execution"
        }
    }

    pub fn unwatch_order_book(&self, symbol: &str, limit: Option<usize>) -> Result<()> {
        let market = self.core.markets.market(symbol)?.clone();
        let depth = self.order_book_depth(limit)?;
        let url = self.core.config.public_url()?;
        let topic = format!("market.depth.{}.step0.level{}", market.id, depth);
        self.core.unwatch_topic(&url, &hash::order_book(&market.symbol), &topic)?;
        self.core.store.borrow_mut().orderbooks.remove(&market.symbol);
        Ok(())
    }

    pub fn unwatch_trades(&self, symbol: &str) -> Result<()> {
        let market = self.core.markets.market(symbol)?.clone();
        let url = self.core.config.public_url()?;
        let topic = format!("market.trade.detail.{}", market.id);
        self.core.unwatch_topic(&url, &hash::trades(&market.symbol), &topic)?;
        self.core.store.borrow_mut().trades.remove(&market.symbol);
        Ok(())
    }

    pub fn unwatch_ticker(&self, symbol: &str) -> Result<()> {
        let market = self.core.markets.market(symbol)?.clone();
        let url = self.core.config.public_url()?;
        let topic = format!("market.ticker.{}", market.id);
        self.core.unwatch_topic(&url, &hash::ticker(&market.symbol), &topic)?;
        self.core.store.borrow_mut().tickers.remove(&market.symbol);
        Ok(())
    }

    pub fn unwatch_ohlcv(&self, symbol: &str, timeframe: &str) -> Result<()> {
        let market = self.core.markets.market(symbol)?.clone();
        let url = self.core.config.public_url()?;
        let interval = self.exchange_timeframe(&url, timeframe)?;
        let topic = format!("market.kline.{}.{}", market.id, interval);
        self.core
            .unwatch_topic(&url, &hash::ohlcv(&market.symbol, timeframe), &topic)?;
        if let Some(by_timeframe) = self.core.store.borrow_mut().ohlcvs.get_mut(&market.symbol) {
            by_timeframe.remove(timeframe);
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl StreamingExchange for ProExchange {
    fn id(&self) -> &str {
        &self.core.config.id
    }

    async fn watch_order_book(&self, symbol: &str, limit: Option<usize>) -> Result<OrderBook> {
        let market = self.core.markets.market(symbol)?.clone();
        let depth = self.order_book_depth(limit)?;
        let url = self.core.config.public_url()?;
        let topic = format!("market.depth.{}.step0.level{}", market.id, depth);

        let update = self
            .core
            .watch_topic(&url, &hash::order_book(&market.symbol), &topic)
            .await?;
        match update {
            StreamUpdate::OrderBook(book) => Ok(book.limit(depth)),
            other => Err(unexpected(&other, "order book")),
        }
    }

    async fn watch_trades(
        &self,
        symbol: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Trade>> {
        let market = self.core.markets.market(symbol)?.clone();
        let url = self.core.config.public_url()?;
        let topic = format!("market.trade.detail.{}", market.id);

        self.core
            .watch_topic(&url, &hash::trades(&market.symbol), &topic)
            .await?;

        let _timer = PerfTimer::start("watch_trades_read");
        let mut store = self.core.store.borrow_mut();
        let Some(cache) = store.trades.get_mut(&market.symbol) else {
            return Ok(Vec::new());
        };
        let limit = cache.get_limit(Some(&market.symbol), limit);
        Ok(filter_by_since_limit(&cache.to_vec(), since, limit))
    }

    async fn watch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let market = self.core.markets.market(symbol)?.clone();
        let url = self.core.config.public_url()?;
        let topic = format!("market.ticker.{}", market.id);

        match self
            .core
            .watch_topic(&url, &hash::ticker(&market.symbol), &topic)
            .await?
        {
            StreamUpdate::Ticker(ticker) => Ok(ticker),
            other => Err(unexpected(&other, "ticker")),
        }
    }

    async fn watch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Ohlcv>> {
        let market = self.core.markets.market(symbol)?.clone();
        let url = self.core.config.public_url()?;
        let interval = self.exchange_timeframe(&url, timeframe)?;
        let topic = format!("market.kline.{}.{}", market.id, interval);

        self.core
            .watch_topic(&url, &hash::ohlcv(&market.symbol, timeframe), &topic)
            .await?;

        let mut store = self.core.store.borrow_mut();
        let Some(cache) = store
            .ohlcvs
            .get_mut(&market.symbol)
            .and_then(|by_timeframe| by_timeframe.get_mut(timeframe))
        else {
            return Ok(Vec::new());
        };
        let limit = cache.get_limit(limit);
        Ok(filter_by_since_limit(&cache.to_vec(), since, limit))
    }

    async fn watch_orders(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Order>> {
        self.authenticate().await?;
        let symbol = match symbol {
            Some(symbol) => Some(self.core.markets.market(symbol)?.symbol.clone()),
            None => None,
        };
        let url = self.core.config.private_url()?;
        let topic = Self::order_topics(&url)[0];

        self.core
            .watch_topic(&url, &hash::orders(symbol.as_deref()), topic)
            .await?;

        let mut store = self.core.store.borrow_mut();
        let Some(cache) = store.orders.as_mut() else {
            return Ok(Vec::new());
        };
        let limit = cache.get_limit(symbol.as_deref(), limit);
        Ok(filter_by_symbol_since_limit(&cache.to_vec(), symbol.as_deref(), since, limit))
    }

    async fn watch_my_trades(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Trade>> {
        self.authenticate().await?;
        let symbol = match symbol {
            Some(symbol) => Some(self.core.markets.market(symbol)?.symbol.clone()),
            None => None,
        };
        let url = self.core.config.private_url()?;

        self.core
            .watch_topic(&url, &hash::my_trades(symbol.as_deref()), Self::fill_topic(&url))
            .await?;

        let mut store = self.core.store.borrow_mut();
        let Some(cache) = store.my_trades.as_mut() else {
            return Ok(Vec::new());
        };
        let limit = cache.get_limit(symbol.as_deref(), limit);
        Ok(filter_by_symbol_since_limit(&cache.to_vec(), symbol.as_deref(), since, limit))
    }

    async fn watch_balance(&self, account: Option<&str>) -> Result<Balances> {
        self.authenticate().await?;
        let url = self.core.config.private_url()?;
        let account = match account {
            Some("spot") => "spot",
            Some("contract") | Some("swap") => "contract",
            Some(other) => {
                return Err(ExchangeError::BadRequest(format!(
                    "unknown balance account {other}, expected spot or contract"
                )));
            }
            None if is_spot(&url) => "spot",
            None => "contract",
        };
        let topic = if account == "spot" { "outboundAccountInfo" } else { "wallet" };

        match self
            .core
            .watch_topic(&url, &hash::balances(account), topic)
            .await?
        {
            StreamUpdate::Balance(balances) => Ok(balances),
            other => Err(unexpected(&other, "balance")),
        }
    }

    async fn close(&self) {
        self.close_all();
    }
}
