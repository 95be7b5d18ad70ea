//! Inbound frame handling for the reference exchange
//!
//! Control frames (application pings, pongs, errors, subscription acks,
//! auth acks) are intercepted first; everything else is routed by topic to
//! exactly one channel handler, which parses the records, updates the
//! caches and resolves the matching message hashes.

use super::parsers::{safe_integer, safe_string};
use super::{hash, ExchangeCore, AUTHENTICATED};
use crate::cache::{ArrayCache, ArrayCacheBySymbolById, ArrayCacheByTimestamp};
use crate::client::StreamingClient;
use crate::config::PingMode;
use crate::dispatcher::{MessageHandler, Router};
use crate::errors::ExchangeError;
use crate::orderbook::OrderBook;
use crate::transport::OutboundFrame;
use crate::types::{Balances, StreamUpdate};
use serde_json::{json, Value};
use sriquant_core::{iso8601, milliseconds};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Handler a topic routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    OrderBook,
    Trades,
    Ticker,
    Ohlcv,
    Orders,
    MyTrades,
    Balance,
}

/// Topic table of the reference envelope
pub fn default_router() -> Router<Channel> {
    Router::new()
        .prefix("market.depth.", Channel::OrderBook)
        .prefix("market.trade.detail.", Channel::Trades)
        .prefix("market.ticker.", Channel::Ticker)
        .exact("market.contracts", Channel::Ticker)
        .prefix("market.kline.", Channel::Ohlcv)
        .exact("order", Channel::Orders)
        .exact("stopOrder", Channel::Orders)
        .exact("execution", Channel::MyTrades)
        .exact("ticketInfo", Channel::MyTrades)
        .exact("user.openapi.perp.trade", Channel::MyTrades)
        .exact("wallet", Channel::Balance)
        .exact("outboundAccountInfo", Channel::Balance)
        .contains("orderbook", Channel::OrderBook)
        .contains("depth", Channel::OrderBook)
        .contains("publicTrade", Channel::Trades)
        .contains("trade", Channel::Trades)
}

fn topic_of(message: &Value) -> String {
    safe_string(message, &["topic", "dataType"]).unwrap_or_default()
}

fn segment(topic: &str, index: usize) -> Option<&str> {
    topic.split('.').nth(index).filter(|s| !s.is_empty())
}

/// Arrays yield their items, a lone object yields itself
fn records(data: Option<&Value>) -> Vec<&Value> {
    match data {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(object @ Value::Object(_)) => vec![object],
        _ => Vec::new(),
    }
}

fn is_pong(message: &Value) -> bool {
    message.get("pong").is_some()
        || safe_string(message, &["ret_msg"]).is_some_and(|m| m == "pong")
        || safe_string(message, &["op"]).is_some_and(|op| op == "pong")
}

impl ExchangeCore {
    fn dispatch(&self, client: &StreamingClient, message: Value) {
        if let Value::String(text) = &message {
            match text.to_ascii_lowercase().as_str() {
                "pong" => client.on_pong(),
                "ping" => {
                    if let Err(e) = client.send("pong") {
                        debug!("Pong not sent: {}", e);
                    }
                }
                _ => debug!("Ignoring text frame {:?}", text),
            }
            return;
        }

        if let Some(ping) = message.get("ping") {
            if let Err(e) = client.send(json!({ "pong": ping })) {
                debug!("Pong not sent: {}", e);
            }
            return;
        }

        if self.handle_error_message(client, &message) {
            return;
        }

        if is_pong(&message) {
            client.on_pong();
            return;
        }

        if safe_string(&message, &["event"]).is_some_and(|e| e == "sub") {
            self.handle_subscription_status(client, &message);
            return;
        }

        let topic = topic_of(&message);
        if let Some(channel) = self.router.route(&topic) {
            match channel {
                Channel::OrderBook => self.handle_order_book(client, &message, &topic),
                Channel::Trades => self.handle_trades(client, &message, &topic),
                Channel::Ticker => self.handle_ticker(client, &message, &topic),
                Channel::Ohlcv => self.handle_ohlcv(client, &message, &topic),
                Channel::Orders => self.handle_orders(client, &message),
                Channel::MyTrades => self.handle_my_trades(client, &message),
                Channel::Balance => self.handle_balance(client, &message, &topic),
            }
            return;
        }

        let op = safe_string(&message, &["op"]);
        let kind = safe_string(&message, &["type"]);
        if op.as_deref() == Some("auth") || kind.as_deref() == Some("AUTH_RESP") {
            self.handle_authenticate(client, &message);
            return;
        }

        debug!("Unhandled frame on {}: {}", client.url(), message);
    }

    /// Returns true if `message` reported an error and was consumed
    fn handle_error_message(&self, client: &StreamingClient, message: &Value) -> bool {
        let code = safe_string(message, &["code", "ret_code"]).filter(|code| code != "0");
        let failed = message.get("success").and_then(Value::as_bool) == Some(false);
        if code.is_none() && !failed {
            return false;
        }

        let ret_msg = safe_string(message, &["ret_msg", "msg"]).unwrap_or_default();
        let is_auth = safe_string(message, &["op"]).is_some_and(|op| op == "auth")
            || message
                .get("request")
                .and_then(|request| safe_string(request, &["op"]))
                .is_some_and(|op| op == "auth");
        let feedback = format!("{} {}", self.config.id, message);

        let error = code
            .as_deref()
            .and_then(|code| self.config.exceptions.exactly_matched(code, &feedback))
            .or_else(|| self.config.exceptions.broadly_matched(&ret_msg, &feedback))
            .unwrap_or_else(|| {
                if is_auth {
                    ExchangeError::AuthenticationError(format!("Authentication failed: {ret_msg}"))
                } else {
                    let id = safe_string(message, &["id", "req_id"]).unwrap_or_default();
                    ExchangeError::ExchangeReported(format!("{id} {ret_msg}").trim().to_string())
                }
            });
        warn!("⚠️  Error frame from {}: {}", client.url(), error);

        if is_auth || matches!(error, ExchangeError::AuthenticationError(_)) {
            client.reject(error, Some(AUTHENTICATED));
            client.remove_subscription(AUTHENTICATED);
            return true;
        }

        if error.is_connection_fatal() {
            client.on_error(error);
            return true;
        }

        let request_id = safe_string(message, &["id", "req_id"]);
        let topic = safe_string(message, &["dataType", "topic"]);
        let correlated = client.find_subscriptions(|subscription| {
            (request_id.is_some() && subscription.request_id == request_id)
                || (topic.is_some() && subscription.topic == topic)
        });

        if correlated.is_empty() {
            client.reject(error, None);
            return true;
        }
        for (subscribe_hash, subscription) in correlated {
            client.remove_subscription(&subscribe_hash);
            client.reject(error.clone(), Some(&subscription.message_hash));
        }
        true
    }

    fn handle_subscription_status(&self, client: &StreamingClient, message: &Value) {
        let request_id = safe_string(message, &["id", "req_id"]);
        let topic = safe_string(message, &["dataType", "topic"]);
        let acknowledged = client.acknowledge(request_id.as_deref(), topic.as_deref());
        debug!("📬 Subscription ack {:?} / {:?} ({} matched)", request_id, topic, acknowledged);
    }

    fn handle_authenticate(&self, client: &StreamingClient, message: &Value) {
        if message.get("success").and_then(Value::as_bool) == Some(true) {
            info!("🔐 Authenticated on {}", client.url());
            client.resolve(StreamUpdate::Message(message.clone()), AUTHENTICATED);
        } else {
            let error = ExchangeError::AuthenticationError(format!("{} {}", self.config.id, message));
            client.reject(error, Some(AUTHENTICATED));
            client.remove_subscription(AUTHENTICATED);
        }
    }

    fn handle_order_book(&self, client: &StreamingClient, message: &Value, topic: &str) {
        let data = message.get("data").unwrap_or(&Value::Null);
        let Some(market_id) = safe_string(data, &["s", "symbol"]).or_else(|| segment(topic, 2).map(str::to_string))
        else {
            warn!("Order book frame without market: {}", message);
            return;
        };
        let market = self.markets.safe_market(&market_id);
        let update = match self.parser.parse_order_book(message, &market) {
            Ok(update) => update,
            Err(e) => {
                warn!("Dropping order book frame: {}", e);
                return;
            }
        };
        let is_delta = safe_string(message, &["type"]).is_some_and(|kind| kind == "delta");

        let snapshot = {
            let mut store = self.store.borrow_mut();
            let book = store
                .orderbooks
                .entry(market.symbol.clone())
                .or_insert_with(|| OrderBook::new(&market.symbol, None));
            let applied = if is_delta { book.apply_delta(update) } else { book.reset(update) };
            if !applied {
                return;
            }
            book.clone()
        };
        client.resolve(StreamUpdate::OrderBook(snapshot), &hash::order_book(&market.symbol));
    }

    fn handle_trades(&self, client: &StreamingClient, message: &Value, topic: &str) {
        let data = message.get("data");
        let raw_trades = match data {
            Some(Value::Object(object)) if object.contains_key("trades") => records(object.get("trades")),
            other => records(other),
        };
        let fallback_id = topic.rsplit('.').next().unwrap_or_default().to_string();

        let mut touched: Vec<String> = Vec::new();
        let mut store = self.store.borrow_mut();
        for raw in raw_trades {
            let market_id = safe_string(raw, &["s", "symbol"]).unwrap_or_else(|| fallback_id.clone());
            let market = self.markets.safe_market(&market_id);
            match self.parser.parse_trade(raw, &market) {
                Ok(trade) => {
                    store
                        .trades
                        .entry(market.symbol.clone())
                        .or_insert_with(|| {
                            ArrayCache::new(self.config.trades_limit).with_new_updates(self.config.new_updates)
                        })
                        .append(trade);
                    if !touched.contains(&market.symbol) {
                        touched.push(market.symbol);
                    }
                }
                Err(e) => warn!("Dropping trade: {}", e),
            }
        }

        let resolved: Vec<(String, StreamUpdate)> = touched
            .into_iter()
            .filter_map(|symbol| {
                let cache = store.trades.get(&symbol)?;
                Some((hash::trades(&symbol), StreamUpdate::Trades(cache.to_vec())))
            })
            .collect();
        drop(store);
        for (message_hash, update) in resolved {
            client.resolve(update, &message_hash);
        }
    }

    fn handle_ticker(&self, client: &StreamingClient, message: &Value, topic: &str) {
        let data = message.get("data");
        let raw_tickers = match data {
            Some(Value::Object(object)) if object.contains_key("contracts") => records(object.get("contracts")),
            other => records(other),
        };
        let now = milliseconds() as i64;

        for raw in raw_tickers {
            let Some(market_id) = safe_string(raw, &["s", "symbol"]).or_else(|| segment(topic, 2).map(str::to_string))
            else {
                continue;
            };
            let market = self.markets.safe_market(&market_id);
            let ticker = match self.parser.parse_ticker(raw, &market, now) {
                Ok(ticker) => ticker,
                Err(e) => {
                    warn!("Dropping ticker: {}", e);
                    continue;
                }
            };
            self.store
                .borrow_mut()
                .tickers
                .insert(market.symbol.clone(), ticker.clone());
            client.resolve(StreamUpdate::Ticker(ticker), &hash::ticker(&market.symbol));
        }
    }

    fn handle_ohlcv(&self, client: &StreamingClient, message: &Value, topic: &str) {
        let (Some(market_id), Some(interval)) = (segment(topic, 2), segment(topic, 3)) else {
            warn!("Kline frame with malformed topic {}", topic);
            return;
        };
        let market = self.markets.safe_market(market_id);
        let timeframe = self.unified_timeframe(client, interval);

        let candles: Vec<&Value> = match message.get("data") {
            Some(single @ Value::Array(items)) if items.first().is_some_and(Value::is_number) => vec![single],
            other => records(other),
        };

        let snapshot = {
            let mut store = self.store.borrow_mut();
            let cache = store
                .ohlcvs
                .entry(market.symbol.clone())
                .or_default()
                .entry(timeframe.clone())
                .or_insert_with(|| {
                    ArrayCacheByTimestamp::new(self.config.ohlcv_limit).with_new_updates(self.config.new_updates)
                });
            for raw in candles {
                match self.parser.parse_ohlcv(raw, &market) {
                    Ok(candle) => cache.append(candle),
                    Err(e) => warn!("Dropping candle: {}", e),
                }
            }
            cache.to_vec()
        };
        client.resolve(StreamUpdate::Ohlcv(snapshot), &hash::ohlcv(&market.symbol, &timeframe));
    }

    fn handle_orders(&self, client: &StreamingClient, message: &Value) {
        let mut touched: Vec<String> = Vec::new();
        let mut store = self.store.borrow_mut();
        let cache = store.orders.get_or_insert_with(|| {
            ArrayCacheBySymbolById::new(self.config.orders_limit).with_new_updates(self.config.new_updates)
        });
        for raw in records(message.get("data")) {
            let market = self.markets.safe_market(&safe_string(raw, &["s", "symbol"]).unwrap_or_default());
            match self.parser.parse_order(raw, &market) {
                Ok(order) => {
                    cache.append(order);
                    if !touched.contains(&market.symbol) {
                        touched.push(market.symbol);
                    }
                }
                Err(e) => warn!("Dropping order: {}", e),
            }
        }
        if touched.is_empty() {
            return;
        }

        let all = cache.to_vec();
        drop(store);
        for symbol in touched {
            let for_symbol = all.iter().filter(|o| o.symbol == symbol).cloned().collect();
            client.resolve(StreamUpdate::Orders(for_symbol), &hash::orders(Some(&symbol)));
        }
        client.resolve(StreamUpdate::Orders(all), &hash::orders(None));
    }

    fn handle_my_trades(&self, client: &StreamingClient, message: &Value) {
        let mut touched: Vec<String> = Vec::new();
        let mut store = self.store.borrow_mut();
        let cache = store.my_trades.get_or_insert_with(|| {
            ArrayCacheBySymbolById::new(self.config.trades_limit).with_new_updates(self.config.new_updates)
        });
        for raw in records(message.get("data")) {
            let market = self.markets.safe_market(&safe_string(raw, &["s", "symbol"]).unwrap_or_default());
            match self.parser.parse_trade(raw, &market) {
                Ok(trade) => {
                    cache.append(trade);
                    if !touched.contains(&market.symbol) {
                        touched.push(market.symbol);
                    }
                }
                Err(e) => warn!("Dropping fill: {}", e),
            }
        }
        if touched.is_empty() {
            return;
        }

        let all = cache.to_vec();
        drop(store);
        for symbol in touched {
            let for_symbol = all.iter().filter(|t| t.symbol == symbol).cloned().collect();
            client.resolve(StreamUpdate::Trades(for_symbol), &hash::my_trades(Some(&symbol)));
        }
        client.resolve(StreamUpdate::Trades(all), &hash::my_trades(None));
    }

    fn handle_balance(&self, client: &StreamingClient, message: &Value, topic: &str) {
        let data = message.get("data");
        let timestamp = safe_integer(message, &["ts", "E"]);
        let default_account = if topic == "outboundAccountInfo" { "spot" } else { "contract" };

        let mut updates: BTreeMap<String, Balances> = BTreeMap::new();
        for entry in records(data) {
            let (account, coins) = if entry.get("B").is_some() {
                ("spot".to_string(), records(entry.get("B")))
            } else if entry.get("coin").is_some() {
                let account = safe_string(entry, &["accountType"])
                    .map(|a| a.to_ascii_lowercase())
                    .unwrap_or_else(|| default_account.to_string());
                (account, records(entry.get("coin")))
            } else {
                (default_account.to_string(), vec![entry])
            };

            let update = updates.entry(account.clone()).or_insert_with(|| Balances {
                timestamp,
                datetime: timestamp.and_then(iso8601),
                ..Balances::new(account)
            });
            for raw in coins {
                match self.parser.parse_balance(raw) {
                    Ok((currency, balance)) => {
                        update.currencies.insert(currency, balance);
                    }
                    Err(e) => warn!("Dropping balance entry: {}", e),
                }
            }
        }

        for (account, update) in updates {
            let merged = {
                let mut store = self.store.borrow_mut();
                let stored = store
                    .balances
                    .entry(account.clone())
                    .or_insert_with(|| Balances::new(account.clone()));
                stored.merge(update);
                stored.clone()
            };
            client.resolve(StreamUpdate::Balance(merged), &hash::balances(&account));
        }
    }

    /// Unified timeframe of an exchange interval, per market family
    fn unified_timeframe(&self, client: &StreamingClient, interval: &str) -> String {
        let table = if super::is_spot(client.url()) {
            &self.config.spot_timeframes
        } else {
            &self.config.contract_timeframes
        };
        table
            .iter()
            .find(|(_, exchange)| exchange.as_str() == interval)
            .map(|(unified, _)| unified.clone())
            .unwrap_or_else(|| interval.to_string())
    }
}

impl MessageHandler for ExchangeCore {
    fn handle_message(&self, client: &StreamingClient, message: Value) {
        self.dispatch(client, message);
    }

    fn ping(&self, client: &StreamingClient) -> Option<OutboundFrame> {
        match self.config.streaming.ping {
            PingMode::Json => Some(json!({ "req_id": client.next_request_id(), "op": "ping" }).into()),
            PingMode::Text => Some("ping".into()),
            PingMode::Protocol => None,
        }
    }

    fn on_connected(&self, client: &StreamingClient) {
        debug!("Client for {} ready", client.url());
    }

    fn on_error(&self, client: &StreamingClient, _error: &ExchangeError) {
        self.forget_client(client);
    }

    fn on_close(&self, client: &StreamingClient, _error: &ExchangeError) {
        self.forget_client(client);
    }
}
