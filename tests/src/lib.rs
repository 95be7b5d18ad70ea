//! SriQuant.ai streaming test harness
//!
//! Integration suites drive a real [`ProExchange`] over the in-memory
//! transport: the exchange dials a [`ChannelConnector`], and the test plays
//! the exchange server through [`ServerEnd`].
//!
//! ```text
//! cargo test -p sriquant-tests
//! ```

use serde_json::{json, Value};
use sriquant_streaming::transport::{channel_pair, ChannelConnector, ChannelServer, ServerEnd};
use sriquant_streaming::{
    Credentials, ExchangeConfig, Market, MarketType, ProExchange, Result, StreamingOptions,
};
use std::rc::Rc;

#[cfg(test)]
mod market_data_tests;
#[cfg(test)]
mod private_stream_tests;
#[cfg(test)]
mod property_tests;

pub const PUBLIC_URL: &str = "wss://stream.test.local/swap-market";
pub const PRIVATE_URL: &str = "wss://stream.test.local/swap-private";
pub const SPOT_PRIVATE_URL: &str = "wss://stream.test.local/spot/private";

pub fn markets() -> Vec<Market> {
    vec![
        Market::new("BTC-USDT", "BTC", "USDT", MarketType::Swap),
        Market::new("ETH-USDT", "ETH", "USDT", MarketType::Swap),
    ]
}

pub fn credentials() -> Credentials {
    Credentials::new("test-api-key", "test-api-secret")
}

/// Public + private endpoints, test markets, fast polling
pub fn test_config() -> ExchangeConfig {
    ExchangeConfig::new(PUBLIC_URL)
        .with_id("testex")
        .with_private_url(PRIVATE_URL)
        .with_markets(markets())
        .with_credentials(credentials())
        .with_streaming(StreamingOptions {
            poll_interval_ms: 1,
            ..StreamingOptions::default()
        })
}

/// Route test logs through the workspace subscriber
pub fn init_test_logging() {
    let _ = dotenv::dotenv();
    sriquant_core::init_logging();
}

/// An exchange wired to an in-memory server
pub struct Venue {
    pub exchange: ProExchange,
    pub connector: ChannelConnector,
    pub server: ChannelServer,
}

impl Venue {
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        init_test_logging();
        let (connector, server) = channel_pair();
        let exchange = ProExchange::with_connector(config, Rc::new(connector.clone()))?;
        Ok(Self {
            exchange,
            connector,
            server,
        })
    }

    /// Accept the next connection and read the frame the client sends first
    pub async fn accept_with_request(&self) -> (ServerEnd, Value) {
        let end = self.server.accept().await.expect("exchange never connected");
        let request = end.recv_json().await.expect("client sent nothing");
        (end, request)
    }
}

/// Next subscribe frame, skipping pings
pub async fn next_request(end: &ServerEnd) -> Value {
    loop {
        let frame = end.recv_json().await.expect("connection closed");
        if frame.get("op").and_then(Value::as_str) != Some("ping") {
            return frame;
        }
    }
}

pub fn push(end: &ServerEnd, topic: &str, data: Value) -> bool {
    end.push_json(&json!({ "dataType": topic, "data": data }))
}

pub fn trade_push(market_id: &str, trade_id: &str, ts: i64, price: &str, amount: &str) -> Value {
    json!({
        "dataType": format!("market.trade.detail.{market_id}"),
        "data": {
            "trades": [
                { "i": trade_id, "T": ts, "S": "Buy", "p": price, "v": amount }
            ]
        }
    })
}

pub fn depth_push(market_id: &str, kind: &str, ts: i64, bids: Value, asks: Value) -> Value {
    json!({
        "topic": format!("market.depth.{market_id}.step0.level100"),
        "type": kind,
        "ts": ts,
        "data": { "s": market_id, "bids": bids, "asks": asks }
    })
}

pub fn auth_ack(success: bool) -> Value {
    if success {
        json!({ "op": "auth", "success": true, "ret_msg": "" })
    } else {
        json!({ "op": "auth", "success": false, "ret_msg": "invalid api key" })
    }
}
