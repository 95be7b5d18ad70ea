//! Exchange and streaming configuration
//!
//! Configuration is assembled once (builders or JSON) and handed to
//! `ProExchange::new`, which never mutates it afterwards.

use crate::codec::Compression;
use crate::connection::ConnectionSettings;
use crate::errors::{ExceptionTable, ExchangeError, Result};
use crate::pro::auth::Credentials;
use crate::types::Market;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Upper bound applied to the keepalive interval
pub const MAX_KEEP_ALIVE_MS: u64 = 5_000;

/// Lower bound applied to the tolerated pong misses
pub const MIN_PING_PONG_MISSES: u32 = 5;

/// Largest inbound WebSocket message accepted by default (16 MiB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// How keepalive pings are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PingMode {
    /// `{"req_id": n, "op": "ping"}`
    #[default]
    Json,
    /// Bare `ping` text frame
    Text,
    /// WebSocket ping control frame
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingOptions {
    /// Ping interval; 0 disables keepalive
    pub keep_alive_ms: u64,
    pub max_ping_pong_misses: u32,
    /// `None` waits for the connect forever
    pub connection_timeout_ms: Option<u64>,
    /// Socket poll slice of the connection task
    pub poll_interval_ms: u64,
    pub ping: PingMode,
    pub compression: Compression,
    /// Delay before the first connect attempt
    pub backoff_delay_ms: u64,
    /// Inbound messages announcing more bytes than this fail the connection
    pub max_message_bytes: usize,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            keep_alive_ms: 30_000,
            max_ping_pong_misses: 2,
            connection_timeout_ms: Some(10_000),
            poll_interval_ms: 10,
            ping: PingMode::Json,
            compression: Compression::None,
            backoff_delay_ms: 0,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl StreamingOptions {
    /// Keepalive interval after clamping, `None` when disabled
    pub fn keep_alive(&self) -> Option<Duration> {
        match self.keep_alive_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms.min(MAX_KEEP_ALIVE_MS))),
        }
    }

    pub fn ping_pong_misses(&self) -> u32 {
        self.max_ping_pong_misses.max(MIN_PING_PONG_MISSES)
    }

    pub fn backoff_delay(&self) -> Option<Duration> {
        (self.backoff_delay_ms > 0).then(|| Duration::from_millis(self.backoff_delay_ms))
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connection_timeout: self
                .connection_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            compression: self.compression,
        }
    }
}

fn timeframes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(unified, exchange)| (unified.to_string(), exchange.to_string()))
        .collect()
}

fn spot_timeframes() -> BTreeMap<String, String> {
    timeframes(&[
        ("1m", "1m"), ("3m", "3m"), ("5m", "5m"), ("15m", "15m"), ("30m", "30m"),
        ("1h", "1h"), ("2h", "2h"), ("4h", "4h"), ("6h", "6h"), ("12h", "12h"),
        ("1d", "1d"), ("1w", "1w"), ("1M", "1M"),
    ])
}

fn contract_timeframes() -> BTreeMap<String, String> {
    timeframes(&[
        ("1m", "1"), ("3m", "3"), ("5m", "5"), ("15m", "15"), ("30m", "30"),
        ("1h", "60"), ("2h", "120"), ("4h", "240"), ("6h", "360"), ("12h", "720"),
        ("1d", "D"), ("1w", "W"), ("1M", "M"),
    ])
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub id: String,
    pub ws_url: String,
    /// Endpoint for private channels; defaults to `ws_url`
    pub private_ws_url: Option<String>,
    pub streaming: StreamingOptions,
    pub trades_limit: usize,
    pub orders_limit: usize,
    pub ohlcv_limit: usize,
    /// Watchers only receive records appended since their previous read
    pub new_updates: bool,
    pub order_book_limits: Vec<usize>,
    pub default_order_book_limit: usize,
    pub spot_timeframes: BTreeMap<String, String>,
    pub contract_timeframes: BTreeMap<String, String>,
    pub markets: Vec<Market>,
    pub exceptions: ExceptionTable,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            id: "bingx".to_string(),
            ws_url: "wss://open-ws-swap.bingbon.pro/ws".to_string(),
            private_ws_url: None,
            streaming: StreamingOptions::default(),
            trades_limit: 1000,
            orders_limit: 1000,
            ohlcv_limit: 1000,
            new_updates: false,
            order_book_limits: vec![5, 10, 20, 50, 100],
            default_order_book_limit: 100,
            spot_timeframes: spot_timeframes(),
            contract_timeframes: contract_timeframes(),
            markets: Vec::new(),
            exceptions: ExceptionTable::default(),
            credentials: None,
        }
    }
}

impl ExchangeConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ExchangeError::ConfigurationError(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_private_url(mut self, url: impl Into<String>) -> Self {
        self.private_ws_url = Some(url.into());
        self
    }

    pub fn with_markets(mut self, markets: Vec<Market>) -> Self {
        self.markets = markets;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_env_credentials(mut self) -> Result<Self> {
        self.credentials = Some(Credentials::from_env()?);
        Ok(self)
    }

    pub fn with_streaming(mut self, streaming: StreamingOptions) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_exceptions(mut self, exceptions: ExceptionTable) -> Self {
        self.exceptions = exceptions;
        self
    }

    pub fn with_new_updates(mut self, enabled: bool) -> Self {
        self.new_updates = enabled;
        self
    }

    pub fn public_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.ws_url)?)
    }

    pub fn private_url(&self) -> Result<Url> {
        Ok(Url::parse(self.private_ws_url.as_deref().unwrap_or(&self.ws_url))?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ws_url.is_empty() {
            return Err(ExchangeError::ConfigurationError("ws_url is empty".to_string()));
        }
        self.public_url()?;
        self.private_url()?;

        for (name, limit) in [
            ("trades_limit", self.trades_limit),
            ("orders_limit", self.orders_limit),
            ("ohlcv_limit", self.ohlcv_limit),
        ] {
            if limit == 0 {
                return Err(ExchangeError::ConfigurationError(format!("{name} must be positive")));
            }
        }

        if self.streaming.max_message_bytes == 0 {
            return Err(ExchangeError::ConfigurationError(
                "max_message_bytes must be positive".to_string(),
            ));
        }

        if !self.order_book_limits.contains(&self.default_order_book_limit) {
            return Err(ExchangeError::ConfigurationError(format!(
                "default order book limit {} is not one of {:?}",
                self.default_order_book_limit, self.order_book_limits
            )));
        }
        Ok(())
    }
}
