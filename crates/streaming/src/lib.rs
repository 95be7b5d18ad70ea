//! # SriQuant.ai Streaming
//!
//! WebSocket streaming client and message dispatch for exchange market and
//! account data.
//!
//! ## Architecture
//!
//! - **One connection per URL** - a [`StreamingClient`] multiplexes every
//!   subscription for its endpoint
//! - **Message hashes** - waiters park on a [`WsFuture`] keyed by a string
//!   such as `orderbook:BTC/USDT`; handlers resolve them as frames arrive
//! - **Bounded caches** - trades, candles and orders are buffered between
//!   pushes and reads with oldest-first eviction
//! - **Ping/pong liveness** - a connection silent for longer than its miss
//!   budget is torn down with a timeout error
//! - **monoio native** - single-threaded, no locks, events consumed in order

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod future;
pub mod orderbook;
pub mod pro;
pub mod tls;
pub mod traits;
pub mod transport;
pub mod types;
pub mod websocket;

// Re-export main types
pub use cache::{ArrayCache, ArrayCacheBySymbolById, ArrayCacheByTimestamp, CacheRecord};
pub use client::{ClientOptions, ClientStatus, StreamingClient, Subscription};
pub use config::{ExchangeConfig, PingMode, StreamingOptions};
pub use connection::{Connection, ConnectionEvent};
pub use dispatcher::{MessageHandler, Router};
pub use errors::{ExceptionKind, ExceptionTable, ExchangeError, Result};
pub use future::WsFuture;
pub use orderbook::{BookSide, BookUpdate, OrderBook};
pub use pro::{Credentials, DefaultParser, ProExchange, RecordParser};
pub use traits::StreamingExchange;
pub use transport::{Connector, InboundFrame, OutboundFrame, Transport};
pub use types::*;
pub use websocket::{MonoioWebSocket, WebSocketConnector};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::client::{ClientStatus, StreamingClient};
    pub use crate::config::{ExchangeConfig, PingMode, StreamingOptions};
    pub use crate::errors::{ExchangeError, Result};
    pub use crate::orderbook::OrderBook;
    pub use crate::pro::{hash, Credentials, ProExchange};
    pub use crate::traits::StreamingExchange;
    pub use crate::types::*;
    pub use sriquant_core::prelude::*;
}
