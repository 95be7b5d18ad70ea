//! Reference exchange adapter
//!
//! `ProExchange` owns one [`StreamingClient`] per URL, the caches every
//! handler writes into, and the topic router. Public methods build the
//! subscribe frame and message hash for a stream and await the hash; the
//! handlers in [`handlers`] resolve it.
//!
//! Clients are never resurrected: once a client errors or closes it is
//! dropped from the table, and the next `watch_*` call dials a fresh one.

pub mod auth;
pub mod handlers;
pub mod parsers;
mod watch;

pub use auth::{Credentials, Signer};
pub use handlers::{default_router, Channel};
pub use parsers::{DefaultParser, RecordParser};

use crate::cache::{ArrayCache, ArrayCacheBySymbolById, ArrayCacheByTimestamp};
use crate::client::{ClientOptions, StreamingClient, Subscription};
use crate::config::ExchangeConfig;
use crate::dispatcher::{MessageHandler, Router};
use crate::errors::{ExchangeError, Result};
use crate::future::WsFuture;
use crate::orderbook::OrderBook;
use crate::transport::Connector;
use crate::types::{Balances, Markets, Ohlcv, Order, StreamUpdate, Ticker, Trade};
use crate::websocket::WebSocketConnector;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::{debug, info};
use url::Url;

/// Message hash of the authentication waiter
pub const AUTHENTICATED: &str = "authenticated";

/// Message-hash naming, one namespace per concern
pub mod hash {
    pub fn order_book(symbol: &str) -> String {
        format!("orderbook:{symbol}")
    }

    pub fn trades(symbol: &str) -> String {
        format!("trade:{symbol}")
    }

    pub fn ticker(symbol: &str) -> String {
        format!("ticker:{symbol}")
    }

    pub fn ohlcv(symbol: &str, timeframe: &str) -> String {
        format!("ohlcv:{symbol}:{timeframe}")
    }

    pub fn orders(symbol: Option<&str>) -> String {
        match symbol {
            Some(symbol) => format!("orders:{symbol}"),
            None => "orders".to_string(),
        }
    }

    pub fn my_trades(symbol: Option<&str>) -> String {
        match symbol {
            Some(symbol) => format!("myTrades:{symbol}"),
            None => "myTrades".to_string(),
        }
    }

    pub fn balances(account: &str) -> String {
        format!("balances:{account}")
    }
}

/// Spot endpoints carry `spot` in their URL
pub(crate) fn is_spot(url: &Url) -> bool {
    url.as_str().contains("spot")
}

/// Streamed state, mutated only from dispatch callbacks
#[derive(Default)]
pub(crate) struct Store {
    pub orderbooks: HashMap<String, OrderBook>,
    pub trades: HashMap<String, ArrayCache<Trade>>,
    pub tickers: HashMap<String, Ticker>,
    pub ohlcvs: HashMap<String, HashMap<String, ArrayCacheByTimestamp<Ohlcv>>>,
    pub orders: Option<ArrayCacheBySymbolById<Order>>,
    pub my_trades: Option<ArrayCacheBySymbolById<Trade>>,
    pub balances: HashMap<String, Balances>,
}

pub(crate) struct ExchangeCore {
    me: Weak<ExchangeCore>,
    pub(crate) config: ExchangeConfig,
    pub(crate) markets: Markets,
    pub(crate) parser: Box<dyn RecordParser>,
    pub(crate) router: Router<Channel>,
    connector: Rc<dyn Connector>,
    clients: RefCell<HashMap<String, StreamingClient>>,
    pub(crate) store: RefCell<Store>,
}

impl ExchangeCore {
    /// Live client for `url`, dialing a fresh one if the last one is gone
    fn client(&self, url: &Url) -> StreamingClient {
        let mut clients = self.clients.borrow_mut();
        if let Some(existing) = clients.get(url.as_str()) {
            if !existing.status().is_terminal() {
                return existing.clone();
            }
        }

        debug!("New streaming client for {}", url);
        let handler: Weak<dyn MessageHandler> = self.me.clone();
        let client = StreamingClient::new(
            url.clone(),
            Rc::clone(&self.connector),
            ClientOptions::from(&self.config.streaming),
            handler,
        );
        clients.insert(url.to_string(), client.clone());
        client
    }

    pub(crate) fn forget_client(&self, client: &StreamingClient) {
        let mut clients = self.clients.borrow_mut();
        if clients
            .get(client.url().as_str())
            .is_some_and(|registered| registered.ptr_eq(client))
        {
            clients.remove(client.url().as_str());
        }
    }

    /// Subscribe to `topic` under `message_hash` (also the subscribe hash)
    fn watch_topic(&self, url: &Url, message_hash: &str, topic: &str) -> WsFuture<StreamUpdate> {
        let client = self.client(url);
        let request_id = client.next_request_id().to_string();
        let frame = json!({
            "id": request_id,
            "reqType": "sub",
            "dataType": topic,
        });
        let subscription = Subscription::new(message_hash)
            .with_request_id(request_id)
            .with_topic(topic);
        client.watch(message_hash, Some(frame.into()), Some(message_hash), Some(subscription))
    }

    /// Drop the subscription, tell the server, and fail any waiter
    fn unwatch_topic(&self, url: &Url, message_hash: &str, topic: &str) -> Result<()> {
        let Some(client) = self.clients.borrow().get(url.as_str()).cloned() else {
            return Ok(());
        };
        if client.remove_subscription(message_hash).is_some() && client.is_open() {
            client.send(json!({
                "id": client.next_request_id().to_string(),
                "reqType": "unsub",
                "dataType": topic,
            }))?;
        }
        if client.has_pending(message_hash) {
            client.reject(ExchangeError::Unsubscribed(message_hash.to_string()), Some(message_hash));
        }
        info!("🔕 Unsubscribed {}", message_hash);
        Ok(())
    }
}

/// Streaming exchange over the reference envelope
pub struct ProExchange {
    core: Rc<ExchangeCore>,
}

impl ProExchange {
    /// Exchange dialing real WebSockets
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        let connector = WebSocketConnector::new().with_max_message_bytes(config.streaming.max_message_bytes);
        Self::with_connector(config, Rc::new(connector))
    }

    pub fn with_connector(config: ExchangeConfig, connector: Rc<dyn Connector>) -> Result<Self> {
        Self::with_parts(config, connector, Box::new(DefaultParser), default_router())
    }

    /// Fully custom wiring: transport, record parser and topic table
    pub fn with_parts(
        config: ExchangeConfig,
        connector: Rc<dyn Connector>,
        parser: Box<dyn RecordParser>,
        router: Router<Channel>,
    ) -> Result<Self> {
        config.validate()?;
        let markets = Markets::new(config.markets.clone());
        info!(
            "🚀 {} streaming exchange ready ({} markets, {})",
            config.id,
            markets.len(),
            config.ws_url
        );

        let core = Rc::new_cyclic(|me| ExchangeCore {
            me: me.clone(),
            config,
            markets,
            parser,
            router,
            connector,
            clients: RefCell::new(HashMap::new()),
            store: RefCell::new(Store::default()),
        });
        Ok(Self { core })
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.core.config
    }

    pub fn markets(&self) -> &Markets {
        &self.core.markets
    }

    /// Client for `url`, created on first use
    pub fn client(&self, url: &Url) -> StreamingClient {
        self.core.client(url)
    }

    /// Registered client for `url` without creating one
    pub fn existing_client(&self, url: &Url) -> Option<StreamingClient> {
        self.core.clients.borrow().get(url.as_str()).cloned()
    }

    /// Authenticate the private connection once
    ///
    /// Concurrent and repeated calls share one auth waiter. A failed attempt
    /// clears it, so the next call signs and sends a fresh frame.
    pub async fn authenticate(&self) -> Result<()> {
        let url = self.core.config.private_url()?;
        let client = self.core.client(&url);

        // A waiter that already failed is never replayed
        let existing = client
            .subscription(AUTHENTICATED)
            .and_then(|s| s.future)
            .filter(|future| !matches!(future.peek(), Some(Err(_))));
        let future = match existing {
            Some(future) => future,
            None => {
                let credentials = self.core.config.credentials.clone().ok_or_else(|| {
                    ExchangeError::MissingCredentials("apiKey and secret are required".to_string())
                })?;
                let frame = Signer::new(credentials)?.auth_frame()?;
                client.remove_subscription(AUTHENTICATED);
                // The fresh frame supersedes a failure reported while nobody waited
                if let Some(stale) = client.clear_rejection(AUTHENTICATED) {
                    debug!("Discarding earlier auth failure on {}: {}", url, stale);
                }
                info!("🔐 Authenticating on {}", url);
                let future = client.watch(AUTHENTICATED, Some(frame.into()), None, None);
                if !matches!(future.peek(), Some(Err(_))) {
                    client.set_subscription(
                        AUTHENTICATED,
                        Subscription {
                            future: Some(future.clone()),
                            ..Subscription::new(AUTHENTICATED)
                        },
                    );
                }
                future
            }
        };
        future.await.map(|_| ())
    }

    /// Close every client; waiters see `ClosedByUser`
    pub fn close_all(&self) {
        let clients: Vec<StreamingClient> = self.core.clients.borrow_mut().drain().map(|(_, c)| c).collect();
        for client in clients {
            client.close();
        }
    }

    pub fn order_book(&self, symbol: &str) -> Option<OrderBook> {
        self.core.store.borrow().orderbooks.get(symbol).cloned()
    }

    pub fn trades(&self, symbol: &str) -> Vec<Trade> {
        self.core
            .store
            .borrow()
            .trades
            .get(symbol)
            .map(ArrayCache::to_vec)
            .unwrap_or_default()
    }

    pub fn ticker(&self, symbol: &str) -> Option<Ticker> {
        self.core.store.borrow().tickers.get(symbol).cloned()
    }

    pub fn ohlcv(&self, symbol: &str, timeframe: &str) -> Vec<Ohlcv> {
        self.core
            .store
            .borrow()
            .ohlcvs
            .get(symbol)
            .and_then(|by_timeframe| by_timeframe.get(timeframe))
            .map(ArrayCacheByTimestamp::to_vec)
            .unwrap_or_default()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.core
            .store
            .borrow()
            .orders
            .as_ref()
            .map(ArrayCacheBySymbolById::to_vec)
            .unwrap_or_default()
    }

    pub fn my_trades(&self) -> Vec<Trade> {
        self.core
            .store
            .borrow()
            .my_trades
            .as_ref()
            .map(ArrayCacheBySymbolById::to_vec)
            .unwrap_or_default()
    }

    pub fn balance(&self, account: &str) -> Option<Balances> {
        self.core.store.borrow().balances.get(account).cloned()
    }
}
