//! Streaming client: one connection, many logical waiters
//!
//! A `StreamingClient` multiplexes every subscription for one URL over a
//! single [`Connection`]. Waiters register a [`WsFuture`] under a message
//! hash; the [`MessageHandler`] resolves or rejects those hashes as frames
//! arrive.
//!
//! ## Lifecycle
//!
//! `Idle → Connecting → Open → {Closing, Errored} → Closed`. A client never
//! reconnects; once it is terminal the owner replaces it with a fresh one.
//!
//! ## Event loop
//!
//! One dispatch task per client consumes [`ConnectionEvent`]s in order and
//! owns the keepalive deadline, so frames, pings and failures are never
//! handled concurrently.

use crate::config::StreamingOptions;
use crate::connection::{Connection, ConnectionEvent, ConnectionSettings};
use crate::dispatcher::MessageHandler;
use crate::errors::{ExchangeError, Result};
use crate::future::WsFuture;
use crate::transport::{Connector, OutboundFrame};
use crate::types::StreamUpdate;
use serde_json::Value;
use sriquant_core::milliseconds;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// Close code used for client-initiated closes
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl ClientStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed | Self::Errored)
    }
}

/// Effective client timing, after clamping
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub keep_alive: Option<Duration>,
    pub max_ping_pong_misses: u32,
    pub backoff_delay: Option<Duration>,
    pub connection: ConnectionSettings,
}

impl From<&StreamingOptions> for ClientOptions {
    fn from(options: &StreamingOptions) -> Self {
        Self {
            keep_alive: options.keep_alive(),
            max_ping_pong_misses: options.ping_pong_misses(),
            backoff_delay: options.backoff_delay(),
            connection: options.connection_settings(),
        }
    }
}

/// What was requested under a subscribe hash
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    pub message_hash: String,
    pub request_id: Option<String>,
    pub topic: Option<String>,
    pub acknowledged: bool,
    /// Shared waiter, reused by idempotent operations such as authentication
    pub future: Option<WsFuture<StreamUpdate>>,
}

impl Subscription {
    pub fn new(message_hash: impl Into<String>) -> Self {
        Self {
            message_hash: message_hash.into(),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

struct ClientState {
    status: ClientStatus,
    connection: Option<Connection>,
    connected: WsFuture<()>,
    started_connecting: bool,
    futures: HashMap<String, WsFuture<StreamUpdate>>,
    rejections: HashMap<String, ExchangeError>,
    subscriptions: HashMap<String, Subscription>,
    error: Option<ExchangeError>,
    last_pong: u64,
    next_request_id: u64,
}

struct ClientInner {
    url: Url,
    connector: Rc<dyn Connector>,
    options: ClientOptions,
    handler: Weak<dyn MessageHandler>,
    state: RefCell<ClientState>,
}

/// Cheaply cloneable handle to one streaming client
#[derive(Clone)]
pub struct StreamingClient {
    inner: Rc<ClientInner>,
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("url", &self.inner.url.as_str())
            .field("status", &self.status())
            .finish()
    }
}

impl StreamingClient {
    pub fn new(
        url: Url,
        connector: Rc<dyn Connector>,
        options: ClientOptions,
        handler: Weak<dyn MessageHandler>,
    ) -> Self {
        Self {
            inner: Rc::new(ClientInner {
                url,
                connector,
                options,
                handler,
                state: RefCell::new(ClientState {
                    status: ClientStatus::Idle,
                    connection: None,
                    connected: WsFuture::new(),
                    started_connecting: false,
                    futures: HashMap::new(),
                    rejections: HashMap::new(),
                    subscriptions: HashMap::new(),
                    error: None,
                    last_pong: 0,
                    next_request_id: 0,
                }),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn status(&self) -> ClientStatus {
        self.inner.state.borrow().status
    }

    pub fn is_open(&self) -> bool {
        let state = self.inner.state.borrow();
        state.status == ClientStatus::Open
            && state.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Last fatal error, if any
    pub fn error(&self) -> Option<ExchangeError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn last_pong(&self) -> u64 {
        self.inner.state.borrow().last_pong
    }

    pub fn connection_established(&self) -> Option<u64> {
        self.inner
            .state
            .borrow()
            .connection
            .as_ref()
            .and_then(Connection::connection_established)
    }

    /// Monotonic per-client request id, starting at 1
    pub fn next_request_id(&self) -> u64 {
        let mut state = self.inner.state.borrow_mut();
        state.next_request_id += 1;
        state.next_request_id
    }

    /// True if both handles refer to the same client
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn handler(&self) -> Option<Rc<dyn MessageHandler>> {
        self.inner.handler.upgrade()
    }

    // ---------------------------------------------------------------------
    // Futures table
    // ---------------------------------------------------------------------

    /// Pending future for `message_hash`, created if absent
    ///
    /// A rejection stored for this hash before anyone was waiting is
    /// delivered to the new future immediately and then forgotten.
    pub fn future(&self, message_hash: &str) -> WsFuture<StreamUpdate> {
        let mut state = self.inner.state.borrow_mut();
        let future = match state.futures.get(message_hash) {
            Some(existing) if !existing.is_resolved() => existing.clone(),
            _ => {
                let created = WsFuture::new();
                state.futures.insert(message_hash.to_string(), created.clone());
                created
            }
        };

        if let Some(error) = state.rejections.remove(message_hash) {
            state.futures.remove(message_hash);
            future.reject(error);
        }
        future
    }

    /// Resolve the pending future for `message_hash`; no-op without a waiter
    pub fn resolve(&self, value: StreamUpdate, message_hash: &str) -> bool {
        let pending = self.inner.state.borrow_mut().futures.remove(message_hash);
        match pending {
            Some(future) => future.resolve(value),
            None => false,
        }
    }

    /// Reject one hash, or every pending future when `message_hash` is `None`
    ///
    /// Rejecting a hash nobody waits for stores the error until `future()`
    /// is next called for it.
    pub fn reject(&self, error: ExchangeError, message_hash: Option<&str>) {
        match message_hash {
            Some(hash) => {
                let pending = {
                    let mut state = self.inner.state.borrow_mut();
                    let pending = state.futures.remove(hash).filter(|f| !f.is_resolved());
                    if pending.is_none() {
                        state.rejections.insert(hash.to_string(), error.clone());
                    }
                    pending
                };
                if let Some(future) = pending {
                    future.reject(error);
                }
            }
            None => {
                let pending: Vec<_> = {
                    let mut state = self.inner.state.borrow_mut();
                    state.futures.drain().map(|(_, future)| future).collect()
                };
                for future in pending {
                    future.reject(error.clone());
                }
            }
        }
    }

    /// Drop a rejection stored for `message_hash` before anyone waited on it
    pub fn clear_rejection(&self, message_hash: &str) -> Option<ExchangeError> {
        self.inner.state.borrow_mut().rejections.remove(message_hash)
    }

    pub fn has_pending(&self, message_hash: &str) -> bool {
        self.inner
            .state
            .borrow()
            .futures
            .get(message_hash)
            .is_some_and(|f| !f.is_resolved())
    }

    pub fn pending_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.inner.state.borrow().futures.keys().cloned().collect();
        hashes.sort();
        hashes
    }

    // ---------------------------------------------------------------------
    // Subscriptions table
    // ---------------------------------------------------------------------

    pub fn subscription(&self, subscribe_hash: &str) -> Option<Subscription> {
        self.inner.state.borrow().subscriptions.get(subscribe_hash).cloned()
    }

    pub fn has_subscription(&self, subscribe_hash: &str) -> bool {
        self.inner.state.borrow().subscriptions.contains_key(subscribe_hash)
    }

    pub fn set_subscription(&self, subscribe_hash: &str, subscription: Subscription) {
        self.inner
            .state
            .borrow_mut()
            .subscriptions
            .insert(subscribe_hash.to_string(), subscription);
    }

    pub fn remove_subscription(&self, subscribe_hash: &str) -> Option<Subscription> {
        self.inner.state.borrow_mut().subscriptions.remove(subscribe_hash)
    }

    /// Every subscription matching `predicate`, ordered by subscribe hash
    pub fn find_subscriptions<P>(&self, predicate: P) -> Vec<(String, Subscription)>
    where
        P: Fn(&Subscription) -> bool,
    {
        let state = self.inner.state.borrow();
        let mut matches: Vec<(String, Subscription)> = state
            .subscriptions
            .iter()
            .filter(|(_, subscription)| predicate(subscription))
            .map(|(hash, subscription)| (hash.clone(), subscription.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        matches
    }

    /// Mark subscriptions sent with `request_id` or for `topic` as acknowledged
    pub fn acknowledge(&self, request_id: Option<&str>, topic: Option<&str>) -> usize {
        let mut state = self.inner.state.borrow_mut();
        let mut acknowledged = 0;
        for subscription in state.subscriptions.values_mut() {
            let by_id = request_id.is_some() && subscription.request_id.as_deref() == request_id;
            let by_topic = topic.is_some() && subscription.topic.as_deref() == topic;
            if by_id || by_topic {
                subscription.acknowledged = true;
                acknowledged += 1;
            }
        }
        acknowledged
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.state.borrow().subscriptions.len()
    }

    // ---------------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------------

    /// Start connecting once; every caller shares the same `connected` future
    pub fn connect(&self) -> WsFuture<()> {
        let mut state = self.inner.state.borrow_mut();
        if !state.started_connecting {
            state.started_connecting = true;
            state.status = ClientStatus::Connecting;
            let client = self.clone();
            monoio::spawn(async move { client.establish().await });
        }
        state.connected.clone()
    }

    async fn establish(self) {
        if let Some(delay) = self.inner.options.backoff_delay {
            debug!("Waiting {:?} before connecting to {}", delay, self.inner.url);
            monoio::time::sleep(delay).await;
        }
        if self.inner.state.borrow().error.is_some() {
            debug!("Client for {} closed before connecting", self.inner.url);
            return;
        }

        info!("🔗 Connecting to {}", self.inner.url);
        let (connection, events) = Connection::open(
            &self.inner.url,
            Rc::clone(&self.inner.connector),
            self.inner.options.connection.clone(),
        );
        self.inner.state.borrow_mut().connection = Some(connection);
        self.run(events).await;
    }

    async fn run(self, events: flume::Receiver<ConnectionEvent>) {
        let mut next_ping: Option<Instant> = None;

        loop {
            let received = match next_ping {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match monoio::time::timeout(wait, events.recv_async()).await {
                        Ok(received) => received,
                        Err(_) => {
                            next_ping = self.inner.options.keep_alive.map(|every| Instant::now() + every);
                            self.on_ping_tick();
                            continue;
                        }
                    }
                }
                None => events.recv_async().await,
            };

            let Ok(event) = received else {
                debug!("Event channel for {} closed", self.inner.url);
                break;
            };

            match event {
                ConnectionEvent::Open => {
                    self.on_open();
                    next_ping = self.inner.options.keep_alive.map(|every| Instant::now() + every);
                }
                ConnectionEvent::Frame(message) => self.on_message(message),
                ConnectionEvent::Pong => self.on_pong(),
                ConnectionEvent::Error(error) => {
                    next_ping = None;
                    self.on_error(error);
                }
                ConnectionEvent::Closed(code) => {
                    self.on_close(code);
                    break;
                }
            }
        }
    }

    fn on_open(&self) {
        let connected = {
            let mut state = self.inner.state.borrow_mut();
            if state.status != ClientStatus::Connecting {
                return;
            }
            state.status = ClientStatus::Open;
            state.last_pong = milliseconds();
            state.connected.clone()
        };
        info!("✅ Connected to {}", self.inner.url);
        connected.resolve(());
        if let Some(handler) = self.handler() {
            handler.on_connected(self);
        }
    }

    fn on_message(&self, message: Value) {
        if self.status() != ClientStatus::Open {
            debug!("Dropping frame received while {:?}", self.status());
            return;
        }
        match self.handler() {
            Some(handler) => handler.handle_message(self, message),
            None => debug!("No handler for frame from {}", self.inner.url),
        }
    }

    /// Record liveness; called for protocol and application pongs
    pub fn on_pong(&self) {
        self.inner.state.borrow_mut().last_pong = milliseconds();
    }

    fn on_ping_tick(&self) {
        let Some(keep_alive) = self.inner.options.keep_alive else {
            return;
        };
        if !self.is_open() {
            return;
        }

        let budget = keep_alive.as_millis() as u64 * u64::from(self.inner.options.max_ping_pong_misses);
        if self.last_pong() + budget < milliseconds() {
            self.on_error(ExchangeError::RequestTimeout(format!(
                "Connection to {} timed out due to a ping-pong keepalive missing on time",
                self.inner.url
            )));
            return;
        }

        let frame = self
            .handler()
            .and_then(|handler| handler.ping(self))
            .unwrap_or(OutboundFrame::Ping(Vec::new()));
        debug!("💓 Keepalive ping to {}", self.inner.url);
        if let Err(e) = self.send(frame) {
            self.on_error(e);
        }
    }

    /// Connection-fatal failure: reject everyone, notify, close the socket
    pub fn on_error(&self, error: ExchangeError) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.error.is_none() {
                state.error = Some(error.clone());
            }
            if state.status != ClientStatus::Closed {
                state.status = ClientStatus::Errored;
            }
        }
        error!("❌ Streaming client {} failed: {}", self.inner.url, error);
        self.reset(error.clone());
        if let Some(handler) = self.handler() {
            handler.on_error(self, &error);
        }
        if let Some(connection) = self.inner.state.borrow().connection.as_ref() {
            connection.close(NORMAL_CLOSURE);
        }
    }

    fn on_close(&self, code: u16) {
        let (error, needs_reset) = {
            let mut state = self.inner.state.borrow_mut();
            let needs_reset = state.error.is_none();
            let error = state
                .error
                .get_or_insert_with(|| {
                    ExchangeError::NetworkError(format!(
                        "connection closed by remote server, closing code {code}"
                    ))
                })
                .clone();
            if state.status != ClientStatus::Errored {
                state.status = ClientStatus::Closed;
            }
            (error, needs_reset)
        };

        if needs_reset {
            warn!("🔌 {} closed by remote with code {}", self.inner.url, code);
            self.reset(error.clone());
        } else {
            info!("🔌 Connection to {} closed ({})", self.inner.url, code);
        }
        if let Some(handler) = self.handler() {
            handler.on_close(self, &error);
        }
    }

    fn reset(&self, error: ExchangeError) {
        let connected = self.inner.state.borrow().connected.clone();
        connected.reject(error.clone());
        self.reject(error, None);
    }

    /// Queue a frame on the open connection
    pub fn send(&self, frame: impl Into<OutboundFrame>) -> Result<()> {
        let frame = frame.into();
        let state = self.inner.state.borrow();
        match state.connection.as_ref() {
            Some(connection) => {
                if let Some(text) = frame.to_text() {
                    debug!("📤 {} <- {}", self.inner.url, text);
                }
                connection.send(frame)
            }
            None => Err(ExchangeError::NetworkError(format!(
                "connection to {} is not open",
                self.inner.url
            ))),
        }
    }

    /// User-initiated close: waiters see `ClosedByUser`
    pub fn close(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.status.is_terminal() {
                return;
            }
            state.error.get_or_insert(ExchangeError::ClosedByUser);
            state.status = ClientStatus::Closing;
        }
        info!("👋 Closing connection to {}", self.inner.url);
        self.reset(ExchangeError::ClosedByUser);

        let mut state = self.inner.state.borrow_mut();
        match state.connection.as_ref() {
            Some(connection) => connection.close(NORMAL_CLOSURE),
            // Never dialed; no close event will follow
            None => state.status = ClientStatus::Closed,
        }
    }

    // ---------------------------------------------------------------------
    // Subscribe
    // ---------------------------------------------------------------------

    /// Register interest in `message_hash` and send `request` once
    ///
    /// The request goes out only the first time `subscribe_hash` is seen.
    /// Without a subscribe hash, an already pending future is returned
    /// as-is and nothing is sent again.
    pub fn watch(
        &self,
        message_hash: &str,
        request: Option<OutboundFrame>,
        subscribe_hash: Option<&str>,
        subscription: Option<Subscription>,
    ) -> WsFuture<StreamUpdate> {
        if let Some(error) = self.error() {
            return WsFuture::rejected(error);
        }

        if subscribe_hash.is_none() && self.has_pending(message_hash) {
            return self.future(message_hash);
        }

        let future = self.future(message_hash);
        let first_subscribe = match subscribe_hash {
            Some(hash) => {
                let mut state = self.inner.state.borrow_mut();
                if state.subscriptions.contains_key(hash) {
                    false
                } else {
                    let record = subscription.unwrap_or_else(|| Subscription::new(message_hash));
                    state.subscriptions.insert(hash.to_string(), record);
                    true
                }
            }
            None => true,
        };

        let connected = self.connect();
        if let (true, Some(frame)) = (first_subscribe, request) {
            let client = self.clone();
            let message_hash = message_hash.to_string();
            let subscribe_hash = subscribe_hash.map(str::to_string);
            let waiter = future.clone();
            monoio::spawn(async move {
                let sent = match connected.await {
                    Ok(()) => client.send(frame),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    debug!("Subscribe for {} failed: {}", message_hash, e);
                    if let Some(hash) = subscribe_hash.as_deref() {
                        client.remove_subscription(hash);
                    }
                    client.forget(&message_hash, &waiter);
                    waiter.reject(e);
                }
            });
        }
        future
    }

    /// Drop `future` from the table if it is still the one registered
    fn forget(&self, message_hash: &str, future: &WsFuture<StreamUpdate>) {
        let mut state = self.inner.state.borrow_mut();
        if state.futures.get(message_hash).is_some_and(|f| f.ptr_eq(future)) {
            state.futures.remove(message_hash);
        }
    }
}
