//! Transport seam between the streaming client and a physical socket
//!
//! The client only talks to [`Connector`] and [`Transport`]. The production
//! implementation is the monoio WebSocket in [`crate::websocket`]; the
//! in-memory [`ChannelConnector`] / [`ServerEnd`] pair drives the same client
//! code without sockets.

use crate::errors::{ExchangeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;
use url::Url;

/// Frame written by the client
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Sent as-is
    Text(String),
    /// JSON-encoded, then sent as text
    Json(Value),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(u16),
}

impl OutboundFrame {
    /// Wire text of a text or JSON frame
    pub fn to_text(&self) -> Option<String> {
        match self {
            OutboundFrame::Text(text) => Some(text.clone()),
            OutboundFrame::Json(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

impl From<Value> for OutboundFrame {
    fn from(value: Value) -> Self {
        OutboundFrame::Json(value)
    }
}

impl From<String> for OutboundFrame {
    fn from(text: String) -> Self {
        OutboundFrame::Text(text)
    }
}

impl From<&str> for OutboundFrame {
    fn from(text: &str) -> Self {
        OutboundFrame::Text(text.to_string())
    }
}

/// Frame read from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<u16>),
}

/// An open, bidirectional message stream
#[async_trait(?Send)]
pub trait Transport {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;

    /// Next inbound frame; an error means the stream is gone
    async fn recv(&mut self) -> Result<InboundFrame>;

    /// Start a graceful close; idempotent
    async fn close(&mut self, code: u16) -> Result<()>;
}

/// Opens transports
#[async_trait(?Send)]
pub trait Connector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>>;
}

/// How the in-memory connector answers connect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    #[default]
    Accept,
    /// Fail immediately with a network error
    Refuse,
    /// Never complete
    Hang,
}

/// In-memory connector; every accepted connection shows up on the paired
/// [`ChannelServer`]
#[derive(Clone)]
pub struct ChannelConnector {
    mode: Rc<Cell<ConnectMode>>,
    attempts: Rc<RefCell<Vec<Url>>>,
    accepted: flume::Sender<ServerEnd>,
}

/// Test-side acceptor of in-memory connections
pub struct ChannelServer {
    accepted: flume::Receiver<ServerEnd>,
}

/// Create a connected connector/server pair
pub fn channel_pair() -> (ChannelConnector, ChannelServer) {
    let (accepted_tx, accepted_rx) = flume::unbounded();
    let connector = ChannelConnector {
        mode: Rc::new(Cell::new(ConnectMode::Accept)),
        attempts: Rc::new(RefCell::new(Vec::new())),
        accepted: accepted_tx,
    };
    (connector, ChannelServer { accepted: accepted_rx })
}

impl ChannelConnector {
    pub fn set_mode(&self, mode: ConnectMode) {
        self.mode.set(mode);
    }

    /// Number of connect attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.borrow().len()
    }

    /// URLs of every connect attempt, in order
    pub fn attempted_urls(&self) -> Vec<Url> {
        self.attempts.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Connector for ChannelConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        self.attempts.borrow_mut().push(url.clone());
        match self.mode.get() {
            ConnectMode::Refuse => {
                Err(ExchangeError::NetworkError(format!("connection to {url} refused")))
            }
            ConnectMode::Hang => std::future::pending().await,
            ConnectMode::Accept => {
                let (to_client, from_server) = flume::unbounded();
                let (to_server, from_client) = flume::unbounded();
                let server_end = ServerEnd {
                    url: url.clone(),
                    to_client,
                    from_client,
                };
                self.accepted.send(server_end).map_err(|_| {
                    ExchangeError::NetworkError(format!("no server listening for {url}"))
                })?;
                debug!("In-memory connection accepted for {}", url);
                Ok(Box::new(ChannelTransport {
                    to_server,
                    from_server,
                    closed: false,
                }))
            }
        }
    }
}

impl ChannelServer {
    /// Wait for the next accepted connection
    pub async fn accept(&self) -> Option<ServerEnd> {
        self.accepted.recv_async().await.ok()
    }

    pub fn try_accept(&self) -> Option<ServerEnd> {
        self.accepted.try_recv().ok()
    }
}

/// Server side of one in-memory connection
pub struct ServerEnd {
    url: Url,
    to_client: flume::Sender<InboundFrame>,
    from_client: flume::Receiver<OutboundFrame>,
}

impl ServerEnd {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn push(&self, frame: InboundFrame) -> bool {
        self.to_client.send(frame).is_ok()
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(InboundFrame::Text(text.into()))
    }

    pub fn push_json(&self, value: &Value) -> bool {
        self.push_text(value.to_string())
    }

    /// Close the connection from the server side
    pub fn close(&self, code: u16) -> bool {
        self.push(InboundFrame::Close(Some(code)))
    }

    /// Next frame the client wrote; `None` once the client side is gone
    pub async fn recv(&self) -> Option<OutboundFrame> {
        self.from_client.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<OutboundFrame> {
        self.from_client.try_recv().ok()
    }

    /// Next text frame the client wrote, parsed as JSON. Control frames
    /// are skipped; plain text comes back as a JSON string.
    pub async fn recv_json(&self) -> Option<Value> {
        loop {
            match self.recv().await? {
                OutboundFrame::Json(value) => return Some(value),
                OutboundFrame::Text(text) => {
                    return Some(
                        serde_json::from_str(&text).unwrap_or(Value::String(text)),
                    );
                }
                _ => continue,
            }
        }
    }

    /// Every frame written so far, without waiting
    pub fn drain(&self) -> Vec<OutboundFrame> {
        self.from_client.drain().collect()
    }
}

/// Client side of one in-memory connection
struct ChannelTransport {
    to_server: flume::Sender<OutboundFrame>,
    from_server: flume::Receiver<InboundFrame>,
    closed: bool,
}

#[async_trait(?Send)]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        if self.closed {
            return Err(ExchangeError::NetworkError("WebSocket not connected".to_string()));
        }
        if let OutboundFrame::Close(_) = frame {
            self.closed = true;
        }
        self.to_server
            .send(frame)
            .map_err(|_| ExchangeError::NetworkError("connection reset by peer".to_string()))
    }

    async fn recv(&mut self) -> Result<InboundFrame> {
        self.from_server
            .recv_async()
            .await
            .map_err(|_| ExchangeError::NetworkError("connection reset by peer".to_string()))
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.send(OutboundFrame::Close(code)).await
    }
}
