//! One physical connection and its I/O task
//!
//! The I/O task owns the [`Transport`]. It dials (bounded by the connection
//! timeout), then alternates between draining queued commands and polling
//! the socket for `poll_interval`. Everything it observes is published as a
//! [`ConnectionEvent`] on a flume channel consumed by the owning client, so
//! frames reach the dispatcher strictly in arrival order.

use crate::codec::{self, Compression};
use crate::errors::{ExchangeError, Result};
use crate::transport::{Connector, InboundFrame, OutboundFrame, Transport};
use serde_json::Value;
use sriquant_core::milliseconds;
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Close code reported for abnormal closure
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How long to wait for the server's close frame after sending ours
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// What the I/O task reports to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    /// Decoded inbound message
    Frame(Value),
    /// Protocol-level pong
    Pong,
    /// Transport failure; always followed by `Closed`
    Error(ExchangeError),
    Closed(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Parameters of one connection attempt
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connection_timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub compression: Compression,
}

enum Command {
    Send(OutboundFrame),
    Close(u16),
}

/// Client-side handle of a connection
pub struct Connection {
    url: Url,
    commands: flume::Sender<Command>,
    state: Rc<Cell<LinkState>>,
    started: u64,
    established: Rc<Cell<Option<u64>>>,
}

/// `url` with the current timestamp appended to the query
pub fn cache_busted(url: &Url) -> Url {
    let stamp = milliseconds().to_string();
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{stamp}"),
        _ => stamp,
    };
    let mut busted = url.clone();
    busted.set_query(Some(&query));
    busted
}

impl Connection {
    /// Spawn the I/O task and start dialing `url`
    pub fn open(
        url: &Url,
        connector: Rc<dyn Connector>,
        settings: ConnectionSettings,
    ) -> (Self, flume::Receiver<ConnectionEvent>) {
        let (command_tx, command_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();
        let state = Rc::new(Cell::new(LinkState::Connecting));
        let established = Rc::new(Cell::new(None));

        let io = IoTask {
            url: cache_busted(url),
            settings,
            commands: command_rx,
            events: event_tx,
            state: Rc::clone(&state),
            established: Rc::clone(&established),
        };
        monoio::spawn(io.run(connector));

        let connection = Self {
            url: url.clone(),
            commands: command_tx,
            state,
            started: milliseconds(),
            established,
        };
        (connection, event_rx)
    }

    /// Queue a frame. Fails unless the connection is open.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        if !self.is_open() {
            return Err(ExchangeError::NetworkError(format!(
                "connection to {} is not open",
                self.url
            )));
        }
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| ExchangeError::NetworkError(format!("connection to {} is gone", self.url)))
    }

    /// Start a graceful close; idempotent
    pub fn close(&self, code: u16) {
        match self.state.get() {
            LinkState::Closing | LinkState::Closed => {}
            _ => {
                self.state.set(LinkState::Closing);
                let _ = self.commands.send(Command::Close(code));
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.get() == LinkState::Open
    }

    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn connection_started(&self) -> u64 {
        self.started
    }

    pub fn connection_established(&self) -> Option<u64> {
        self.established.get()
    }
}

struct IoTask {
    url: Url,
    settings: ConnectionSettings,
    commands: flume::Receiver<Command>,
    events: flume::Sender<ConnectionEvent>,
    state: Rc<Cell<LinkState>>,
    established: Rc<Cell<Option<u64>>>,
}

impl IoTask {
    fn emit(&self, event: ConnectionEvent) {
        // The client may already be gone
        let _ = self.events.send(event);
    }

    fn fail(&self, error: ExchangeError) {
        self.state.set(LinkState::Closed);
        self.emit(ConnectionEvent::Error(error));
        self.emit(ConnectionEvent::Closed(ABNORMAL_CLOSURE));
    }

    fn finish(&self, code: u16) {
        self.state.set(LinkState::Closed);
        self.emit(ConnectionEvent::Closed(code));
    }

    async fn run(self, connector: Rc<dyn Connector>) {
        debug!("Connecting to {}", self.url);
        let dialing = connector.connect(&self.url);
        let dialed = match self.settings.connection_timeout {
            Some(limit) => match monoio::time::timeout(limit, dialing).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ExchangeError::RequestTimeout(format!(
                    "Connection to {} failed due to a connection timeout",
                    self.url
                ))),
            },
            None => dialing.await,
        };

        let mut transport = match dialed {
            Ok(transport) => transport,
            Err(e) => {
                warn!("⚠️  Connection to {} failed: {}", self.url, e);
                self.fail(e);
                return;
            }
        };

        // close() may have been requested while dialing
        if self.state.get() == LinkState::Connecting {
            self.state.set(LinkState::Open);
        }
        self.established.set(Some(milliseconds()));
        info!("✅ Connection open: {}", self.url);
        self.emit(ConnectionEvent::Open);

        self.pump(transport.as_mut()).await;
    }

    async fn pump(&self, transport: &mut dyn Transport) {
        let mut closing: Option<(u16, Instant)> = None;

        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(Command::Send(frame)) => {
                        if closing.is_some() {
                            continue;
                        }
                        if let Err(e) = transport.send(frame).await {
                            self.fail(e);
                            return;
                        }
                    }
                    Ok(Command::Close(code)) => {
                        if closing.is_none() {
                            self.state.set(LinkState::Closing);
                            if let Err(e) = transport.close(code).await {
                                debug!("Close frame not delivered: {}", e);
                                self.finish(code);
                                return;
                            }
                            closing = Some((code, Instant::now()));
                        }
                    }
                    Err(flume::TryRecvError::Empty) => break,
                    Err(flume::TryRecvError::Disconnected) => {
                        // Handle dropped without closing
                        let _ = transport.close(1000).await;
                        self.finish(1000);
                        return;
                    }
                }
            }

            if let Some((code, since)) = closing {
                if since.elapsed() >= CLOSE_GRACE {
                    debug!("No close frame from {} within grace period", self.url);
                    self.finish(code);
                    return;
                }
            }

            match monoio::time::timeout(self.settings.poll_interval, transport.recv()).await {
                Err(_) => continue,
                Ok(Ok(frame)) => match frame {
                    InboundFrame::Text(text) => {
                        if let Some(value) = codec::decode_text(&text) {
                            self.emit(ConnectionEvent::Frame(value));
                        }
                    }
                    InboundFrame::Binary(payload) => {
                        if let Some(value) = codec::decode_binary(&payload, self.settings.compression) {
                            self.emit(ConnectionEvent::Frame(value));
                        }
                    }
                    InboundFrame::Pong(_) => self.emit(ConnectionEvent::Pong),
                    InboundFrame::Ping(payload) => {
                        if let Err(e) = transport.send(OutboundFrame::Pong(payload)).await {
                            self.fail(e);
                            return;
                        }
                    }
                    InboundFrame::Close(code) => {
                        let code = code.unwrap_or(1005);
                        info!("🔌 Connection to {} closed with code {}", self.url, code);
                        if closing.is_none() {
                            let _ = transport.close(code).await;
                        }
                        self.finish(code);
                        return;
                    }
                },
                Ok(Err(e)) => {
                    match closing {
                        Some((code, _)) => self.finish(code),
                        None => self.fail(e),
                    }
                    return;
                }
            }
        }
    }
}
