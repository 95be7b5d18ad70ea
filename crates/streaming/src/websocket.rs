//! Monoio-native WebSocket client
//!
//! RFC 6455 client framing over plain TCP (`ws://`) or rustls (`wss://`):
//! - masked client frames, 7/16/64-bit payload lengths
//! - fragmented messages reassembled from continuation frames
//! - server pings answered automatically, close handshake echoed
//! - `Sec-WebSocket-Accept` verified during the upgrade

use crate::config::DEFAULT_MAX_MESSAGE_BYTES;
use crate::errors::{ExchangeError, Result};
use crate::tls::{default_client_config, TlsStream};
use crate::transport::{Connector, InboundFrame, OutboundFrame, Transport};
use sriquant_core::{nanos, PerfTimer};

use async_trait::async_trait;
use base64::Engine;
use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::TcpStream;
use rustls::ClientConfig;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const READ_CHUNK: usize = 8192;
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;
/// Close code for messages larger than the peer accepts
const MESSAGE_TOO_BIG: u16 = 1009;

fn too_large(len: u64, max_payload: usize) -> ExchangeError {
    ExchangeError::InvalidResponse(format!(
        "WebSocket message of {len} bytes exceeds the {max_payload} byte limit"
    ))
}

/// WebSocket opcode constants
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// WebSocket frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

/// WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Final, masked client frame
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader {
                fin: true,
                opcode,
                mask: Some(Self::generate_mask()),
                payload_len: payload.len() as u64,
            },
            payload,
        }
    }

    pub fn text(data: String) -> Self {
        Self::new(OpCode::Text, data.into_bytes())
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload)
    }

    /// Status code carried by a close frame
    pub fn close_code(&self) -> Option<u16> {
        match self.payload.as_slice() {
            [high, low, ..] => Some(u16::from_be_bytes([*high, *low])),
            _ => None,
        }
    }

    /// Client mask, varied per frame
    fn generate_mask() -> [u8; 4] {
        let seed = nanos().wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let bytes = (seed >> 32) as u32;
        bytes.to_be_bytes()
    }

    fn apply_mask(payload: &mut [u8], mask: &[u8; 4]) {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.payload.len() + 14);

        let first_byte = if self.header.fin { 0x80 } else { 0x00 } | (self.header.opcode as u8);
        frame.push(first_byte);

        let mask_bit = if self.header.mask.is_some() { 0x80 } else { 0x00 };
        if self.header.payload_len < 126 {
            frame.push(mask_bit | (self.header.payload_len as u8));
        } else if self.header.payload_len < 65536 {
            frame.push(mask_bit | 126);
            frame.extend_from_slice(&(self.header.payload_len as u16).to_be_bytes());
        } else {
            frame.push(mask_bit | 127);
            frame.extend_from_slice(&self.header.payload_len.to_be_bytes());
        }

        let payload_start = match self.header.mask {
            Some(mask) => {
                frame.extend_from_slice(&mask);
                frame.len()
            }
            None => frame.len(),
        };
        frame.extend_from_slice(&self.payload);
        if let Some(mask) = &self.header.mask {
            Self::apply_mask(&mut frame[payload_start..], mask);
        }

        frame
    }

    /// Parse one frame from the front of `data`. `Ok(None)` means more bytes
    /// are needed; a header announcing more than `max_payload` bytes is an
    /// error before any payload is buffered.
    pub fn from_bytes(data: &[u8], max_payload: usize) -> Result<Option<(Self, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }

        let fin = (data[0] & 0x80) != 0;
        let opcode = OpCode::from_u8(data[0] & 0x0f).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("Invalid WebSocket opcode {:#x}", data[0] & 0x0f))
        })?;
        let masked = (data[1] & 0x80) != 0;

        let mut offset = 2;
        let payload_len = match data[1] & 0x7f {
            126 => {
                if data.len() < offset + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([data[2], data[3]]) as u64;
                offset += 2;
                len
            }
            127 => {
                if data.len() < offset + 8 {
                    return Ok(None);
                }
                let mut len_bytes = [0u8; 8];
                len_bytes.copy_from_slice(&data[2..10]);
                offset += 8;
                u64::from_be_bytes(len_bytes)
            }
            len => len as u64,
        };

        if payload_len > max_payload as u64 {
            return Err(too_large(payload_len, max_payload));
        }

        let mask = if masked {
            if data.len() < offset + 4 {
                return Ok(None);
            }
            let mask = [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]];
            offset += 4;
            Some(mask)
        } else {
            None
        };

        let payload_len_usize = usize::try_from(payload_len)
            .map_err(|_| ExchangeError::InvalidResponse("WebSocket frame too large".to_string()))?;
        let end = offset
            .checked_add(payload_len_usize)
            .ok_or_else(|| ExchangeError::InvalidResponse("WebSocket frame too large".to_string()))?;
        if data.len() < end {
            return Ok(None);
        }

        let mut payload = data[offset..end].to_vec();
        if let Some(mask) = &mask {
            Self::apply_mask(&mut payload, mask);
        }

        let frame = Frame {
            header: FrameHeader {
                fin,
                opcode,
                mask,
                payload_len,
            },
            payload,
        };
        Ok(Some((frame, end)))
    }
}

/// `Sec-WebSocket-Accept` value for a client key
pub fn accept_key(ws_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ws_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Plain or TLS byte stream
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Stream {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Stream::Plain(stream) => {
                let (result, _) = stream.write_all(data.to_vec()).await;
                result
                    .map(|_| ())
                    .map_err(|e| ExchangeError::NetworkError(format!("TCP write failed: {e}")))
            }
            Stream::Tls(stream) => stream.write_all(data).await,
        }
    }

    /// Append the next chunk to `buffer`; returns the number of bytes read
    async fn read_into(&mut self, buffer: &mut Vec<u8>) -> Result<usize> {
        match self {
            Stream::Plain(stream) => {
                let (result, chunk) = stream.read(vec![0u8; READ_CHUNK]).await;
                let n = result.map_err(|e| ExchangeError::NetworkError(format!("TCP read failed: {e}")))?;
                buffer.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Stream::Tls(stream) => {
                let mut chunk = [0u8; READ_CHUNK];
                let n = stream.read(&mut chunk).await?;
                buffer.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
        }
    }
}

/// Monoio-native WebSocket client
pub struct MonoioWebSocket {
    stream: Stream,
    url: Url,
    connected: bool,
    close_sent: bool,
    buffer: Vec<u8>,
    fragments: Option<(OpCode, Vec<u8>)>,
    max_message_bytes: usize,
}

impl MonoioWebSocket {
    /// Dial `url` (`ws://` or `wss://`) and perform the upgrade
    pub async fn connect(url: &Url, tls_config: Arc<ClientConfig>, max_message_bytes: usize) -> Result<Self> {
        let timer = PerfTimer::start("websocket_connect");
        info!("🔗 Connecting to WebSocket: {}", url);

        let secure = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(ExchangeError::InvalidUrl(format!("unsupported WebSocket scheme {other}")));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl("No host in WebSocket URL".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });

        let tcp_stream = TcpStream::connect(format!("{host}:{port}"))
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("TCP connection failed: {e}")))?;
        debug!("✅ TCP connection established to {}:{}", host, port);

        let stream = if secure {
            let tls = TlsStream::connect(tcp_stream, host, tls_config).await?;
            debug!("✅ TLS handshake completed");
            Stream::Tls(Box::new(tls))
        } else {
            Stream::Plain(tcp_stream)
        };

        let mut websocket = Self {
            stream,
            url: url.clone(),
            connected: false,
            close_sent: false,
            buffer: Vec::with_capacity(READ_CHUNK),
            fragments: None,
            max_message_bytes,
        };
        websocket.perform_handshake().await?;

        timer.log_elapsed();
        info!("✅ WebSocket connection established to {}", url);
        Ok(websocket)
    }

    async fn perform_handshake(&mut self) -> Result<()> {
        let ws_key = base64::engine::general_purpose::STANDARD.encode(nanos().to_be_bytes());
        let host = self
            .url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl("No host in WebSocket URL".to_string()))?;
        let host_header = match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let path = if self.url.path().is_empty() { "/" } else { self.url.path() };
        let query = self.url.query().map(|q| format!("?{q}")).unwrap_or_default();

        let request = format!(
            "GET {path}{query} HTTP/1.1\r\n\
             Host: {host_header}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {ws_key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        self.stream.write_all(request.as_bytes()).await?;

        // Read until the end of the response headers; anything after them
        // is already frame data
        let header_end = loop {
            if let Some(pos) = find_subsequence(&self.buffer, b"\r\n\r\n") {
                break pos + 4;
            }
            if self.buffer.len() > MAX_HANDSHAKE_BYTES {
                return Err(ExchangeError::NetworkError(
                    "WebSocket handshake response too large".to_string(),
                ));
            }
            if self.stream.read_into(&mut self.buffer).await? == 0 {
                return Err(ExchangeError::NetworkError(
                    "Connection closed during WebSocket handshake".to_string(),
                ));
            }
        };

        let response = String::from_utf8_lossy(&self.buffer[..header_end]).to_string();
        self.buffer.drain(..header_end);
        validate_handshake_response(&response, &ws_key)?;

        self.connected = true;
        debug!("✅ WebSocket handshake completed");
        Ok(())
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.connected || self.close_sent {
            return Err(ExchangeError::NetworkError("WebSocket not connected".to_string()));
        }
        let bytes = frame.to_bytes();
        debug!("Sending WebSocket frame: {:?} ({} bytes)", frame.header.opcode, bytes.len());
        self.stream.write_all(&bytes).await?;
        if frame.header.opcode == OpCode::Close {
            self.close_sent = true;
        }
        Ok(())
    }

    /// Next complete frame. Pings are answered and skipped, fragments are
    /// joined into one data frame.
    pub async fn receive_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(ExchangeError::NetworkError("WebSocket not connected".to_string()));
        }

        loop {
            let parsed = match Frame::from_bytes(&self.buffer, self.max_message_bytes) {
                Ok(parsed) => parsed,
                Err(e) => return Err(self.reject_oversized(e).await),
            };
            if let Some((frame, consumed)) = parsed {
                self.buffer.drain(..consumed);

                match frame.header.opcode {
                    OpCode::Ping => {
                        debug!("Received ping, sending pong");
                        self.send_frame(Frame::new(OpCode::Pong, frame.payload)).await?;
                        continue;
                    }
                    OpCode::Close => {
                        debug!("Received close frame");
                        if !self.close_sent {
                            let code = frame.close_code().unwrap_or(1000);
                            let _ = self.send_frame(Frame::close(code, "")).await;
                        }
                        self.connected = false;
                        return Ok(frame);
                    }
                    OpCode::Pong => return Ok(frame),
                    OpCode::Continuation => {
                        let Some((_, partial)) = self.fragments.as_mut() else {
                            return Err(ExchangeError::InvalidResponse(
                                "Continuation frame without a message".to_string(),
                            ));
                        };
                        let total = partial.len() + frame.payload.len();
                        if total > self.max_message_bytes {
                            let error = too_large(total as u64, self.max_message_bytes);
                            return Err(self.reject_oversized(error).await);
                        }
                        partial.extend_from_slice(&frame.payload);
                        if frame.header.fin {
                            if let Some((opcode, payload)) = self.fragments.take() {
                                return Ok(Frame {
                                    header: FrameHeader {
                                        fin: true,
                                        opcode,
                                        mask: None,
                                        payload_len: payload.len() as u64,
                                    },
                                    payload,
                                });
                            }
                        }
                        continue;
                    }
                    OpCode::Text | OpCode::Binary => {
                        if frame.header.fin {
                            return Ok(frame);
                        }
                        self.fragments = Some((frame.header.opcode, frame.payload));
                        continue;
                    }
                }
            }

            if self.stream.read_into(&mut self.buffer).await? == 0 {
                self.connected = false;
                return Err(ExchangeError::NetworkError(
                    "WebSocket connection closed by peer".to_string(),
                ));
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.close_sent
    }

    /// Drop buffered input and tell the peer the message was too big
    async fn reject_oversized(&mut self, error: ExchangeError) -> ExchangeError {
        self.buffer.clear();
        self.fragments = None;
        if !self.close_sent {
            let _ = self.send_frame(Frame::close(MESSAGE_TOO_BIG, "")).await;
        }
        self.connected = false;
        error
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn validate_handshake_response(response: &str, ws_key: &str) -> Result<()> {
    let status_ok = response
        .lines()
        .next()
        .is_some_and(|line| line.split_whitespace().nth(1) == Some("101"));
    if !status_ok {
        let status = response.lines().next().unwrap_or_default();
        return Err(ExchangeError::NetworkError(format!(
            "WebSocket handshake failed: {status}"
        )));
    }

    let expected = accept_key(ws_key);
    let accepted = response.lines().any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("sec-websocket-accept") && value.trim() == expected
        })
    });
    if !accepted {
        return Err(ExchangeError::NetworkError(
            "WebSocket handshake failed: invalid accept key".to_string(),
        ));
    }
    Ok(())
}

#[async_trait(?Send)]
impl Transport for MonoioWebSocket {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let frame = match frame {
            OutboundFrame::Text(text) => Frame::text(text),
            OutboundFrame::Json(value) => Frame::text(value.to_string()),
            OutboundFrame::Binary(data) => Frame::new(OpCode::Binary, data),
            OutboundFrame::Ping(data) => Frame::new(OpCode::Ping, data),
            OutboundFrame::Pong(data) => Frame::new(OpCode::Pong, data),
            OutboundFrame::Close(code) => Frame::close(code, ""),
        };
        self.send_frame(frame).await
    }

    async fn recv(&mut self) -> Result<InboundFrame> {
        let frame = self.receive_frame().await?;
        match frame.header.opcode {
            OpCode::Text => String::from_utf8(frame.payload)
                .map(InboundFrame::Text)
                .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid UTF-8 in text frame: {e}"))),
            OpCode::Binary => Ok(InboundFrame::Binary(frame.payload)),
            OpCode::Pong => Ok(InboundFrame::Pong(frame.payload)),
            OpCode::Close => Ok(InboundFrame::Close(frame.close_code())),
            OpCode::Ping | OpCode::Continuation => Err(ExchangeError::InvalidResponse(format!(
                "Unexpected {:?} frame",
                frame.header.opcode
            ))),
        }
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        if !self.connected || self.close_sent {
            return Ok(());
        }
        info!("🔌 Closing WebSocket connection to {}", self.url);
        self.send_frame(Frame::close(code, "")).await
    }
}

/// Dials real sockets
#[derive(Clone)]
pub struct WebSocketConnector {
    tls_config: Arc<ClientConfig>,
    max_message_bytes: usize,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::with_tls_config(default_client_config())
    }

    pub fn with_tls_config(tls_config: Arc<ClientConfig>) -> Self {
        Self {
            tls_config,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        let websocket = MonoioWebSocket::connect(url, Arc::clone(&self.tls_config), self.max_message_bytes).await?;
        Ok(Box::new(websocket))
    }
}
