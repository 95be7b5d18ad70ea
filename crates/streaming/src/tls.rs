//! rustls session over a monoio `TcpStream`
//!
//! monoio's rent-based IO does not plug into rustls' blocking `Read`/`Write`
//! adapters, so the session is pumped by hand: ciphertext is moved between
//! the TCP stream and the `ClientConnection` with `read_tls`/`write_tls`.

use crate::errors::{ExchangeError, Result};
use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::TcpStream;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use std::io::{Read, Write};
use std::sync::Arc;

const TCP_READ_CHUNK: usize = 8192;

/// Client config trusting the webpki root set
pub fn default_client_config() -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// TLS stream wrapper for monoio
pub struct TlsStream {
    stream: TcpStream,
    tls_conn: ClientConnection,
    write_buf: Vec<u8>,
    handshake_complete: bool,
}

impl TlsStream {
    /// Wrap `stream` and run the handshake for `host`
    pub async fn connect(stream: TcpStream, host: &str, config: Arc<ClientConfig>) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ExchangeError::NetworkError(format!("Invalid server name: {e}")))?;
        let tls_conn = ClientConnection::new(config, server_name)
            .map_err(|e| ExchangeError::NetworkError(format!("TLS connection setup failed: {e}")))?;

        let mut tls_stream = Self {
            stream,
            tls_conn,
            write_buf: Vec::with_capacity(TCP_READ_CHUNK),
            handshake_complete: false,
        };
        tls_stream.complete_handshake().await?;
        Ok(tls_stream)
    }

    async fn complete_handshake(&mut self) -> Result<()> {
        if self.handshake_complete {
            return Ok(());
        }

        loop {
            self.flush_tls().await?;

            if !self.tls_conn.is_handshaking() {
                self.handshake_complete = true;
                return Ok(());
            }

            if self.tls_conn.wants_read() {
                if self.pull_tls().await? == 0 {
                    return Err(ExchangeError::NetworkError(
                        "Connection closed during TLS handshake".to_string(),
                    ));
                }
            } else if !self.tls_conn.wants_write() {
                return Err(ExchangeError::NetworkError("TLS handshake stalled".to_string()));
            }
        }
    }

    /// Write pending ciphertext to the socket
    async fn flush_tls(&mut self) -> Result<()> {
        while self.tls_conn.wants_write() {
            self.write_buf.clear();
            self.tls_conn
                .write_tls(&mut self.write_buf)
                .map_err(|e| ExchangeError::NetworkError(format!("TLS write failed: {e}")))?;

            if !self.write_buf.is_empty() {
                let buf = std::mem::take(&mut self.write_buf);
                let (result, buf) = self.stream.write_all(buf).await;
                self.write_buf = buf;
                result.map_err(|e| ExchangeError::NetworkError(format!("TCP write failed: {e}")))?;
            }
        }
        Ok(())
    }

    /// Feed one chunk of ciphertext into the session; 0 means EOF
    async fn pull_tls(&mut self) -> Result<usize> {
        let (result, buf) = self.stream.read(vec![0u8; TCP_READ_CHUNK]).await;
        let bytes_read = result.map_err(|e| ExchangeError::NetworkError(format!("TCP read failed: {e}")))?;
        if bytes_read == 0 {
            return Ok(0);
        }

        self.tls_conn
            .read_tls(&mut std::io::Cursor::new(&buf[..bytes_read]))
            .map_err(|e| ExchangeError::NetworkError(format!("TLS read failed: {e}")))?;
        self.tls_conn
            .process_new_packets()
            .map_err(|e| ExchangeError::NetworkError(format!("TLS process failed: {e}")))?;
        Ok(bytes_read)
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.complete_handshake().await?;
        self.tls_conn
            .writer()
            .write_all(data)
            .map_err(|e| ExchangeError::NetworkError(format!("TLS application write failed: {e}")))?;
        self.flush_tls().await
    }

    /// Read decrypted bytes into `buf`; 0 means the peer closed
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.complete_handshake().await?;

        loop {
            match self.tls_conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => return Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(ExchangeError::NetworkError(format!("TLS read failed: {e}"))),
            }

            if self.pull_tls().await? == 0 {
                return Ok(0);
            }
            // Session may need to answer (key update, alerts)
            self.flush_tls().await?;
        }
    }
}
