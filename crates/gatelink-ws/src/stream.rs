//! Byte-stream seam between the connection and the network
//!
//! A [`Connector`] opens a blocking stream for a URL (plain TCP or rustls
//! TLS). The connection runs the upgrade handshake on it and then switches
//! it to non-blocking mode for polling.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use rustls_pki_types::ServerName;

use crate::error::{WsError, WsResult};
use crate::url::WsUrl;

/// A bidirectional byte stream a connection can own
pub trait Stream: Read + Write + Send {
    /// Switch between blocking and non-blocking I/O
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Tear down both directions
    fn shutdown(&mut self) -> io::Result<()>;

    /// Whether traffic is encrypted
    fn is_secure(&self) -> bool {
        false
    }
}

impl Stream for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// TLS client stream over TCP
pub struct TlsStream(StreamOwned<ClientConnection, TcpStream>);

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Stream for TlsStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.0.sock.set_nonblocking(nonblocking)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.0.conn.send_close_notify();
        let _ = self.0.conn.write_tls(&mut self.0.sock);
        self.0.sock.shutdown(Shutdown::Both)
    }

    fn is_secure(&self) -> bool {
        true
    }
}

/// Opens streams for connections
pub trait Connector: Send + Sync {
    /// Open a blocking stream to the URL's host, negotiating TLS for `wss://`
    fn connect(&self, url: &WsUrl) -> WsResult<Box<dyn Stream>>;
}

/// Default connector: TCP with optional rustls
pub struct TcpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
    tls: OnceLock<Arc<ClientConfig>>,
}

impl TcpConnector {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            io_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            tls: OnceLock::new(),
        }
    }

    /// Bound on TCP connect and on each blocking read/write of the handshake
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.io_timeout = timeout;
        self
    }

    /// Use a caller-supplied TLS configuration (custom roots, client auth)
    #[must_use]
    pub fn with_tls_config(self, config: Arc<ClientConfig>) -> Self {
        let _ = self.tls.set(config);
        self
    }

    fn tls_config(&self) -> Arc<ClientConfig> {
        Arc::clone(self.tls.get_or_init(|| {
            let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        }))
    }

    fn connect_tcp(&self, url: &WsUrl) -> WsResult<TcpStream> {
        let mut last_err = None;
        for addr in (url.host.as_str(), url.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "TCP connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(WsError::Io(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", url.host))
        })))
    }

    fn upgrade_to_tls(&self, url: &WsUrl, tcp: TcpStream) -> WsResult<TlsStream> {
        let server_name = ServerName::try_from(url.host.clone())
            .map_err(|_| WsError::Tls(format!("invalid hostname for TLS: {}", url.host)))?;
        let conn = ClientConnection::new(self.tls_config(), server_name)
            .map_err(|e| WsError::Tls(e.to_string()))?;
        let mut stream = StreamOwned::new(conn, tcp);
        while stream.conn.is_handshaking() {
            stream
                .conn
                .complete_io(&mut stream.sock)
                .map_err(|e| WsError::Tls(e.to_string()))?;
        }
        Ok(TlsStream(stream))
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnector")
            .field("connect_timeout", &self.connect_timeout)
            .field("custom_tls", &self.tls.get().is_some())
            .finish()
    }
}

impl Connector for TcpConnector {
    fn connect(&self, url: &WsUrl) -> WsResult<Box<dyn Stream>> {
        let tcp = self.connect_tcp(url)?;
        if url.secure {
            let tls = self.upgrade_to_tls(url, tcp)?;
            tracing::debug!(host = %url.host, port = url.port, "TLS session established");
            Ok(Box::new(tls))
        } else {
            tracing::debug!(host = %url.host, port = url.port, "TCP connection established");
            Ok(Box::new(tcp))
        }
    }
}
