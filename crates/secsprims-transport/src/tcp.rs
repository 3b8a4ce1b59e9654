use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::HsmsStream;

/// TCP transport for HSMS.
///
/// The passive (equipment) side binds and accepts; the active (host) side
/// connects. Each accepted or connected socket becomes an [`HsmsStream`].
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on a TCP address.
    ///
    /// Port 0 picks an ephemeral port; see [`TcpTransport::local_addr`].
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening for hsms connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<HsmsStream> {
        let (stream, remote) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%remote, "accepted connection");
        HsmsStream::from_tcp(stream)
    }

    /// Connect to a listening HSMS endpoint, waiting at most `timeout`.
    ///
    /// Every resolved address is tried in order; the last failure is returned.
    pub fn connect(
        addr: impl ToSocketAddrs + std::fmt::Display,
        timeout: Duration,
    ) -> Result<HsmsStream> {
        let addrs = addr.to_socket_addrs().map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;

        let mut last_err = None;
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    debug!(remote = %candidate, "connected to hsms endpoint");
                    return HsmsStream::from_tcp(stream);
                }
                Err(err) => last_err = Some(TransportError::connect(candidate, err)),
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::Unresolved(addr.to_string())))
    }

    /// Connect without blocking the async runtime.
    #[cfg(feature = "async")]
    pub async fn connect_async(addr: SocketAddr) -> Result<tokio::net::TcpStream> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::connect(addr, e))?;
        stream.set_nodelay(true)?;
        debug!(remote = %addr, "connected to hsms endpoint");
        Ok(stream)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
