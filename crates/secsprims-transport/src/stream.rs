use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected HSMS byte stream (Read + Write).
///
/// This is the fundamental I/O type returned by transport operations.
/// Normally this wraps a TCP stream; on Unix it can also wrap one end of a
/// socket pair for in-process sessions.
pub struct HsmsStream {
    inner: HsmsStreamInner,
}

enum HsmsStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for HsmsStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HsmsStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            HsmsStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for HsmsStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HsmsStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            HsmsStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            HsmsStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            HsmsStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl HsmsStream {
    /// Create an HsmsStream from a connected TCP stream.
    ///
    /// Nagle is disabled: HSMS control messages are small and latency bound.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            inner: HsmsStreamInner::Tcp(stream),
        })
    }

    /// Create a connected pair of in-process streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((
            Self {
                inner: HsmsStreamInner::Unix(left),
            },
            Self {
                inner: HsmsStreamInner::Unix(right),
            },
        ))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            HsmsStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            HsmsStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            HsmsStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            HsmsStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            HsmsStreamInner::Tcp(stream) => HsmsStreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            HsmsStreamInner::Unix(stream) => HsmsStreamInner::Unix(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Shut down both directions of the stream.
    ///
    /// Any thread blocked in `read` on a clone of this stream wakes up with
    /// EOF. Shutting down an already closed stream is not an error.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            HsmsStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            HsmsStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Address of the remote end, when the stream is a TCP connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            HsmsStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            #[cfg(unix)]
            HsmsStreamInner::Unix(_) => None,
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            HsmsStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            HsmsStreamInner::Unix(_) => "unix-socket-pair",
        }
    }
}

impl std::fmt::Debug for HsmsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HsmsStream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer_addr())
            .finish()
    }
}
