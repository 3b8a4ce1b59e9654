use std::fmt::Display;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use secsprims_frame::BufferPool;
use secsprims_transport::TcpTransport;
use tracing::debug;

use crate::config::{ConnectionMode, SessionConfig};
use crate::error::Result;
use crate::handler::{IgnorePrimaries, SharedHandler};
use crate::session::{notify_state, Session};
use crate::state::ConnectionState;

/// Accepts HSMS connections and selects them as the passive side.
///
/// Every accepted session shares the listener's handler and encode buffer
/// pool.
pub struct SessionListener {
    transport: TcpTransport,
    config: SessionConfig,
    handler: SharedHandler,
    pool: Arc<BufferPool>,
}

impl SessionListener {
    /// Bind to a TCP address. Port 0 picks an ephemeral port.
    pub fn bind(addr: impl ToSocketAddrs + Display) -> Result<Self> {
        let transport = TcpTransport::bind(addr)?;
        Ok(Self {
            transport,
            config: SessionConfig::passive(),
            handler: Arc::new(IgnorePrimaries),
            pool: Arc::new(BufferPool::default()),
        })
    }

    /// Override timers and limits. The mode is always passive.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = SessionConfig {
            mode: ConnectionMode::Passive,
            ..config
        };
        self
    }

    /// Handler for every accepted session.
    pub fn with_handler(mut self, handler: SharedHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Accept the next connection and wait up to T7 for Select.req.
    pub fn accept(&self) -> Result<Session> {
        let stream = self.transport.accept()?;
        debug!(peer = ?stream.peer_addr(), "selecting accepted connection");
        notify_state(&*self.handler, ConnectionState::NotConnected, ConnectionState::Connecting);
        Session::from_stream_with_pool(
            stream,
            self.config.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&self.pool),
        )
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::error::SessionError;

    #[test]
    fn passive_side_times_out_without_select() {
        let listener = SessionListener::bind("127.0.0.1:0")
            .expect("listener should bind")
            .with_config(SessionConfig {
                t7_not_selected: Duration::from_millis(150),
                ..SessionConfig::default()
            });
        assert_eq!(listener.config().mode, ConnectionMode::Passive);
        let addr = listener.local_addr();

        let client = thread::spawn(move || {
            let stream = TcpTransport::connect(addr, Duration::from_secs(2))
                .expect("raw client should connect");
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let result = listener.accept();
        assert!(matches!(result, Err(SessionError::Timeout(_))));
        client.join().expect("client thread should finish");
    }

    #[test]
    fn accepts_several_sessions() {
        let listener = SessionListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr();

        let clients = thread::spawn(move || {
            (0..2)
                .map(|_| crate::connect(addr, Arc::new(IgnorePrimaries)))
                .collect::<Vec<_>>()
        });

        let first = listener.accept().expect("first accept should select");
        let second = listener.accept().expect("second accept should select");
        let clients = clients.join().expect("client thread should finish");

        assert_eq!(first.state(), ConnectionState::Selected);
        assert_eq!(second.state(), ConnectionState::Selected);
        for client in clients {
            let session = client.expect("client should select");
            assert_eq!(session.state(), ConnectionState::Selected);
        }
    }
}
