use std::fmt::Display;
use std::io::ErrorKind;
use std::net::ToSocketAddrs;
use std::thread;

use secsprims_transport::{TcpTransport, TransportError};
use tracing::{debug, warn};

use crate::config::{ConnectionMode, SessionConfig};
use crate::error::{Result, SessionError};
use crate::handler::SharedHandler;
use crate::session::{notify_state, Session};
use crate::state::ConnectionState;

/// Connect to a passive endpoint with default timers and select as the
/// active side.
pub fn connect(addr: impl ToSocketAddrs + Display, handler: SharedHandler) -> Result<Session> {
    connect_with_config(addr, SessionConfig::default(), handler)
}

/// Connect with explicit configuration.
///
/// Makes `1 + config.connect_retries` attempts, pausing T5 between them,
/// each bounded by `config.connect_timeout`. The session always selects as
/// the active side regardless of `config.mode`.
pub fn connect_with_config(
    addr: impl ToSocketAddrs + Display,
    mut config: SessionConfig,
    handler: SharedHandler,
) -> Result<Session> {
    config.mode = ConnectionMode::Active;
    notify_state(&*handler, ConnectionState::NotConnected, ConnectionState::Connecting);

    let attempts = config.connect_retries.saturating_add(1);
    let mut attempt = 0;
    let stream = loop {
        attempt += 1;
        match TcpTransport::connect(&addr, config.connect_timeout) {
            Ok(stream) => break stream,
            Err(err) if attempt < attempts => {
                warn!(
                    %addr,
                    attempt,
                    error = %err,
                    retry_in_ms = config.t5_connect_separation.as_millis() as u64,
                    "connect failed"
                );
                thread::sleep(config.t5_connect_separation);
            }
            Err(err) => {
                notify_state(&*handler, ConnectionState::Connecting, ConnectionState::NotConnected);
                return Err(connect_error(err, &config));
            }
        }
    };
    debug!(%addr, attempt, "tcp connected");

    Session::from_stream(stream, config, handler)
}

fn connect_error(err: TransportError, config: &SessionConfig) -> SessionError {
    match &err {
        TransportError::Connect { source, .. } if source.kind() == ErrorKind::TimedOut => {
            SessionError::ConnectTimeout(config.connect_timeout)
        }
        _ => SessionError::Transport(err),
    }
}
