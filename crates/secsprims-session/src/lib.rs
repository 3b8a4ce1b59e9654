//! HSMS sessions for SECS-II messaging.
//!
//! Connect or accept, select, then exchange data messages with the reply
//! bookkeeping (system bytes, T3, aborts and stream 9 reports) handled
//! for you. Control traffic (Linktest, Deselect, Separate, Reject) is
//! answered automatically.

pub mod classify;
pub mod config;
pub mod connector;
pub mod error;
pub mod handler;
pub mod listener;
mod select;
pub mod session;
pub mod state;
pub mod transaction;

pub use classify::{
    classify_reply, reported_system_bytes, s9_report, S9F11_DATA_TOO_LONG, S9F13_CONVERSATION_TIMEOUT,
    S9F1_UNRECOGNIZED_DEVICE_ID, S9F3_UNRECOGNIZED_STREAM, S9F5_UNRECOGNIZED_FUNCTION,
    S9F7_ILLEGAL_DATA, S9F9_TRANSACTION_TIMEOUT,
};
pub use config::{ConnectionMode, SessionConfig};
pub use connector::{connect, connect_with_config};
pub use error::{ProtocolError, Result, SessionError};
pub use handler::{IgnorePrimaries, MessageHandler, SharedHandler};
pub use listener::SessionListener;
pub use session::{Session, SessionHandle};
pub use state::ConnectionState;
pub use transaction::ReplyHandle;
