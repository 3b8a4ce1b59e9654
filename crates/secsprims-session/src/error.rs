use std::time::Duration;

use secsprims_frame::{DeselectStatus, RejectReason, SecsMessage, SelectStatus};

use crate::state::ConnectionState;

/// A reply that completed its transaction with a protocol-level failure.
///
/// Each variant carries the reply that signalled the failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// SxF0: the peer aborted the transaction.
    #[error("transaction aborted by peer ({0})")]
    TransactionAborted(Box<SecsMessage>),

    #[error("unrecognized device id (S9F1)")]
    UnrecognizedDeviceId(Box<SecsMessage>),

    #[error("unrecognized stream type (S9F3)")]
    UnrecognizedStream(Box<SecsMessage>),

    #[error("unrecognized function type (S9F5)")]
    UnrecognizedFunction(Box<SecsMessage>),

    #[error("illegal data (S9F7)")]
    IllegalData(Box<SecsMessage>),

    #[error("transaction timer timeout (S9F9)")]
    TransactionTimeout(Box<SecsMessage>),

    #[error("data too long (S9F11)")]
    DataTooLong(Box<SecsMessage>),

    #[error("conversation timeout (S9F13)")]
    ConversationTimeout(Box<SecsMessage>),

    /// Any other stream 9 reply.
    #[error("unexpected stream 9 reply ({0})")]
    UnknownS9(Box<SecsMessage>),
}

impl ProtocolError {
    /// The reply message that carried the error.
    pub fn message(&self) -> &SecsMessage {
        match self {
            Self::TransactionAborted(msg)
            | Self::UnrecognizedDeviceId(msg)
            | Self::UnrecognizedStream(msg)
            | Self::UnrecognizedFunction(msg)
            | Self::IllegalData(msg)
            | Self::TransactionTimeout(msg)
            | Self::DataTooLong(msg)
            | Self::ConversationTimeout(msg)
            | Self::UnknownS9(msg) => msg,
        }
    }
}

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] secsprims_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] secsprims_frame::FrameError),

    /// Item encode/decode error.
    #[error("item error: {0}")]
    Item(#[from] secsprims_item::ItemError),

    /// The reply signalled a protocol failure (SxF0 or S9Fx).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer answered with Reject.req.
    #[error("rejected by peer: {reason}")]
    Rejected { reason: RejectReason },

    /// No reply within the reply or control timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Every connect attempt timed out.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Select.rsp carried a non-zero status.
    #[error("select rejected: {0}")]
    SelectRejected(SelectStatus),

    /// Deselect.rsp carried a non-zero status.
    #[error("deselect refused (status {})", .0.code())]
    DeselectRejected(DeselectStatus),

    /// A request with these system bytes is already pending.
    #[error("transaction {0:#010x} already pending")]
    DuplicateTransaction(u32),

    /// Data messages need a selected connection.
    #[error("session not selected (state: {0})")]
    NotSelected(ConnectionState),

    /// A locally initiated control exchange is already in flight.
    #[error("control transaction already in progress")]
    ControlBusy,

    /// The caller gave up on the transaction.
    #[error("transaction cancelled")]
    Cancelled,

    /// The connection ended while the operation was outstanding.
    #[error("session terminated")]
    Terminated,
}

pub type Result<T> = std::result::Result<T, SessionError>;
