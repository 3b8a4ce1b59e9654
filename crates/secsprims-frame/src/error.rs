use secsprims_item::{DecodeError, ItemError};

use crate::header::MessageType;

/// Errors that can occur during frame and message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix is shorter than the fixed HSMS header.
    #[error("frame length {0} is shorter than the 10-byte hsms header")]
    InvalidLength(u32),

    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Stream numbers are seven bits wide.
    #[error("stream {0} out of range (max 127)")]
    InvalidStream(u8),

    /// Device ids are fifteen bits wide.
    #[error("device id {0} out of range (max 32767)")]
    InvalidDeviceId(u16),

    /// Only PType 0 (SECS-II encoding) is defined.
    #[error("unsupported presentation type {0}")]
    UnsupportedPType(u8),

    /// A control message was handed to the data message codec.
    #[error("{0} is not a data message")]
    NotDataMessage(MessageType),

    /// The body of a data message failed to decode.
    ///
    /// Carries the system bytes so the failure can be routed to the
    /// transaction it belongs to.
    #[error("message body decode failed (system bytes {system_bytes:#010x}): {source}")]
    Body {
        system_bytes: u32,
        source: DecodeError,
    },

    /// The message body could not be encoded.
    #[error("item error: {0}")]
    Item(#[from] ItemError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
