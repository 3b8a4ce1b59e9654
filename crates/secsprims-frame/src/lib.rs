//! HSMS message framing and the SECS message codec.
//!
//! Every HSMS message on the wire is:
//! - A 4-byte big-endian length (bytes that follow the length itself)
//! - A 10-byte header: session id, two header bytes, PType, SType, system bytes
//! - For data messages, an optional SECS-II item body
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod framed;
pub mod header;
pub mod message;
pub mod pool;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, decode_message, encode_frame, encode_message, FrameConfig, HsmsFrame,
    DEFAULT_MAX_PAYLOAD, LENGTH_PREFIX_SIZE,
};
pub use error::{FrameError, Result};
#[cfg(feature = "async")]
pub use framed::HsmsCodec;
pub use header::{
    DeselectStatus, HsmsHeader, MessageType, RejectReason, SelectStatus, CONTROL_SESSION_ID,
    HEADER_SIZE,
};
pub use message::SecsMessage;
pub use pool::{BufferPool, PooledBuffer};
pub use reader::FrameReader;
pub use writer::FrameWriter;
