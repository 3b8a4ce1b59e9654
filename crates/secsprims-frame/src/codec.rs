use bytes::{Buf, BufMut, Bytes, BytesMut};
use secsprims_item::Item;

use crate::error::{FrameError, Result};
use crate::header::{HsmsHeader, MessageType, HEADER_SIZE};
use crate::message::{SecsMessage, MAX_DEVICE_ID};

/// Size of the big-endian length prefix in front of every message.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum message length (header + body): 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One HSMS message as it travels the wire: header plus raw body bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct HsmsFrame {
    pub header: HsmsHeader,
    /// Encoded SECS-II item, empty for control and header-only messages.
    pub body: Bytes,
}

impl HsmsFrame {
    pub fn new(header: HsmsHeader, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// A frame with no body, as every control message is.
    pub fn control(header: HsmsHeader) -> Self {
        Self::new(header, Bytes::new())
    }

    /// The total wire size of this frame (length prefix + header + body).
    pub fn wire_size(&self) -> usize {
        LENGTH_PREFIX_SIZE + HEADER_SIZE + self.body.len()
    }
}

/// Encode a header and raw body into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────────────────┬──────────────────┐
/// │ Length (4B)  │ Header (10B)          │ Body             │
/// │ BE, excludes │ session id, b2, b3,   │ (Length - 10 B)  │
/// │ itself       │ ptype, stype, sysbytes│                  │
/// └──────────────┴───────────────────────┴──────────────────┘
/// ```
pub fn encode_frame(header: &HsmsHeader, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = HEADER_SIZE + body.len();
    if length > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + length);
    dst.put_u32(length as u32);
    header.encode(dst);
    dst.put_slice(body);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. `max_length`
/// bounds the declared length (header + body).
pub fn decode_frame(src: &mut BytesMut, max_length: usize) -> Result<Option<HsmsFrame>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
    if (declared as usize) < HEADER_SIZE {
        return Err(FrameError::InvalidLength(declared));
    }
    let length = declared as usize;
    if length > max_length {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: max_length,
        });
    }

    if src.len() < LENGTH_PREFIX_SIZE + length {
        src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let mut message = src.split_to(length);
    let header = HsmsHeader::decode(&mut message).ok_or(FrameError::InvalidLength(declared))?;

    Ok(Some(HsmsFrame {
        header,
        body: message.freeze(),
    }))
}

/// Encode a data message, body included, straight into `dst`.
///
/// The body is encoded in place behind the header; no intermediate
/// buffer is allocated.
pub fn encode_message(msg: &SecsMessage, dst: &mut BytesMut) -> Result<()> {
    if msg.device_id > MAX_DEVICE_ID {
        return Err(FrameError::InvalidDeviceId(msg.device_id));
    }

    let body_len = msg.body.as_ref().map_or(0, Item::encoded_len);
    let length = HEADER_SIZE + body_len;
    if length > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: u32::MAX as usize,
        });
    }

    dst.reserve(LENGTH_PREFIX_SIZE + length);
    dst.put_u32(length as u32);
    msg.header().encode(dst);
    if let Some(body) = &msg.body {
        body.encode(dst)?;
    }
    Ok(())
}

/// Decode a data frame into a message.
///
/// An empty body decodes as `body: None`. Body decode failures carry the
/// frame's system bytes.
pub fn decode_message(frame: &HsmsFrame) -> Result<SecsMessage> {
    let header = &frame.header;
    if header.message_type != MessageType::DataMessage {
        return Err(FrameError::NotDataMessage(header.message_type));
    }
    if header.ptype != 0 {
        return Err(FrameError::UnsupportedPType(header.ptype));
    }

    let body = if frame.body.is_empty() {
        None
    } else {
        let item = Item::from_bytes(&frame.body).map_err(|source| FrameError::Body {
            system_bytes: header.system_bytes,
            source,
        })?;
        Some(item)
    };

    Ok(SecsMessage::from_header(header, body))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum message length (header + body) in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
