//! `tokio_util::codec` adapter for async HSMS connections.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, encode_message, HsmsFrame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::message::SecsMessage;

/// Frame codec for `tokio_util::codec::Framed`.
///
/// Decodes raw [`HsmsFrame`]s; encodes either frames or [`SecsMessage`]s.
#[derive(Debug, Clone)]
pub struct HsmsCodec {
    max_length: usize,
}

impl HsmsCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for HsmsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for HsmsCodec {
    type Item = HsmsFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HsmsFrame>> {
        decode_frame(src, self.max_length)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<HsmsFrame>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<HsmsFrame> for HsmsCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: HsmsFrame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&frame.header, &frame.body, dst)
    }
}

impl Encoder<&SecsMessage> for HsmsCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: &SecsMessage, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        encode_message(msg, dst)?;
        let length = dst.len() - start - crate::codec::LENGTH_PREFIX_SIZE;
        if length > self.max_length {
            dst.truncate(start);
            return Err(FrameError::PayloadTooLarge {
                size: length,
                max: self.max_length,
            });
        }
        Ok(())
    }
}
