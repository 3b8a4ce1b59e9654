use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use secsprims_transport::HsmsStream;

use crate::codec::{encode_frame, encode_message, FrameConfig, HsmsFrame, LENGTH_PREFIX_SIZE};
use crate::error::{FrameError, Result};
use crate::header::{HsmsHeader, HEADER_SIZE};
use crate::message::SecsMessage;
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete HSMS frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &HsmsFrame) -> Result<()> {
        self.send(&frame.header, frame.body.as_ref())
    }

    /// Encode and send a header with a raw body.
    pub fn send(&mut self, header: &HsmsHeader, body: &[u8]) -> Result<()> {
        self.check_size(HEADER_SIZE + body.len())?;

        self.buf.clear();
        encode_frame(header, body, &mut self.buf)?;
        self.flush_buf()
    }

    /// Encode and send a data message.
    pub fn write_message(&mut self, msg: &SecsMessage) -> Result<()> {
        self.buf.clear();
        encode_message(msg, &mut self.buf)?;
        self.check_size(self.buf.len() - LENGTH_PREFIX_SIZE)?;
        self.flush_buf()
    }

    /// Send bytes that already hold one or more complete encoded frames.
    pub fn write_encoded(&mut self, encoded: &[u8]) -> Result<()> {
        if encoded.len() > LENGTH_PREFIX_SIZE {
            self.check_size(encoded.len() - LENGTH_PREFIX_SIZE)?;
        }
        write_all(&mut self.inner, encoded)?;
        self.flush()
    }

    fn check_size(&self, length: usize) -> Result<()> {
        if length > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: length,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }

    fn flush_buf(&mut self) -> Result<()> {
        write_all(&mut self.inner, &self.buf)?;
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum message size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn write_all<T: Write>(inner: &mut T, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match inner.write(&bytes[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

impl FrameWriter<HsmsStream> {
    /// Create a frame writer for `HsmsStream` and apply write timeout from config.
    pub fn with_config_stream(inner: HsmsStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
