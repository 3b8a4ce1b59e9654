use std::fmt;

use secsprims_item::Item;

use crate::error::{FrameError, Result};
use crate::header::HsmsHeader;

/// Highest stream number representable in the 7-bit stream field.
pub const MAX_STREAM: u8 = 0x7F;

/// Highest device id representable in the 15-bit session id field.
pub const MAX_DEVICE_ID: u16 = 0x7FFF;

/// A SECS-II data message: stream/function header plus an optional item body.
///
/// A message with `body: None` is header-only and encodes with no body
/// bytes at all, which is different from a body holding an empty list.
#[derive(Debug, Clone, PartialEq)]
pub struct SecsMessage {
    stream: u8,
    function: u8,
    /// W-bit: the sender expects a reply.
    pub reply_expected: bool,
    pub device_id: u16,
    /// Transaction id. Zero on an outgoing primary means "allocate one".
    pub system_bytes: u32,
    /// Local label, never transmitted.
    pub name: Option<String>,
    pub body: Option<Item>,
}

impl SecsMessage {
    /// Create a header-only message. Fails if `stream` exceeds 127.
    pub fn new(stream: u8, function: u8, reply_expected: bool) -> Result<Self> {
        if stream > MAX_STREAM {
            return Err(FrameError::InvalidStream(stream));
        }
        Ok(Self {
            stream,
            function,
            reply_expected,
            device_id: 0,
            system_bytes: 0,
            name: None,
            body: None,
        })
    }

    /// Build a message from a decoded data header and body.
    pub(crate) fn from_header(header: &HsmsHeader, body: Option<Item>) -> Self {
        Self {
            stream: header.stream(),
            function: header.function(),
            reply_expected: header.reply_expected(),
            device_id: header.session_id,
            system_bytes: header.system_bytes,
            name: None,
            body,
        }
    }

    pub fn with_body(mut self, body: Item) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_device_id(mut self, device_id: u16) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_system_bytes(mut self, system_bytes: u32) -> Self {
        self.system_bytes = system_bytes;
        self
    }

    pub fn stream(&self) -> u8 {
        self.stream
    }

    pub fn function(&self) -> u8 {
        self.function
    }

    /// Odd function numbers are primaries.
    pub fn is_primary(&self) -> bool {
        self.function % 2 == 1
    }

    /// Even function numbers are secondaries, including the SxF0 abort.
    pub fn is_reply(&self) -> bool {
        !self.is_primary()
    }

    /// Function number of the reply to this message.
    pub fn reply_function(&self) -> u8 {
        self.function.saturating_add(1)
    }

    /// The secondary answering this message: same stream, function + 1,
    /// same device id, system bytes and name.
    pub fn reply(&self, body: Option<Item>) -> Self {
        Self {
            stream: self.stream,
            function: self.reply_function(),
            reply_expected: false,
            device_id: self.device_id,
            system_bytes: self.system_bytes,
            name: self.name.clone(),
            body,
        }
    }

    /// The SxF0 transaction-abort reply to this message.
    pub fn abort(&self) -> Self {
        Self {
            function: 0,
            ..self.reply(None)
        }
    }

    /// The HSMS header this message encodes with.
    pub fn header(&self) -> HsmsHeader {
        HsmsHeader::data(
            self.device_id,
            self.stream,
            self.function,
            self.reply_expected,
            self.system_bytes,
        )
    }
}

/// `S1F1 W 'name'`; the alternate form (`{:#}`) appends the body in SML.
impl fmt::Display for SecsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}F{}", self.stream, self.function)?;
        if self.reply_expected {
            f.write_str(" W")?;
        }
        if let Some(name) = &self.name {
            write!(f, " '{name}'")?;
        }
        if f.alternate() {
            if let Some(body) = &self.body {
                write!(f, " {body}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_above_127_rejected() {
        assert!(matches!(
            SecsMessage::new(128, 1, false),
            Err(FrameError::InvalidStream(128))
        ));
        assert!(SecsMessage::new(127, 1, false).is_ok());
    }

    #[test]
    fn reply_keeps_transaction_identity() {
        let primary = SecsMessage::new(1, 3, true)
            .unwrap()
            .with_device_id(7)
            .with_system_bytes(0x55)
            .with_name("status");

        let reply = primary.reply(Some(Item::empty_list()));
        assert_eq!(reply.stream(), 1);
        assert_eq!(reply.function(), 4);
        assert!(!reply.reply_expected);
        assert!(!reply.is_primary());
        assert_eq!(reply.device_id, 7);
        assert_eq!(reply.system_bytes, 0x55);
        assert_eq!(reply.name.as_deref(), Some("status"));
    }

    #[test]
    fn abort_is_function_zero() {
        let primary = SecsMessage::new(6, 11, true).unwrap();
        let abort = primary.abort();
        assert_eq!(abort.function(), 0);
        assert!(abort.body.is_none());
    }

    #[test]
    fn header_carries_w_bit() {
        let msg = SecsMessage::new(2, 41, true)
            .unwrap()
            .with_device_id(3)
            .with_system_bytes(9);
        let header = msg.header();
        assert_eq!(header.session_id, 3);
        assert_eq!(header.stream(), 2);
        assert_eq!(header.function(), 41);
        assert!(header.reply_expected());
        assert_eq!(header.system_bytes, 9);
    }

    #[test]
    fn display_forms() {
        let msg = SecsMessage::new(1, 1, true)
            .unwrap()
            .with_name("are you there")
            .with_body(Item::empty_list());
        assert_eq!(msg.to_string(), "S1F1 W 'are you there'");
        assert_eq!(format!("{msg:#}"), "S1F1 W 'are you there' <L [0]>");

        let bare = SecsMessage::new(1, 2, false).unwrap();
        assert_eq!(bare.to_string(), "S1F2");
    }
}
