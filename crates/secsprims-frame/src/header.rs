use std::fmt;

use bytes::{Buf, BufMut};

/// HSMS header size: session id (2) + byte 2 + byte 3 + PType + SType + system bytes (4).
pub const HEADER_SIZE: usize = 10;

/// Session id carried by connection-level control messages.
pub const CONTROL_SESSION_ID: u16 = 0xFFFF;

const REPLY_EXPECTED_BIT: u8 = 0x80;

/// HSMS message type, carried in the SType header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    DataMessage,
    SelectReq,
    SelectRsp,
    DeselectReq,
    DeselectRsp,
    LinktestReq,
    LinktestRsp,
    RejectReq,
    SeparateReq,
    /// Any SType code this implementation does not define.
    Unknown(u8),
}

impl MessageType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::DataMessage,
            1 => Self::SelectReq,
            2 => Self::SelectRsp,
            3 => Self::DeselectReq,
            4 => Self::DeselectRsp,
            5 => Self::LinktestReq,
            6 => Self::LinktestRsp,
            7 => Self::RejectReq,
            9 => Self::SeparateReq,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::DataMessage => 0,
            Self::SelectReq => 1,
            Self::SelectRsp => 2,
            Self::DeselectReq => 3,
            Self::DeselectRsp => 4,
            Self::LinktestReq => 5,
            Self::LinktestRsp => 6,
            Self::RejectReq => 7,
            Self::SeparateReq => 9,
            Self::Unknown(code) => code,
        }
    }

    /// True for everything except data messages.
    pub fn is_control(self) -> bool {
        self != Self::DataMessage
    }

    /// True for control messages that expect a response with the same system bytes.
    pub fn expects_response(self) -> bool {
        matches!(self, Self::SelectReq | Self::DeselectReq | Self::LinktestReq)
    }

    /// The response type paired with a control request.
    pub fn response(self) -> Option<Self> {
        match self {
            Self::SelectReq => Some(Self::SelectRsp),
            Self::DeselectReq => Some(Self::DeselectRsp),
            Self::LinktestReq => Some(Self::LinktestRsp),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DataMessage => "data",
            Self::SelectReq => "select.req",
            Self::SelectRsp => "select.rsp",
            Self::DeselectReq => "deselect.req",
            Self::DeselectRsp => "deselect.rsp",
            Self::LinktestReq => "linktest.req",
            Self::LinktestRsp => "linktest.rsp",
            Self::RejectReq => "reject.req",
            Self::SeparateReq => "separate.req",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "stype {code}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Select.rsp status, carried in header byte 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectStatus {
    Success,
    AlreadyActive,
    NotReady,
    Exhausted,
    Other(u8),
}

impl SelectStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::AlreadyActive,
            2 => Self::NotReady,
            3 => Self::Exhausted,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::AlreadyActive => 1,
            Self::NotReady => 2,
            Self::Exhausted => 3,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for SelectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::AlreadyActive => f.write_str("already active"),
            Self::NotReady => f.write_str("not ready"),
            Self::Exhausted => f.write_str("connections exhausted"),
            Self::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// Deselect.rsp status, carried in header byte 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeselectStatus {
    Success,
    NotEstablished,
    Busy,
    Other(u8),
}

impl DeselectStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::NotEstablished,
            2 => Self::Busy,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::NotEstablished => 1,
            Self::Busy => 2,
            Self::Other(code) => code,
        }
    }
}

/// Reject.req reason code, carried in header byte 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    STypeNotSupported,
    PTypeNotSupported,
    TransactionNotOpen,
    EntityNotSelected,
    Other(u8),
}

impl RejectReason {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::STypeNotSupported,
            2 => Self::PTypeNotSupported,
            3 => Self::TransactionNotOpen,
            4 => Self::EntityNotSelected,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::STypeNotSupported => 1,
            Self::PTypeNotSupported => 2,
            Self::TransactionNotOpen => 3,
            Self::EntityNotSelected => 4,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::STypeNotSupported => f.write_str("stype not supported"),
            Self::PTypeNotSupported => f.write_str("ptype not supported"),
            Self::TransactionNotOpen => f.write_str("transaction not open"),
            Self::EntityNotSelected => f.write_str("entity not selected"),
            Self::Other(code) => write!(f, "reason {code}"),
        }
    }
}

/// The 10-byte HSMS message header.
///
/// Bytes 2 and 3 are kept raw: for data messages they hold the W-bit,
/// stream and function; for control messages they hold status or reason
/// codes depending on the message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsmsHeader {
    /// Device id for data messages, `0xFFFF` for most control messages.
    pub session_id: u16,
    pub byte2: u8,
    pub byte3: u8,
    /// Presentation type; 0 is the only defined value.
    pub ptype: u8,
    pub message_type: MessageType,
    pub system_bytes: u32,
}

impl HsmsHeader {
    /// Data message header. Stream and device id are not range-checked here.
    pub fn data(
        device_id: u16,
        stream: u8,
        function: u8,
        reply_expected: bool,
        system_bytes: u32,
    ) -> Self {
        let w = if reply_expected { REPLY_EXPECTED_BIT } else { 0 };
        Self {
            session_id: device_id,
            byte2: w | (stream & !REPLY_EXPECTED_BIT),
            byte3: function,
            ptype: 0,
            message_type: MessageType::DataMessage,
            system_bytes,
        }
    }

    fn control(message_type: MessageType, system_bytes: u32) -> Self {
        Self {
            session_id: CONTROL_SESSION_ID,
            byte2: 0,
            byte3: 0,
            ptype: 0,
            message_type,
            system_bytes,
        }
    }

    pub fn select_req(system_bytes: u32) -> Self {
        Self::control(MessageType::SelectReq, system_bytes)
    }

    pub fn select_rsp(system_bytes: u32, status: SelectStatus) -> Self {
        Self {
            byte3: status.code(),
            ..Self::control(MessageType::SelectRsp, system_bytes)
        }
    }

    pub fn deselect_req(system_bytes: u32) -> Self {
        Self::control(MessageType::DeselectReq, system_bytes)
    }

    pub fn deselect_rsp(system_bytes: u32, status: DeselectStatus) -> Self {
        Self {
            byte3: status.code(),
            ..Self::control(MessageType::DeselectRsp, system_bytes)
        }
    }

    pub fn linktest_req(system_bytes: u32) -> Self {
        Self::control(MessageType::LinktestReq, system_bytes)
    }

    pub fn linktest_rsp(system_bytes: u32) -> Self {
        Self::control(MessageType::LinktestRsp, system_bytes)
    }

    pub fn separate_req(system_bytes: u32) -> Self {
        Self::control(MessageType::SeparateReq, system_bytes)
    }

    /// Reject.req answering `rejected`.
    ///
    /// Byte 2 echoes the offending PType when the PType is unsupported and
    /// the offending SType otherwise. System bytes are copied so the peer
    /// can match the rejection to what it sent.
    pub fn reject_req(rejected: &HsmsHeader, reason: RejectReason) -> Self {
        let byte2 = match reason {
            RejectReason::PTypeNotSupported => rejected.ptype,
            _ => rejected.message_type.code(),
        };
        Self {
            session_id: rejected.session_id,
            byte2,
            byte3: reason.code(),
            ptype: 0,
            message_type: MessageType::RejectReq,
            system_bytes: rejected.system_bytes,
        }
    }

    /// Stream number of a data message (W-bit masked off).
    pub fn stream(&self) -> u8 {
        self.byte2 & !REPLY_EXPECTED_BIT
    }

    pub fn function(&self) -> u8 {
        self.byte3
    }

    /// W-bit of a data message.
    pub fn reply_expected(&self) -> bool {
        self.byte2 & REPLY_EXPECTED_BIT != 0
    }

    pub fn select_status(&self) -> SelectStatus {
        SelectStatus::from_code(self.byte3)
    }

    pub fn deselect_status(&self) -> DeselectStatus {
        DeselectStatus::from_code(self.byte3)
    }

    pub fn reject_reason(&self) -> RejectReason {
        RejectReason::from_code(self.byte3)
    }

    /// Write the 10 header bytes, big-endian.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.session_id);
        dst.put_u8(self.byte2);
        dst.put_u8(self.byte3);
        dst.put_u8(self.ptype);
        dst.put_u8(self.message_type.code());
        dst.put_u32(self.system_bytes);
    }

    /// Read 10 header bytes. Returns `None` if fewer are available.
    pub fn decode(src: &mut impl Buf) -> Option<Self> {
        if src.remaining() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            session_id: src.get_u16(),
            byte2: src.get_u8(),
            byte3: src.get_u8(),
            ptype: src.get_u8(),
            message_type: MessageType::from_code(src.get_u8()),
            system_bytes: src.get_u32(),
        })
    }
}

impl fmt::Display for HsmsHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_type {
            MessageType::DataMessage => {
                write!(f, "S{}F{}", self.stream(), self.function())?;
                if self.reply_expected() {
                    f.write_str(" W")?;
                }
            }
            other => write!(f, "{other}")?,
        }
        write!(f, " [{:#010x}]", self.system_bytes)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn data_header_layout() {
        let header = HsmsHeader::data(1, 1, 13, true, 0x0102_0304);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(
            buf.as_ref(),
            &[0x00, 0x01, 0x81, 0x0D, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(header.stream(), 1);
        assert_eq!(header.function(), 13);
        assert!(header.reply_expected());
    }

    #[test]
    fn select_req_layout() {
        let mut buf = BytesMut::new();
        HsmsHeader::select_req(7).encode(&mut buf);
        assert_eq!(
            buf.as_ref(),
            &[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07]
        );
    }

    #[test]
    fn decode_needs_ten_bytes() {
        let mut short: &[u8] = &[0u8; 9];
        assert!(HsmsHeader::decode(&mut short).is_none());
    }

    #[test]
    fn decode_reads_what_encode_wrote() {
        let header = HsmsHeader::deselect_rsp(42, DeselectStatus::Busy);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let decoded = HsmsHeader::decode(&mut buf).expect("ten bytes should decode");
        assert_eq!(decoded, header);
        assert_eq!(decoded.deselect_status(), DeselectStatus::Busy);
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_masks_w_bit() {
        let header = HsmsHeader::data(0, 0xFF, 1, false, 1);
        assert_eq!(header.stream(), 0x7F);
        assert!(!header.reply_expected());
    }

    #[test]
    fn unknown_stype_preserved() {
        assert_eq!(MessageType::from_code(8), MessageType::Unknown(8));
        assert_eq!(MessageType::Unknown(8).code(), 8);
        assert!(MessageType::Unknown(8).is_control());
        assert!(!MessageType::DataMessage.is_control());
    }

    #[test]
    fn control_request_response_pairs() {
        assert_eq!(MessageType::SelectReq.response(), Some(MessageType::SelectRsp));
        assert_eq!(
            MessageType::LinktestReq.response(),
            Some(MessageType::LinktestRsp)
        );
        assert_eq!(MessageType::SeparateReq.response(), None);
        assert!(!MessageType::SeparateReq.expects_response());
    }

    #[test]
    fn reject_echoes_stype_or_ptype() {
        let offending = HsmsHeader {
            ptype: 3,
            ..HsmsHeader::data(5, 1, 1, true, 99)
        };

        let ptype_reject = HsmsHeader::reject_req(&offending, RejectReason::PTypeNotSupported);
        assert_eq!(ptype_reject.byte2, 3);
        assert_eq!(ptype_reject.byte3, 2);
        assert_eq!(ptype_reject.system_bytes, 99);
        assert_eq!(ptype_reject.session_id, 5);

        let unknown = HsmsHeader {
            message_type: MessageType::Unknown(11),
            ..HsmsHeader::linktest_req(100)
        };
        let stype_reject = HsmsHeader::reject_req(&unknown, RejectReason::STypeNotSupported);
        assert_eq!(stype_reject.byte2, 11);
        assert_eq!(stype_reject.reject_reason(), RejectReason::STypeNotSupported);
    }

    #[test]
    fn status_codes_roundtrip_unknown_values() {
        assert_eq!(SelectStatus::from_code(9), SelectStatus::Other(9));
        assert_eq!(SelectStatus::Other(9).code(), 9);
        assert_eq!(RejectReason::from_code(4), RejectReason::EntityNotSelected);
    }

    #[test]
    fn display_formats() {
        assert_eq!(
            HsmsHeader::data(0, 6, 11, true, 1).to_string(),
            "S6F11 W [0x00000001]"
        );
        assert_eq!(
            HsmsHeader::linktest_req(2).to_string(),
            "linktest.req [0x00000002]"
        );
    }
}
