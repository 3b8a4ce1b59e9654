//! Reply classification and stream 9 error reports.

use secsprims_frame::{HsmsHeader, SecsMessage, HEADER_SIZE};
use secsprims_item::Item;

use crate::error::{ProtocolError, Result, SessionError};

/// S9F1: unrecognized device id.
pub const S9F1_UNRECOGNIZED_DEVICE_ID: u8 = 1;
/// S9F3: unrecognized stream.
pub const S9F3_UNRECOGNIZED_STREAM: u8 = 3;
/// S9F5: unrecognized function.
pub const S9F5_UNRECOGNIZED_FUNCTION: u8 = 5;
/// S9F7: illegal data.
pub const S9F7_ILLEGAL_DATA: u8 = 7;
/// S9F9: transaction timer timeout.
pub const S9F9_TRANSACTION_TIMEOUT: u8 = 9;
/// S9F11: data too long.
pub const S9F11_DATA_TOO_LONG: u8 = 11;
/// S9F13: conversation timeout.
pub const S9F13_CONVERSATION_TIMEOUT: u8 = 13;

/// Decide how a reply completes its transaction.
///
/// SxF0 and every stream 9 message are failures; anything else is a
/// normal completion.
pub fn classify_reply(reply: SecsMessage) -> Result<SecsMessage> {
    if reply.function() == 0 {
        return Err(ProtocolError::TransactionAborted(Box::new(reply)).into());
    }
    if reply.stream() != 9 {
        return Ok(reply);
    }

    let boxed = Box::new(reply);
    let err = match boxed.function() {
        S9F1_UNRECOGNIZED_DEVICE_ID => ProtocolError::UnrecognizedDeviceId(boxed),
        S9F3_UNRECOGNIZED_STREAM => ProtocolError::UnrecognizedStream(boxed),
        S9F5_UNRECOGNIZED_FUNCTION => ProtocolError::UnrecognizedFunction(boxed),
        S9F7_ILLEGAL_DATA => ProtocolError::IllegalData(boxed),
        S9F9_TRANSACTION_TIMEOUT => ProtocolError::TransactionTimeout(boxed),
        S9F11_DATA_TOO_LONG => ProtocolError::DataTooLong(boxed),
        S9F13_CONVERSATION_TIMEOUT => ProtocolError::ConversationTimeout(boxed),
        _ => ProtocolError::UnknownS9(boxed),
    };
    Err(SessionError::Protocol(err))
}

/// A stream 9 report about `offending`, carrying its header as `<B>` (MHEAD).
///
/// System bytes are left at 0; the session allocates them on send.
pub fn s9_report(function: u8, device_id: u16, offending: &HsmsHeader) -> Result<SecsMessage> {
    let mut mhead = Vec::with_capacity(HEADER_SIZE);
    offending.encode(&mut mhead);

    let report = SecsMessage::new(9, function, false)?
        .with_device_id(device_id)
        .with_body(Item::binary(mhead));
    Ok(report)
}

/// System bytes of the message a stream 9 report refers to.
///
/// Every S9 report in the table carries the offending header as a 10-byte
/// `<B>`; anything else yields `None`.
pub fn reported_system_bytes(report: &SecsMessage) -> Option<u32> {
    if report.stream() != 9 {
        return None;
    }
    let mhead = report.body.as_ref()?.as_binary().ok()?;
    let bytes: [u8; HEADER_SIZE] = mhead.try_into().ok()?;
    Some(u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]))
}
