//! The Select handshake run on a fresh connection before the session
//! threads start.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use secsprims_frame::{
    FrameError, FrameReader, FrameWriter, HsmsFrame, HsmsHeader, MessageType, RejectReason,
    SelectStatus,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};

/// Send Select.req and wait up to `timeout` (T6) for a successful Select.rsp.
pub(crate) fn select_active<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    system_bytes: u32,
    timeout: Duration,
) -> Result<()> {
    writer.send(&HsmsHeader::select_req(system_bytes), &[])?;
    debug!(system_bytes, "select.req sent");

    let deadline = Instant::now() + timeout;
    loop {
        let frame = next_frame(reader, deadline, timeout)?;
        let header = frame.header;
        match header.message_type {
            MessageType::SelectRsp if header.system_bytes == system_bytes => {
                return match header.select_status() {
                    SelectStatus::Success => {
                        info!(system_bytes, "selected (active)");
                        Ok(())
                    }
                    status => Err(SessionError::SelectRejected(status)),
                };
            }
            MessageType::SelectReq => {
                writer.send(
                    &HsmsHeader::select_rsp(header.system_bytes, SelectStatus::Success),
                    &[],
                )?;
            }
            MessageType::RejectReq if header.system_bytes == system_bytes => {
                return Err(SessionError::Rejected {
                    reason: header.reject_reason(),
                });
            }
            _ => answer_while_not_selected(writer, &header)?,
        }
    }
}

/// Wait up to `timeout` (T7) for Select.req and accept it.
pub(crate) fn select_passive<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let frame = next_frame(reader, deadline, timeout)?;
        let header = frame.header;
        if header.message_type == MessageType::SelectReq && header.ptype == 0 {
            writer.send(
                &HsmsHeader::select_rsp(header.system_bytes, SelectStatus::Success),
                &[],
            )?;
            info!(system_bytes = header.system_bytes, "selected (passive)");
            return Ok(());
        }
        answer_while_not_selected(writer, &header)?;
    }
}

/// Handle anything other than the select exchange before selection.
fn answer_while_not_selected<W: Write>(
    writer: &mut FrameWriter<W>,
    header: &HsmsHeader,
) -> Result<()> {
    if header.ptype != 0 {
        warn!(ptype = header.ptype, "rejecting unsupported ptype");
        writer.send(
            &HsmsHeader::reject_req(header, RejectReason::PTypeNotSupported),
            &[],
        )?;
        return Ok(());
    }

    match header.message_type {
        MessageType::LinktestReq => {
            writer.send(&HsmsHeader::linktest_rsp(header.system_bytes), &[])?;
        }
        MessageType::SeparateReq => {
            info!("separate.req received before selection");
            return Err(SessionError::Terminated);
        }
        MessageType::DataMessage => {
            warn!(header = %header, "data before selection rejected");
            writer.send(
                &HsmsHeader::reject_req(header, RejectReason::EntityNotSelected),
                &[],
            )?;
        }
        MessageType::Unknown(code) => {
            warn!(stype = code, "rejecting unsupported stype");
            writer.send(
                &HsmsHeader::reject_req(header, RejectReason::STypeNotSupported),
                &[],
            )?;
        }
        other => debug!(message_type = %other, "ignored while selecting"),
    }
    Ok(())
}

fn next_frame<R: Read>(
    reader: &mut FrameReader<R>,
    deadline: Instant,
    timeout: Duration,
) -> Result<HsmsFrame> {
    loop {
        if Instant::now() >= deadline {
            return Err(SessionError::Timeout(timeout));
        }

        match reader.read_frame() {
            Ok(frame) => return Ok(frame),
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => return Err(SessionError::Terminated),
            Err(err) => return Err(SessionError::Frame(err)),
        }
    }
}
