use std::io::ErrorKind;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use secsprims_frame::{
    decode_message, encode_message, BufferPool, DeselectStatus, FrameError, FrameReader,
    FrameWriter, HsmsFrame, HsmsHeader, MessageType, RejectReason, SecsMessage, SelectStatus,
    LENGTH_PREFIX_SIZE,
};
use secsprims_transport::HsmsStream;
use tracing::{debug, error, info, warn};

use crate::classify::{
    reported_system_bytes, s9_report, S9F1_UNRECOGNIZED_DEVICE_ID, S9F7_ILLEGAL_DATA,
};
use crate::config::{ConnectionMode, SessionConfig};
use crate::error::{Result, SessionError};
use crate::handler::{MessageHandler, SharedHandler};
use crate::select::{select_active, select_passive};
use crate::state::ConnectionState;
use crate::transaction::{lock, ReplyHandle, ReplySlot, TransactionTable};

/// How often the maintenance thread sweeps expired transactions.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// A locally initiated control request waiting for its response.
struct ControlWait {
    system_bytes: u32,
    expected: MessageType,
    slot: Arc<ReplySlot<Result<HsmsHeader>>>,
}

struct Shared {
    config: SessionConfig,
    handler: SharedHandler,
    writer: Mutex<FrameWriter<HsmsStream>>,
    /// Clone of the connection used only to shut it down.
    stream: HsmsStream,
    peer_addr: Option<SocketAddr>,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    transactions: Arc<TransactionTable>,
    control: Mutex<Option<ControlWait>>,
    pool: Arc<BufferPool>,
    closed: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// A selected HSMS connection.
///
/// Dereferences to [`SessionHandle`] for all operations. Dropping the
/// session closes the connection.
pub struct Session {
    handle: SessionHandle,
}

/// A cloneable reference to a session, usable from any thread including
/// inside a [`MessageHandler`].
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl Session {
    /// Run the Select handshake on a connected stream and start the session.
    ///
    /// `config.mode` decides whether this side sends Select.req (active,
    /// bounded by T6) or waits for it (passive, bounded by T7).
    pub fn from_stream(
        stream: HsmsStream,
        config: SessionConfig,
        handler: SharedHandler,
    ) -> Result<Session> {
        establish(stream, config, handler, Arc::new(BufferPool::default()))
    }

    /// Like [`Session::from_stream`], sharing an existing encode buffer pool.
    pub fn from_stream_with_pool(
        stream: HsmsStream,
        config: SessionConfig,
        handler: SharedHandler,
        pool: Arc<BufferPool>,
    ) -> Result<Session> {
        establish(stream, config, handler, pool)
    }

    /// A handle that outlives borrows of the session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }
}

impl Deref for Session {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handle.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.handle, f)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("device_id", &self.shared.config.device_id)
            .field("state", &self.state())
            .field("peer_addr", &self.shared.peer_addr)
            .field("pending", &self.pending_transactions())
            .finish()
    }
}

pub(crate) fn notify_state(handler: &dyn MessageHandler, old: ConnectionState, new: ConnectionState) {
    debug!(%old, %new, "state changed");
    handler.on_state_changed(old, new);
}

fn establish(
    stream: HsmsStream,
    config: SessionConfig,
    handler: SharedHandler,
    pool: Arc<BufferPool>,
) -> Result<Session> {
    let transactions = Arc::new(TransactionTable::new());
    let peer_addr = stream.peer_addr();
    let control_stream = stream.try_clone()?;
    let reader_stream = stream.try_clone()?;

    let frame_config = config.select_frame_config(config.select_timeout());
    let mut reader = FrameReader::with_config_stream(reader_stream, frame_config.clone())?;
    let mut writer = FrameWriter::with_config_stream(stream, frame_config)?;

    notify_state(&*handler, ConnectionState::Connecting, ConnectionState::Selecting);
    let selected = match config.mode {
        ConnectionMode::Active => select_active(
            &mut reader,
            &mut writer,
            transactions.allocate_id(),
            config.t6_control,
        ),
        ConnectionMode::Passive => select_passive(&mut reader, &mut writer, config.t7_not_selected),
    }
    .and_then(|()| {
        // After selection reads block for at most T8 so a stalled message is detected.
        reader.get_ref().set_read_timeout(Some(config.t8_network))?;
        Ok(())
    });
    if let Err(err) = selected {
        warn!(error = %err, "select failed");
        let _ = control_stream.shutdown();
        notify_state(&*handler, ConnectionState::Selecting, ConnectionState::NotConnected);
        return Err(err);
    }

    let shared = Arc::new(Shared {
        config,
        handler,
        writer: Mutex::new(writer),
        stream: control_stream,
        peer_addr,
        state: Mutex::new(ConnectionState::Selected),
        state_changed: Condvar::new(),
        transactions,
        control: Mutex::new(None),
        pool,
        closed: AtomicBool::new(false),
        threads: Mutex::new(Vec::with_capacity(2)),
    });
    notify_state(
        &*shared.handler,
        ConnectionState::Selecting,
        ConnectionState::Selected,
    );

    let handle = SessionHandle { shared };
    let session = Session {
        handle: handle.clone(),
    };

    let reader_thread = {
        let handle = handle.clone();
        thread::Builder::new()
            .name("hsms-reader".to_string())
            .spawn(move || handle.reader_loop(reader))
    };
    let maintenance_thread = {
        let handle = handle.clone();
        thread::Builder::new()
            .name("hsms-maintenance".to_string())
            .spawn(move || handle.maintenance_loop())
    };

    let mut threads = lock(&handle.shared.threads);
    threads.push(reader_thread.map_err(secsprims_transport::TransportError::Io)?);
    threads.push(maintenance_thread.map_err(secsprims_transport::TransportError::Io)?);
    drop(threads);

    Ok(session)
}

impl SessionHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Remote address for TCP sessions.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_transactions(&self) -> usize {
        self.shared.transactions.len()
    }

    /// Encode buffers shared by this session's senders.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.shared.pool
    }

    /// True once the connection has been terminated.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Send a data message.
    ///
    /// Without the W-bit the message is written and `Ok(None)` returned.
    /// With it, the transaction is registered before any byte is written
    /// and a [`ReplyHandle`] returned. System bytes of 0 are allocated; an
    /// explicit value that is already pending fails with
    /// `DuplicateTransaction`. A primary with device id 0 is sent with the
    /// configured device id.
    pub fn send(&self, mut message: SecsMessage) -> Result<Option<ReplyHandle>> {
        self.ensure_selected()?;
        if message.is_primary() && message.device_id == 0 {
            message.device_id = self.shared.config.device_id;
        }

        if !message.reply_expected {
            if message.system_bytes == 0 {
                message.system_bytes = self.shared.transactions.allocate_id();
            }
            self.write_message(&message)?;
            return Ok(None);
        }

        let t3 = self.shared.config.t3_reply;
        let (id, slot) =
            self.shared
                .transactions
                .register(message.system_bytes, message.name.clone(), t3)?;
        message.system_bytes = id;

        if let Err(err) = self.write_message(&message) {
            self.shared
                .transactions
                .fail_slot(id, &slot, SessionError::Cancelled);
            return Err(err);
        }
        // Already gone when the reply raced the write; the slot holds the outcome.
        let sent_at = self
            .shared
            .transactions
            .mark_sent(id, &slot)
            .unwrap_or_else(Instant::now);
        Ok(Some(ReplyHandle::new(
            id,
            slot,
            Arc::clone(&self.shared.transactions),
            sent_at,
            t3,
        )))
    }

    /// Send a primary with the W-bit set and wait for its reply.
    pub fn request(&self, mut message: SecsMessage) -> Result<SecsMessage> {
        message.reply_expected = true;
        match self.send(message)? {
            Some(handle) => handle.wait(),
            None => Err(SessionError::Cancelled),
        }
    }

    /// Send `secondary` as the reply to `primary`, reusing its system bytes
    /// and device id.
    pub fn reply(&self, primary: &SecsMessage, mut secondary: SecsMessage) -> Result<()> {
        self.ensure_selected()?;
        secondary.system_bytes = primary.system_bytes;
        secondary.device_id = primary.device_id;
        secondary.reply_expected = false;
        self.write_message(&secondary)
    }

    /// Linktest round trip, bounded by T6. A T6 timeout terminates the
    /// connection.
    pub fn linktest(&self) -> Result<Duration> {
        self.ensure_connected()?;
        let id = self.shared.transactions.allocate_id();
        let start = Instant::now();
        self.control_transaction(HsmsHeader::linktest_req(id), MessageType::LinktestRsp)?;
        let rtt = start.elapsed();
        debug!(system_bytes = id, rtt_us = rtt.as_micros() as u64, "linktest ok");
        Ok(rtt)
    }

    /// Re-select a deselected connection. A no-op when already selected.
    pub fn select(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Selected => return Ok(()),
            ConnectionState::Deselected => {}
            other if other.is_connected() => return Err(SessionError::NotSelected(other)),
            _ => return Err(SessionError::Terminated),
        }

        let id = self.shared.transactions.allocate_id();
        let rsp = self.control_transaction(HsmsHeader::select_req(id), MessageType::SelectRsp)?;
        match rsp.select_status() {
            SelectStatus::Success | SelectStatus::AlreadyActive => {
                self.set_state(ConnectionState::Selected);
                info!(system_bytes = id, "re-selected");
                Ok(())
            }
            status => Err(SessionError::SelectRejected(status)),
        }
    }

    /// Deselect handshake. On success the connection stays open in
    /// `Deselected` and every pending transaction fails with `Terminated`.
    pub fn deselect(&self) -> Result<()> {
        self.ensure_selected()?;
        let id = self.shared.transactions.allocate_id();
        let rsp =
            self.control_transaction(HsmsHeader::deselect_req(id), MessageType::DeselectRsp)?;
        match rsp.deselect_status() {
            DeselectStatus::Success => {
                self.set_state(ConnectionState::Deselected);
                let failed = self.shared.transactions.terminate_all();
                info!(system_bytes = id, failed, "deselected");
                Ok(())
            }
            status => Err(SessionError::DeselectRejected(status)),
        }
    }

    /// Send Separate.req and drop the connection. No response is awaited.
    pub fn separate(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let id = self.shared.transactions.allocate_id();
        let sent = self.write_control(&HsmsHeader::separate_req(id));
        info!(system_bytes = id, "separate.req sent");
        self.terminate();
        sent
    }

    /// Terminate the connection and wait for the session threads to exit.
    ///
    /// Safe to call repeatedly and from inside a handler.
    pub fn close(&self) {
        self.terminate();
        let current = thread::current().id();
        let threads: Vec<JoinHandle<()>> = lock(&self.shared.threads).drain(..).collect();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("session thread panicked");
            }
        }
    }

    /// Block until the connection is terminated or `timeout` elapses.
    /// Returns true if the session is closed.
    pub fn wait_closed(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = lock(&self.shared.state);
        while !self.is_closed() {
            state = match deadline {
                None => self
                    .shared
                    .state_changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.shared
                        .state_changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        true
    }

    fn ensure_selected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Selected => Ok(()),
            ConnectionState::NotConnected => Err(SessionError::Terminated),
            other => Err(SessionError::NotSelected(other)),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_closed() || !self.state().is_connected() {
            return Err(SessionError::Terminated);
        }
        Ok(())
    }

    fn set_state(&self, new: ConnectionState) -> ConnectionState {
        let old = std::mem::replace(&mut *lock(&self.shared.state), new);
        self.shared.state_changed.notify_all();
        if old != new {
            notify_state(&*self.shared.handler, old, new);
        }
        old
    }

    /// Tear the connection down once: shut the stream, fail everything
    /// outstanding, move to `NotConnected`.
    fn terminate(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.shared.stream.shutdown() {
            debug!(error = %err, "shutdown after terminate");
        }
        let failed = self.shared.transactions.terminate_all();
        let control = lock(&self.shared.control).take();
        if let Some(wait) = control {
            wait.slot.complete(Err(SessionError::Terminated));
        }
        self.set_state(ConnectionState::NotConnected);
        info!(failed, "session terminated");
    }

    fn write_message(&self, message: &SecsMessage) -> Result<()> {
        let mut buf = self.shared.pool.acquire();
        encode_message(message, &mut buf)?;
        let length = buf.len() - LENGTH_PREFIX_SIZE;
        let max = self.shared.config.max_message_size;
        if length > max {
            return Err(FrameError::PayloadTooLarge { size: length, max }.into());
        }

        self.write_encoded(&buf)?;
        debug!(
            stream = message.stream(),
            function = message.function(),
            w = message.reply_expected,
            system_bytes = message.system_bytes,
            len = length,
            "message sent"
        );
        Ok(())
    }

    fn write_control(&self, header: &HsmsHeader) -> Result<()> {
        let mut buf = self.shared.pool.acquire();
        secsprims_frame::encode_frame(header, &[], &mut buf)?;
        self.write_encoded(&buf)?;
        debug!(header = %header, "control sent");
        Ok(())
    }

    fn write_encoded(&self, bytes: &[u8]) -> Result<()> {
        let result = lock(&self.shared.writer).write_encoded(bytes);
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                // A partial write leaves the stream unframed; nothing can follow it.
                if matches!(err, FrameError::Io(_) | FrameError::ConnectionClosed) {
                    if !self.is_closed() {
                        error!(error = %err, "write failed");
                    }
                    self.terminate();
                }
                Err(err.into())
            }
        }
    }

    fn control_transaction(&self, request: HsmsHeader, expected: MessageType) -> Result<HsmsHeader> {
        let slot = Arc::new(ReplySlot::new());
        {
            let mut control = lock(&self.shared.control);
            if control.is_some() {
                return Err(SessionError::ControlBusy);
            }
            *control = Some(ControlWait {
                system_bytes: request.system_bytes,
                expected,
                slot: Arc::clone(&slot),
            });
        }

        if let Err(err) = self.write_control(&request) {
            self.take_control(request.system_bytes, None);
            return Err(err);
        }

        let t6 = self.shared.config.t6_control;
        let outcome = slot.wait_until(Instant::now() + t6);
        self.take_control(request.system_bytes, None);
        match outcome {
            Some(result) => result,
            None => {
                warn!(
                    message_type = %request.message_type,
                    system_bytes = request.system_bytes,
                    "control timeout (T6)"
                );
                self.terminate();
                Err(SessionError::Timeout(t6))
            }
        }
    }

    /// Remove the control waiter for `system_bytes`, if it is the current one
    /// and (when given) expects `response`.
    fn take_control(&self, system_bytes: u32, response: Option<MessageType>) -> Option<ControlWait> {
        let mut control = lock(&self.shared.control);
        let matches = control.as_ref().is_some_and(|wait| {
            wait.system_bytes == system_bytes && response.is_none_or(|r| r == wait.expected)
        });
        if matches {
            control.take()
        } else {
            None
        }
    }

    fn reader_loop(self, mut reader: FrameReader<HsmsStream>) {
        loop {
            if self.is_closed() {
                break;
            }
            match reader.read_frame() {
                Ok(frame) => {
                    if let Err(err) = self.dispatch(frame) {
                        if !self.is_closed() {
                            error!(error = %err, "inbound dispatch failed");
                            self.shared.handler.on_session_error(&err);
                        }
                        self.terminate();
                        break;
                    }
                }
                Err(FrameError::Io(err))
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    if reader.buffered() > 0 {
                        let t8 = self.shared.config.t8_network;
                        error!(
                            buffered = reader.buffered(),
                            "network timeout (T8) inside a message"
                        );
                        self.shared
                            .handler
                            .on_session_error(&SessionError::Timeout(t8));
                        self.terminate();
                        break;
                    }
                }
                Err(FrameError::ConnectionClosed) => {
                    if !self.is_closed() {
                        info!("connection closed by peer");
                    }
                    self.terminate();
                    break;
                }
                Err(err) => {
                    if !self.is_closed() {
                        error!(error = %err, "frame read failed");
                        self.shared
                            .handler
                            .on_session_error(&SessionError::Frame(err));
                    }
                    self.terminate();
                    break;
                }
            }
        }
        debug!("reader thread exiting");
    }

    fn maintenance_loop(self) {
        let interval = self.shared.config.linktest_interval;
        let mut next_linktest = interval.map(|interval| Instant::now() + interval);
        loop {
            {
                let state = lock(&self.shared.state);
                if self.is_closed() {
                    break;
                }
                let _ = self
                    .shared
                    .state_changed
                    .wait_timeout(state, SWEEP_INTERVAL)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if self.is_closed() {
                break;
            }

            let now = Instant::now();
            self.shared.transactions.expire(now);

            if let (Some(interval), Some(due)) = (interval, next_linktest) {
                if now >= due {
                    next_linktest = Some(now + interval);
                    if self.state() == ConnectionState::Selected {
                        match self.linktest() {
                            Ok(_) | Err(SessionError::ControlBusy) => {}
                            Err(err) => {
                                warn!(error = %err, "periodic linktest failed");
                                self.shared.handler.on_session_error(&err);
                                self.terminate();
                            }
                        }
                    }
                }
            }
        }
        debug!("maintenance thread exiting");
    }

    fn dispatch(&self, frame: HsmsFrame) -> Result<()> {
        let header = frame.header;
        if header.ptype != 0 {
            warn!(ptype = header.ptype, system_bytes = header.system_bytes, "rejecting unsupported ptype");
            return self.write_control(&HsmsHeader::reject_req(&header, RejectReason::PTypeNotSupported));
        }

        match header.message_type {
            MessageType::DataMessage => self.on_data(frame),
            MessageType::SelectReq => self.on_select_req(&header),
            MessageType::DeselectReq => self.on_deselect_req(&header),
            MessageType::LinktestReq => {
                self.write_control(&HsmsHeader::linktest_rsp(header.system_bytes))
            }
            MessageType::SelectRsp | MessageType::DeselectRsp | MessageType::LinktestRsp => {
                match self.take_control(header.system_bytes, Some(header.message_type)) {
                    Some(wait) => {
                        wait.slot.complete(Ok(header));
                    }
                    None => warn!(header = %header, "unexpected control response dropped"),
                }
                Ok(())
            }
            MessageType::RejectReq => {
                self.on_reject(&header);
                Ok(())
            }
            MessageType::SeparateReq => {
                info!(system_bytes = header.system_bytes, "separate.req received");
                self.terminate();
                Ok(())
            }
            MessageType::Unknown(code) => {
                warn!(stype = code, system_bytes = header.system_bytes, "rejecting unsupported stype");
                self.write_control(&HsmsHeader::reject_req(&header, RejectReason::STypeNotSupported))
            }
        }
    }

    fn on_select_req(&self, header: &HsmsHeader) -> Result<()> {
        let status = match self.state() {
            ConnectionState::Selected => SelectStatus::AlreadyActive,
            ConnectionState::Deselected | ConnectionState::Selecting => SelectStatus::Success,
            _ => SelectStatus::NotReady,
        };
        self.write_control(&HsmsHeader::select_rsp(header.system_bytes, status))?;
        if status == SelectStatus::Success {
            self.set_state(ConnectionState::Selected);
            info!(system_bytes = header.system_bytes, "selected by peer");
        }
        Ok(())
    }

    fn on_deselect_req(&self, header: &HsmsHeader) -> Result<()> {
        if self.state() != ConnectionState::Selected {
            return self.write_control(&HsmsHeader::deselect_rsp(
                header.system_bytes,
                DeselectStatus::NotEstablished,
            ));
        }
        self.write_control(&HsmsHeader::deselect_rsp(
            header.system_bytes,
            DeselectStatus::Success,
        ))?;
        self.set_state(ConnectionState::Deselected);
        let failed = self.shared.transactions.terminate_all();
        info!(system_bytes = header.system_bytes, failed, "deselected by peer");
        Ok(())
    }

    fn on_reject(&self, header: &HsmsHeader) {
        let reason = header.reject_reason();
        warn!(system_bytes = header.system_bytes, %reason, "reject.req received");

        if self.shared.transactions.reject(header.system_bytes, reason) {
            return;
        }
        if let Some(wait) = self.take_control(header.system_bytes, None) {
            wait.slot.complete(Err(SessionError::Rejected { reason }));
            return;
        }
        self.shared
            .handler
            .on_session_error(&SessionError::Rejected { reason });
    }

    fn on_data(&self, frame: HsmsFrame) -> Result<()> {
        let header = frame.header;
        if self.state() != ConnectionState::Selected {
            warn!(header = %header, "data while not selected rejected");
            return self.write_control(&HsmsHeader::reject_req(
                &header,
                RejectReason::EntityNotSelected,
            ));
        }

        let message = match decode_message(&frame) {
            Ok(message) => message,
            Err(FrameError::Body {
                system_bytes,
                source,
            }) => return self.on_undecodable_body(&header, system_bytes, source),
            Err(err) => return Err(err.into()),
        };

        if message.stream() == 9 && message.is_primary() {
            return self.on_s9_report(message);
        }

        if message.is_reply() {
            let (stream, function, system_bytes) =
                (message.stream(), message.function(), message.system_bytes);
            if !self.shared.transactions.resolve(message) {
                warn!(stream, function, system_bytes, "unsolicited secondary dropped");
            }
            return Ok(());
        }

        if message.device_id != self.shared.config.device_id {
            warn!(
                device_id = message.device_id,
                expected = self.shared.config.device_id,
                system_bytes = message.system_bytes,
                "unrecognized device id"
            );
            let report = s9_report(
                S9F1_UNRECOGNIZED_DEVICE_ID,
                self.shared.config.device_id,
                &header,
            )?;
            return self.send(report).map(|_| ());
        }

        debug!(
            stream = message.stream(),
            function = message.function(),
            w = message.reply_expected,
            system_bytes = message.system_bytes,
            "primary received"
        );
        let reply = self.shared.handler.on_primary_message(self, &message);
        match reply {
            Some(reply) if message.reply_expected => {
                if let Err(err) = self.reply(&message, reply) {
                    warn!(error = %err, system_bytes = message.system_bytes, "reply failed");
                    self.shared.handler.on_session_error(&err);
                }
            }
            Some(_) => warn!(
                system_bytes = message.system_bytes,
                "reply to primary without W-bit dropped"
            ),
            None => {}
        }
        Ok(())
    }

    /// Stream 9 reports fail the transaction their MHEAD names. Unmatched
    /// ones go to the handler whatever their device id, and are never
    /// answered with another S9 report.
    fn on_s9_report(&self, report: SecsMessage) -> Result<()> {
        warn!(
            function = report.function(),
            system_bytes = report.system_bytes,
            "stream 9 report received"
        );
        let report = match reported_system_bytes(&report) {
            Some(id) => match self.shared.transactions.resolve_report(id, report) {
                Ok(()) => return Ok(()),
                Err(report) => report,
            },
            None => report,
        };

        let reply = self.shared.handler.on_primary_message(self, &report);
        if let Some(reply) = reply.filter(|_| report.reply_expected) {
            if let Err(err) = self.reply(&report, reply) {
                warn!(error = %err, system_bytes = report.system_bytes, "reply failed");
                self.shared.handler.on_session_error(&err);
            }
        }
        Ok(())
    }

    fn on_undecodable_body(
        &self,
        header: &HsmsHeader,
        system_bytes: u32,
        source: secsprims_item::DecodeError,
    ) -> Result<()> {
        warn!(header = %header, error = %source, "undecodable message body");

        let is_reply = header.function() % 2 == 0;
        if is_reply
            && self
                .shared
                .transactions
                .fail(system_bytes, SessionError::Item(source.clone().into()))
        {
            return Ok(());
        }
        if !is_reply && header.reply_expected() && header.stream() != 9 {
            let report = s9_report(S9F7_ILLEGAL_DATA, self.shared.config.device_id, header)?;
            self.send(report)?;
        }
        self.shared
            .handler
            .on_session_error(&SessionError::Frame(FrameError::Body {
                system_bytes,
                source,
            }));
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::mpsc;

    use std::sync::atomic::AtomicUsize;

    use secsprims_frame::FrameConfig;
    use secsprims_item::Item;

    use super::*;
    use crate::error::ProtocolError;
    use crate::handler::IgnorePrimaries;

    const WAIT: Duration = Duration::from_secs(5);

    fn echo_handler() -> SharedHandler {
        Arc::new(|_: &SessionHandle, msg: &SecsMessage| Some(msg.reply(msg.body.clone())))
    }

    fn session_pair(
        active_config: SessionConfig,
        active_handler: SharedHandler,
        passive_config: SessionConfig,
        passive_handler: SharedHandler,
    ) -> (Session, Session) {
        let (a, b) = HsmsStream::pair().expect("socket pair should open");
        let passive =
            thread::spawn(move || Session::from_stream(b, passive_config, passive_handler));
        let active =
            Session::from_stream(a, active_config, active_handler).expect("active should select");
        let passive = passive
            .join()
            .expect("passive thread should finish")
            .expect("passive should select");
        (active, passive)
    }

    /// A selected session whose peer is driven frame by frame.
    fn session_with_raw_peer(
        config: SessionConfig,
        handler: SharedHandler,
    ) -> (Session, FrameReader<HsmsStream>, FrameWriter<HsmsStream>) {
        let (a, b) = HsmsStream::pair().expect("socket pair should open");
        let peer = thread::spawn(move || {
            let frame_config = FrameConfig {
                read_timeout: Some(WAIT),
                ..FrameConfig::default()
            };
            let mut reader = FrameReader::with_config_stream(
                b.try_clone().expect("stream should clone"),
                frame_config.clone(),
            )
            .expect("reader should configure");
            let mut writer =
                FrameWriter::with_config_stream(b, frame_config).expect("writer should configure");
            select_passive(&mut reader, &mut writer, WAIT).expect("raw peer should select");
            (reader, writer)
        });
        let session = Session::from_stream(a, config, handler).expect("session should select");
        let (reader, writer) = peer.join().expect("raw peer thread should finish");
        (session, reader, writer)
    }

    fn wait_for_state(handle: &SessionHandle, state: ConnectionState) {
        let deadline = Instant::now() + WAIT;
        while handle.state() != state {
            assert!(
                Instant::now() < deadline,
                "state should become {state}, is {}",
                handle.state()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn s1f1() -> SecsMessage {
        SecsMessage::new(1, 1, true).unwrap()
    }

    #[test]
    fn request_gets_reply_with_request_name() {
        let (active, passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            echo_handler(),
        );
        assert_eq!(active.state(), ConnectionState::Selected);
        assert_eq!(passive.state(), ConnectionState::Selected);

        let body = Item::list(vec![Item::ascii("MDLN"), Item::ascii("SOFTREV")]);
        let reply = active
            .request(s1f1().with_name("are you there").with_body(body.clone()))
            .expect("request should get a reply");

        assert_eq!(reply.stream(), 1);
        assert_eq!(reply.function(), 2);
        assert_eq!(reply.body, Some(body));
        assert_eq!(reply.name.as_deref(), Some("are you there"));
        assert_eq!(active.pending_transactions(), 0);
    }

    #[test]
    fn replies_in_reverse_order_reach_their_callers() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let collector: SharedHandler = Arc::new(move |_: &SessionHandle, msg: &SecsMessage| {
            lock(&tx).send(msg.clone()).expect("collector should forward");
            None
        });
        let (active, passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            collector,
        );

        let handles: Vec<ReplyHandle> = (0..3u32)
            .map(|n| {
                active
                    .send(s1f1().with_body(Item::value(n)))
                    .expect("send should succeed")
                    .expect("W-bit send should return a handle")
            })
            .collect();

        let primaries: Vec<SecsMessage> = (0..3)
            .map(|_| rx.recv_timeout(WAIT).expect("primary should arrive"))
            .collect();
        for primary in primaries.iter().rev() {
            passive
                .reply(primary, primary.reply(primary.body.clone()))
                .expect("reply should send");
        }

        for (n, handle) in handles.into_iter().enumerate() {
            let reply = handle.wait().expect("reply should arrive");
            let body = reply.body.expect("reply should have a body");
            assert_eq!(body.first_value::<u32>().unwrap(), n as u32);
        }
    }

    #[test]
    fn duplicate_system_bytes_refused_before_writing() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let collector: SharedHandler = Arc::new(move |_: &SessionHandle, msg: &SecsMessage| {
            lock(&tx).send(msg.system_bytes).expect("collector should forward");
            None
        });
        let (active, _passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            collector,
        );

        let first = active
            .send(s1f1().with_system_bytes(42))
            .expect("first send should succeed");
        let second = active.send(s1f1().with_system_bytes(42));
        assert!(matches!(
            second,
            Err(SessionError::DuplicateTransaction(42))
        ));

        assert_eq!(rx.recv_timeout(WAIT).expect("first should arrive"), 42);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(active.pending_transactions(), 1);
        drop(first);
        assert_eq!(active.pending_transactions(), 0);
    }

    #[test]
    fn unanswered_request_times_out_after_t3() {
        let config = SessionConfig {
            t3_reply: Duration::from_millis(150),
            ..SessionConfig::default()
        };
        let (active, _passive) = session_pair(
            config,
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );

        let start = Instant::now();
        let result = active.request(s1f1());
        assert!(matches!(result, Err(SessionError::Timeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(active.pending_transactions(), 0);
        assert_eq!(active.state(), ConnectionState::Selected);
    }

    #[test]
    fn maintenance_sweep_expires_abandoned_waits() {
        let config = SessionConfig {
            t3_reply: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let (active, _passive) = session_pair(
            config,
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );

        let mut handle = active
            .send(s1f1())
            .expect("send should succeed")
            .expect("handle expected");
        thread::sleep(Duration::from_millis(400));
        assert_eq!(active.pending_transactions(), 0);
        assert!(matches!(
            handle.try_result(),
            Some(Err(SessionError::Timeout(_)))
        ));
    }

    #[test]
    fn peer_close_fails_pending_with_terminated() {
        let (active, passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );

        let handles: Vec<ReplyHandle> = (0..3)
            .map(|_| {
                active
                    .send(s1f1())
                    .expect("send should succeed")
                    .expect("handle expected")
            })
            .collect();
        assert_eq!(active.pending_transactions(), 3);

        drop(passive);
        for handle in handles {
            assert!(matches!(handle.wait(), Err(SessionError::Terminated)));
        }
        assert!(active.wait_closed(Some(WAIT)));
        assert_eq!(active.state(), ConnectionState::NotConnected);
        assert_eq!(active.pending_transactions(), 0);
        assert!(matches!(active.send(s1f1()), Err(SessionError::Terminated)));
    }

    #[test]
    fn header_only_send_returns_no_handle() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let collector: SharedHandler = Arc::new(move |_: &SessionHandle, msg: &SecsMessage| {
            lock(&tx).send(msg.clone()).expect("collector should forward");
            None
        });
        let config = SessionConfig {
            device_id: 7,
            ..SessionConfig::default()
        };
        let passive_config = SessionConfig {
            device_id: 7,
            ..SessionConfig::passive()
        };
        let (active, _passive) =
            session_pair(config, Arc::new(IgnorePrimaries), passive_config, collector);

        let event = SecsMessage::new(6, 11, false).unwrap();
        assert!(active.send(event).expect("send should succeed").is_none());

        let got = rx.recv_timeout(WAIT).expect("event should arrive");
        assert_eq!(got.stream(), 6);
        assert_eq!(got.function(), 11);
        assert_eq!(got.device_id, 7);
        assert_ne!(got.system_bytes, 0);
        assert!(got.body.is_none());
    }

    #[test]
    fn linktest_measures_round_trip() {
        let (active, passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );
        let rtt = active.linktest().expect("linktest should succeed");
        assert!(rtt < WAIT);
        passive.linktest().expect("passive linktest should succeed");
    }

    #[test]
    fn deselect_then_reselect() {
        let (active, passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            echo_handler(),
        );

        active.deselect().expect("deselect should succeed");
        assert_eq!(active.state(), ConnectionState::Deselected);
        wait_for_state(&passive, ConnectionState::Deselected);
        assert!(matches!(
            active.send(s1f1()),
            Err(SessionError::NotSelected(ConnectionState::Deselected))
        ));

        active.linktest().expect("linktest works while deselected");

        active.select().expect("re-select should succeed");
        wait_for_state(&passive, ConnectionState::Selected);
        active
            .request(s1f1())
            .expect("request after re-select should succeed");
    }

    #[test]
    fn peer_deselect_fails_pending() {
        let (active, passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );
        let handle = active
            .send(s1f1())
            .expect("send should succeed")
            .expect("handle expected");

        passive.deselect().expect("passive deselect should succeed");
        assert!(matches!(handle.wait(), Err(SessionError::Terminated)));
        assert_eq!(active.state(), ConnectionState::Deselected);
    }

    #[test]
    fn separate_closes_both_sides() {
        let (active, passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );
        active.separate().expect("separate should send");
        assert_eq!(active.state(), ConnectionState::NotConnected);
        assert!(passive.wait_closed(Some(WAIT)));
        assert_eq!(passive.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn second_select_answered_already_active() {
        let (_session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        writer
            .send(&HsmsHeader::select_req(500), &[])
            .expect("select.req should send");
        let rsp = reader.read_frame().expect("select.rsp should arrive");
        assert_eq!(rsp.header.message_type, MessageType::SelectRsp);
        assert_eq!(rsp.header.system_bytes, 500);
        assert_eq!(rsp.header.select_status(), SelectStatus::AlreadyActive);
    }

    #[test]
    fn reject_fails_the_pending_transaction() {
        let (session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        let handle = session
            .send(s1f1())
            .expect("send should succeed")
            .expect("handle expected");
        let frame = reader.read_frame().expect("primary should arrive");
        assert_eq!(frame.header.system_bytes, handle.system_bytes());

        writer
            .send(
                &HsmsHeader::reject_req(&frame.header, RejectReason::TransactionNotOpen),
                &[],
            )
            .expect("reject should send");
        assert!(matches!(
            handle.wait(),
            Err(SessionError::Rejected {
                reason: RejectReason::TransactionNotOpen
            })
        ));
    }

    #[test]
    fn abort_reply_is_a_protocol_error() {
        let (session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        let handle = session
            .send(SecsMessage::new(2, 41, true).unwrap())
            .expect("send should succeed")
            .expect("handle expected");
        let frame = reader.read_frame().expect("primary should arrive");
        let primary = decode_message(&frame).expect("primary should decode");
        writer
            .write_message(&primary.abort())
            .expect("abort should send");

        match handle.wait() {
            Err(SessionError::Protocol(ProtocolError::TransactionAborted(reply))) => {
                assert_eq!(reply.stream(), 2);
                assert_eq!(reply.function(), 0);
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn unknown_stype_and_ptype_are_rejected() {
        let (session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        let unknown = HsmsHeader {
            message_type: MessageType::Unknown(8),
            ..HsmsHeader::linktest_req(31)
        };
        writer.send(&unknown, &[]).expect("frame should send");
        let reject = reader.read_frame().expect("reject should arrive");
        assert_eq!(reject.header.message_type, MessageType::RejectReq);
        assert_eq!(reject.header.reject_reason(), RejectReason::STypeNotSupported);
        assert_eq!(reject.header.byte2, 8);
        assert_eq!(reject.header.system_bytes, 31);

        let bad_ptype = HsmsHeader {
            ptype: 4,
            ..HsmsHeader::data(0, 1, 1, true, 32)
        };
        writer.send(&bad_ptype, &[]).expect("frame should send");
        let reject = reader.read_frame().expect("reject should arrive");
        assert_eq!(reject.header.reject_reason(), RejectReason::PTypeNotSupported);
        assert_eq!(reject.header.byte2, 4);

        assert_eq!(session.state(), ConnectionState::Selected);
    }

    #[test]
    fn data_while_deselected_is_rejected() {
        let (session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        writer
            .send(&HsmsHeader::deselect_req(40), &[])
            .expect("deselect.req should send");
        let rsp = reader.read_frame().expect("deselect.rsp should arrive");
        assert_eq!(rsp.header.deselect_status(), DeselectStatus::Success);
        wait_for_state(&session, ConnectionState::Deselected);

        writer
            .send(&HsmsHeader::data(0, 1, 1, true, 41), &[])
            .expect("data should send");
        let reject = reader.read_frame().expect("reject should arrive");
        assert_eq!(reject.header.reject_reason(), RejectReason::EntityNotSelected);
        assert_eq!(reject.header.system_bytes, 41);
    }

    #[test]
    fn unsolicited_secondary_is_dropped() {
        let (session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        writer
            .write_message(&SecsMessage::new(1, 2, false).unwrap().with_system_bytes(999))
            .expect("secondary should send");

        let linktest = {
            let handle = session.handle();
            thread::spawn(move || handle.linktest())
        };
        let req = reader.read_frame().expect("linktest.req should arrive");
        assert_eq!(req.header.message_type, MessageType::LinktestReq);
        writer
            .send(&HsmsHeader::linktest_rsp(req.header.system_bytes), &[])
            .expect("linktest.rsp should send");
        linktest
            .join()
            .expect("linktest thread should finish")
            .expect("linktest should succeed");
        assert_eq!(session.state(), ConnectionState::Selected);
    }

    #[test]
    fn wrong_device_id_gets_s9f1() {
        let config = SessionConfig {
            device_id: 1,
            ..SessionConfig::default()
        };
        let (_session, mut reader, mut writer) =
            session_with_raw_peer(config, echo_handler());

        let primary = s1f1().with_device_id(2).with_system_bytes(60);
        writer.write_message(&primary).expect("primary should send");

        let frame = reader.read_frame().expect("s9f1 should arrive");
        let report = decode_message(&frame).expect("s9f1 should decode");
        assert_eq!((report.stream(), report.function()), (9, 1));
        let mhead = report.body.expect("s9f1 should carry the header");
        assert_eq!(mhead.as_binary().unwrap()[9], 60);
    }

    fn device(device_id: u16, base: SessionConfig) -> SessionConfig {
        SessionConfig { device_id, ..base }
    }

    /// Counts stream 9 messages that reach the handler.
    fn s9_counter() -> (SharedHandler, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let handler: SharedHandler = {
            let seen = Arc::clone(&seen);
            Arc::new(move |_: &SessionHandle, msg: &SecsMessage| {
                if msg.stream() == 9 {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                None
            })
        };
        (handler, seen)
    }

    #[test]
    fn foreign_device_id_fails_request_with_s9f1() {
        let (active, _passive) = session_pair(
            device(1, SessionConfig::default()),
            Arc::new(IgnorePrimaries),
            device(2, SessionConfig::passive()),
            echo_handler(),
        );

        match active.request(s1f1().with_name("identify")) {
            Err(SessionError::Protocol(ProtocolError::UnrecognizedDeviceId(report))) => {
                assert_eq!(report.name.as_deref(), Some("identify"));
            }
            other => panic!("expected S9F1 failure, got {other:?}"),
        }
        assert_eq!(active.pending_transactions(), 0);
    }

    #[test]
    fn s9_reports_are_never_answered_with_s9_reports() {
        let (active_handler, active_seen) = s9_counter();
        let (passive_handler, passive_seen) = s9_counter();
        let (active, passive) = session_pair(
            device(1, SessionConfig::default()),
            active_handler,
            device(2, SessionConfig::passive()),
            passive_handler,
        );

        assert!(active
            .send(SecsMessage::new(1, 1, false).unwrap())
            .expect("send should succeed")
            .is_none());
        thread::sleep(Duration::from_millis(300));

        assert_eq!(active_seen.load(Ordering::SeqCst), 1);
        assert_eq!(passive_seen.load(Ordering::SeqCst), 0);
        assert_eq!(active.state(), ConnectionState::Selected);
        assert_eq!(passive.state(), ConnectionState::Selected);
    }

    #[test]
    fn peer_s9f7_fails_request_with_illegal_data() {
        let passive_handler: SharedHandler =
            Arc::new(|session: &SessionHandle, msg: &SecsMessage| {
                let device_id = session.config().device_id;
                let report = s9_report(S9F7_ILLEGAL_DATA, device_id, &msg.header())
                    .expect("report should build");
                session.send(report).expect("report should send");
                None
            });
        let (active, _passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            passive_handler,
        );

        assert!(matches!(
            active.request(s1f1().with_body(Item::value(3u8))),
            Err(SessionError::Protocol(ProtocolError::IllegalData(_)))
        ));
        assert_eq!(active.pending_transactions(), 0);
    }

    #[test]
    fn foreign_device_s9_report_is_not_answered() {
        let config = device(1, SessionConfig::default());
        let (session, mut reader, mut writer) =
            session_with_raw_peer(config, Arc::new(IgnorePrimaries));

        let offending = HsmsHeader::data(1, 1, 1, false, 4242);
        let report = s9_report(S9F1_UNRECOGNIZED_DEVICE_ID, 99, &offending)
            .unwrap()
            .with_system_bytes(81);
        writer.write_message(&report).expect("report should send");

        let linktest = {
            let handle = session.handle();
            thread::spawn(move || handle.linktest())
        };
        let next = reader.read_frame().expect("a frame should arrive");
        assert_eq!(next.header.message_type, MessageType::LinktestReq);
        writer
            .send(&HsmsHeader::linktest_rsp(next.header.system_bytes), &[])
            .expect("linktest.rsp should send");
        linktest
            .join()
            .expect("linktest thread should finish")
            .expect("linktest should succeed");
    }

    #[test]
    fn undecodable_primary_gets_s9f7() {
        let (_session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        writer
            .send(&HsmsHeader::data(0, 1, 3, true, 70), &[0xA5, 0x04, 0x01])
            .expect("primary should send");

        let frame = reader.read_frame().expect("s9f7 should arrive");
        let report = decode_message(&frame).expect("s9f7 should decode");
        assert_eq!((report.stream(), report.function()), (9, 7));
    }

    #[test]
    fn undecodable_reply_fails_its_transaction() {
        let (session, mut reader, mut writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        let handle = session
            .send(s1f1())
            .expect("send should succeed")
            .expect("handle expected");
        let frame = reader.read_frame().expect("primary should arrive");
        writer
            .send(
                &HsmsHeader::data(0, 1, 2, false, frame.header.system_bytes),
                &[0x01, 0x05],
            )
            .expect("reply should send");

        assert!(matches!(handle.wait(), Err(SessionError::Item(_))));
    }

    #[test]
    fn stalled_message_trips_t8() {
        let config = SessionConfig {
            t8_network: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let (session, _reader, mut writer) =
            session_with_raw_peer(config, Arc::new(IgnorePrimaries));

        std::io::Write::write_all(writer.get_mut(), &[0, 0, 0, 20, 0, 0])
            .expect("partial frame should write");
        assert!(session.wait_closed(Some(WAIT)));
        assert_eq!(session.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn periodic_linktest_detects_dead_peer() {
        let config = SessionConfig {
            linktest_interval: Some(Duration::from_millis(100)),
            t6_control: Duration::from_millis(200),
            ..SessionConfig::default()
        };
        let (session, _reader, _writer) = session_with_raw_peer(config, Arc::new(IgnorePrimaries));
        assert!(session.wait_closed(Some(WAIT)));
    }

    #[test]
    fn concurrent_control_requests_are_busy() {
        let (session, mut reader, _writer) =
            session_with_raw_peer(SessionConfig::default(), Arc::new(IgnorePrimaries));

        let first = {
            let handle = session.handle();
            thread::spawn(move || handle.linktest())
        };
        reader.read_frame().expect("linktest.req should arrive");
        assert!(matches!(session.linktest(), Err(SessionError::ControlBusy)));

        session.close();
        assert!(matches!(
            first.join().expect("linktest thread should finish"),
            Err(SessionError::Terminated)
        ));
    }

    #[test]
    fn state_changes_reach_the_handler() {
        struct Recorder(Mutex<Vec<(ConnectionState, ConnectionState)>>);

        impl MessageHandler for Recorder {
            fn on_primary_message(
                &self,
                _session: &SessionHandle,
                _message: &SecsMessage,
            ) -> Option<SecsMessage> {
                None
            }

            fn on_state_changed(&self, old: ConnectionState, new: ConnectionState) {
                lock(&self.0).push((old, new));
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let (active, _passive) = session_pair(
            SessionConfig::default(),
            recorder.clone(),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );
        active.close();

        let seen = lock(&recorder.0).clone();
        assert_eq!(
            seen,
            vec![
                (ConnectionState::Connecting, ConnectionState::Selecting),
                (ConnectionState::Selecting, ConnectionState::Selected),
                (ConnectionState::Selected, ConnectionState::NotConnected),
            ]
        );
    }

    #[test]
    fn close_is_idempotent() {
        let (active, _passive) = session_pair(
            SessionConfig::default(),
            Arc::new(IgnorePrimaries),
            SessionConfig::passive(),
            Arc::new(IgnorePrimaries),
        );
        active.close();
        active.close();
        assert!(active.is_closed());
        assert!(matches!(active.linktest(), Err(SessionError::Terminated)));
    }
}
