//! Outstanding transactions keyed by system bytes.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use secsprims_frame::{RejectReason, SecsMessage};
use tracing::{debug, warn};

use crate::classify::classify_reply;
use crate::error::{Result, SessionError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum SlotState<T> {
    Empty,
    Filled(T),
    Taken,
}

/// A single-assignment completion cell: the first outcome wins.
pub(crate) struct ReplySlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> ReplySlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
            ready: Condvar::new(),
        }
    }

    /// Store an outcome. Returns false if the slot was already completed.
    pub(crate) fn complete(&self, value: T) -> bool {
        let mut state = lock(&self.state);
        if !matches!(*state, SlotState::Empty) {
            return false;
        }
        *state = SlotState::Filled(value);
        self.ready.notify_all();
        true
    }

    /// Take the outcome if one is stored.
    pub(crate) fn take(&self) -> Option<T> {
        let mut state = lock(&self.state);
        take_filled(&mut state)
    }

    /// Block until an outcome is stored or `deadline` passes.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<T> {
        let mut state = lock(&self.state);
        loop {
            match *state {
                SlotState::Filled(_) => return take_filled(&mut state),
                SlotState::Taken => return None,
                SlotState::Empty => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        !matches!(*lock(&self.state), SlotState::Empty)
    }
}

fn take_filled<T>(state: &mut SlotState<T>) -> Option<T> {
    match std::mem::replace(state, SlotState::Taken) {
        SlotState::Filled(value) => Some(value),
        other => {
            *state = other;
            None
        }
    }
}

type ReplyCell = ReplySlot<Result<SecsMessage>>;

struct PendingTransaction {
    slot: Arc<ReplyCell>,
    name: Option<String>,
    sent_at: Instant,
    deadline: Instant,
    t3: Duration,
}

struct TableInner {
    pending: HashMap<u32, PendingTransaction>,
    last_id: u32,
}

/// Pending request table plus the system bytes generator.
pub(crate) struct TransactionTable {
    inner: Mutex<TableInner>,
}

impl TransactionTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                pending: HashMap::new(),
                last_id: 0,
            }),
        }
    }

    /// Next system bytes value, skipping 0 and ids still pending.
    pub(crate) fn allocate_id(&self) -> u32 {
        let mut inner = lock(&self.inner);
        next_free_id(&mut inner)
    }

    /// Register a request. `requested == 0` allocates an id.
    ///
    /// The T3 deadline counts from registration until
    /// [`mark_sent`](Self::mark_sent) restarts it. Fails with `DuplicateTransaction` if the id is already pending.
    pub(crate) fn register(
        &self,
        requested: u32,
        name: Option<String>,
        t3: Duration,
    ) -> Result<(u32, Arc<ReplyCell>)> {
        let mut inner = lock(&self.inner);
        let id = if requested == 0 {
            next_free_id(&mut inner)
        } else if inner.pending.contains_key(&requested) {
            return Err(SessionError::DuplicateTransaction(requested));
        } else {
            requested
        };

        let slot = Arc::new(ReplySlot::new());
        let sent_at = Instant::now();
        inner.pending.insert(
            id,
            PendingTransaction {
                slot: Arc::clone(&slot),
                name,
                sent_at,
                deadline: sent_at + t3,
                t3,
            },
        );
        Ok((id, slot))
    }

    /// Complete the transaction a secondary answers.
    ///
    /// Returns false when no transaction with the reply's system bytes is
    /// pending (an unsolicited secondary).
    pub(crate) fn resolve(&self, reply: SecsMessage) -> bool {
        let id = reply.system_bytes;
        self.complete_with(id, reply).is_ok()
    }

    /// Fail transaction `id` with a stream 9 report naming it. Hands the
    /// report back when `id` is not pending.
    pub(crate) fn resolve_report(
        &self,
        id: u32,
        report: SecsMessage,
    ) -> std::result::Result<(), SecsMessage> {
        self.complete_with(id, report)
    }

    fn complete_with(
        &self,
        id: u32,
        mut reply: SecsMessage,
    ) -> std::result::Result<(), SecsMessage> {
        let removed = lock(&self.inner).pending.remove(&id);
        let Some(pending) = removed else {
            return Err(reply);
        };
        debug!(
            system_bytes = id,
            stream = reply.stream(),
            function = reply.function(),
            elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
            "reply matched"
        );
        reply.name = pending.name;
        pending.slot.complete(classify_reply(reply));
        Ok(())
    }

    /// Complete a pending transaction with an error. Returns false if it
    /// was not pending.
    pub(crate) fn fail(&self, id: u32, err: SessionError) -> bool {
        let removed = lock(&self.inner).pending.remove(&id);
        match removed {
            Some(pending) => pending.slot.complete(Err(err)),
            None => false,
        }
    }

    /// Like [`fail`](Self::fail), but only while `id` still belongs to
    /// `slot`. An id reused by a later transaction is left alone.
    pub(crate) fn fail_slot(&self, id: u32, slot: &Arc<ReplyCell>, err: SessionError) -> bool {
        let removed = {
            let mut inner = lock(&self.inner);
            match inner.pending.get(&id) {
                Some(pending) if Arc::ptr_eq(&pending.slot, slot) => inner.pending.remove(&id),
                _ => None,
            }
        };
        match removed {
            Some(pending) => pending.slot.complete(Err(err)),
            None => false,
        }
    }

    /// Start T3 for a registered transaction once its bytes are written.
    /// Returns the send instant, or `None` if the record is already gone.
    pub(crate) fn mark_sent(&self, id: u32, slot: &Arc<ReplyCell>) -> Option<Instant> {
        let mut inner = lock(&self.inner);
        let pending = inner
            .pending
            .get_mut(&id)
            .filter(|pending| Arc::ptr_eq(&pending.slot, slot))?;
        let sent_at = Instant::now();
        pending.sent_at = sent_at;
        pending.deadline = sent_at + pending.t3;
        Some(sent_at)
    }

    /// Fail the transaction a Reject.req refers to.
    pub(crate) fn reject(&self, id: u32, reason: RejectReason) -> bool {
        self.fail(id, SessionError::Rejected { reason })
    }

    /// Time out every transaction whose T3 deadline has passed.
    pub(crate) fn expire(&self, now: Instant) -> Vec<u32> {
        let expired: Vec<(u32, PendingTransaction)> = {
            let mut inner = lock(&self.inner);
            let ids: Vec<u32> = inner
                .pending
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(id, pending)| {
                warn!(system_bytes = id, t3_ms = pending.t3.as_millis() as u64, "reply timeout (T3)");
                pending.slot.complete(Err(SessionError::Timeout(pending.t3)));
                id
            })
            .collect()
    }

    /// Fail every pending transaction with `Terminated`. Returns how many.
    pub(crate) fn terminate_all(&self) -> usize {
        let drained: Vec<PendingTransaction> = lock(&self.inner)
            .pending
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        for pending in &drained {
            pending.slot.complete(Err(SessionError::Terminated));
        }
        drained.len()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).pending.len()
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        lock(&self.inner).pending.contains_key(&id)
    }
}

fn next_free_id(inner: &mut TableInner) -> u32 {
    loop {
        inner.last_id = inner.last_id.wrapping_add(1);
        if inner.last_id != 0 && !inner.pending.contains_key(&inner.last_id) {
            return inner.last_id;
        }
    }
}

/// The caller's side of an outstanding request.
///
/// Dropping a handle that has not produced its result cancels the
/// transaction; a reply arriving later is treated as unsolicited.
pub struct ReplyHandle {
    system_bytes: u32,
    slot: Arc<ReplyCell>,
    table: Arc<TransactionTable>,
    deadline: Instant,
    t3: Duration,
    finished: bool,
}

impl ReplyHandle {
    pub(crate) fn new(
        system_bytes: u32,
        slot: Arc<ReplyCell>,
        table: Arc<TransactionTable>,
        sent_at: Instant,
        t3: Duration,
    ) -> Self {
        Self {
            system_bytes,
            slot,
            table,
            deadline: sent_at + t3,
            t3,
            finished: false,
        }
    }

    /// System bytes identifying this transaction.
    pub fn system_bytes(&self) -> u32 {
        self.system_bytes
    }

    /// When T3 expires for this transaction.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Block until the reply arrives, T3 expires, or the session ends.
    pub fn wait(mut self) -> Result<SecsMessage> {
        let deadline = self.deadline;
        self.wait_until(deadline)
            .unwrap_or(Err(SessionError::Timeout(self.t3)))
    }

    /// Block for at most `timeout`. Returns `None` if the transaction is
    /// still open when `timeout` elapses (T3 not yet expired), or if the
    /// outcome was already taken.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<SecsMessage>> {
        let until = Instant::now() + timeout;
        self.wait_until(until.min(self.deadline))
    }

    /// Non-blocking poll.
    pub fn try_result(&mut self) -> Option<Result<SecsMessage>> {
        self.wait_until(Instant::now())
    }

    /// Abandon the transaction. Returns false if it had already completed.
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        self.table
            .fail_slot(self.system_bytes, &self.slot, SessionError::Cancelled)
    }

    /// True until an outcome is stored.
    pub fn is_pending(&self) -> bool {
        !self.finished && !self.slot.is_complete()
    }

    fn wait_until(&mut self, until: Instant) -> Option<Result<SecsMessage>> {
        if self.finished {
            return None;
        }
        let outcome = self.slot.wait_until(until).or_else(|| {
            if Instant::now() < self.deadline {
                return None;
            }
            self.table
                .fail_slot(self.system_bytes, &self.slot, SessionError::Timeout(self.t3));
            self.slot.take()
        });
        if outcome.is_some() {
            self.finished = true;
        }
        outcome
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.table
                .fail_slot(self.system_bytes, &self.slot, SessionError::Cancelled);
        }
    }
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("system_bytes", &format_args!("{:#010x}", self.system_bytes))
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::error::ProtocolError;

    const T3: Duration = Duration::from_secs(45);

    fn sent(
        table: &Arc<TransactionTable>,
        id: u32,
        slot: Arc<ReplyCell>,
        t3: Duration,
    ) -> ReplyHandle {
        let sent_at = table.mark_sent(id, &slot).expect("transaction should be pending");
        ReplyHandle::new(id, slot, Arc::clone(table), sent_at, t3)
    }

    fn reply_to(id: u32, function: u8) -> SecsMessage {
        SecsMessage::new(1, function, false)
            .unwrap()
            .with_system_bytes(id)
    }

    #[test]
    fn slot_first_completion_wins() {
        let slot = ReplySlot::new();
        assert!(slot.complete(1));
        assert!(!slot.complete(2));
        assert_eq!(slot.take(), Some(1));
        assert_eq!(slot.take(), None);
        assert!(!slot.complete(3));
    }

    #[test]
    fn slot_wait_times_out_empty() {
        let slot: ReplySlot<u8> = ReplySlot::new();
        let start = Instant::now();
        assert_eq!(slot.wait_until(start + Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn slot_wakes_waiter() {
        let slot = Arc::new(ReplySlot::new());
        let completer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                slot.complete("done")
            })
        };
        let got = slot.wait_until(Instant::now() + Duration::from_secs(5));
        assert_eq!(got, Some("done"));
        assert!(completer.join().expect("completer should finish"));
    }

    #[test]
    fn allocated_ids_skip_zero_and_live_ids() {
        let table = TransactionTable::new();
        lock(&table.inner).last_id = u32::MAX - 1;

        let (a, _sa) = table.register(0, None, T3).unwrap();
        assert_eq!(a, u32::MAX);
        let (b, _sb) = table.register(0, None, T3).unwrap();
        assert_eq!(b, 1);

        let (_, _s2) = table.register(2, None, T3).unwrap();
        let (c, _sc) = table.register(0, None, T3).unwrap();
        assert_eq!(c, 3);
    }

    #[test]
    fn duplicate_explicit_id_refused() {
        let table = TransactionTable::new();
        let (id, _slot) = table.register(42, None, T3).unwrap();
        assert_eq!(id, 42);
        assert!(matches!(
            table.register(42, None, T3),
            Err(SessionError::DuplicateTransaction(42))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn replies_in_reverse_order_reach_their_callers() {
        let table = Arc::new(TransactionTable::new());
        let handles: Vec<ReplyHandle> = (0..3)
            .map(|_| {
                let (id, slot) = table.register(0, None, T3).unwrap();
                sent(&table, id, slot, T3)
            })
            .collect();

        for (n, handle) in handles.iter().enumerate().rev() {
            let reply = reply_to(handle.system_bytes(), 2).with_body(
                secsprims_item::Item::value(n as u32),
            );
            assert!(table.resolve(reply));
        }

        for (n, handle) in handles.into_iter().enumerate() {
            let reply = handle.wait().expect("reply should arrive");
            let body = reply.body.expect("reply should carry a body");
            assert_eq!(body.first_value::<u32>().unwrap(), n as u32);
        }
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn reply_inherits_request_name() {
        let table = Arc::new(TransactionTable::new());
        let (id, slot) = table
            .register(0, Some("establish".to_string()), T3)
            .unwrap();
        let handle = sent(&table, id, slot, T3);

        table.resolve(reply_to(id, 14));
        let reply = handle.wait().unwrap();
        assert_eq!(reply.name.as_deref(), Some("establish"));
    }

    #[test]
    fn abort_reply_fails_transaction() {
        let table = Arc::new(TransactionTable::new());
        let (id, slot) = table.register(0, None, T3).unwrap();
        let handle = sent(&table, id, slot, T3);

        table.resolve(reply_to(id, 0));
        assert!(matches!(
            handle.wait(),
            Err(SessionError::Protocol(ProtocolError::TransactionAborted(_)))
        ));
    }

    #[test]
    fn s9_report_fails_the_transaction_it_names() {
        let table = Arc::new(TransactionTable::new());
        let (id, slot) = table
            .register(0, Some("status".to_string()), T3)
            .unwrap();
        let handle = sent(&table, id, slot, T3);

        let report = SecsMessage::new(9, 5, false).unwrap().with_system_bytes(500);
        assert!(table.resolve_report(id, report).is_ok());
        match handle.wait() {
            Err(SessionError::Protocol(ProtocolError::UnrecognizedFunction(report))) => {
                assert_eq!(report.name.as_deref(), Some("status"));
            }
            other => panic!("expected S9F5 failure, got {other:?}"),
        }

        let stray = SecsMessage::new(9, 1, false).unwrap();
        let returned = table.resolve_report(id, stray).unwrap_err();
        assert_eq!(returned.function(), 1);
    }

    #[test]
    fn unknown_reply_not_resolved() {
        let table = TransactionTable::new();
        assert!(!table.resolve(reply_to(99, 2)));
    }

    #[test]
    fn timeouts_are_independent() {
        let table = Arc::new(TransactionTable::new());
        let short = Duration::from_millis(30);

        let (fast_id, fast_slot) = table.register(0, None, short).unwrap();
        let fast = sent(&table, fast_id, fast_slot, short);
        let (slow_id, slow_slot) = table.register(0, None, T3).unwrap();
        let mut slow = sent(&table, slow_id, slow_slot, T3);

        assert!(matches!(fast.wait(), Err(SessionError::Timeout(d)) if d == short));
        assert!(slow.is_pending());
        assert!(table.contains(slow_id));
        assert!(!table.contains(fast_id));

        table.resolve(reply_to(slow_id, 2));
        assert!(matches!(slow.try_result(), Some(Ok(_))));
    }

    #[test]
    fn wait_timeout_returns_none_before_t3() {
        let table = Arc::new(TransactionTable::new());
        let (id, slot) = table.register(0, None, T3).unwrap();
        let mut handle = sent(&table, id, slot, T3);

        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
        assert!(handle.is_pending());
        assert!(table.contains(id));
    }

    #[test]
    fn expire_sweeps_only_overdue() {
        let table = TransactionTable::new();
        let (overdue, slot) = table.register(0, None, Duration::ZERO).unwrap();
        let (_live, _live_slot) = table.register(0, None, T3).unwrap();

        let expired = table.expire(Instant::now());
        assert_eq!(expired, vec![overdue]);
        assert!(matches!(slot.take(), Some(Err(SessionError::Timeout(_)))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cancel_and_drop_remove_the_record() {
        let table = Arc::new(TransactionTable::new());

        let (id, slot) = table.register(0, None, T3).unwrap();
        let handle = sent(&table, id, slot, T3);
        assert!(handle.cancel());
        assert!(!table.contains(id));
        assert!(!table.resolve(reply_to(id, 2)));

        let (id, slot) = table.register(0, None, T3).unwrap();
        drop(sent(&table, id, slot, T3));
        assert!(!table.contains(id));
    }

    #[test]
    fn stale_handle_leaves_a_reused_id_alone() {
        let table = Arc::new(TransactionTable::new());

        let (id, slot) = table.register(7, None, T3).unwrap();
        let first = sent(&table, id, slot, T3);
        assert!(table.resolve(reply_to(7, 2)));

        let (id, slot) = table.register(7, None, T3).unwrap();
        let second = sent(&table, id, slot, T3);
        drop(first);

        assert!(second.is_pending());
        assert!(table.contains(7));
        assert!(table.resolve(reply_to(7, 2)));
        assert!(second.wait().is_ok());
    }

    #[test]
    fn stale_cancel_leaves_a_reused_id_alone() {
        let table = Arc::new(TransactionTable::new());

        let (id, slot) = table.register(8, None, T3).unwrap();
        let mut stale = sent(&table, id, slot, T3);
        assert!(table.fail(8, SessionError::Terminated));
        let (id, slot) = table.register(8, None, T3).unwrap();
        let live = sent(&table, id, slot, T3);

        assert!(matches!(stale.try_result(), Some(Err(SessionError::Terminated))));
        assert!(!stale.cancel());
        assert!(live.is_pending());
        assert!(table.contains(8));
    }

    #[test]
    fn sweep_and_handle_share_the_send_instant() {
        let table = Arc::new(TransactionTable::new());
        let t3 = Duration::from_millis(50);
        let (id, slot) = table.register(0, None, t3).unwrap();

        thread::sleep(Duration::from_millis(60));
        let handle = sent(&table, id, slot, t3);
        assert!(table.expire(Instant::now()).is_empty());
        assert!(handle.is_pending());
        assert!(table.expire(handle.deadline()).contains(&id));
    }

    #[test]
    fn terminate_all_empties_table() {
        let table = Arc::new(TransactionTable::new());
        let handles: Vec<ReplyHandle> = (0..4)
            .map(|_| {
                let (id, slot) = table.register(0, None, T3).unwrap();
                sent(&table, id, slot, T3)
            })
            .collect();

        assert_eq!(table.terminate_all(), 4);
        assert_eq!(table.len(), 0);
        for handle in handles {
            assert!(matches!(handle.wait(), Err(SessionError::Terminated)));
        }
    }

    #[test]
    fn reject_completes_with_reason() {
        let table = Arc::new(TransactionTable::new());
        let (id, slot) = table.register(0, None, T3).unwrap();
        let handle = sent(&table, id, slot, T3);

        assert!(table.reject(id, RejectReason::EntityNotSelected));
        assert!(matches!(
            handle.wait(),
            Err(SessionError::Rejected {
                reason: RejectReason::EntityNotSelected
            })
        ));
    }
}
