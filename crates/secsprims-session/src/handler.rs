use std::sync::Arc;

use secsprims_frame::SecsMessage;

use crate::error::SessionError;
use crate::session::SessionHandle;
use crate::state::ConnectionState;

/// Receives inbound primaries and session events.
///
/// Called from the session's reader thread, in arrival order. Blocking
/// here stalls all inbound traffic, so a handler must not wait on a reply
/// from the same session.
pub trait MessageHandler: Send + Sync {
    /// Handle a primary message. A returned message is sent as the reply
    /// when the primary has its W-bit set; its system bytes and device id
    /// are taken from the primary.
    fn on_primary_message(
        &self,
        session: &SessionHandle,
        message: &SecsMessage,
    ) -> Option<SecsMessage>;

    fn on_state_changed(&self, _old: ConnectionState, _new: ConnectionState) {}

    /// Errors that belong to no pending transaction.
    fn on_session_error(&self, _error: &SessionError) {}
}

impl<F> MessageHandler for F
where
    F: Fn(&SessionHandle, &SecsMessage) -> Option<SecsMessage> + Send + Sync,
{
    fn on_primary_message(
        &self,
        session: &SessionHandle,
        message: &SecsMessage,
    ) -> Option<SecsMessage> {
        self(session, message)
    }
}

/// How sessions hold their handler; one handler may serve many sessions.
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Ignores every primary. W-bit primaries go unanswered unless the
/// application replies through [`SessionHandle::reply`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnorePrimaries;

impl MessageHandler for IgnorePrimaries {
    fn on_primary_message(
        &self,
        _session: &SessionHandle,
        _message: &SecsMessage,
    ) -> Option<SecsMessage> {
        None
    }
}
