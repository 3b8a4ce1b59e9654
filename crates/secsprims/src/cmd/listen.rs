use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use secsprims_frame::SecsMessage;
use secsprims_session::{Session, SessionError, SessionHandle, SessionListener};
use tracing::warn;

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let (tx, rx) = mpsc::channel::<SecsMessage>();
    let listener = SessionListener::bind(args.addr.as_str())
        .map_err(|err| session_error("bind failed", err))?
        .with_config(args.session.session_config()?)
        .with_handler(Arc::new(move |_: &SessionHandle, msg: &SecsMessage| {
            let _ = tx.send(msg.clone());
            msg.reply_expected.then(|| msg.reply(None))
        }));

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let session = match accept(&listener)? {
            Some(session) => session,
            None => continue,
        };
        let peer = peer_label(&session);

        while running.load(Ordering::SeqCst) {
            let message = match rx.recv_timeout(POLL_INTERVAL) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) if session.is_closed() => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            print_message(&message, &peer, format);
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}

/// Accept the next session. Select failures drop that connection only.
pub(crate) fn accept(listener: &SessionListener) -> CliResult<Option<Session>> {
    match listener.accept() {
        Ok(session) => Ok(Some(session)),
        Err(
            err @ (SessionError::Timeout(_)
            | SessionError::Terminated
            | SessionError::Frame(_)
            | SessionError::Rejected { .. }),
        ) => {
            warn!(error = %err, "connection dropped before selection");
            Ok(None)
        }
        Err(err) => Err(session_error("accept failed", err)),
    }
}

pub(crate) fn peer_label(session: &Session) -> String {
    session
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
