use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secsprims_frame::SecsMessage;
use secsprims_session::{SessionHandle, SessionListener};
use tracing::info;

use crate::cmd::listen::{accept, peer_label};
use crate::cmd::{install_ctrlc_handler, EchoArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let listener = SessionListener::bind(args.addr.as_str())
        .map_err(|err| session_error("bind failed", err))?
        .with_config(args.session.session_config()?)
        .with_handler(Arc::new(|_: &SessionHandle, msg: &SecsMessage| echo_reply(msg)));

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        let session = match accept(&listener)? {
            Some(session) => session,
            None => continue,
        };
        info!(peer = %peer_label(&session), "echo session selected");

        while running.load(Ordering::SeqCst) {
            if session.wait_closed(Some(Duration::from_millis(200))) {
                break;
            }
        }
    }

    Ok(SUCCESS)
}

/// The reply to `primary`: same stream, next function, same body. Primaries
/// without the W-bit get nothing.
fn echo_reply(primary: &SecsMessage) -> Option<SecsMessage> {
    if !primary.reply_expected {
        return None;
    }
    info!(
        stream = primary.stream(),
        function = primary.function(),
        system_bytes = primary.system_bytes,
        "echoing message"
    );
    Some(primary.reply(primary.body.clone()))
}
