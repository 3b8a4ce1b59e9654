//! Minimal equipment: accepts one host and echoes every W-bit primary.
//!
//! Run with:
//!   cargo run --example echo-equipment
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:5000 -s 1 -f 13 \
//!     --json '{"L":[{"A":"MDLN"},{"A":"SOFTREV"}]}' --wait

use std::sync::Arc;

use secsprims::session::{SessionHandle, SessionListener};
use secsprims::SecsMessage;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = SessionListener::bind("127.0.0.1:5000")?.with_handler(Arc::new(
        |_: &SessionHandle, msg: &SecsMessage| {
            eprintln!("Received {msg:#}");
            msg.reply_expected.then(|| msg.reply(msg.body.clone()))
        },
    ));
    eprintln!("Listening on {}", listener.local_addr());

    // Serve one host until it separates or disconnects.
    let session = listener.accept()?;
    eprintln!("Host selected: {:?}", session.peer_addr());
    session.wait_closed(None);
    eprintln!("Host gone");

    Ok(())
}
