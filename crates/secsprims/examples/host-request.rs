//! Host side: connect, establish communications (S1F13) and query the
//! equipment status variables (S1F3).
//!
//! Run `echo-equipment` first, then:
//!   cargo run --example host-request

use std::sync::Arc;

use secsprims::session::{connect, IgnorePrimaries, SessionError};
use secsprims::{Item, SecsMessage};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let session = connect("127.0.0.1:5000", Arc::new(IgnorePrimaries))?;
    eprintln!("Selected, linktest rtt {:?}", session.linktest()?);

    let establish = SecsMessage::new(1, 13, true)?
        .with_name("establish communications")
        .with_body(Item::list(vec![Item::ascii("HOST"), Item::ascii("1.0")]));
    let reply = session.request(establish)?;
    eprintln!("{reply:#}");

    let status = SecsMessage::new(1, 3, true)?.with_body(Item::list(vec![
        Item::value(1u32),
        Item::value(2u32),
    ]));
    match session.request(status) {
        Ok(reply) => eprintln!("{reply:#}"),
        Err(SessionError::Protocol(err)) => eprintln!("equipment refused: {err}"),
        Err(err) => return Err(err.into()),
    }

    session.separate()?;
    Ok(())
}
