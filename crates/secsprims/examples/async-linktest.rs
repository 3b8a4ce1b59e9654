//! Drive HSMS control messages on a tokio connection with `HsmsCodec`.
//!
//! Run `echo-equipment` first, then:
//!   cargo run --example async-linktest --features async

use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use secsprims::frame::{HsmsCodec, HsmsFrame, HsmsHeader, MessageType, SelectStatus};
use secsprims::transport::TcpTransport;
use tokio_util::codec::Framed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpTransport::connect_async("127.0.0.1:5000".parse()?).await?;
    let mut framed = Framed::new(stream, HsmsCodec::new());

    framed.send(HsmsFrame::control(HsmsHeader::select_req(1))).await?;
    let rsp = framed.next().await.ok_or("connection closed")??;
    if rsp.header.message_type != MessageType::SelectRsp
        || rsp.header.select_status() != SelectStatus::Success
    {
        return Err(format!("select failed: {}", rsp.header).into());
    }

    for id in 2..5u32 {
        let start = Instant::now();
        framed.send(HsmsFrame::control(HsmsHeader::linktest_req(id))).await?;
        let rsp = framed.next().await.ok_or("connection closed")??;
        eprintln!("{} in {:?}", rsp.header, start.elapsed());
    }

    framed.send(HsmsFrame::control(HsmsHeader::separate_req(5))).await?;
    Ok(())
}
