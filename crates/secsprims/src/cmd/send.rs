use std::fs;
use std::sync::Arc;

use secsprims_frame::SecsMessage;
use secsprims_item::Item;
use secsprims_session::{connect_with_config, IgnorePrimaries};
use tracing::info;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{frame_error, io_error, session_error, CliResult, SUCCESS};
use crate::item_json::parse_item;
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.session.session_config()?;
    config.connect_timeout = parse_duration(&args.connect_timeout)?;

    let body = resolve_body(&args)?;
    let mut message = SecsMessage::new(args.stream, args.function, args.wait)
        .map_err(|err| frame_error("invalid message", err))?;
    message.body = body;

    let session = connect_with_config(args.addr.as_str(), config, Arc::new(IgnorePrimaries))
        .map_err(|err| session_error("connect failed", err))?;
    let peer = args.addr.clone();

    if args.wait {
        let reply = session
            .request(message)
            .map_err(|err| session_error("request failed", err))?;
        print_message(&reply, &peer, format);
    } else {
        session
            .send(message)
            .map_err(|err| session_error("send failed", err))?;
        info!(stream = args.stream, function = args.function, "message sent");
    }

    if let Err(err) = session.separate() {
        tracing::debug!(error = %err, "separate after send failed");
    }
    Ok(SUCCESS)
}

fn resolve_body(args: &SendArgs) -> CliResult<Option<Item>> {
    if let Some(json) = &args.json {
        return parse_item(json).map(Some);
    }
    if let Some(path) = &args.file {
        let text = fs::read_to_string(path).map_err(|err| {
            io_error(&format!("failed reading {}", path.display()), err)
        })?;
        return parse_item(&text).map(Some);
    }
    Ok(None)
}
