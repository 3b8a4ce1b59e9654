use std::sync::Arc;
use std::thread;

use secsprims_session::{connect_with_config, IgnorePrimaries};

use crate::cmd::{parse_duration, LinktestArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_linktest, OutputFormat};

pub fn run(args: LinktestArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.session.session_config()?;
    config.connect_timeout = parse_duration(&args.connect_timeout)?;
    let interval = parse_duration(&args.interval)?;

    let session = connect_with_config(args.addr.as_str(), config, Arc::new(IgnorePrimaries))
        .map_err(|err| session_error("connect failed", err))?;

    for seq in 1..=args.count {
        let rtt = session
            .linktest()
            .map_err(|err| session_error("linktest failed", err))?;
        print_linktest(&args.addr, seq, rtt, format);
        if seq < args.count {
            thread::sleep(interval);
        }
    }

    if let Err(err) = session.separate() {
        tracing::debug!(error = %err, "separate after linktest failed");
    }
    Ok(SUCCESS)
}
