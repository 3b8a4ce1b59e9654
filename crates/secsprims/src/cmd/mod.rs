use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use secsprims_session::SessionConfig;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod linktest;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and echo every W-bit primary back as its reply.
    Echo(EchoArgs),
    /// Connect, select and send one message.
    Send(SendArgs),
    /// Accept connections and print received primaries.
    Listen(ListenArgs),
    /// Connect, select and measure linktest round trips.
    Linktest(LinktestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Linktest(args) => linktest::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Timer and identity flags shared by every session command.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Device id stamped on outgoing primaries and expected on incoming ones.
    #[arg(long, default_value = "0", env = "SECSPRIMS_DEVICE_ID")]
    pub device_id: u16,
    /// Reply timeout T3 (e.g. 45s, 500ms).
    #[arg(long, default_value = "45s")]
    pub t3: String,
    /// Control transaction timeout T6.
    #[arg(long, default_value = "5s")]
    pub t6: String,
    /// Not-selected timeout T7 (passive side).
    #[arg(long, default_value = "10s")]
    pub t7: String,
    /// Inter-byte network timeout T8.
    #[arg(long, default_value = "5s")]
    pub t8: String,
}

impl SessionArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        Ok(SessionConfig {
            device_id: self.device_id,
            t3_reply: parse_duration(&self.t3)?,
            t6_control: parse_duration(&self.t6)?,
            t7_not_selected: parse_duration(&self.t7)?,
            t8_network: parse_duration(&self.t8)?,
            ..SessionConfig::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind (e.g. 0.0.0.0:5000).
    pub addr: String,
    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Address of the passive endpoint (e.g. 127.0.0.1:5000).
    pub addr: String,
    /// Stream number.
    #[arg(long, short = 's')]
    pub stream: u8,
    /// Function number.
    #[arg(long, short = 'f')]
    pub function: u8,
    /// Message body in JSON item notation, e.g. '{"L":[{"U1":[5]},{"A":"AB"}]}'.
    #[arg(long, conflicts_with = "file")]
    pub json: Option<String>,
    /// Read the JSON body from a file.
    #[arg(long, conflicts_with = "json")]
    pub file: Option<PathBuf>,
    /// Set the W-bit, wait for the reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Per-attempt connect timeout.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind.
    pub addr: String,
    /// Exit after printing N primaries.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug)]
pub struct LinktestArgs {
    /// Address of the passive endpoint.
    pub addr: String,
    /// Number of linktests to run.
    #[arg(long, default_value = "1")]
    pub count: usize,
    /// Pause between linktests.
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Per-attempt connect timeout.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Clear `running` on Ctrl-C.
pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
