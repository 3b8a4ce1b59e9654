use std::io::IsTerminal;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use secsprims_frame::SecsMessage;
use serde::Serialize;

use crate::item_json::item_to_json;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    message: String,
    stream: u8,
    function: u8,
    w: bool,
    device_id: u16,
    system_bytes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    body: Option<serde_json::Value>,
    peer: &'a str,
    timestamp: String,
}

pub fn print_message(message: &SecsMessage, peer: &str, format: OutputFormat) {
    let label = format!("S{}F{}", message.stream(), message.function());
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                message: label,
                stream: message.stream(),
                function: message.function(),
                w: message.reply_expected,
                device_id: message.device_id,
                system_bytes: message.system_bytes,
                name: message.name.as_deref(),
                body: message.body.as_ref().map(item_to_json),
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MESSAGE", "W", "DEVICE", "SYSTEM", "PEER", "BODY"])
                .add_row(vec![
                    label,
                    if message.reply_expected { "W" } else { "" }.to_string(),
                    message.device_id.to_string(),
                    format!("{:#010x}", message.system_bytes),
                    peer.to_string(),
                    body_text(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} device={} system={:#010x} peer={} body={}",
                message,
                message.device_id,
                message.system_bytes,
                peer,
                body_text(message)
            );
        }
    }
}

#[derive(Serialize)]
struct LinktestOutput<'a> {
    peer: &'a str,
    seq: usize,
    rtt_us: u64,
}

pub fn print_linktest(peer: &str, seq: usize, rtt: Duration, format: OutputFormat) {
    let rtt_us = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX);
    match format {
        OutputFormat::Json => {
            let out = LinktestOutput { peer, seq, rtt_us };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["SEQ", "PEER", "RTT"])
                .add_row(vec![seq.to_string(), peer.to_string(), format!("{rtt:?}")]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("linktest seq={seq} peer={peer} rtt={rtt:?}");
        }
    }
}

fn body_text(message: &SecsMessage) -> String {
    match &message.body {
        Some(body) => body.to_string(),
        None => "-".to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
