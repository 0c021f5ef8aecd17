// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Sends one request to a running relay and prints its reply.
//!
//!   relay-send --socket /run/relayd/bus.sock --payload '{"command":["uname","-a"]}'

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use clap::Parser;
use relayd::bus::envelope::{ReplyEnvelope, ReplyStatus};
use relayd::bus::Topic;
use relayd_tests::ipc::BusPeer;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Bus socket of the relay
    #[arg(long, value_name = "PATH")]
    socket: PathBuf,

    /// Topic to send on (command or execution)
    #[arg(long, default_value = "command")]
    topic: Topic,

    /// Correlation id echoed back in the reply
    #[arg(long, default_value = "relay-send")]
    id: String,

    /// Payload (exec spec JSON)
    #[arg(long, value_name = "JSON")]
    payload: Option<String>,

    /// Payload, base64-encoded
    #[arg(long = "payload-base64", value_name = "BASE64")]
    payload_base64: Option<String>,

    /// Seconds to wait for the reply
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Print the raw reply envelope instead of the decoded output
    #[arg(long)]
    json: bool,
}

fn payload(args: &Args) -> anyhow::Result<Vec<u8>> {
    match (&args.payload, &args.payload_base64) {
        (Some(json), None) => Ok(json.as_bytes().to_vec()),
        (None, Some(b64)) => BASE64_STANDARD
            .decode(b64)
            .context("--payload-base64 is not valid base64"),
        (None, None) => bail!("one of --payload or --payload-base64 is required"),
        (Some(_), Some(_)) => bail!("--payload and --payload-base64 may not be used together"),
    }
}

fn print_reply(reply: &ReplyEnvelope) -> i32 {
    match reply.status {
        ReplyStatus::Ok => {
            print!("{}", String::from_utf8_lossy(&reply.stdout));
            eprint!("{}", String::from_utf8_lossy(&reply.stderr));
            reply.exit_code.unwrap_or(0)
        }
        ReplyStatus::Failed | ReplyStatus::BackendUnavailable => {
            eprintln!(
                "relay {} answered {:?}: {}",
                reply.relay,
                reply.status,
                reply.reason.as_deref().unwrap_or("no reason given")
            );
            1
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let payload = payload(&args)?;

    let peer = BusPeer::bind().context("failed to bind reply socket")?;
    peer.request(&args.socket, args.topic, &args.id, &payload)?;
    let reply = peer.recv_reply(Some(Duration::from_secs(args.timeout)))?;
    drop(peer);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }
    std::process::exit(print_reply(&reply));
}
