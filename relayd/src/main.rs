// SPDX-License-Identifier: MIT
// relayd: executes chat-ops bus requests in isolated container runs
//
// - Receives requests from a local datagram bus.
// - Runs each one in a fresh podman/docker container on a fixed worker pool.
// - Drains in-flight and queued work on SIGINT/SIGTERM before exiting.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::info;

use relayd::backend::cli_engine::CliEngine;
use relayd::backend::ContainerBackend;
use relayd::bus::datagram_link::DatagramConnector;
use relayd::config::{Config, DEFAULT_CONFIG_PATH};
use relayd::lifecycle::{Coordinator, InterruptSignal, RelayExit};
use relayd::logging;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    file: PathBuf,

    /// Validate the configuration file and exit without starting the relay.
    #[arg(long)]
    check: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // before any thread exists, so every thread inherits the blocked mask
    let mut signal = match InterruptSignal::install() {
        Ok(signal) => signal,
        Err(e) => {
            eprintln!("Error: cannot block interrupt signals: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load(&args.file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading {}:", args.file.display());
            for problem in e.problems() {
                eprintln!("  {problem}");
            }
            return RelayExit::BadConfig.into();
        }
    };

    if args.check {
        println!("Configuration file {} is valid.", args.file.display());
        return RelayExit::Clean.into();
    }

    if let Err(e) = logging::init(&config) {
        eprintln!("Error: {e:#}");
        return RelayExit::BadConfig.into();
    }
    info!("Configuration file {} loaded.", args.file.display());

    let backend: Option<Arc<dyn ContainerBackend>> = if config.container.enabled {
        let engine = CliEngine::new(&config.id, &config.container);
        info!("Using container engine {}", engine.binary());
        Some(Arc::new(engine))
    } else {
        None
    };

    let connector = DatagramConnector::new(&config.bus.socket_path);
    let coordinator = Coordinator::new(&config.id, config.max_concurrent, backend);
    coordinator.run(&connector, &mut signal).into()
}
