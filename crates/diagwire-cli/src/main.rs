//! diagwire - reliable CAN messaging and UDS diagnostics from the command line
//!
//! # Usage
//!
//! Raw frame with acknowledgment and retries:
//! ```bash
//! diagwire --config can0.toml send-raw --data 0019000103010401
//! diagwire --config can0.toml ack-raw
//! ```
//!
//! UDS over ISO-TP:
//! ```bash
//! diagwire --config can0.toml serve
//! diagwire --config can0.toml read-did 0xF190
//! ```
//!
//! Both ends on an in-process bus:
//! ```bash
//! diagwire demo
//! ```

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use diagwire_core::VirtualBus;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::{parse_did, parse_hex, parse_number};
use crate::config::DiagwireConfig;

/// Byte string argument; an alias so clap takes it as one value
type HexBytes = Vec<u8>;

#[derive(Parser)]
#[command(name = "diagwire")]
#[command(author, version, about = "Reliable CAN, ISO-TP and UDS diagnostics")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "DIAGWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one raw frame and wait for an acknowledgment, with retries
    SendRaw {
        /// CAN ID (defaults to the configured tx_id)
        #[arg(long, value_parser = parse_number)]
        id: Option<u32>,

        /// Frame data as hex
        #[arg(short, long, default_value = "0019000103010401", value_parser = parse_hex)]
        data: HexBytes,
    },

    /// Acknowledge every raw frame on an ID with [0x01]
    AckRaw {
        /// CAN ID (defaults to the configured tx_id)
        #[arg(long, value_parser = parse_number)]
        id: Option<u32>,
    },

    /// Send one ISO-TP payload and wait for a reply, with retries
    Send {
        /// Payload as hex
        #[arg(short, long, default_value = "0019000103010401", value_parser = parse_hex)]
        data: HexBytes,
    },

    /// Answer every ISO-TP payload with a fixed reply
    Ack {
        /// Reply payload as hex
        #[arg(long, default_value = "0019000103010401010101010B0101", value_parser = parse_hex)]
        reply: HexBytes,
    },

    /// Run a UDS server with the configured DID table
    Serve,

    /// Read one DID from a UDS server
    ReadDid {
        /// Data identifier, e.g. 0xF190
        #[arg(value_parser = parse_did)]
        did: u16,
    },

    /// Run a UDS server and client on an in-process bus
    Demo,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "diagwire=debug"
    } else {
        "diagwire=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let config = DiagwireConfig::load(cli.config.as_deref())?;
    // Shared by every virtual endpoint this process opens
    let bus = VirtualBus::new();

    match &cli.command {
        Commands::SendRaw { id, data } => {
            commands::send_raw(&config, &bus, *id, data).await?;
        }

        Commands::AckRaw { id } => {
            commands::ack_raw(&config, &bus, *id, commands::shutdown_signal()).await?;
        }

        Commands::Send { data } => {
            commands::send(&config, &bus, data).await?;
        }

        Commands::Ack { reply } => {
            commands::ack(&config, &bus, reply, commands::shutdown_signal()).await?;
        }

        Commands::Serve => {
            commands::serve(&config, &bus, commands::shutdown_signal()).await?;
        }

        Commands::ReadDid { did } => {
            commands::read_did(&config, &bus, *did).await?;
        }

        Commands::Demo => {
            commands::demo(&config).await?;
        }
    }

    Ok(())
}
