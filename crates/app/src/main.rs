//! eventsock - command-line peer for the eventsock protocol
//!
//! `serve` runs an acceptor, `connect` runs an initiator that emits one
//! event per stdin line and prints everything it receives.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eventsock_net::DEFAULT_PORT;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod connect;
mod serve;

#[derive(Parser)]
#[command(name = "eventsock", version, about = "Named events over a WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept connections; answers `ping` with `pong` and relays `chat`
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Connect to a peer and emit each stdin line as an event
    Connect {
        /// Full address, e.g. ws://127.0.0.1:7331/
        #[arg(long, conflicts_with = "config")]
        url: Option<String>,
        /// TOML initiator configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Event name used for stdin lines
        #[arg(long, default_value = "chat")]
        event: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries received messages
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, port } => serve::run(SocketAddr::new(bind, port)).await,
        Command::Connect { url, config, event } => {
            let config = config::resolve(url, config)?;
            connect::run(config, event).await
        }
    }
}
