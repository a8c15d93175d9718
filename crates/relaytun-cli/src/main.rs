//! relaytun CLI
//!
//! Inspects peer tunnel endpoints and the requests the tunnel dialer sends.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use relaytun_cli::client_cmd::{self, ClientArgs};
use relaytun_cli::peers_cmd::{self, PeersArgs};
use relaytun_cli::subsystem_cmd::{self, SubsystemArgs};
use relaytun_core::config::load_config;
use relaytun_core::tracing_init::{default_filter, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "relaytun")]
#[command(version, about = "Reverse tunnel dialer tooling", long_about = None)]
struct Cli {
    /// Config file applied over the global settings
    #[arg(long, global = true, env = "RELAYTUN_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List peer clusters, most recent heartbeat first
    Peers(PeersArgs),
    /// Print the subsystem request for a destination in a peer cluster
    Subsystem(SubsystemArgs),
    /// Validate tunnel client settings and show the effective values
    Client(ClientArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = config.log.level.as_str();
    init_tracing(
        &format!("{},relaytun_cli={level}", default_filter("relaytun", level)),
        cli.log_json || config.log.json,
    );

    info!(version = env!("CARGO_PKG_VERSION"), "Starting relaytun");

    match cli.command {
        Command::Peers(args) => peers_cmd::run(&args, &config).await,
        Command::Subsystem(args) => subsystem_cmd::run(&args),
        Command::Client(args) => client_cmd::run(&args, &config.dialer),
    }
}
