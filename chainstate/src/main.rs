//! Chain-state API server
//!
//! A CLI tool and HTTP server answering chain-state queries (transactions,
//! blocks, coins, wallets, fees, broadcast) for bitcoin-derived UTXO chains.
//! Requests are routed through a per-chain registry of service
//! implementations; listings are streamed; deeply confirmed records are
//! served with long-lived cache headers.
//!
//! ```sh
//! chainstate init            # Generate default config.toml
//! chainstate check           # Validate config.toml
//! chainstate serve           # Start the server
//! ```

mod cache;
mod chain;
mod cmd;
mod config;
mod dispatch;
mod error;
mod model;
mod params;
mod routes;
mod rpc;
mod service;
mod signal;
mod storage;
mod stream;
#[cfg(feature = "telemetry")]
mod telemetry;

use clap::Parser;
use cmd::{Cli, Commands};

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { output, force } => cmd::init::run(&output, force),
        Commands::Serve { config } => cmd::serve::run(&config).await,
        Commands::Check { config } => cmd::check::run(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
