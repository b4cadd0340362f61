//! CLI definitions and command implementations for the chainstate server.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod check;
pub mod init;
pub mod serve;

/// Chain-state API server for UTXO chains.
#[derive(Debug, Parser)]
#[command(name = "chainstate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate a default TOML configuration file.
    Init {
        /// Output path for the configuration file.
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite the file if it already exists.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Start the chain-state HTTP server.
    Serve {
        /// Path to the TOML configuration file.
        #[arg(short, long, env = "CONFIG", default_value = "config.toml")]
        config: PathBuf,
    },

    /// Validate a configuration and list the chains it would serve.
    Check {
        /// Path to the TOML configuration file.
        #[arg(short, long, env = "CONFIG", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_defaults() {
        let cli = Cli::try_parse_from(["chainstate", "init"]).expect("valid");
        match cli.command {
            Commands::Init { output, force } => {
                assert_eq!(output, PathBuf::from("config.toml"));
                assert!(!force);
            }
            Commands::Serve { .. } | Commands::Check { .. } => panic!("expected init"),
        }
    }

    #[test]
    fn serve_takes_a_config_path() {
        let cli = Cli::try_parse_from(["chainstate", "serve", "-c", "/etc/chainstate.toml"])
            .expect("valid");
        assert!(matches!(
            cli.command,
            Commands::Serve { config } if config == PathBuf::from("/etc/chainstate.toml")
        ));
    }

    #[test]
    fn check_defaults_to_config_toml() {
        let cli = Cli::try_parse_from(["chainstate", "check"]).expect("valid");
        assert!(matches!(
            cli.command,
            Commands::Check { config } if config == PathBuf::from("config.toml")
        ));
    }
}
