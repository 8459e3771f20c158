#![cfg_attr(not(test), forbid(unsafe_code))]

//! Main entry point for the Tidemark streaming server.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;
use std::path::PathBuf;

mod app_state;
mod handlers;
mod http;
mod repo;
mod routes;
mod server;
mod services;

/// Main CLI structure for the Tidemark server
#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Near-real-time chat event streaming server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the Tidemark CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve {
        /// The port number to bind the server to (e.g., 8080)
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the configuration file (yaml or json); defaults apply
        /// when omitted
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Initializes environment variables and returns the parsed CLI.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Loads configuration and starts the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let resolved_config = Config::load(config, port)?;
    server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}

#[cfg(test)]
mod main_tests {
    use super::*;

    #[test]
    fn cli_parses_serve_with_port_and_config() {
        let cli = Cli::parse_from(["tidemark", "serve", "--port", "9000", "--config", "c.yaml"]);
        let Commands::Serve { port, config } = cli.command;
        assert_eq!(port, Some(9000));
        assert_eq!(config, Some(PathBuf::from("c.yaml")));
    }

    #[test]
    fn serve_flags_are_optional() {
        let cli = Cli::parse_from(["tidemark", "serve"]);
        let Commands::Serve { port, config } = cli.command;
        assert_eq!(port, None);
        assert_eq!(config, None);
    }
}
