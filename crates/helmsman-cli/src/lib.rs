//! helmsman CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// helmsman - Helm provider connection tooling
#[derive(Parser, Debug)]
#[command(name = "helmsman")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Provider configuration file (YAML or JSON)
    #[arg(long, short = 'c', global = true, env = "HELMSMAN_PROVIDER_CONFIG")]
    pub provider_config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a cluster connection and report the action context
    Connect(commands::connect::ConnectArgs),
    /// Log in to the OCI registry hosting a chart
    Login(commands::login::LoginArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let provider = commands::load_config(self.provider_config.as_deref())?;
        match self.command {
            Commands::Connect(args) => commands::connect::run(provider, args).await,
            Commands::Login(args) => commands::login::run(provider, args).await,
        }
    }
}
