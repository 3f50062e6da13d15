//! helmsman CLI
//!
//! Builds cluster connections and performs registry logins from provider
//! and override configuration files.

use clap::Parser;

use helmsman::telemetry::{init_telemetry, TelemetryConfig};
use helmsman_cli::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        ..Default::default()
    })?;

    cli.run().await
}
