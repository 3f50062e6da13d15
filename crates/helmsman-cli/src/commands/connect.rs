//! `helmsman connect` - build a connection the way an operation would

use std::path::PathBuf;

use clap::Args;
use serde_json::{json, Value};
use tracing::info;

use helmsman::env::OsEnv;
use helmsman::{ConnectionFactory, ConnectionHandle, ProviderState};

use super::load_config;
use crate::Result;

/// Build a cluster connection from provider and override configuration
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Operation override file (YAML or JSON)
    #[arg(long, short = 'o')]
    pub overrides: Option<PathBuf>,

    /// Release namespace
    #[arg(long, short = 'n', default_value = "default")]
    pub namespace: String,

    /// Query the API server version after connecting
    #[arg(long)]
    pub verify: bool,
}

/// Run the connect command.
pub async fn run(provider: helmsman::ConfigData, args: ConnectArgs) -> Result<()> {
    let overrides = load_config(args.overrides.as_deref())?;
    let state = ProviderState::configure(provider, &OsEnv)?;

    let factory = ConnectionFactory::from_env();
    let handle = factory
        .build_connection(&state, &overrides, &args.namespace)
        .await?;

    let version = if args.verify {
        Some(handle.verify().await?)
    } else {
        None
    };
    info!(namespace = %handle.namespace(), "Connection built");

    println!("{}", serde_json::to_string_pretty(&summary(&state, &handle, version))?);
    Ok(())
}

fn summary(state: &ProviderState, handle: &ConnectionHandle, version: Option<String>) -> Value {
    let action = handle.action();
    json!({
        "namespace": action.namespace,
        "driver": action.driver.as_str(),
        "debug": action.debug,
        "experiments": state.enabled_experiments(),
        "server_version": version,
    })
}
