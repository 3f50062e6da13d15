//! `helmsman login` - log in to the OCI registry hosting a chart
//!
//! The chart location is read from the override file (`repository`,
//! `chart`, `repository_username`, `repository_password`), falling back to
//! the provider file; flags win over both. A successful login is written to
//! the provider's `registry_config_path`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::info;

use helmsman::env::OsEnv;
use helmsman::registry::{HttpRegistryClient, RegistryClientOptions};
use helmsman::schema::Schema;
use helmsman::{
    ChartLocation, ConfigData, OverridableConfig, ProviderState, RegistryLoginCoordinator,
};

use super::load_config;
use crate::Result;

/// Log in to a chart's OCI registry
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Operation override file (YAML or JSON)
    #[arg(long, short = 'o')]
    pub overrides: Option<PathBuf>,

    /// Chart repository URL or `oci://` reference
    #[arg(long)]
    pub repository: Option<String>,

    /// Chart name or `oci://` reference
    #[arg(long)]
    pub chart: Option<String>,

    /// Registry username
    #[arg(long)]
    pub username: Option<String>,

    /// Registry password
    #[arg(long, env = "HELMSMAN_REGISTRY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Use plain HTTP
    #[arg(long)]
    pub plain_http: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,

    /// Handshake timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

/// Run the login command.
pub async fn run(provider: ConfigData, args: LoginArgs) -> Result<()> {
    let state = ProviderState::configure(provider, &OsEnv)?;
    let overrides = load_config(args.overrides.as_deref())?;
    let chart = chart_location(state.data(), &overrides, &args);

    let Some(reference) = chart.registry_reference() else {
        println!("{} is not an OCI registry reference, nothing to do", chart.chart);
        return Ok(());
    };
    let reference = reference.to_string();

    let timeout = Duration::from_secs(args.timeout);
    let mut client = HttpRegistryClient::new(RegistryClientOptions {
        plain_http: args.plain_http,
        insecure_skip_tls_verify: args.insecure_skip_tls_verify,
        timeout: Some(timeout),
    })?;
    let registry_config = &state.settings().registry_config;
    if !registry_config.is_empty() {
        client = client.with_credentials_file(registry_config);
    }
    let coordinator =
        RegistryLoginCoordinator::new(Arc::new(client)).with_login_timeout(timeout);

    coordinator.login(&chart).await?;
    info!(reference = %reference, "Registry login complete");
    println!("Login succeeded for {reference}");
    Ok(())
}

fn chart_location(provider: &ConfigData, overrides: &ConfigData, args: &LoginArgs) -> ChartLocation {
    let schema = Schema::provider();
    let config = OverridableConfig::new(provider, overrides, &schema);
    let mut chart = ChartLocation::from_source(&config);

    let flags = [
        (&args.repository, &mut chart.repository),
        (&args.chart, &mut chart.chart),
        (&args.username, &mut chart.username),
        (&args.password, &mut chart.password),
    ];
    for (flag, field) in flags {
        if let Some(value) = flag {
            *field = value.clone();
        }
    }
    chart
}
