//! Provider-level state
//!
//! [`ProviderState`] is created once when the provider is configured and
//! shared by every operation afterwards. It owns the provider configuration
//! block (the base source for override resolution), the Helm environment
//! settings derived from it, the storage driver name and the experiment
//! toggles. It is never mutated after [`ProviderState::configure`]; its lock
//! exists to serialize connection construction.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::driver::StorageDriver;
use crate::env::EnvSource;
use crate::schema::{FieldKind, Schema, EXPERIMENTS_PREFIX};
use crate::source::{as_str, ConfigData, ConfigSource};
use crate::{Error, Result};

/// Experiments known to the provider
pub const EXPERIMENTS: &[&str] = &["manifest"];

/// Helm client environment settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HelmSettings {
    /// Debug mode
    pub debug: bool,
    /// Helm plugins directory
    pub plugins_directory: String,
    /// Registry credentials file
    pub registry_config: String,
    /// Repository list file
    pub repository_config: String,
    /// Repository index cache directory
    pub repository_cache: String,
}

/// Process-wide provider state
pub struct ProviderState {
    data: ConfigData,
    schema: Schema,
    settings: HelmSettings,
    driver: String,
    experiments: BTreeMap<String, bool>,
    lock: Mutex<()>,
}

impl ProviderState {
    /// Configure the provider from its configuration block using the
    /// provider schema
    pub fn configure(data: ConfigData, env: &dyn EnvSource) -> Result<Self> {
        Self::configure_with_schema(data, Schema::provider(), env)
    }

    /// Configure the provider with an explicit schema
    pub fn configure_with_schema(
        data: ConfigData,
        schema: Schema,
        env: &dyn EnvSource,
    ) -> Result<Self> {
        let mut experiments = BTreeMap::new();
        for name in EXPERIMENTS {
            let key = format!("{EXPERIMENTS_PREFIX}{name}");
            let enabled = provider_value(&data, &schema, &key, env)?
                .as_bool()
                .unwrap_or(false);
            experiments.insert(name.to_string(), enabled);
        }

        let settings = HelmSettings {
            debug: provider_value(&data, &schema, "debug", env)?
                .as_bool()
                .unwrap_or(false),
            plugins_directory: provider_string(&data, &schema, "plugins_path", env)?,
            registry_config: provider_string(&data, &schema, "registry_config_path", env)?,
            repository_config: provider_string(&data, &schema, "repository_config_path", env)?,
            repository_cache: provider_string(&data, &schema, "repository_cache", env)?,
        };

        let driver = provider_string(&data, &schema, "helm_driver", env)?;
        driver.parse::<StorageDriver>()?;

        let state = Self {
            data,
            schema,
            settings,
            driver,
            experiments,
            lock: Mutex::new(()),
        };
        debug!(
            experiments = ?state.enabled_experiments(),
            driver = %state.driver,
            "Provider configured"
        );
        Ok(state)
    }

    /// The provider configuration block
    pub fn data(&self) -> &ConfigData {
        &self.data
    }

    /// Schema used to resolve fields
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Helm environment settings
    pub fn settings(&self) -> &HelmSettings {
        &self.settings
    }

    /// Configured storage driver name, as written
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Whether the named experiment is enabled
    pub fn experiment_enabled(&self, name: &str) -> bool {
        self.experiments.get(name).copied().unwrap_or(false)
    }

    /// Names of the enabled experiments, sorted
    pub fn enabled_experiments(&self) -> Vec<String> {
        self.experiments
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Acquire the connection-construction lock
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl std::fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderState")
            .field("settings", &self.settings)
            .field("driver", &self.driver)
            .field("experiments", &self.experiments)
            .finish()
    }
}

/// Value of a top-level provider field, falling back to its schema default
fn provider_value(
    data: &ConfigData,
    schema: &Schema,
    key: &str,
    env: &dyn EnvSource,
) -> Result<Value> {
    let field = schema.field(key);
    let set = match field.map(|f| f.kind) {
        Some(FieldKind::Bool) => data.get_set(key),
        _ => data.get_present(key),
    };
    if let Some(v) = set {
        return Ok(v);
    }
    match field {
        Some(f) => Ok(f.default_value(env)?.unwrap_or(Value::Null)),
        None => Ok(Value::Null),
    }
}

fn provider_string(
    data: &ConfigData,
    schema: &Schema,
    key: &str,
    env: &dyn EnvSource,
) -> Result<String> {
    let value = provider_value(data, schema, key, env)?;
    match value {
        Value::Null | Value::String(_) => Ok(as_str(&value).to_string()),
        other => Err(Error::configuration(
            key,
            format!("expected a string, got {other}"),
        )),
    }
}
