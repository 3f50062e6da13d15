//! Connection construction
//!
//! [`ConnectionFactory::build_connection`] turns the provider state plus one
//! operation's overrides into a [`ConnectionHandle`]: a cluster client and an
//! initialized action context. Builds sharing a [`ProviderState`] are
//! serialized on its lock, which is held from resolution through action
//! initialization and released on every return path.

use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;
use tracing::{debug, info};

use crate::driver::StorageDriver;
use crate::env::{EnvSource, OsEnv};
use crate::kubeconfig::{ClusterClientBuilder, KubeClientBuilder, KubeSettings};
use crate::registry::RegistryClient;
use crate::resolver::OverridableConfig;
use crate::settings::ProviderState;
use crate::source::ConfigSource;
use crate::{Error, Result};

/// Environment variable holding the SQL storage connection string
pub const SQL_CONNECTION_STRING_ENV: &str = "HELM_DRIVER_SQL_CONNECTION_STRING";

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "default";

/// Initialized action context
#[derive(Clone, PartialEq, Eq)]
pub struct ActionConfig {
    /// Namespace releases are stored in
    pub namespace: String,
    /// Release storage backend
    pub driver: StorageDriver,
    /// Connection string for the SQL backend
    pub sql_connection_string: Option<String>,
    /// Debug logging for actions
    pub debug: bool,
}

impl std::fmt::Debug for ActionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionConfig")
            .field("namespace", &self.namespace)
            .field("driver", &self.driver)
            .field(
                "sql_connection_string",
                &self.sql_connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("debug", &self.debug)
            .finish()
    }
}

/// Trait for initializing the action context on a cluster client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionInitializer: Send + Sync {
    /// Initialize storage for `namespace` using the driver named `driver`
    async fn init(&self, client: &Client, namespace: &str, driver: &str) -> Result<ActionConfig>;
}

/// Default [`ActionInitializer`]
///
/// Validates the driver and, for the SQL backend, reads the connection
/// string from the environment.
pub struct HelmActionInitializer {
    env: Arc<dyn EnvSource>,
}

impl HelmActionInitializer {
    /// Create an initializer reading the given environment
    pub fn new(env: Arc<dyn EnvSource>) -> Self {
        Self { env }
    }
}

impl Default for HelmActionInitializer {
    fn default() -> Self {
        Self::new(Arc::new(OsEnv))
    }
}

#[async_trait]
impl ActionInitializer for HelmActionInitializer {
    async fn init(&self, client: &Client, namespace: &str, driver: &str) -> Result<ActionConfig> {
        let parsed: StorageDriver = driver
            .parse()
            .map_err(|e: Error| Error::connection_in("driver", e.to_string()))?;

        let sql_connection_string = match parsed {
            StorageDriver::Sql => match self.env.var(SQL_CONNECTION_STRING_ENV) {
                Some(dsn) if !dsn.is_empty() => Some(dsn),
                _ => {
                    return Err(Error::connection_in(
                        "driver",
                        format!("the sql driver requires {SQL_CONNECTION_STRING_ENV} to be set"),
                    ))
                }
            },
            _ => None,
        };

        debug!(
            namespace = %namespace,
            driver = %parsed,
            client_namespace = %client.default_namespace(),
            "Initialized action context"
        );
        Ok(ActionConfig {
            namespace: namespace.to_string(),
            driver: parsed,
            sql_connection_string,
            debug: false,
        })
    }
}

/// A connected cluster client and its action context
///
/// Owned by a single operation.
pub struct ConnectionHandle {
    client: Client,
    action: ActionConfig,
    registry_client: Option<Arc<dyn RegistryClient>>,
}

impl ConnectionHandle {
    /// Wrap a client and an action context
    pub fn new(client: Client, action: ActionConfig) -> Self {
        Self {
            client,
            action,
            registry_client: None,
        }
    }

    /// The cluster client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The action context
    pub fn action(&self) -> &ActionConfig {
        &self.action
    }

    /// Release namespace
    pub fn namespace(&self) -> &str {
        &self.action.namespace
    }

    /// Registry client attached by the login coordinator
    pub fn registry_client(&self) -> Option<&Arc<dyn RegistryClient>> {
        self.registry_client.as_ref()
    }

    /// Attach the registry client used for chart pulls
    pub fn attach_registry_client(&mut self, client: Arc<dyn RegistryClient>) {
        self.registry_client = Some(client);
    }

    /// Query the API server version to confirm the connection works
    pub async fn verify(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| Error::connection_in("verify", e.to_string()))?;
        info!(version = %info.git_version, "Connected to API server");
        Ok(info.git_version)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("action", &self.action)
            .field("registry_client", &self.registry_client.is_some())
            .finish()
    }
}

/// Builds connections from provider state and operation overrides
pub struct ConnectionFactory {
    client_builder: Arc<dyn ClusterClientBuilder>,
    initializer: Arc<dyn ActionInitializer>,
    env: Arc<dyn EnvSource>,
}

impl ConnectionFactory {
    /// Create a factory with explicit collaborators
    pub fn new(
        client_builder: Arc<dyn ClusterClientBuilder>,
        initializer: Arc<dyn ActionInitializer>,
        env: Arc<dyn EnvSource>,
    ) -> Self {
        Self {
            client_builder,
            initializer,
            env,
        }
    }

    /// Factory using kube-rs, the default action initializer and the
    /// process environment
    pub fn from_env() -> Self {
        let env: Arc<dyn EnvSource> = Arc::new(OsEnv);
        Self::new(
            Arc::new(KubeClientBuilder::new()),
            Arc::new(HelmActionInitializer::new(Arc::clone(&env))),
            env,
        )
    }

    /// Build a connection for one operation
    ///
    /// Holds the provider lock for the whole build. Overrides reach the
    /// cluster client settings only; the storage driver and debug flag are
    /// the provider's. Any failure, including
    /// configuration errors from environment defaults, is reported as
    /// [`Error::Connection`].
    pub async fn build_connection(
        &self,
        state: &ProviderState,
        overrides: &dyn ConfigSource,
        namespace: &str,
    ) -> Result<ConnectionHandle> {
        let _guard = state.lock().await;

        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };
        debug!(namespace = %namespace, "Building connection");

        let config = OverridableConfig::new(state.data(), overrides, state.schema());
        let settings =
            KubeSettings::resolve(&config, self.env.as_ref()).map_err(Error::into_connection)?;

        let client = self
            .client_builder
            .build(&settings, namespace)
            .await
            .map_err(Error::into_connection)?;

        let mut action = self
            .initializer
            .init(&client, namespace, state.driver())
            .await
            .map_err(Error::into_connection)?;
        action.debug = state.settings().debug;

        info!(
            namespace = %namespace,
            driver = %action.driver,
            host = %settings.host,
            "Connection ready"
        );
        Ok(ConnectionHandle::new(client, action))
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory").finish_non_exhaustive()
    }
}
