//! Registry login coordination
//!
//! Charts stored in an OCI registry need an authenticated registry client
//! before they can be pulled. Logging in is a network handshake, and many
//! operations fetch from the same registry at once, so
//! [`RegistryLoginCoordinator`] performs at most one successful handshake
//! per host for the life of its [`RegistryLoginRegistry`].
//!
//! The registry lock is held while the handshake runs. Concurrent callers
//! for the same host wait on it and then see the recorded host. The lock is
//! shared by all hosts and is independent of the provider lock, so a slow
//! login never blocks connection builds.

mod client;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::source::{as_str, ConfigSource};
use crate::{Error, Result};

pub use client::{
    parse_challenge, Challenge, HttpRegistryClient, RegistryClient, RegistryClientOptions,
    RegistryCredential,
};

#[cfg(test)]
pub use client::MockRegistryClient;

/// Scheme prefix marking a registry reference
pub const OCI_SCHEME: &str = "oci://";

/// Whether `reference` points at an OCI registry
pub fn is_registry_reference(reference: &str) -> bool {
    reference.starts_with(OCI_SCHEME)
}

/// Host (`name[:port]`) of a registry reference
pub fn registry_host(reference: &str) -> Result<String> {
    let parsed = url::Url::parse(reference)
        .map_err(|e| Error::invalid_reference(reference, e.to_string()))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::invalid_reference(reference, "reference has no host"))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Where a chart comes from, with optional registry credentials
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ChartLocation {
    /// Repository URL or registry reference
    pub repository: String,
    /// Chart name or full reference
    pub chart: String,
    /// Registry username
    pub username: String,
    /// Registry password
    pub password: String,
}

impl ChartLocation {
    /// Create a location without credentials
    pub fn new(repository: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            chart: chart.into(),
            ..Default::default()
        }
    }

    /// Attach registry credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Read `repository`, `chart`, `repository_username` and
    /// `repository_password` from an operation's source
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let field = |key: &str| as_str(&source.get(key)).to_string();
        Self {
            repository: field("repository"),
            chart: field("chart"),
            username: field("repository_username"),
            password: field("repository_password"),
        }
    }

    /// The registry reference, preferring the repository over the chart
    pub fn registry_reference(&self) -> Option<&str> {
        [self.repository.as_str(), self.chart.as_str()]
            .into_iter()
            .find(|r| is_registry_reference(r))
    }

    /// Both username and password are set
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for ChartLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartLocation")
            .field("repository", &self.repository)
            .field("chart", &self.chart)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

/// Registry hosts that have been logged in to
#[derive(Debug, Default)]
pub struct RegistryLoginRegistry {
    hosts: Mutex<HashSet<String>>,
}

impl RegistryLoginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `host` has been logged in to
    pub async fn contains(&self, host: &str) -> bool {
        self.hosts.lock().await.contains(host)
    }

    /// Recorded hosts, sorted
    pub async fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.hosts.lock().await.iter().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Number of recorded hosts
    pub async fn len(&self) -> usize {
        self.hosts.lock().await.len()
    }

    /// Whether no host has been recorded
    pub async fn is_empty(&self) -> bool {
        self.hosts.lock().await.is_empty()
    }
}

/// Performs at most one login per registry host
pub struct RegistryLoginCoordinator {
    registry: Arc<RegistryLoginRegistry>,
    client: Arc<dyn RegistryClient>,
    login_timeout: Option<Duration>,
}

impl RegistryLoginCoordinator {
    /// Create a coordinator with a fresh registry
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self::with_registry(Arc::new(RegistryLoginRegistry::new()), client)
    }

    /// Create a coordinator sharing an existing registry
    pub fn with_registry(registry: Arc<RegistryLoginRegistry>, client: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            client,
            login_timeout: None,
        }
    }

    /// Bound the duration of each handshake
    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = Some(timeout);
        self
    }

    /// The registry of logged-in hosts
    pub fn registry(&self) -> &Arc<RegistryLoginRegistry> {
        &self.registry
    }

    /// Attach the registry client to `handle` and log in to the chart's
    /// registry if needed
    pub async fn ensure_login(&self, handle: &mut ConnectionHandle, chart: &ChartLocation) -> Result<()> {
        handle.attach_registry_client(Arc::clone(&self.client));
        self.login(chart).await
    }

    /// Log in to the chart's registry unless it is not a registry reference,
    /// has no credentials, or was already logged in to
    pub async fn login(&self, chart: &ChartLocation) -> Result<()> {
        let Some(reference) = chart.registry_reference() else {
            debug!(chart = %chart.chart, "Not a registry reference, skipping login");
            return Ok(());
        };
        if !chart.has_credentials() {
            debug!(reference = %reference, "No registry credentials, skipping login");
            return Ok(());
        }
        let host = registry_host(reference)?;

        let mut hosts = self.registry.hosts.lock().await;
        if hosts.contains(&host) {
            debug!(host = %host, "Already logged in to registry");
            return Ok(());
        }

        debug!(host = %host, username = %chart.username, "Logging in to registry");
        let handshake = self.client.login(&host, &chart.username, &chart.password);
        let outcome = match self.login_timeout {
            Some(limit) => match tokio::time::timeout(limit, handshake).await {
                Ok(result) => result,
                Err(_) => Err(Error::registry_auth(
                    &host,
                    format!("login timed out after {limit:?}"),
                )),
            },
            None => handshake.await,
        };

        match outcome {
            Ok(()) => {
                hosts.insert(host.clone());
                info!(host = %host, "Registry login recorded");
                Ok(())
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Registry login failed");
                Err(match e {
                    Error::RegistryAuth { .. } => e,
                    other => Error::registry_auth(host, other.to_string()),
                })
            }
        }
    }
}

impl std::fmt::Debug for RegistryLoginCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryLoginCoordinator")
            .field("login_timeout", &self.login_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ConfigData;
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GOOD_PASSWORD: &str = "good";

    /// Handshake that takes a while, counts invocations and accepts only
    /// [`GOOD_PASSWORD`]
    struct SlowClient {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl SlowClient {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegistryClient for SlowClient {
        async fn login(&self, host: &str, _username: &str, password: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if password != GOOD_PASSWORD {
                return Err(Error::registry_auth(host, "unauthorized"));
            }
            Ok(())
        }

        async fn credential(&self, _host: &str) -> Option<RegistryCredential> {
            None
        }
    }

    fn oci_chart() -> ChartLocation {
        ChartLocation::new("oci://registry.example.com/charts", "foo").with_credentials("u", GOOD_PASSWORD)
    }

    #[rstest]
    #[case("oci://registry.example.com/charts/foo", "registry.example.com")]
    #[case("oci://localhost:5000/charts", "localhost:5000")]
    #[case("oci://ghcr.io", "ghcr.io")]
    fn test_registry_host(#[case] reference: &str, #[case] expected: &str) {
        assert_eq!(registry_host(reference).unwrap(), expected);
    }

    #[test]
    fn test_registry_host_rejects_unparsable_reference() {
        let err = registry_host("oci://").unwrap_err();
        assert!(matches!(err, Error::InvalidReference { .. }));
    }

    #[rstest]
    #[case("oci://r.example.com/charts", "foo", Some("oci://r.example.com/charts"))]
    #[case("https://charts.example.com", "oci://r.example.com/charts/foo", Some("oci://r.example.com/charts/foo"))]
    #[case("https://charts.example.com", "foo", None)]
    #[case("", "./local/chart", None)]
    fn test_registry_reference_prefers_repository(
        #[case] repository: &str,
        #[case] chart: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(ChartLocation::new(repository, chart).registry_reference(), expected);
    }

    #[test]
    fn test_chart_location_from_source() {
        let source = ConfigData::new(json!({
            "repository": "oci://registry.example.com/charts",
            "chart": "foo",
            "repository_username": "u",
            "repository_password": "good",
        }));
        let chart = ChartLocation::from_source(&source);
        assert_eq!(chart, oci_chart());
        assert!(!format!("{chart:?}").contains("good"));
    }

    /// Story: a release pulls `oci://registry.example.com/charts/foo` with
    /// credentials on an empty registry; one handshake, host recorded, and a
    /// second call does not log in again
    #[tokio::test]
    async fn story_oci_chart_logs_in_once() {
        let mut client = MockRegistryClient::new();
        client
            .expect_login()
            .withf(|host, user, pass| {
                host.to_string() == "registry.example.com" && user.to_string() == "u" && pass.to_string() == "p"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let coordinator = RegistryLoginCoordinator::new(Arc::new(client));

        let chart = ChartLocation::new("", "oci://registry.example.com/charts/foo")
            .with_credentials("u", "p");
        coordinator.login(&chart).await.unwrap();
        coordinator.login(&chart).await.unwrap();

        assert_eq!(
            coordinator.registry().hosts().await,
            vec!["registry.example.com".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_handshake() {
        let client = Arc::new(SlowClient::new(Duration::from_millis(50)));
        let coordinator = Arc::new(RegistryLoginCoordinator::new(client.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.login(&oci_chart()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(client.calls(), 1);
        assert!(coordinator.registry().contains("registry.example.com").await);
    }

    #[tokio::test]
    async fn test_non_registry_chart_bypasses_login() {
        let mut client = MockRegistryClient::new();
        client.expect_login().never();
        let coordinator = RegistryLoginCoordinator::new(Arc::new(client));

        let chart = ChartLocation::new("https://charts.example.com", "foo").with_credentials("u", "p");
        coordinator.login(&chart).await.unwrap();

        assert!(coordinator.registry().is_empty().await);
    }

    #[rstest]
    #[case("", "")]
    #[case("u", "")]
    #[case("", "p")]
    #[tokio::test]
    async fn test_missing_credentials_bypass_login(#[case] username: &str, #[case] password: &str) {
        let mut client = MockRegistryClient::new();
        client.expect_login().never();
        let coordinator = RegistryLoginCoordinator::new(Arc::new(client));

        let chart = ChartLocation::new("oci://registry.example.com/charts", "foo")
            .with_credentials(username, password);
        coordinator.login(&chart).await.unwrap();

        assert_eq!(coordinator.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_login_is_not_recorded_and_corrected_credentials_succeed() {
        let client = Arc::new(SlowClient::new(Duration::ZERO));
        let coordinator = RegistryLoginCoordinator::new(client.clone());
        let wrong = oci_chart().with_credentials("u", "bad");

        let err = coordinator.login(&wrong).await.unwrap_err();
        assert!(matches!(err, Error::RegistryAuth { ref host, .. } if host == "registry.example.com"));
        assert!(!coordinator.registry().contains("registry.example.com").await);

        coordinator.login(&oci_chart()).await.unwrap();
        assert_eq!(client.calls(), 2);
        assert!(coordinator.registry().contains("registry.example.com").await);
    }

    #[tokio::test]
    async fn test_shared_registry_spans_coordinators() {
        let registry = Arc::new(RegistryLoginRegistry::new());
        let first = Arc::new(SlowClient::new(Duration::ZERO));
        let second = Arc::new(SlowClient::new(Duration::ZERO));

        RegistryLoginCoordinator::with_registry(Arc::clone(&registry), first.clone())
            .login(&oci_chart())
            .await
            .unwrap();
        RegistryLoginCoordinator::with_registry(Arc::clone(&registry), second.clone())
            .login(&oci_chart())
            .await
            .unwrap();

        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_login_timeout_is_registry_auth_error() {
        let client = Arc::new(SlowClient::new(Duration::from_secs(5)));
        let coordinator =
            RegistryLoginCoordinator::new(client).with_login_timeout(Duration::from_millis(50));

        let err = coordinator.login(&oci_chart()).await.unwrap_err();

        assert!(err.to_string().contains("timed out"));
        assert!(coordinator.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_non_auth_client_error_is_wrapped() {
        let mut client = MockRegistryClient::new();
        client
            .expect_login()
            .returning(|_, _, _| Err(Error::connection("socket closed")));
        let coordinator = RegistryLoginCoordinator::new(Arc::new(client));

        let err = coordinator.login(&oci_chart()).await.unwrap_err();
        assert_eq!(err.host(), Some("registry.example.com"));
    }
}
