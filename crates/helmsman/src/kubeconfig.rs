//! Cluster client construction
//!
//! Turns the resolved `kubernetes` block into a `kube::Client`:
//!
//! 1. [`KubeSettings::resolve`] reads every connection field through the
//!    override resolver and resolves the exec plugin command.
//! 2. [`assemble_kubeconfig`] loads the configured kubeconfig files (if any),
//!    selects the context and overlays the explicit fields on its cluster
//!    and user entries. Without files a single synthetic context is built.
//! 3. [`KubeClientBuilder`] hands the result to kube-rs.
//!
//! The kubeconfig is assembled as a JSON tree and deserialized into
//! [`Kubeconfig`] at the end, so loaded files and overlays go through the
//! same parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::env::EnvSource;
use crate::resolver::OverridableConfig;
use crate::source::as_string_list;
use crate::{Error, Result};

/// Connect timeout applied to every cluster client
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Read timeout applied to every cluster client
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Name used for synthesized kubeconfig entries
pub const SYNTHETIC_ENTRY: &str = "helmsman";

/// Exec credential API version that client libraries no longer support
const REMOVED_EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1alpha1";

/// Exec credential plugin
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecSpec {
    /// `client.authentication.k8s.io` API version
    pub api_version: String,
    /// Command to run; absolute after [`KubeSettings::resolve`]
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment for the plugin
    pub env: BTreeMap<String, String>,
}

impl ExecSpec {
    /// Parse the `exec` block
    ///
    /// Accepts the block itself or a single-element list wrapping it.
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        let block = match value {
            Value::Null => return Ok(None),
            Value::Array(items) => match items.first() {
                Some(first) => first,
                None => return Ok(None),
            },
            other => other,
        };
        let Value::Object(map) = block else {
            return Err(Error::connection_in("exec", "exec must be a block"));
        };

        let required = |name: &str| -> Result<String> {
            match map.get(name).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => Ok(s.to_string()),
                _ => Err(Error::connection_in(
                    "exec",
                    format!("exec.{name} is required"),
                )),
            }
        };

        let api_version = required("api_version")?;
        if api_version == REMOVED_EXEC_API_VERSION {
            warn!(
                api_version = %api_version,
                "v1alpha1 of the client authentication API has been removed, use v1beta1 or above"
            );
        }

        let env = match map.get("env") {
            Some(Value::Object(vars)) => vars
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect(),
            _ => BTreeMap::new(),
        };

        Ok(Some(Self {
            api_version,
            command: required("command")?,
            args: map.get("args").map(as_string_list).unwrap_or_default(),
            env,
        }))
    }
}

/// Connection fields of the `kubernetes` block after override resolution
#[derive(Clone, Default, PartialEq)]
pub struct KubeSettings {
    /// API server URL
    pub host: String,
    /// Basic auth username
    pub username: String,
    /// Basic auth password
    pub password: String,
    /// Skip TLS verification
    pub insecure: bool,
    /// PEM client certificate
    pub client_certificate: String,
    /// PEM client key
    pub client_key: String,
    /// PEM cluster CA bundle
    pub cluster_ca_certificate: String,
    /// Kubeconfig files to load, in merge order
    pub config_paths: Vec<String>,
    /// Context to select
    pub config_context: String,
    /// User to bind to the selected context
    pub config_context_auth_info: String,
    /// Cluster to bind to the selected context
    pub config_context_cluster: String,
    /// Bearer token
    pub token: String,
    /// Proxy for API requests
    pub proxy_url: String,
    /// Exec credential plugin
    pub exec: Option<ExecSpec>,
}

impl KubeSettings {
    /// Resolve every connection field from the effective configuration
    ///
    /// A single `config_path` takes precedence over `config_paths`. The exec
    /// plugin command is resolved against `PATH`.
    pub fn resolve(config: &OverridableConfig<'_>, env: &dyn EnvSource) -> Result<Self> {
        let config_path = config.kubernetes_str("config_path", env)?;
        let config_paths = if !config_path.is_empty() {
            vec![config_path]
        } else {
            config
                .kubernetes("config_paths", env)?
                .map(|v| as_string_list(&v))
                .unwrap_or_default()
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect()
        };

        let exec = match config.kubernetes("exec", env)? {
            Some(value) => match ExecSpec::from_value(&value)? {
                Some(mut spec) => {
                    spec.command = resolve_exec_command(&spec.command, env)?
                        .to_string_lossy()
                        .into_owned();
                    Some(spec)
                }
                None => None,
            },
            None => None,
        };

        Ok(Self {
            host: config.kubernetes_str("host", env)?,
            username: config.kubernetes_str("username", env)?,
            password: config.kubernetes_str("password", env)?,
            insecure: config.kubernetes_bool("insecure", env)?,
            client_certificate: config.kubernetes_str("client_certificate", env)?,
            client_key: config.kubernetes_str("client_key", env)?,
            cluster_ca_certificate: config.kubernetes_str("cluster_ca_certificate", env)?,
            config_paths,
            config_context: config.kubernetes_str("config_context", env)?,
            config_context_auth_info: config.kubernetes_str("config_context_auth_info", env)?,
            config_context_cluster: config.kubernetes_str("config_context_cluster", env)?,
            token: config.kubernetes_str("token", env)?,
            proxy_url: config.kubernetes_str("proxy_url", env)?,
            exec,
        })
    }
}

impl std::fmt::Debug for KubeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("KubeSettings")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("insecure", &self.insecure)
            .field("client_key", &redact(&self.client_key))
            .field("config_paths", &self.config_paths)
            .field("config_context", &self.config_context)
            .field("token", &redact(&self.token))
            .field("proxy_url", &self.proxy_url)
            .field("exec", &self.exec)
            .finish()
    }
}

/// Locate an exec plugin
///
/// Commands containing a path separator must exist as given; bare names are
/// searched in `PATH`.
pub fn resolve_exec_command(command: &str, env: &dyn EnvSource) -> Result<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = expand_home(command);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(Error::connection_in(
                "exec",
                format!("exec plugin {command:?} does not exist"),
            ))
        };
    }

    let search = env.var("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            Error::connection_in(
                "exec",
                format!("exec plugin {command:?} not found in PATH"),
            )
        })
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

/// Assemble the kubeconfig for a connection
///
/// Returns the kubeconfig and the name of the context to use. The target
/// namespace is recorded on that context.
pub fn assemble_kubeconfig(settings: &KubeSettings, namespace: &str) -> Result<(Kubeconfig, String)> {
    let mut doc = load_kubeconfigs(&settings.config_paths)?;
    let from_files = !settings.config_paths.is_empty();

    let mut context_name = settings.config_context.clone();
    if context_name.is_empty() {
        context_name = doc
            .get("current-context")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }
    if context_name.is_empty() {
        context_name = SYNTHETIC_ENTRY.to_string();
    }

    if from_files && !settings.config_context.is_empty() && named(&doc, "contexts", &context_name).is_none() {
        return Err(Error::connection_in(
            "kubeconfig",
            format!("context {context_name:?} not found in {:?}", settings.config_paths),
        ));
    }

    let context = named_entry(&mut doc, "contexts", "context", &context_name)?;
    if !settings.config_context_cluster.is_empty() {
        context.insert("cluster".into(), json!(settings.config_context_cluster));
    }
    if !settings.config_context_auth_info.is_empty() {
        context.insert("user".into(), json!(settings.config_context_auth_info));
    }
    let cluster_name = string_or(context, "cluster", SYNTHETIC_ENTRY);
    let user_name = string_or(context, "user", SYNTHETIC_ENTRY);
    context.insert("cluster".into(), json!(cluster_name));
    context.insert("user".into(), json!(user_name));
    if !namespace.is_empty() {
        context.insert("namespace".into(), json!(namespace));
    }

    let cluster = named_entry(&mut doc, "clusters", "cluster", &cluster_name)?;
    overlay_cluster(cluster, settings)?;
    if cluster.get("server").and_then(Value::as_str).unwrap_or_default().is_empty() {
        return Err(Error::connection_in(
            "kubeconfig",
            format!("no API server host configured for cluster {cluster_name:?}"),
        ));
    }

    let user = named_entry(&mut doc, "users", "user", &user_name)?;
    overlay_user(user, settings)?;

    if let Some(root) = doc.as_object_mut() {
        root.insert("current-context".into(), json!(context_name));
    }

    let kubeconfig: Kubeconfig = serde_json::from_value(doc)
        .map_err(|e| Error::connection_in("kubeconfig", format!("invalid kubeconfig: {e}")))?;
    Ok((kubeconfig, context_name))
}

/// Read and merge kubeconfig files
///
/// Named entries merge first-wins and the first file that sets
/// `current-context` decides it.
fn load_kubeconfigs(paths: &[String]) -> Result<Value> {
    let mut merged = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [],
        "users": [],
        "contexts": [],
    });

    for raw in paths {
        let path = expand_home(raw);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::connection_in(
                "kubeconfig",
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        let file: Value = serde_yaml::from_str(&contents).map_err(|e| {
            Error::connection_in(
                "kubeconfig",
                format!("failed to parse {}: {e}", path.display()),
            )
        })?;
        debug!(path = %path.display(), "Loaded kubeconfig");

        for section in ["clusters", "users", "contexts"] {
            let Some(entries) = file.get(section).and_then(Value::as_array) else {
                continue;
            };
            for entry in entries {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                if named(&merged, section, name).is_none() {
                    if let Some(list) = merged[section].as_array_mut() {
                        list.push(entry.clone());
                    }
                }
            }
        }

        let unset = merged
            .get("current-context")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .is_empty();
        if unset {
            if let Some(ctx) = file.get("current-context").and_then(Value::as_str) {
                merged["current-context"] = json!(ctx);
            }
        }
    }
    Ok(merged)
}

fn named<'a>(doc: &'a Value, section: &str, name: &str) -> Option<&'a Value> {
    doc.get(section)?
        .as_array()?
        .iter()
        .find(|e| e.get("name").and_then(Value::as_str) == Some(name))
}

/// Body of the named entry in `section`, created if missing
fn named_entry<'a>(
    doc: &'a mut Value,
    section: &str,
    body: &str,
    name: &str,
) -> Result<&'a mut Map<String, Value>> {
    let list = doc
        .get_mut(section)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| Error::connection_in("kubeconfig", format!("{section} must be a list")))?;

    let index = match list
        .iter()
        .position(|e| e.get("name").and_then(Value::as_str) == Some(name))
    {
        Some(i) => i,
        None => {
            let mut entry = Map::new();
            entry.insert("name".into(), json!(name));
            entry.insert(body.into(), json!({}));
            list.push(Value::Object(entry));
            list.len() - 1
        }
    };

    let entry = list[index]
        .as_object_mut()
        .ok_or_else(|| Error::connection_in("kubeconfig", format!("{section} entry {name:?} is malformed")))?;
    let slot = entry.entry(body).or_insert_with(|| json!({}));
    if slot.is_null() {
        *slot = json!({});
    }
    slot.as_object_mut()
        .ok_or_else(|| Error::connection_in("kubeconfig", format!("{section} entry {name:?} is malformed")))
}

fn string_or(map: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match map.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => fallback.to_string(),
    }
}

fn overlay_cluster(cluster: &mut Map<String, Value>, settings: &KubeSettings) -> Result<()> {
    if !settings.host.is_empty() {
        cluster.insert("server".into(), json!(settings.host));
    }
    if settings.insecure {
        cluster.insert("insecure-skip-tls-verify".into(), json!(true));
    }
    if !settings.cluster_ca_certificate.is_empty() {
        let data = pem_data("cluster_ca_certificate", &settings.cluster_ca_certificate)?;
        cluster.remove("certificate-authority");
        cluster.insert("certificate-authority-data".into(), json!(data));
    }
    if !settings.proxy_url.is_empty() {
        url::Url::parse(&settings.proxy_url).map_err(|e| {
            Error::connection_in("kubeconfig", format!("invalid proxy_url: {e}"))
        })?;
        cluster.insert("proxy-url".into(), json!(settings.proxy_url));
    }
    Ok(())
}

fn overlay_user(user: &mut Map<String, Value>, settings: &KubeSettings) -> Result<()> {
    if !settings.client_certificate.is_empty() {
        let data = pem_data("client_certificate", &settings.client_certificate)?;
        user.remove("client-certificate");
        user.insert("client-certificate-data".into(), json!(data));
    }
    if !settings.client_key.is_empty() {
        let data = pem_data("client_key", &settings.client_key)?;
        user.remove("client-key");
        user.insert("client-key-data".into(), json!(data));
    }
    if !settings.token.is_empty() {
        user.insert("token".into(), json!(settings.token));
    }
    if !settings.username.is_empty() {
        user.insert("username".into(), json!(settings.username));
    }
    if !settings.password.is_empty() {
        user.insert("password".into(), json!(settings.password));
    }
    if let Some(exec) = &settings.exec {
        let env: Vec<Value> = exec
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        user.insert(
            "exec".into(),
            json!({
                "apiVersion": exec.api_version,
                "command": exec.command,
                "args": exec.args,
                "env": env,
            }),
        );
    }
    Ok(())
}

/// Base64 of a PEM blob, rejecting input without PEM armour
fn pem_data(field: &str, pem: &str) -> Result<String> {
    let trimmed = pem.trim();
    if !trimmed.starts_with("-----BEGIN ") || !trimmed.contains("-----END ") {
        return Err(Error::connection_in(
            "kubeconfig",
            format!("{field} is not PEM encoded"),
        ));
    }
    Ok(STANDARD.encode(pem.as_bytes()))
}

/// Trait for building cluster clients from resolved settings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClientBuilder: Send + Sync {
    /// Build a client whose default namespace is `namespace`
    async fn build(&self, settings: &KubeSettings, namespace: &str) -> Result<Client>;
}

/// Default builder backed by kube-rs
#[derive(Clone, Debug, Default)]
pub struct KubeClientBuilder;

impl KubeClientBuilder {
    /// Create a builder
    pub fn new() -> Self {
        Self
    }

    /// Build the kube-rs client configuration without creating a client
    pub async fn config(&self, settings: &KubeSettings, namespace: &str) -> Result<Config> {
        let (kubeconfig, context) = assemble_kubeconfig(settings, namespace)?;
        let options = KubeConfigOptions {
            context: Some(context),
            ..Default::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::connection_in("kubeconfig", e.to_string()))?;
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
        if !namespace.is_empty() {
            config.default_namespace = namespace.to_string();
        }
        Ok(config)
    }
}

#[async_trait]
impl ClusterClientBuilder for KubeClientBuilder {
    async fn build(&self, settings: &KubeSettings, namespace: &str) -> Result<Client> {
        let config = self.config(settings, namespace).await?;
        debug!(cluster_url = %config.cluster_url, namespace = %namespace, "Building cluster client");
        Client::try_from(config).map_err(|e| Error::connection_in("client", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StaticEnv;
    use crate::schema::Schema;
    use crate::source::ConfigData;
    use std::io::Write;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn init_crypto() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    fn resolve(base: Value, overrides: Value, env: &StaticEnv) -> Result<KubeSettings> {
        let schema = Schema::provider();
        let base = ConfigData::new(base);
        let overrides = ConfigData::new(overrides);
        let config = OverridableConfig::new(&base, &overrides, &schema);
        KubeSettings::resolve(&config, env)
    }

    fn write_kubeconfig(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn cluster_of<'a>(kc: &'a Kubeconfig, name: &str) -> &'a kube::config::Cluster {
        kc.clusters
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.cluster.as_ref())
            .unwrap()
    }

    #[test]
    fn test_resolve_merges_override_over_provider_block() {
        let settings = resolve(
            json!({"kubernetes": [{"host": "https://provider:6443", "token": "provider-token"}]}),
            json!({"kubernetes": [{"host": "https://override:6443"}]}),
            &StaticEnv::new(),
        )
        .unwrap();

        assert_eq!(settings.host, "https://override:6443");
        assert_eq!(settings.token, "provider-token");
        assert!(!settings.insecure);
        assert!(settings.exec.is_none());
    }

    #[test]
    fn test_config_path_takes_precedence_over_config_paths() {
        let settings = resolve(
            json!({"kubernetes": [{"config_path": "/one", "config_paths": ["/two", "/three"]}]}),
            json!({}),
            &StaticEnv::new(),
        )
        .unwrap();
        assert_eq!(settings.config_paths, vec!["/one".to_string()]);

        let settings = resolve(
            json!({"kubernetes": [{"config_paths": ["/two", "", "/three"]}]}),
            json!({}),
            &StaticEnv::new(),
        )
        .unwrap();
        assert_eq!(settings.config_paths, vec!["/two".to_string(), "/three".to_string()]);
    }

    #[test]
    fn test_exec_command_resolved_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = dir.path().join("aws-iam-authenticator");
        std::fs::write(&plugin, "#!/bin/sh\n").unwrap();
        let env = StaticEnv::new().with("PATH", dir.path().to_string_lossy());

        let settings = resolve(
            json!({"kubernetes": [{
                "host": "https://eks:443",
                "exec": [{
                    "api_version": "client.authentication.k8s.io/v1beta1",
                    "command": "aws-iam-authenticator",
                    "args": ["token", "-i", "prod"],
                    "env": {"AWS_PROFILE": "prod"},
                }],
            }]}),
            json!({}),
            &env,
        )
        .unwrap();

        let exec = settings.exec.unwrap();
        assert_eq!(PathBuf::from(&exec.command), plugin);
        assert_eq!(exec.args, vec!["token", "-i", "prod"]);
        assert_eq!(exec.env.get("AWS_PROFILE").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_unresolvable_exec_command_is_connection_error() {
        let err = resolve(
            json!({"kubernetes": [{"exec": {
                "api_version": "client.authentication.k8s.io/v1beta1",
                "command": "definitely-not-installed-plugin",
            }}]}),
            json!({}),
            &StaticEnv::new().with("PATH", "/nonexistent"),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Connection { ref context, .. } if context == "exec"));
    }

    #[test]
    fn test_exec_missing_command_is_connection_error() {
        let err = ExecSpec::from_value(&json!({"api_version": "v1beta1"})).unwrap_err();
        assert!(err.to_string().contains("exec.command is required"));
    }

    #[test]
    fn test_synthetic_kubeconfig_from_explicit_fields() {
        let settings = KubeSettings {
            host: "https://10.0.0.1:6443".to_string(),
            insecure: true,
            cluster_ca_certificate: PEM.to_string(),
            token: "abc".to_string(),
            proxy_url: "http://proxy.internal:3128".to_string(),
            ..Default::default()
        };

        let (kc, context) = assemble_kubeconfig(&settings, "apps").unwrap();

        assert_eq!(context, SYNTHETIC_ENTRY);
        assert_eq!(kc.current_context.as_deref(), Some(SYNTHETIC_ENTRY));
        let cluster = cluster_of(&kc, SYNTHETIC_ENTRY);
        assert_eq!(cluster.server.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(cluster.insecure_skip_tls_verify, Some(true));
        assert_eq!(
            cluster.certificate_authority_data.as_deref(),
            Some(STANDARD.encode(PEM).as_str())
        );
        assert_eq!(cluster.proxy_url.as_deref(), Some("http://proxy.internal:3128"));
        let ctx = kc.contexts[0].context.as_ref().unwrap();
        assert_eq!(ctx.namespace.as_deref(), Some("apps"));
    }

    #[test]
    fn test_missing_host_is_connection_error() {
        let err = assemble_kubeconfig(&KubeSettings::default(), "default").unwrap_err();
        assert!(err.to_string().contains("no API server host"));
    }

    #[test]
    fn test_malformed_client_key_is_connection_error() {
        let settings = KubeSettings {
            host: "https://10.0.0.1:6443".to_string(),
            client_certificate: PEM.to_string(),
            client_key: "not a key".to_string(),
            ..Default::default()
        };
        let err = assemble_kubeconfig(&settings, "default").unwrap_err();
        assert!(err.to_string().contains("client_key is not PEM encoded"));
    }

    #[test]
    fn test_kubeconfig_files_merge_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_kubeconfig(
            dir.path(),
            "first",
            r#"
apiVersion: v1
kind: Config
current-context: prod
clusters:
- name: prod
  cluster:
    server: https://prod:6443
contexts:
- name: prod
  context:
    cluster: prod
    user: admin
users:
- name: admin
  user:
    token: first-token
"#,
        );
        let second = write_kubeconfig(
            dir.path(),
            "second",
            r#"
apiVersion: v1
kind: Config
current-context: staging
clusters:
- name: prod
  cluster:
    server: https://shadowed:6443
- name: staging
  cluster:
    server: https://staging:6443
contexts:
- name: staging
  context:
    cluster: staging
    user: admin
users: []
"#,
        );

        let settings = KubeSettings {
            config_paths: vec![first, second],
            ..Default::default()
        };
        let (kc, context) = assemble_kubeconfig(&settings, "").unwrap();

        assert_eq!(context, "prod");
        assert_eq!(cluster_of(&kc, "prod").server.as_deref(), Some("https://prod:6443"));
        assert_eq!(cluster_of(&kc, "staging").server.as_deref(), Some("https://staging:6443"));
    }

    #[test]
    fn test_context_and_cluster_override_on_loaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_kubeconfig(
            dir.path(),
            "config",
            r#"
apiVersion: v1
kind: Config
current-context: a
clusters:
- name: a
  cluster:
    server: https://a:6443
- name: b
  cluster:
    server: https://b:6443
contexts:
- name: a
  context:
    cluster: a
    user: u
- name: other
  context:
    cluster: a
    user: u
users:
- name: u
  user: {}
"#,
        );

        let settings = KubeSettings {
            config_paths: vec![path],
            config_context: "other".to_string(),
            config_context_cluster: "b".to_string(),
            host: "https://b-override:6443".to_string(),
            ..Default::default()
        };
        let (kc, context) = assemble_kubeconfig(&settings, "ns").unwrap();

        assert_eq!(context, "other");
        let ctx = kc
            .contexts
            .iter()
            .find(|c| c.name == "other")
            .and_then(|c| c.context.as_ref())
            .unwrap();
        assert_eq!(ctx.cluster, "b");
        assert_eq!(cluster_of(&kc, "b").server.as_deref(), Some("https://b-override:6443"));
        assert_eq!(cluster_of(&kc, "a").server.as_deref(), Some("https://a:6443"));
    }

    #[test]
    fn test_unknown_context_in_loaded_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_kubeconfig(
            dir.path(),
            "config",
            "apiVersion: v1\nkind: Config\nclusters: []\ncontexts: []\nusers: []\n",
        );
        let settings = KubeSettings {
            config_paths: vec![path],
            config_context: "missing".to_string(),
            ..Default::default()
        };
        let err = assemble_kubeconfig(&settings, "").unwrap_err();
        assert!(err.to_string().contains("context \"missing\" not found"));
    }

    #[test]
    fn test_unreadable_kubeconfig_is_connection_error() {
        let settings = KubeSettings {
            config_paths: vec!["/nonexistent/kubeconfig".to_string()],
            ..Default::default()
        };
        let err = assemble_kubeconfig(&settings, "").unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = KubeSettings {
            password: "hunter2".to_string(),
            token: "sekrit".to_string(),
            ..Default::default()
        };
        let out = format!("{settings:?}");
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("sekrit"));
        assert!(out.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_builder_sets_default_namespace() {
        init_crypto();
        let settings = KubeSettings {
            host: "http://127.0.0.1:6443".to_string(),
            ..Default::default()
        };

        let builder = KubeClientBuilder::new();
        let config = builder.config(&settings, "releases").await.unwrap();
        assert_eq!(config.default_namespace, "releases");
        assert_eq!(config.cluster_url.host(), Some("127.0.0.1"));
        assert_eq!(config.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));

        let client = builder.build(&settings, "releases").await.unwrap();
        assert_eq!(client.default_namespace(), "releases");
    }
}
