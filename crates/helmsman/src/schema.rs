//! Provider schema metadata
//!
//! Every configuration field is registered once with its kind and its
//! default producer. The kind decides how presence is checked (booleans are
//! presence-aware so an explicit `false` counts) and how an environment value
//! is parsed. Nothing here inspects value types at runtime.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::env::EnvSource;
use crate::{Error, Result};

/// Key prefix of the single-element `kubernetes` block
pub const KUBERNETES_PREFIX: &str = "kubernetes.0.";

/// Key prefix of the single-element `experiments` block
pub const EXPERIMENTS_PREFIX: &str = "experiments.0.";

/// Value kind of a configuration field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// `true` / `false`; an explicit `false` is a set value
    Bool,
    /// Free-form string
    String,
    /// List of strings
    List,
    /// Nested block
    Map,
}

/// Registered metadata for one configuration field
#[derive(Clone, Debug)]
pub struct FieldSchema {
    /// Full dotted key
    pub key: &'static str,
    /// Value kind
    pub kind: FieldKind,
    /// Environment variables consulted for the default, first match wins
    pub env: &'static [&'static str],
    /// Default when no environment variable is set
    pub fallback: fn() -> Option<Value>,
    /// Field lives inside a list-typed block whose nested defaults the
    /// declarative layer never applies; the resolver invokes the producer
    /// itself when the field is absent.
    pub list_block_default: bool,
    /// Human readable description
    pub description: &'static str,
}

impl FieldSchema {
    /// Produce the default value for this field
    ///
    /// Environment values are parsed according to the field kind; a variable
    /// set to the empty string counts as unset. `Ok(None)` means the field has
    /// no default.
    pub fn default_value(&self, env: &dyn EnvSource) -> Result<Option<Value>> {
        for var in self.env {
            if let Some(raw) = env.var(var).filter(|v| !v.is_empty()) {
                return self.parse_env(var, &raw).map(Some);
            }
        }
        Ok((self.fallback)())
    }

    fn parse_env(&self, var: &str, raw: &str) -> Result<Value> {
        match self.kind {
            FieldKind::Bool => parse_bool(raw).map(Value::Bool).ok_or_else(|| {
                Error::configuration(
                    self.key,
                    format!("{var}={raw:?} is not a valid boolean"),
                )
            }),
            FieldKind::String => Ok(Value::String(raw.to_string())),
            FieldKind::List => Ok(Value::Array(
                std::env::split_paths(raw)
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| Value::String(p.to_string_lossy().into_owned()))
                    .collect(),
            )),
            FieldKind::Map => serde_json::from_str(raw).map_err(|e| {
                Error::configuration(self.key, format!("{var} is not valid JSON: {e}"))
            }),
        }
    }

    /// Whether a produced default counts as the field being present
    ///
    /// A non-empty string, `true`, or a non-empty list is present.
    pub fn default_is_present(&self, value: &Value) -> bool {
        match (self.kind, value) {
            (FieldKind::Bool, Value::Bool(b)) => *b,
            (FieldKind::String, Value::String(s)) => !s.is_empty(),
            (FieldKind::List, Value::Array(items)) => !items.is_empty(),
            _ => false,
        }
    }
}

/// Parse a boolean the way provider environment defaults are written
///
/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Registry of field metadata keyed by full dotted key
#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: BTreeMap<&'static str, FieldSchema>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field, replacing any previous registration for its key
    pub fn register(mut self, field: FieldSchema) -> Self {
        self.fields.insert(field.key, field);
        self
    }

    /// Look up a field
    pub fn field(&self, key: &str) -> Option<&FieldSchema> {
        self.fields.get(key)
    }

    /// Kind of a field, if registered
    pub fn kind(&self, key: &str) -> Option<FieldKind> {
        self.field(key).map(|f| f.kind)
    }

    /// All registered fields, ordered by key
    pub fn fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.values()
    }

    /// The provider schema
    pub fn provider() -> Self {
        let mut schema = Schema::new()
            .register(field(
                "debug",
                FieldKind::Bool,
                &["HELM_DEBUG"],
                || Some(Value::Bool(false)),
                "Whether Helm runs in debug mode",
            ))
            .register(field(
                "plugins_path",
                FieldKind::String,
                &["HELM_PLUGINS"],
                || helm_path(dirs::data_dir(), "plugins"),
                "Path to the Helm plugins directory",
            ))
            .register(field(
                "registry_config_path",
                FieldKind::String,
                &["HELM_REGISTRY_CONFIG"],
                || helm_path(dirs::config_dir(), "registry.json"),
                "Path to the registry config file",
            ))
            .register(field(
                "repository_config_path",
                FieldKind::String,
                &["HELM_REPOSITORY_CONFIG"],
                || helm_path(dirs::config_dir(), "repositories.yaml"),
                "Path to the file containing repository names and URLs",
            ))
            .register(field(
                "repository_cache",
                FieldKind::String,
                &["HELM_REPOSITORY_CACHE"],
                || helm_path(dirs::cache_dir(), "repository"),
                "Path to the directory containing cached repository indexes",
            ))
            .register(field(
                "helm_driver",
                FieldKind::String,
                &["HELM_DRIVER"],
                || Some(Value::String("secret".to_string())),
                "Release storage backend: configmap, secret, memory, sql",
            ))
            .register(field(
                "experiments.0.manifest",
                FieldKind::Bool,
                &["TF_X_HELM_MANIFEST"],
                || Some(Value::Bool(false)),
                "Store the rendered manifest to enable a full diff",
            ));

        for f in kubernetes_fields() {
            schema = schema.register(f);
        }
        schema
    }
}

fn field(
    key: &'static str,
    kind: FieldKind,
    env: &'static [&'static str],
    fallback: fn() -> Option<Value>,
    description: &'static str,
) -> FieldSchema {
    FieldSchema {
        key,
        kind,
        env,
        fallback,
        list_block_default: false,
        description,
    }
}

fn kube_field(
    key: &'static str,
    kind: FieldKind,
    env: &'static [&'static str],
    description: &'static str,
) -> FieldSchema {
    let fallback: fn() -> Option<Value> = match kind {
        FieldKind::Bool => || Some(Value::Bool(false)),
        FieldKind::String => || Some(Value::String(String::new())),
        FieldKind::List | FieldKind::Map => || None,
    };
    FieldSchema {
        key,
        kind,
        env,
        fallback,
        list_block_default: true,
        description,
    }
}

fn kubernetes_fields() -> Vec<FieldSchema> {
    vec![
        kube_field(
            "kubernetes.0.host",
            FieldKind::String,
            &["KUBE_HOST"],
            "Hostname (in form of URI) of the Kubernetes API server",
        ),
        kube_field(
            "kubernetes.0.username",
            FieldKind::String,
            &["KUBE_USER"],
            "Username for HTTP basic authentication",
        ),
        kube_field(
            "kubernetes.0.password",
            FieldKind::String,
            &["KUBE_PASSWORD"],
            "Password for HTTP basic authentication",
        ),
        kube_field(
            "kubernetes.0.insecure",
            FieldKind::Bool,
            &["KUBE_INSECURE"],
            "Skip TLS certificate verification",
        ),
        kube_field(
            "kubernetes.0.client_certificate",
            FieldKind::String,
            &["KUBE_CLIENT_CERT_DATA"],
            "PEM-encoded client certificate for TLS authentication",
        ),
        kube_field(
            "kubernetes.0.client_key",
            FieldKind::String,
            &["KUBE_CLIENT_KEY_DATA"],
            "PEM-encoded client certificate key for TLS authentication",
        ),
        kube_field(
            "kubernetes.0.cluster_ca_certificate",
            FieldKind::String,
            &["KUBE_CLUSTER_CA_CERT_DATA"],
            "PEM-encoded root certificates bundle",
        ),
        kube_field(
            "kubernetes.0.config_paths",
            FieldKind::List,
            &["KUBE_CONFIG_PATHS"],
            "Paths to kubeconfig files",
        ),
        kube_field(
            "kubernetes.0.config_path",
            FieldKind::String,
            &["KUBE_CONFIG_PATH"],
            "Path to the kubeconfig file",
        ),
        kube_field(
            "kubernetes.0.config_context",
            FieldKind::String,
            &["KUBE_CTX"],
            "Kubeconfig context to use",
        ),
        kube_field(
            "kubernetes.0.config_context_auth_info",
            FieldKind::String,
            &["KUBE_CTX_AUTH_INFO"],
            "Kubeconfig user to bind to the context",
        ),
        kube_field(
            "kubernetes.0.config_context_cluster",
            FieldKind::String,
            &["KUBE_CTX_CLUSTER"],
            "Kubeconfig cluster to bind to the context",
        ),
        kube_field(
            "kubernetes.0.token",
            FieldKind::String,
            &["KUBE_TOKEN"],
            "Service account token",
        ),
        kube_field(
            "kubernetes.0.proxy_url",
            FieldKind::String,
            &["KUBE_PROXY_URL"],
            "Proxy URL for all API requests",
        ),
        kube_field(
            "kubernetes.0.exec",
            FieldKind::Map,
            &[],
            "Exec credential plugin",
        ),
    ]
}

fn helm_path(base: Option<PathBuf>, rel: &str) -> Option<Value> {
    base.map(|dir| Value::String(dir.join("helm").join(rel).to_string_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StaticEnv;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("1", Some(true))]
    #[case("True", Some(true))]
    #[case("f", Some(false))]
    #[case("FALSE", Some(false))]
    #[case("yes", None)]
    fn test_parse_bool(#[case] raw: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_bool(raw), expected);
    }

    #[test]
    fn test_provider_schema_kinds() {
        let schema = Schema::provider();
        assert_eq!(schema.kind("debug"), Some(FieldKind::Bool));
        assert_eq!(schema.kind("helm_driver"), Some(FieldKind::String));
        assert_eq!(schema.kind("kubernetes.0.insecure"), Some(FieldKind::Bool));
        assert_eq!(schema.kind("kubernetes.0.config_paths"), Some(FieldKind::List));
        assert_eq!(schema.kind("nonexistent"), None);
    }

    #[test]
    fn test_only_kubernetes_block_uses_list_default_fallback() {
        let schema = Schema::provider();
        for f in schema.fields() {
            assert_eq!(
                f.list_block_default,
                f.key.starts_with(KUBERNETES_PREFIX),
                "unexpected fallback flag on {}",
                f.key
            );
        }
    }

    #[test]
    fn test_env_default_wins_over_fallback() {
        let schema = Schema::provider();
        let env = StaticEnv::new().with("HELM_DRIVER", "configmap");
        let driver = schema.field("helm_driver").unwrap();
        assert_eq!(driver.default_value(&env).unwrap(), Some(json!("configmap")));
        assert_eq!(
            driver.default_value(&StaticEnv::new()).unwrap(),
            Some(json!("secret"))
        );
    }

    #[rstest]
    #[case("helm_driver", "HELM_DRIVER", Some(json!("secret")))]
    #[case("debug", "HELM_DEBUG", Some(json!(false)))]
    #[case("kubernetes.0.insecure", "KUBE_INSECURE", Some(json!(false)))]
    #[case("experiments.0.manifest", "TF_X_HELM_MANIFEST", Some(json!(false)))]
    fn test_empty_env_value_counts_as_unset(
        #[case] key: &str,
        #[case] var: &str,
        #[case] expected: Option<Value>,
    ) {
        let schema = Schema::provider();
        let field = schema.field(key).unwrap();
        let env = StaticEnv::new().with(var, "");
        assert_eq!(field.default_value(&env).unwrap(), expected);
    }

    #[test]
    fn test_registry_config_falls_back_to_helm_registry_json() {
        let schema = Schema::provider();
        let path = schema
            .field("registry_config_path")
            .unwrap()
            .default_value(&StaticEnv::new())
            .unwrap();
        if let Some(Value::String(path)) = path {
            assert!(path.ends_with(&format!("helm{}registry.json", std::path::MAIN_SEPARATOR)));
        }
    }

    #[test]
    fn test_bool_env_default_is_parsed() {
        let schema = Schema::provider();
        let insecure = schema.field("kubernetes.0.insecure").unwrap();
        let env = StaticEnv::new().with("KUBE_INSECURE", "true");
        assert_eq!(insecure.default_value(&env).unwrap(), Some(json!(true)));
    }

    #[test]
    fn test_invalid_bool_env_default_is_configuration_error() {
        let schema = Schema::provider();
        let manifest = schema.field("experiments.0.manifest").unwrap();
        let env = StaticEnv::new().with("TF_X_HELM_MANIFEST", "sometimes");
        let err = manifest.default_value(&env).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("TF_X_HELM_MANIFEST"));
    }

    #[test]
    fn test_list_env_default_splits_paths() {
        let schema = Schema::provider();
        let paths = schema.field("kubernetes.0.config_paths").unwrap();
        let joined = std::env::join_paths(["/etc/kube/a", "/etc/kube/b"]).unwrap();
        let env = StaticEnv::new().with("KUBE_CONFIG_PATHS", joined.to_string_lossy());
        assert_eq!(
            paths.default_value(&env).unwrap(),
            Some(json!(["/etc/kube/a", "/etc/kube/b"]))
        );
    }

    #[test]
    fn test_default_presence_rules() {
        let schema = Schema::provider();
        let host = schema.field("kubernetes.0.host").unwrap();
        let insecure = schema.field("kubernetes.0.insecure").unwrap();

        assert!(host.default_is_present(&json!("https://k8s")));
        assert!(!host.default_is_present(&json!("")));
        assert!(insecure.default_is_present(&json!(true)));
        assert!(!insecure.default_is_present(&json!(false)));
    }
}
