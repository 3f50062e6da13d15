//! OCI registry authentication client
//!
//! Implements the distribution-spec login handshake: probe `/v2/`, and on a
//! 401 follow the `WWW-Authenticate` challenge with the supplied
//! credentials. Bearer challenges exchange the credentials for a token at the
//! advertised realm and confirm it against `/v2/`.
//!
//! Successful logins are retained by the client, and written to a registry
//! config file (`{"auths": {"<host>": {"auth": "<base64 user:pass>"}}}`) when
//! one is configured, so later pulls through the same client can
//! authenticate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{Error, Result};

/// Trait for registry login handshakes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Authenticate against `host` (`name[:port]`)
    async fn login(&self, host: &str, username: &str, password: &str) -> Result<()>;

    /// Credentials retained for `host` by an earlier successful login
    async fn credential(&self, host: &str) -> Option<RegistryCredential>;
}

/// Credentials retained after a successful login
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    /// Registry username
    pub username: String,
    /// Registry password
    pub password: String,
    /// Bearer token issued during the handshake, if any
    pub token: Option<String>,
}

impl RegistryCredential {
    /// Credential without a token
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            token: None,
        }
    }

    /// `auth` value of a registry config entry
    pub fn encoded(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.username, self.password))
    }
}

impl std::fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transport options for [`HttpRegistryClient`]
#[derive(Clone, Debug, Default)]
pub struct RegistryClientOptions {
    /// Talk plain HTTP instead of HTTPS
    pub plain_http: bool,
    /// Skip TLS certificate verification
    pub insecure_skip_tls_verify: bool,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

/// Default [`RegistryClient`] over reqwest
#[derive(Clone, Debug)]
pub struct HttpRegistryClient {
    http: reqwest::Client,
    options: RegistryClientOptions,
    credentials: Arc<RwLock<HashMap<String, RegistryCredential>>>,
    credentials_file: Option<PathBuf>,
}

/// Authentication challenge from a `WWW-Authenticate` header
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Challenge {
    /// HTTP basic authentication
    Basic,
    /// Token authentication
    Bearer {
        /// Token endpoint
        realm: String,
        /// Service name to request a token for
        service: Option<String>,
        /// Requested scope
        scope: Option<String>,
    },
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl HttpRegistryClient {
    /// Create a client with the given transport options
    pub fn new(options: RegistryClientOptions) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(options.insecure_skip_tls_verify);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| Error::configuration("registry_client", e.to_string()))?;
        Ok(Self {
            http,
            options,
            credentials: Arc::new(RwLock::new(HashMap::new())),
            credentials_file: None,
        })
    }

    /// Also write successful logins to a registry config file, and read
    /// credentials from it for hosts this client has not logged in to
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    async fn store(&self, host: &str, credential: RegistryCredential) -> Result<()> {
        if let Some(path) = &self.credentials_file {
            write_auth_entry(path, host, &credential).await.map_err(|e| {
                Error::registry_auth(
                    host,
                    format!("failed to store credentials in {}: {e}", path.display()),
                )
            })?;
            debug!(host = %host, path = %path.display(), "Stored registry credentials");
        }
        self.credentials
            .write()
            .await
            .insert(host.to_string(), credential);
        Ok(())
    }

    fn base_url(&self, host: &str) -> String {
        let scheme = if self.options.plain_http { "http" } else { "https" };
        format!("{scheme}://{host}/v2/")
    }

    async fn fetch_token(
        &self,
        host: &str,
        username: &str,
        password: &str,
        realm: &str,
        service: Option<&str>,
        scope: Option<&str>,
    ) -> Result<String> {
        let mut query = Vec::new();
        if let Some(service) = service {
            query.push(("service", service));
        }
        if let Some(scope) = scope {
            query.push(("scope", scope));
        }

        let response = self
            .http
            .get(realm)
            .query(&query)
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| Error::registry_auth(host, format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::registry_auth(
                host,
                format!("token endpoint returned {status}"),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::registry_auth(host, format!("invalid token response: {e}")))?;
        body.token
            .filter(|t| !t.is_empty())
            .or(body.access_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| Error::registry_auth(host, "token endpoint returned no token"))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn login(&self, host: &str, username: &str, password: &str) -> Result<()> {
        let base = self.base_url(host);
        debug!(host = %host, url = %base, "Probing registry");

        let probe = self
            .http
            .get(&base)
            .send()
            .await
            .map_err(|e| Error::registry_auth(host, e.to_string()))?;

        let status = probe.status();
        if status.is_success() {
            info!(host = %host, "Registry accepts anonymous access");
            return self
                .store(host, RegistryCredential::basic(username, password))
                .await;
        }
        if status != StatusCode::UNAUTHORIZED {
            return Err(Error::registry_auth(
                host,
                format!("unexpected status {status} from {base}"),
            ));
        }

        let challenge = challenge_from(probe.headers()).ok_or_else(|| {
            Error::registry_auth(host, "registry sent no usable authentication challenge")
        })?;

        let mut token = None;
        let confirm = match challenge {
            Challenge::Basic => self.http.get(&base).basic_auth(username, Some(password)),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let issued = self
                    .fetch_token(
                        host,
                        username,
                        password,
                        &realm,
                        service.as_deref(),
                        scope.as_deref(),
                    )
                    .await?;
                let request = self.http.get(&base).bearer_auth(&issued);
                token = Some(issued);
                request
            }
        };

        let response = confirm
            .send()
            .await
            .map_err(|e| Error::registry_auth(host, e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            info!(host = %host, "Logged in to registry");
            let mut credential = RegistryCredential::basic(username, password);
            credential.token = token;
            self.store(host, credential).await
        } else {
            Err(Error::registry_auth(
                host,
                format!("credentials rejected with {status}"),
            ))
        }
    }

    async fn credential(&self, host: &str) -> Option<RegistryCredential> {
        if let Some(credential) = self.credentials.read().await.get(host) {
            return Some(credential.clone());
        }
        read_auth_entry(self.credentials_file.as_deref()?, host).await
    }
}

/// Set the `auths` entry for `host`, keeping the rest of the file
async fn write_auth_entry(
    path: &Path,
    host: &str,
    credential: &RegistryCredential,
) -> std::io::Result<()> {
    let mut doc = match tokio::fs::read_to_string(path).await {
        Ok(contents) if !contents.trim().is_empty() => serde_json::from_str(&contents)?,
        Ok(_) => json!({}),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
        Err(e) => return Err(e),
    };
    if !doc.is_object() {
        doc = json!({});
    }
    if let Some(root) = doc.as_object_mut() {
        let auths = root.entry("auths").or_insert_with(|| json!({}));
        if !auths.is_object() {
            *auths = json!({});
        }
        auths[host] = json!({ "auth": credential.encoded() });
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(&doc)?).await
}

async fn read_auth_entry(path: &Path, host: &str) -> Option<RegistryCredential> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    let doc: Value = serde_json::from_str(&contents).ok()?;
    let encoded = doc.get("auths")?.get(host)?.get("auth")?.as_str()?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(RegistryCredential::basic(username, password))
}

fn challenge_from(headers: &HeaderMap) -> Option<Challenge> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(parse_challenge)
}

/// Parse a single `WWW-Authenticate` challenge
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for (name, value) in auth_params(rest) {
        match name.to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }
    Some(Challenge::Bearer {
        realm: realm.filter(|r| !r.is_empty())?,
        service,
        scope,
    })
}

/// Split `name=value` pairs, honouring quoted values containing commas
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if chars.next().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    other => value.push(other),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.push((name.trim().to_string(), value.trim().to_string()));
    }
    params
}
