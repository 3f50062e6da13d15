//! Error types for helmsman
//!
//! Errors carry enough context (configuration key, registry host, the stage
//! of connection building) to point an operator at the misconfiguration.
//! Nothing in this crate retries on its own; callers decide based on
//! [`Error::is_retryable`].

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for helmsman operations
#[derive(Debug, Error)]
pub enum Error {
    /// Building the cluster client or the action context failed
    #[error("connection error [{context}]: {message}")]
    Connection {
        /// Stage that failed (e.g., "kubeconfig", "exec", "driver")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Registry authentication handshake failed
    #[error("could not login to OCI registry {host:?}: {message}")]
    RegistryAuth {
        /// Registry host the handshake targeted
        host: String,
        /// Underlying transport or authentication failure
        message: String,
    },

    /// Provider configuration is invalid
    #[error("configuration error for {key}: {message}")]
    Configuration {
        /// Configuration key at fault
        key: String,
        /// Description of what's invalid
        message: String,
    },

    /// A registry reference could not be parsed
    #[error("invalid registry reference {reference:?}: {message}")]
    InvalidReference {
        /// The reference as supplied
        reference: String,
        /// Parse failure
        message: String,
    },
}

impl Error {
    /// Create a connection error without stage context
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            context: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a connection error for a specific stage
    pub fn connection_in(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a registry authentication error for a host
    pub fn registry_auth(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RegistryAuth {
            host: host.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error for a key
    pub fn configuration(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reference: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            message: msg.into(),
        }
    }

    /// Re-tag an error raised while building a connection.
    ///
    /// Configuration errors hit during a build block the connection, so they
    /// surface as connection errors keyed by the offending field.
    pub fn into_connection(self) -> Self {
        match self {
            Error::Configuration { key, message } => Error::Connection {
                context: key,
                message,
            },
            other => other,
        }
    }

    /// Check if this error is retryable
    ///
    /// Registry handshakes are never cached as failed, so a later call may
    /// succeed after credentials rotate or the network recovers. Everything
    /// else needs a configuration fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection { .. } => false,
            Error::RegistryAuth { .. } => true,
            Error::Configuration { .. } => false,
            Error::InvalidReference { .. } => false,
        }
    }

    /// Get the registry host if this error is associated with one
    pub fn host(&self) -> Option<&str> {
        match self {
            Error::RegistryAuth { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Connection { context, .. } => Some(context),
            Error::Configuration { key, .. } => Some(key),
            _ => None,
        }
    }
}
