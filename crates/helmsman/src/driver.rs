//! Release storage backends

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Storage mechanism for release records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StorageDriver {
    /// Process memory, lost on exit
    Memory,
    /// Kubernetes ConfigMaps in the release namespace
    ConfigMap,
    /// Kubernetes Secrets in the release namespace
    #[default]
    Secret,
    /// Relational store addressed by a connection string
    Sql,
}

impl StorageDriver {
    /// All recognized drivers
    pub const ALL: [StorageDriver; 4] = [
        StorageDriver::Memory,
        StorageDriver::ConfigMap,
        StorageDriver::Secret,
        StorageDriver::Sql,
    ];

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageDriver::Memory => "memory",
            StorageDriver::ConfigMap => "configmap",
            StorageDriver::Secret => "secret",
            StorageDriver::Sql => "sql",
        }
    }

    /// Comma separated list of canonical names, for error messages
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(StorageDriver::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for StorageDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageDriver {
    type Err = Error;

    /// Case-insensitive; plural forms are accepted and an empty name means
    /// the default (secret).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "secret" | "secrets" => Ok(StorageDriver::Secret),
            "configmap" | "configmaps" => Ok(StorageDriver::ConfigMap),
            "memory" => Ok(StorageDriver::Memory),
            "sql" => Ok(StorageDriver::Sql),
            other => Err(Error::configuration(
                "helm_driver",
                format!(
                    "invalid storage driver {other:?}, must be one of: {}",
                    StorageDriver::names()
                ),
            )),
        }
    }
}
