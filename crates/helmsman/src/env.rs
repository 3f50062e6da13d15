//! Environment access for configuration defaults
//!
//! Schema defaults and exec-plugin lookup read the process environment
//! through this trait so tests never touch global state.

use std::collections::HashMap;

/// Trait for reading environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `name`, or `None` if unset or not valid UTF-8
    fn var(&self, name: &str) -> Option<String>;
}

/// Default implementation that reads the process environment
#[derive(Clone, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed set of variables, used where the process environment must not leak in
#[derive(Clone, Debug, Default)]
pub struct StaticEnv {
    vars: HashMap<String, String>,
}

impl StaticEnv {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for StaticEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}
