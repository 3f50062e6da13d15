//! Override resolution
//!
//! [`OverridableConfig`] merges the provider-level source with the source of
//! a single operation. The override wins whenever it reports the key as
//! present; otherwise the provider value is used. Boolean fields are checked
//! with the presence-aware accessor so an explicit `false` overrides a `true`
//! provider value.
//!
//! Fields inside the `kubernetes` block need one more step: that block is a
//! single-element list, and the declarative layer never runs default
//! producers for fields nested in a list. [`OverridableConfig::kubernetes`]
//! runs the producer itself for fields registered with `list_block_default`.

use serde_json::Value;

use crate::env::EnvSource;
use crate::schema::{FieldKind, Schema, KUBERNETES_PREFIX};
use crate::source::ConfigSource;
use crate::Result;

/// Effective configuration for one operation
///
/// Borrowing view; nothing is copied or materialized. Resolving the same key
/// twice with the same inputs returns the same value.
#[derive(Clone, Copy)]
pub struct OverridableConfig<'a> {
    base: &'a dyn ConfigSource,
    overrides: &'a dyn ConfigSource,
    schema: &'a Schema,
}

impl<'a> OverridableConfig<'a> {
    /// Create a view over a provider source and an operation override source
    pub fn new(
        base: &'a dyn ConfigSource,
        overrides: &'a dyn ConfigSource,
        schema: &'a Schema,
    ) -> Self {
        Self {
            base,
            overrides,
            schema,
        }
    }

    /// The schema used to classify fields
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Resolve `key`: the override's value if it declares the key present,
    /// else the provider's value
    pub fn resolve(&self, key: &str) -> Value {
        match self.override_value(key) {
            Some(v) => v,
            None => self.base.get(key),
        }
    }

    fn override_value(&self, key: &str) -> Option<Value> {
        match self.schema.kind(key) {
            Some(FieldKind::Bool) => self.overrides.get_set(key),
            _ => self.overrides.get_present(key),
        }
    }

    /// Resolve a field of the `kubernetes` block, applying its default
    ///
    /// `field` is the name inside the block (`host`, `insecure`, ...).
    /// Returns `Ok(None)` when the field is neither set nor defaulted to a
    /// present value. Errors come from the default producer.
    pub fn kubernetes(&self, field: &str, env: &dyn EnvSource) -> Result<Option<Value>> {
        let key = format!("{KUBERNETES_PREFIX}{field}");
        let schema = self.schema.field(&key);

        let found = match schema.map(|s| s.kind) {
            Some(FieldKind::Bool) => self.get_set(&key),
            _ => self.get_present(&key),
        };
        if found.is_some() {
            return Ok(found);
        }

        match schema {
            Some(s) if s.list_block_default => match s.default_value(env)? {
                Some(v) if s.default_is_present(&v) => Ok(Some(v)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// String field of the `kubernetes` block, empty when absent
    pub fn kubernetes_str(&self, field: &str, env: &dyn EnvSource) -> Result<String> {
        Ok(self
            .kubernetes(field, env)?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    /// Boolean field of the `kubernetes` block, `false` when absent
    pub fn kubernetes_bool(&self, field: &str, env: &dyn EnvSource) -> Result<bool> {
        Ok(self
            .kubernetes(field, env)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

impl ConfigSource for OverridableConfig<'_> {
    fn get_set(&self, key: &str) -> Option<Value> {
        self.overrides
            .get_set(key)
            .or_else(|| self.base.get_set(key))
    }

    fn get_present(&self, key: &str) -> Option<Value> {
        self.overrides
            .get_present(key)
            .or_else(|| self.base.get_present(key))
    }

    fn get(&self, key: &str) -> Value {
        self.resolve(key)
    }
}
