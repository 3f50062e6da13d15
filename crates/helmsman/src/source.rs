//! Configuration sources
//!
//! A configuration source answers lookups by dotted key. Keys walk nested
//! objects by name and lists by index, so `kubernetes.0.host` reads the
//! `host` field of the first (and only) element of the `kubernetes` block.
//!
//! Three accessors exist because "absent" is ambiguous:
//! - [`ConfigSource::get_set`] reports a value the caller wrote, zero values included
//! - [`ConfigSource::get_present`] additionally drops zero values (`false`, `""`, `[]`)
//! - [`ConfigSource::get`] never fails and yields `Null` when nothing is set

use serde_json::Value;

/// Read-only view over a configuration tree
pub trait ConfigSource: Send + Sync {
    /// Value explicitly set at `key`, including zero values
    fn get_set(&self, key: &str) -> Option<Value>;

    /// Value at `key` if it is set and not the zero value of its type
    fn get_present(&self, key: &str) -> Option<Value> {
        self.get_set(key).filter(|v| !is_zero(v))
    }

    /// Value at `key`, or `Null` when unset
    fn get(&self, key: &str) -> Value {
        self.get_set(key).unwrap_or(Value::Null)
    }
}

/// Whether a value is the zero value of its type
///
/// Null, `false`, `0`, the empty string and empty collections are zero.
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Configuration data backed by a JSON tree
///
/// Used both for the provider-level block and for per-operation overrides.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigData {
    root: Value,
}

impl ConfigData {
    /// Wrap a JSON value; non-object roots behave as empty data
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Empty data, every lookup misses
    pub fn empty() -> Self {
        Self {
            root: Value::Object(Default::default()),
        }
    }

    /// Parse YAML (or JSON, which is a YAML subset) into configuration data
    pub fn from_yaml(input: &str) -> Result<Self, serde_yaml::Error> {
        let root: Value = serde_yaml::from_str(input)?;
        Ok(Self::new(root))
    }

    /// The underlying tree
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in key.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl From<Value> for ConfigData {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}

impl ConfigSource for ConfigData {
    fn get_set(&self, key: &str) -> Option<Value> {
        match self.lookup(key)? {
            Value::Null => None,
            v => Some(v.clone()),
        }
    }
}

/// Read a string, treating non-strings and absence as empty
pub fn as_str(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

/// Read a list of strings; nulls inside the list become empty strings
pub fn as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().unwrap_or_default().to_string())
            .collect(),
        _ => Vec::new(),
    }
}
