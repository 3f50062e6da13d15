//! CLI commands

use std::path::Path;

use helmsman::ConfigData;
use tracing::debug;

use crate::{Error, Result};

pub mod connect;
pub mod login;

/// Load a configuration file, or empty data when no path is given
pub fn load_config(path: Option<&Path>) -> Result<ConfigData> {
    let Some(path) = path else {
        return Ok(ConfigData::empty());
    };
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let data = ConfigData::from_yaml(&contents).map_err(|source| Error::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    if !data.as_value().is_object() && !data.as_value().is_null() {
        return Err(Error::validation(format!(
            "{} must contain a mapping at the top level",
            path.display()
        )));
    }
    debug!(path = %path.display(), "Loaded configuration");
    Ok(data)
}
