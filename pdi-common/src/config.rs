//! Configuration file resolution and TOML loading
//!
//! Resolution priority for a service configuration file:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/pdi/<service>.toml`) if it exists
//! 4. None (caller falls back to compiled defaults)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable consulted when no CLI path is given
pub const CONFIG_ENV_VAR: &str = "PDI_CONFIG";

/// Where a resolved configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Environment,
    UserFile,
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CommandLine => write!(f, "command line"),
            ConfigSource::Environment => write!(f, "environment"),
            ConfigSource::UserFile => write!(f, "user config file"),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
        }
    }
}

/// Resolve the configuration file path for a service
///
/// Returns `(None, ConfigSource::Defaults)` when no file applies.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    service_name: &str,
) -> (Option<PathBuf>, ConfigSource) {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return (Some(path.to_path_buf()), ConfigSource::CommandLine);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return (Some(PathBuf::from(path)), ConfigSource::Environment);
        }
    }

    // Priority 3: Per-user config file
    if let Some(path) = user_config_path(service_name) {
        if path.exists() {
            return (Some(path), ConfigSource::UserFile);
        }
    }

    (None, ConfigSource::Defaults)
}

/// Per-user configuration path for a service (`~/.config/pdi/<service>.toml`)
pub fn user_config_path(service_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pdi").join(format!("{}.toml", service_name)))
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let value = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!(path = %path.display(), "Loaded TOML configuration");
    Ok(value)
}

/// Serialize a value as TOML and write it atomically (temp file + rename)
pub fn write_toml<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(value)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "Wrote TOML configuration");
    Ok(())
}
