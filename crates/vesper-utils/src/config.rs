//! # Configuration Files
//!
//! Locates and parses the TOML configuration file.
//!
//! The lookup order is:
//! 1. A path given explicitly (the `--config` flag)
//! 2. The `VESPER_CONFIG` environment variable
//! 3. `~/.vesper/config.toml`
//!
//! An explicitly requested file must exist. The home-directory default is
//! optional: when it is missing the caller gets `T::default()`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::debug;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "VESPER_CONFIG";

/// Where a configuration was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource
{
    /// Parsed from this file.
    File(PathBuf),
    /// No file found; built-in defaults.
    Defaults,
}

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError
{
    /// Explicit configuration file could not be read
    #[error("Cannot read config file {path}: {source}")]
    Read
    {
        /// File that failed to load
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// File contents are not valid for the requested type
    #[error("Invalid config file {path}: {message}")]
    Parse
    {
        /// File that failed to parse
        path: PathBuf,
        /// Parser diagnostic
        message: String,
    },
}

/// Default configuration path under the user's home directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf>
{
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".vesper").join("config.toml"))
}

/// Load a configuration, following the lookup order described in the module docs.
///
/// ## Errors
///
/// - `Read`: an explicitly requested file (flag or environment) is missing or unreadable
/// - `Parse`: the file is not valid TOML for `T`
pub fn load_config<T>(explicit: Option<&Path>) -> Result<(T, ConfigSource), ConfigError>
where
    T: DeserializeOwned + Default,
{
    if let Some(path) = explicit {
        return load_file(path).map(|config| (config, ConfigSource::File(path.to_path_buf())));
    }

    if let Some(path) = env::var_os(CONFIG_ENV).map(PathBuf::from) {
        return load_file(&path).map(|config| (config, ConfigSource::File(path)));
    }

    match default_config_path() {
        Some(path) if path.is_file() => load_file(&path).map(|config| (config, ConfigSource::File(path))),
        _ => {
            debug!("no configuration file found, using defaults");
            Ok((T::default(), ConfigSource::Defaults))
        }
    }
}

/// Parse one TOML file into `T`.
///
/// ## Errors
///
/// Same as [`load_config`].
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError>
{
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loading configuration");
    toml::from_str(&text).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
