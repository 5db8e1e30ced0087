use std::ffi::OsString;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Toml};
use figment::Figment;

use super::{types::Config, ConfigError};

/// Environment variable naming the config file.
pub const CONFIG_PATH_VAR: &str = "SHIPYARD_CONFIG";
/// Prefix of environment overrides; `__` separates nested keys, so
/// `SHIPYARD_AUTOPILOT__AUTO_MERGE=true` sets `autopilot.auto_merge`.
pub const ENV_PREFIX: &str = "SHIPYARD_";

const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Config file location: `$SHIPYARD_CONFIG`, else `config.toml`.
pub fn config_path() -> PathBuf {
    resolve_config_path(std::env::var_os(CONFIG_PATH_VAR))
}

fn resolve_config_path(var: Option<OsString>) -> PathBuf {
    var.filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// File first, then environment overrides on top.
fn sources(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["CONFIG"]).split("__"))
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    sources(path)
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Parse TOML without touching the environment.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
