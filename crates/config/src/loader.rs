use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    error::{Error, Result},
    schema::EngageConfig,
};

/// Points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "ENGAGE_CONFIG";
pub const API_INTERNAL_ENV: &str = "ENGAGE_API_INTERNAL";
pub const API_BASE_ENV: &str = "ENGAGE_API_BASE";

const CONFIG_FILE_NAME: &str = "engage.toml";
const SESSION_FILE_NAME: &str = "session.json";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "engage")
}

/// `<platform config dir>/engage/engage.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// `<platform data dir>/engage/session.json`.
pub fn default_session_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join(SESSION_FILE_NAME))
}

/// Load configuration from `$ENGAGE_CONFIG` or the default location, then
/// apply environment overrides.
pub fn load() -> Result<EngageConfig> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .or_else(default_config_path);

    let mut config = match path {
        Some(path) => load_from(&path)?,
        None => EngageConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Read a TOML config file. A missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<EngageConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(EngageConfig::default());
        },
        Err(e) => return Err(e.into()),
    };
    toml::from_str(&raw).map_err(|source| Error::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Apply `ENGAGE_API_*` overrides. Empty values are ignored.
pub fn apply_env_overrides(config: &mut EngageConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(value) = lookup(API_INTERNAL_ENV).filter(|v| !v.trim().is_empty()) {
        config.api.internal_base = value;
    }
    if let Some(value) = lookup(API_BASE_ENV).filter(|v| !v.trim().is_empty()) {
        config.api.public_base = value;
    }
}
