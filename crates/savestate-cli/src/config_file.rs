//! Persistent sync configuration file.

use std::path::{Path, PathBuf};

use savestate_core::{parse_sync_config, SyncConfig};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "sync-config.json";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("savestate")
        .join(CONFIG_FILE_NAME)
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| std::env::var_os("SAVESTATE_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

/// Load the config at `path`; a missing file yields the defaults.
///
/// `SAVESTATE_*` duration overrides are applied on top.
pub fn load_config(path: &Path) -> Result<SyncConfig, CliError> {
    let config = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!(
                "Failed to read config at {}: {error}",
                path.display()
            ))
        })?;
        parse_sync_config(&raw).map_err(|error| {
            CliError::Config(format!("{} ({})", error, path.display()))
        })?
    } else {
        SyncConfig::default()
    };
    Ok(config.with_env_overrides())
}

pub fn save_config(config: &SyncConfig, path: &Path) -> Result<(), CliError> {
    config.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            CliError::Config(format!(
                "Failed to create config directory {}: {error}",
                parent.display()
            ))
        })?;
    }

    let serialized = serde_json::to_string_pretty(config)?;
    std::fs::write(path, serialized).map_err(|error| {
        CliError::Config(format!(
            "Failed to write config at {}: {error}",
            path.display()
        ))
    })
}
