use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::{sanitize_config, Config};
use crate::error::PresenceError;

const CONFIG_DIR_NAME: &str = "richtune";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default location: `<config_dir>/richtune/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Loads the config file, creating it with defaults when absent.
///
/// Unreadable or invalid TOML falls back to defaults with a warning; only a
/// failure to create the directory or the default file is an error.
pub fn load_or_create_config(config_file: &Path) -> Result<Config, PresenceError> {
    if !config_file.exists() {
        if let Some(parent) = config_file.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                PresenceError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                ))
            })?;
        }
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        let default_config = sanitize_config(Config::default());
        let serialized = toml::to_string(&default_config)
            .map_err(|error| PresenceError::Config(format!("Failed to serialize config: {error}")))?;
        std::fs::write(config_file, serialized).map_err(|error| {
            PresenceError::Config(format!(
                "Failed to write config {}: {}",
                config_file.display(),
                error
            ))
        })?;
        return Ok(default_config);
    }

    let content = match std::fs::read_to_string(config_file) {
        Ok(content) => content,
        Err(error) => {
            warn!(
                "Failed to read config {}: {}. Using defaults",
                config_file.display(),
                error
            );
            return Ok(sanitize_config(Config::default()));
        }
    };
    let parsed = match toml::from_str::<Config>(&content) {
        Ok(config) => config,
        Err(error) => {
            warn!(
                "Invalid config {}: {}. Using defaults",
                config_file.display(),
                error
            );
            Config::default()
        }
    };
    Ok(sanitize_config(parsed))
}
