use std::env::current_exe;
use std::fs;
use std::path::PathBuf;
use std::str;
use directories_next::ProjectDirs;
use log::{info, warn};
use serde_json;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\ble-joystick.exe => F:\ble-joystick.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to ble-joystick.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("nl", "ble-joystick", "ble-joystick").map(|dirs| {
        dirs.config_dir().join("ble-joystick.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            },
            Err(err) => {
                info!("No portable config at {} ({}), using local path instead", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

#[derive(Debug, Clone)]
pub struct ConfigIO {
    path: PathBuf,
}

impl ConfigIO {
    /// Uses `path` if given, otherwise the portable or per-user config file.
    pub fn new(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        Ok(ConfigIO { path })
    }

    /// A missing or empty file yields the default config.
    pub fn read(&self) -> Result<Config, ConfigError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(source) => {
                let err = ConfigError::from(source);
                if err.is_file_not_found_error() {
                    info!("Config file does not exist yet, using defaults");
                    return Ok(Config::default());
                }
                return Err(err);
            },
        };

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        info!("Saving config");

        if let Some(directory) = self.path.parent() {
            fs::create_dir_all(directory)?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}
