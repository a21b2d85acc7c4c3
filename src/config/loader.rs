//! Configuration file loading.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::schema::Config;
use crate::error::{Result, VermontError};

/// Load configuration from a file, or return defaults when no path is
/// given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        None => Config::default(),
        Some(path) => load_config_file(path)?,
    };

    ensure_directories(&config)?;
    Ok(config)
}

/// Load and parse a single configuration file.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            VermontError::ConfigNotFound {
                path: path.to_path_buf(),
            }
        } else {
            VermontError::Io(e)
        }
    })?;

    let config: Config =
        serde_yaml::from_str(&content).map_err(|e| VermontError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Create the directories the engine relies on up front.
fn ensure_directories(config: &Config) -> Result<()> {
    for dir in [
        &config.storage.data_dir,
        &config.storage.cache_dir,
        &config.storage.logs_dir,
        &config.runner.work_dir,
    ] {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
