//! Configuration schema definitions.
//!
//! Maps to the runner configuration YAML file. Every section has
//! sensible defaults so a missing config file yields a working setup.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runner settings.
    pub runner: RunnerConfig,

    /// Container engine settings.
    pub container: ContainerConfig,

    /// On-disk layout.
    pub storage: StorageConfig,

    /// Action resolution settings.
    pub actions: ActionsConfig,

    /// Logging settings.
    pub logging: LoggingConfig,

    /// Environment overlay exported to every step. Values of the form
    /// `${VAR}` are expanded against the host environment at read time.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            runner: RunnerConfig::default(),
            container: ContainerConfig::default(),
            storage: StorageConfig::for_data_dir(&data_dir),
            actions: ActionsConfig::default(),
            logging: LoggingConfig::default(),
            env: HashMap::new(),
        }
    }
}

impl Config {
    /// The expanded environment overlay.
    ///
    /// A value that is exactly `${VAR}` is replaced by the host
    /// environment's `VAR`; if `VAR` is unset the value is kept verbatim.
    /// The process environment is never mutated.
    pub fn environment(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(key, value)| (key.clone(), expand_host_var(value)))
            .collect()
    }
}

/// Expand a whole-value `${VAR}` reference against the host environment.
fn expand_host_var(value: &str) -> String {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .and_then(|name| std::env::var(name).ok())
        .unwrap_or_else(|| value.to_string())
}

/// Runner-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Working directory for workflow execution.
    pub work_dir: PathBuf,

    /// Maximum number of concurrently running jobs.
    pub max_concurrent_jobs: usize,

    /// Default job timeout in seconds. Parsed, not enforced.
    pub timeout: u64,

    /// Runner labels for job matching.
    pub labels: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vermont-runner"),
            max_concurrent_jobs: 2,
            timeout: 3600,
            labels: vec!["self-hosted".to_string(), "vermont".to_string()],
        }
    }
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Command name of the container engine CLI.
    pub runtime: String,

    /// Image used when no runner label matches.
    pub default_image: String,

    /// Network mode passed to `run`. Actions that reach out to the
    /// network need host networking.
    pub network_mode: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            default_image: "ubuntu:22.04".to_string(),
            network_mode: "host".to_string(),
        }
    }
}

/// On-disk layout settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for persistent data.
    pub data_dir: PathBuf,

    /// Directory for cached actions.
    pub cache_dir: PathBuf,

    /// Directory for execution logs.
    pub logs_dir: PathBuf,
}

impl StorageConfig {
    /// Derive the standard layout under a data directory.
    pub fn for_data_dir(data_dir: &std::path::Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            cache_dir: data_dir.join("cache"),
            logs_dir: data_dir.join("logs"),
        }
    }
}

/// Action resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Base URL actions are fetched from.
    pub registry: String,

    /// Whether resolved actions are kept on disk between runs.
    pub cache_enabled: bool,

    /// Cache time-to-live in hours (0 = no expiration).
    pub cache_ttl_hours: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            registry: "https://github.com".to_string(),
            cache_enabled: true,
            cache_ttl_hours: 24,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: debug, info, warn, error.
    pub level: String,

    /// Log format: console or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "console".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".vermont")
}
