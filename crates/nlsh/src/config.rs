//! Session configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variables shown to the model when no selection is configured.
pub const DEFAULT_ENV_KEYS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "LANG",
    "TERM",
    "EDITOR",
    "VIRTUAL_ENV",
    "CONDA_DEFAULT_ENV",
];

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file location.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config file location.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Which environment variables go into the model context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSelection {
    /// Only these keys, in this order.
    Subset(Vec<String>),
    /// Every variable. Secret-looking values are still masked.
    All,
}

impl Default for EnvSelection {
    fn default() -> Self {
        EnvSelection::Subset(DEFAULT_ENV_KEYS.iter().map(|k| k.to_string()).collect())
    }
}

/// Tunables for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How many recent events the context includes
    pub history_limit: usize,
    /// Character budget for the rendered history block
    pub history_char_budget: usize,
    /// Environment variables included in the context
    pub environment: EnvSelection,
    /// Maximum directory entries listed in the context
    pub filesystem_limit: usize,
    /// Maximum commands taken from one command-mode reply
    pub max_commands: usize,
    /// Maximum tool round trips in one model turn
    pub max_tool_rounds: usize,
    /// Extra regular expressions that always require confirmation
    pub extra_risk_patterns: Vec<String>,
    /// Stream command output while it runs
    pub live_output: bool,
    /// Timeout for helper processes run by tools (git, version probes)
    #[serde(with = "duration_ms")]
    pub tool_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            history_char_budget: 4000,
            environment: EnvSelection::default(),
            filesystem_limit: 50,
            max_commands: 5,
            max_tool_rounds: 8,
            extra_risk_patterns: Vec::new(),
            live_output: false,
            tool_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Default history database location, `~/.nlsh/history.db`.
pub fn default_history_path() -> PathBuf {
    nlsh_dir().join("history.db")
}

/// Default config file location, `~/.nlsh/config.json`.
pub fn default_config_path() -> PathBuf {
    nlsh_dir().join("config.json")
}

fn nlsh_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nlsh")
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
