//! Server configuration.
//!
//! Defaults can be overridden by an optional JSON file, and the file by
//! command-line flags.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the server listens on.
    pub bind: String,
    /// Location of the persistence log.
    pub aof_path: PathBuf,
    /// Whether mutations are logged and replayed at all.
    pub appendonly: bool,
    /// Period of background log syncs. `None` syncs only on shutdown.
    pub flush_interval_ms: Option<u64>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0:6379".to_string(),
            aof_path: PathBuf::from("database.aof"),
            appendonly: true,
            flush_interval_ms: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads a JSON config file. Missing keys take their default values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}
