//! Configuration file support.
//!
//! Every field is optional in the file; missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{LogLevel, ProgressFlags};
use crate::progress::PresenterKind;
use crate::supervisor::{SupervisorOptions, DEFAULT_LOG_DIR};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Value passed to the transcoder's `-loglevel`.
    pub loglevel: LogLevel,

    pub presenter: PresenterKind,

    /// Directory for default per-input log files.
    pub log_dir: PathBuf,

    /// Program used to probe input duration.
    pub ffprobe: String,

    /// Progress update period requested from the transcoder.
    #[serde(with = "humantime_serde")]
    pub stats_period: Duration,

    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub termination_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let options = SupervisorOptions::default();
        Self {
            loglevel: LogLevel::default(),
            presenter: PresenterKind::default(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            ffprobe: "ffprobe".to_string(),
            stats_period: ProgressFlags::default().stats_period,
            poll_interval: options.poll_interval,
            termination_timeout: options.termination_timeout,
            drain_timeout: options.drain_timeout,
        }
    }
}

impl Config {
    /// Load from `path` if given, else from the per-user config file if it
    /// exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn progress_flags(&self) -> ProgressFlags {
        ProgressFlags {
            loglevel: self.loglevel,
            stats_period: self.stats_period,
        }
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            poll_interval: self.poll_interval,
            termination_timeout: self.termination_timeout,
            drain_timeout: self.drain_timeout,
            presenter: self.presenter,
        }
    }
}

/// `<config dir>/config.toml` for the current user, if a home is known.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "ffprogress", "ffprogress")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
