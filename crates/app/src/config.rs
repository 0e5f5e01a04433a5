//! Application configuration
//!
//! Read from `config.toml` (in the data directory, or wherever `POKER_CONFIG`
//! points), then overridden by `POKER_*` environment variables. Every field
//! has a default, so a missing file is not an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use poker_net::{ClientOptions, DEFAULT_PORT};
use serde::Deserialize;

use crate::controller::ControllerOptions;

const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the identity database lives; platform data dir if unset
    pub data_dir: Option<PathBuf>,
    /// `poker://<ip>:<port>/<token>`; the in-process store is used if unset
    pub server_url: Option<String>,
    pub startup_timeout_ms: u64,
    pub auto_reveal_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Port for `serve`
    pub listen_port: u16,
    /// Token for `serve`; random if unset
    pub server_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            server_url: None,
            startup_timeout_ms: 2000,
            auto_reveal_delay_ms: 500,
            connect_timeout_ms: 3000,
            listen_port: DEFAULT_PORT,
            server_token: None,
        }
    }
}

impl Config {
    /// Load from disk and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var_os("POKER_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => default_data_dir()?.join(CONFIG_FILE),
        };
        Self::load_from(&path)?.with_overrides(|key| std::env::var(key).ok())
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => {
                tracing::debug!(path = %path.display(), "Loaded config file");
                Self::from_toml(&raw)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `POKER_*` overrides; `lookup` returns the variable's value if set
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("POKER_SERVER_URL") {
            self.server_url = Some(v).filter(|v| !v.trim().is_empty());
        }
        if let Some(v) = lookup("POKER_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("POKER_LISTEN_PORT") {
            self.listen_port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "POKER_LISTEN_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("POKER_SERVER_TOKEN") {
            self.server_token = Some(v);
        }
        Ok(self)
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            auto_reveal_delay: Duration::from_millis(self.auto_reveal_delay_ms),
        }
    }

    pub fn client_options(&self, client_id: impl Into<String>) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..ClientOptions::new(client_id)
        }
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("dev", "poker", "planning-poker")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}
