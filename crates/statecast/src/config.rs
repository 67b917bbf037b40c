//! Configuration handling for statecast
//!
//! Settings come from a TOML file (every key optional) and are then
//! overridden by command-line flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::ingest::RetryPolicy;
use crate::sources::pipe::DEFAULT_MAX_FRAME;

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "statecast.toml";

/// Release metadata endpoint consulted by the version check
pub const DEFAULT_RELEASE_URL: &str =
    "https://api.github.com/repos/statecast/statecast/releases/latest";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which transport carries the producer's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Duplex byte stream (named pipe on Windows, Unix socket elsewhere)
    Pipe,
    /// Watched file, re-read on every change
    File,
}

/// statecast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to
    pub host: String,

    /// Port the HTTP server binds to
    pub port: u16,

    /// Transport kind
    pub data_source: DataSource,

    /// Pipe or socket endpoint for `data_source = "pipe"`
    pub pipe_name: String,

    /// Watched file for `data_source = "file"`
    pub file_path: PathBuf,

    /// Read buffer size in bytes
    pub buffer_size: usize,

    /// Largest accepted newline-delimited frame, in bytes
    pub max_frame_bytes: usize,

    /// Seconds of invalid input tolerated before the snapshot is cleared
    pub stream_timeout: u64,

    /// Local version compared against the latest release tag
    pub version: String,

    /// Release metadata endpoint
    pub release_url: String,

    /// Delay between reconnect attempts, in milliseconds
    pub retry_backoff_ms: u64,

    /// Give up after this many consecutive failed attempts (unset = never)
    pub max_retries: Option<u32>,

    /// Append status messages to `file_name`
    pub to_file: bool,

    /// Status message file
    pub file_name: PathBuf,

    /// Also write diagnostic logs to `debug_file`
    pub debug: bool,

    /// Log level used when RUST_LOG is unset
    pub debug_level: String,

    /// Diagnostic log file
    pub debug_file: PathBuf,
}

fn default_pipe_name() -> String {
    if cfg!(windows) {
        r"\\.\pipe\statecast".to_string()
    } else {
        std::env::temp_dir()
            .join("statecast.sock")
            .to_string_lossy()
            .into_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            data_source: DataSource::Pipe,
            pipe_name: default_pipe_name(),
            file_path: PathBuf::from("state.json"),
            buffer_size: 2048,
            max_frame_bytes: DEFAULT_MAX_FRAME,
            stream_timeout: 10,
            version: env!("CARGO_PKG_VERSION").to_string(),
            release_url: DEFAULT_RELEASE_URL.to_string(),
            retry_backoff_ms: 2000,
            max_retries: None,
            to_file: false,
            file_name: PathBuf::from("statecast-status.log"),
            debug: false,
            debug_level: "info".to_string(),
            debug_file: PathBuf::from("statecast.log"),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the effective configuration for a command line
    ///
    /// An explicit `--config` must exist; the default file is optional.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load(path)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Overlay command-line flags on top of file values
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(timeout) = cli.stream_timeout {
            self.stream_timeout = timeout;
        }
        if let Some(source) = cli.data_source {
            self.data_source = source;
        }
        if let Some(pipe_name) = &cli.pipe_name {
            self.pipe_name = pipe_name.clone();
        }
        if let Some(file_path) = &cli.file_path {
            self.file_path = file_path.clone();
        }
        if let Some(buffer_size) = cli.buffer_size {
            self.buffer_size = buffer_size;
        }
        if cli.debug {
            self.debug = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "buffer_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_frame_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.stream_timeout == 0 {
            return Err(ConfigError::Invalid {
                key: "stream_timeout",
                reason: "must be at least one second".to_string(),
            });
        }
        if !LOG_LEVELS.contains(&self.debug_level.as_str()) {
            return Err(ConfigError::Invalid {
                key: "debug_level",
                reason: format!(
                    "'{}' is not one of {}",
                    self.debug_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if self.data_source == DataSource::File && self.file_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                key: "file_path",
                reason: "required when data_source is \"file\"".to_string(),
            });
        }
        Ok(())
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(self.retry_backoff_ms),
            max_attempts: self.max_retries,
        }
    }

    /// Status file path, if status messages should be persisted
    pub fn status_file(&self) -> Option<PathBuf> {
        self.to_file.then(|| self.file_name.clone())
    }
}
