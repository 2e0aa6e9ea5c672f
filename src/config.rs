//! Configuration management for Turnstream
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, TurnstreamError};
use crate::persistence::DEFAULT_BOOTSTRAP_EVENT_LIMIT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for Turnstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Orchestration engine endpoint settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Stream behavior
    #[serde(default)]
    pub stream: StreamConfig,
    /// Local session database
    #[serde(default)]
    pub storage: StorageConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Orchestration engine endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the engine API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the push-stream endpoint, relative to `base_url`
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Connection setup timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_base_url() -> String {
    "http://localhost:3001/api/agentos".to_string()
}

fn default_stream_path() -> String {
    "/chat/stream".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_path: default_stream_path(),
            request_timeout_seconds: default_request_timeout(),
            headers: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Stream behavior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Fail a stream after this many silent seconds; unset waits forever
    #[serde(default)]
    pub idle_timeout_seconds: Option<u64>,
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_seconds.map(Duration::from_secs)
    }
}

/// Local session database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; the platform data directory is used when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Most recent events loaded per session at startup
    #[serde(default = "default_bootstrap_event_limit")]
    pub bootstrap_event_limit: usize,
}

fn default_bootstrap_event_limit() -> usize {
    DEFAULT_BOOTSTRAP_EVENT_LIMIT
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            bootstrap_event_limit: default_bootstrap_event_limit(),
        }
    }
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Load configuration before the process-wide subscriber exists
    ///
    /// Warnings raised while loading (missing file, invalid environment
    /// values) are written to `writer` through a scoped subscriber, since
    /// the log level and format are themselves part of the configuration.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`]
    pub fn load_reporting<W>(path: &str, cli: &crate::cli::Cli, writer: W) -> Result<Self>
    where
        W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer)
            .finish();
        tracing::subscriber::with_default(subscriber, || Self::load(path, cli))
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TurnstreamError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| TurnstreamError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("TURNSTREAM_ENGINE_URL") {
            self.engine.base_url = url;
        }

        if let Ok(db_path) = std::env::var("TURNSTREAM_DB") {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }

        if let Ok(timeout) = std::env::var("TURNSTREAM_IDLE_TIMEOUT") {
            if let Ok(value) = timeout.parse() {
                self.stream.idle_timeout_seconds = Some(value);
            } else {
                tracing::warn!("Invalid TURNSTREAM_IDLE_TIMEOUT: {}", timeout);
            }
        }

        if let Ok(limit) = std::env::var("TURNSTREAM_EVENT_LIMIT") {
            if let Ok(value) = limit.parse() {
                self.storage.bootstrap_event_limit = value;
            } else {
                tracing::warn!("Invalid TURNSTREAM_EVENT_LIMIT: {}", limit);
            }
        }

        if let Ok(json) = std::env::var("TURNSTREAM_LOG_JSON") {
            match json.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json = true,
                "0" | "false" | "no" => self.logging.json = false,
                _ => tracing::warn!("Invalid TURNSTREAM_LOG_JSON: {}", json),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(url) = &cli.engine_url {
            self.engine.base_url = url.clone();
        }
        if let Some(db_path) = &cli.db_path {
            self.storage.db_path = Some(db_path.clone());
        }
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`TurnstreamError::Config`] naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.engine.base_url).map_err(|e| {
            TurnstreamError::Config(format!(
                "engine.base_url is not a valid URL ({}): {}",
                self.engine.base_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TurnstreamError::Config(format!(
                "engine.base_url must be http or https, got {}",
                url.scheme()
            ))
            .into());
        }

        if self.engine.stream_path.trim().is_empty() {
            return Err(
                TurnstreamError::Config("engine.stream_path cannot be empty".to_string()).into(),
            );
        }

        if self.engine.request_timeout_seconds == 0 {
            return Err(TurnstreamError::Config(
                "engine.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.stream.idle_timeout_seconds == Some(0) {
            return Err(TurnstreamError::Config(
                "stream.idle_timeout_seconds must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.storage.bootstrap_event_limit == 0 {
            return Err(TurnstreamError::Config(
                "storage.bootstrap_event_limit must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
