use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the ddhouse relay.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Ingest listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Time-series sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Mapping behavior.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Event log configuration.
    #[serde(default)]
    pub events: EventsConfig,
}

/// Ingest listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address. Default: ":8080".
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Required `api_key` query value. Empty disables the check.
    #[serde(default)]
    pub api_key: String,

    /// Largest accepted submission in bytes, before and after decompression.
    /// Larger ones get the failed acknowledgment. Default: 64 MiB.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

/// Time-series sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Base URL of the sink HTTP API. Default: "http://localhost:8086".
    #[serde(default = "default_sink_url")]
    pub url: String,

    /// Target database. Default: "datadog".
    #[serde(default = "default_database")]
    pub database: String,

    /// Sink username. Empty sends no credentials. Default: "root".
    #[serde(default = "default_credential")]
    pub username: String,

    /// Sink password. Default: "root".
    #[serde(default = "default_credential")]
    pub password: String,

    /// Enable HTTP keep-alive connections. Default: true.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// Create the database on startup when missing. Default: true.
    #[serde(default = "default_true")]
    pub bootstrap: bool,
}

/// Mapping behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
    /// Minimum cpu or memory share for a process bucket to be reported. Default: 0.1.
    #[serde(default = "default_process_threshold")]
    pub process_threshold: f64,
}

/// Event log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Append-only NDJSON log. Default: "events.log".
    #[serde(default = "default_events_path")]
    pub path: PathBuf,

    /// Events buffered before submissions wait for the writer. Default: 16.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_addr() -> String {
    ":8080".to_string()
}

fn default_max_body_size() -> usize {
    64 * 1024 * 1024
}

fn default_sink_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_database() -> String {
    "datadog".to_string()
}

fn default_credential() -> String {
    "root".to_string()
}

fn default_true() -> bool {
    true
}

fn default_process_threshold() -> f64 {
    crate::normalize::DEFAULT_PROCESS_THRESHOLD
}

fn default_events_path() -> PathBuf {
    PathBuf::from("events.log")
}

fn default_queue_size() -> usize {
    16
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            sink: SinkConfig::default(),
            mapping: MappingConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            api_key: String::new(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            database: default_database(),
            username: default_credential(),
            password: default_credential(),
            keep_alive: true,
            bootstrap: true,
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            process_threshold: default_process_threshold(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            path: default_events_path(),
            queue_size: default_queue_size(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.addr.is_empty() {
            bail!("server.addr is required");
        }

        if self.server.max_body_size == 0 {
            bail!("server.max_body_size must be positive");
        }

        if self.sink.url.is_empty() {
            bail!("sink.url is required");
        }

        if !self.sink.url.starts_with("http://") && !self.sink.url.starts_with("https://") {
            bail!("sink.url must be an http(s) URL, got {:?}", self.sink.url);
        }

        if self.sink.database.is_empty() {
            bail!("sink.database is required");
        }

        if self.sink.database.contains('/') {
            bail!("sink.database must not contain '/'");
        }

        let threshold = self.mapping.process_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            bail!("mapping.process_threshold must be a non-negative number, got {threshold}");
        }

        if self.events.queue_size == 0 {
            bail!("events.queue_size must be positive");
        }

        if self.events.path.as_os_str().is_empty() {
            bail!("events.path is required");
        }

        Ok(())
    }
}
