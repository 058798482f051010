use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ingest::EventFormat;
use crate::rollup::{Cadence, ClearMode};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Listen address, `host:port`
    #[serde(default = "default_listen_address")]
    pub address: String,
    /// Route that accepts camera events
    #[serde(default = "default_ingest_path")]
    pub path: String,
    /// Transparent response compression
    #[serde(default)]
    pub compress: bool,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ingest_path() -> String {
    "/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Associative store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// `memory://` or a `postgres://` connection URL
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Connection pool max size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Create the state table on startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
    /// Upper bound for a single store call in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
    /// Attempts per store call before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_store_url() -> String {
    "memory://".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_store_timeout() -> u64 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    100
}

/// What to do with a stored state value that no longer decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptStatePolicy {
    /// Log it, treat the camera as unseen and replace the value
    Overwrite,
    /// Fail the evaluation and leave the value in place
    Reject,
}

/// Debounce engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebounceConfig {
    /// Minimum distance between two accepted events of one camera
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,
    /// Bound on compare-and-swap retries under contention
    #[serde(default = "default_max_cas_attempts")]
    pub max_cas_attempts: u32,
    #[serde(default = "default_corrupt_policy")]
    pub on_corrupt_state: CorruptStatePolicy,
}

fn default_window_ms() -> i64 {
    20_000
}

fn default_max_cas_attempts() -> u32 {
    8
}

fn default_corrupt_policy() -> CorruptStatePolicy {
    CorruptStatePolicy::Overwrite
}

/// Request parsing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Payload format when the request does not say
    #[serde(default)]
    pub format: EventFormat,
    /// Replace client supplied `ts` of text payloads with the receipt time
    #[serde(default = "default_true")]
    pub stamp_receipt_time: bool,
}

/// Accepted event log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Append-only destination (file or named pipe)
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
    /// Create the destination if it does not exist
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    /// Records buffered between the endpoint and the writer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("tmp/event")
}

fn default_queue_capacity() -> usize {
    1024
}

/// Rollup job configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RollupConfig {
    /// Directory receiving `<YYYY-MM-DD>.json` snapshot files
    #[serde(default = "default_events_dir")]
    pub events_dir: PathBuf,
    #[serde(default)]
    pub cadence: Cadence,
    #[serde(default)]
    pub clear_mode: ClearMode,
    /// Use UTC instead of local time for schedule and file names
    #[serde(default)]
    pub utc: bool,
}

fn default_events_dir() -> PathBuf {
    PathBuf::from("tmp/events_files")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            path: default_ingest_path(),
            compress: false,
            log_level: default_log_level(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_max_connections(),
            auto_migrate: true,
            timeout_ms: default_store_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_cas_attempts: default_max_cas_attempts(),
            on_corrupt_state: default_corrupt_policy(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            format: EventFormat::default(),
            stamp_receipt_time: true,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
            create_if_missing: true,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            events_dir: default_events_dir(),
            cadence: Cadence::default(),
            clear_mode: ClearMode::default(),
            utc: false,
        }
    }
}

impl Config {
    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.debounce.window_ms < 0 {
            anyhow::bail!("debounce.window_ms must not be negative");
        }
        if self.debounce.max_cas_attempts == 0 {
            anyhow::bail!("debounce.max_cas_attempts must be at least 1");
        }
        if self.store.retry_attempts == 0 {
            anyhow::bail!("store.retry_attempts must be at least 1");
        }
        if self.archive.queue_capacity == 0 {
            anyhow::bail!("archive.queue_capacity must be at least 1");
        }
        if !self.api.path.starts_with('/') {
            anyhow::bail!("api.path must start with '/'");
        }
        if let Cadence::Every { seconds: 0 } = self.rollup.cadence {
            anyhow::bail!("rollup.cadence every.seconds must be at least 1");
        }
        Ok(())
    }
}

/// Load configuration from a file or use default
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .context(format!("Failed to read config file: {:?}", path))?;

            if path.extension().map_or(false, |ext| ext == "json") {
                serde_json::from_str(&config_str).context("Failed to parse JSON config")?
            } else if path.extension().map_or(false, |ext| ext == "toml") {
                toml::from_str(&config_str).context("Failed to parse TOML config")?
            } else {
                return Err(anyhow::anyhow!("Unsupported config file format"));
            }
        }
        None => Config::default(),
    };

    config.validate()?;
    Ok(config)
}
