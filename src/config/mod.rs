//! # Configuration Management Module
//!
//! Central configuration for the scanpost daemon: identity of the scanner,
//! orchestrator endpoints and timing, queue placement and limits, and
//! logging. Values are loaded once at startup, validated, and treated as
//! immutable for the process lifetime.
//!
//! ## Configuration Structure
//!
//! - [`ScannerConfig`] - device/team identity and the scan channel bound
//! - [`OrchestratorConfig`] - remote base URL, timeouts, poll intervals
//! - [`QueueConfig`] - durable queue directory, capacity, batching, lock waits
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scanpost::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Device: {}", config.scanner.device_id);
//!     println!("Orchestrator: {}", config.orchestrator.base_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! scanpost uses TOML (see `config.example.toml`):
//!
//! ```toml
//! [scanner]
//! device_id = "SCANNER_A1B2C3D4E5F6"
//! team_id = "001"
//!
//! [orchestrator]
//! base_url = "https://orchestrator.local:8443"
//! ```
//!
//! Every timing knob the sync engine uses is a configuration value, not a
//! constant baked into the code; the defaults match the deployed system.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::validation::{validate_device_id, validate_team_id};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Stable per-device identifier, sent with every scan and health probe.
    pub device_id: String,
    /// Optional team assignment, exactly 3 digits when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Capacity of the bounded channel between the scan source and the
    /// delivery handler.
    #[serde(default = "default_scan_buffer")]
    pub scan_buffer: usize,
}

fn default_scan_buffer() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Base URL of the orchestrator, e.g. `https://orchestrator.local:8443`.
    pub base_url: String,
    /// Timeout for the health probe and single-scan submission (seconds).
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// Timeout for a batch upload (seconds).
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_seconds: u64,
    /// How often the background task probes reachability (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,
    /// How often a reconnect is requested while the link is down (seconds).
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_seconds: u64,
}

fn default_http_timeout() -> u64 {
    5
}

fn default_batch_timeout() -> u64 {
    30
}

fn default_probe_interval() -> u64 {
    10
}

fn default_reconnect_interval() -> u64 {
    30
}

impl OrchestratorConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_seconds)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory on the shared storage device holding the queue file.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Maximum queued scans; appending beyond this evicts the oldest entry.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Entries per batch upload. The batch endpoint accepts at most 10.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay between consecutive batch uploads while draining a backlog (ms).
    #[serde(default = "default_drain_delay")]
    pub drain_delay_ms: u64,
    /// Bounded wait for the storage device on the foreground path (ms).
    #[serde(default = "default_foreground_wait")]
    pub foreground_lock_wait_ms: u64,
    /// Bounded wait for the storage device on the background path (ms).
    #[serde(default = "default_background_wait")]
    pub background_lock_wait_ms: u64,
    /// Queue files larger than this at boot are treated as power-loss
    /// corruption and discarded (bytes).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_capacity() -> usize {
    100
}

fn default_batch_size() -> usize {
    10
}

fn default_drain_delay() -> u64 {
    1000
}

fn default_foreground_wait() -> u64 {
    500
}

fn default_background_wait() -> u64 {
    1000
}

fn default_max_file_bytes() -> u64 {
    100 * 1024
}

impl QueueConfig {
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    pub fn foreground_lock_wait(&self) -> Duration {
        Duration::from_millis(self.foreground_lock_wait_ms)
    }

    pub fn background_lock_wait(&self) -> Duration {
        Duration::from_millis(self.background_lock_wait_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            capacity: default_capacity(),
            batch_size: default_batch_size(),
            drain_delay_ms: default_drain_delay(),
            foreground_lock_wait_ms: default_foreground_wait(),
            background_lock_wait_ms: default_background_wait(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("scanpost.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file and validate it.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Validate all sections. Runs once at load; after this the record is
    /// read-only for the process lifetime.
    pub fn validate(&self) -> Result<()> {
        validate_device_id(&self.scanner.device_id)
            .map_err(|e| anyhow!("Invalid scanner.device_id: {}", e))?;

        if let Some(ref team) = self.scanner.team_id {
            validate_team_id(team).map_err(|e| anyhow!("Invalid scanner.team_id: {}", e))?;
        }

        if self.scanner.scan_buffer == 0 {
            return Err(anyhow!("scanner.scan_buffer must be at least 1"));
        }

        let url = &self.orchestrator.base_url;
        if url.is_empty() {
            return Err(anyhow!("orchestrator.base_url is required"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(anyhow!(
                "orchestrator.base_url must start with http:// or https:// (got {})",
                url
            ));
        }

        if self.queue.capacity == 0 {
            return Err(anyhow!("queue.capacity must be at least 1"));
        }
        if self.queue.batch_size == 0 || self.queue.batch_size > 10 {
            return Err(anyhow!(
                "queue.batch_size must be between 1 and 10 (the batch endpoint caps at 10)"
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scanner: ScannerConfig {
                device_id: "SCANNER_000000000000".to_string(),
                team_id: None,
                scan_buffer: default_scan_buffer(),
            },
            orchestrator: OrchestratorConfig {
                base_url: "https://orchestrator.local:8443".to_string(),
                http_timeout_seconds: default_http_timeout(),
                batch_timeout_seconds: default_batch_timeout(),
                probe_interval_seconds: default_probe_interval(),
                reconnect_interval_seconds: default_reconnect_interval(),
            },
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
