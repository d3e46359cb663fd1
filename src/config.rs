//! Configuration module for the address-table orchestrator
//!
//! Configuration is loaded from a TOML file, then `.env`, then individual
//! environment variable overrides, and finally validated.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::ledger::{Commitment, RetryConfig};
use crate::tx_pipeline::MAX_EXTEND_ENTRIES;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub submitter: SubmitterConfig,

    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint of the ledger node
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Commitment used for reads and confirmation
    #[serde(default)]
    pub commitment: Commitment,

    /// Rate limit (requests per second)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: u32,

    /// Retry policy for idempotent reads
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to the fee payer keypair file (Solana CLI JSON format)
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,

    /// Generate and persist a new keypair when the file does not exist
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Maximum entries per extend instruction (protocol ceiling: 30)
    #[serde(default = "default_extend_batch_limit")]
    pub extend_batch_limit: usize,

    /// Blocks that must elapse after the last extension before the table is used
    #[serde(default = "default_visibility_delta")]
    pub visibility_delta_blocks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Block height polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum wait for the height to advance; `None` waits indefinitely
    #[serde(default = "default_watch_timeout")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitterConfig {
    /// Signature status polling interval in milliseconds
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,

    /// Skip the node's preflight simulation on broadcast
    #[serde(default)]
    pub skip_preflight: bool,

    /// How many times an expired transfer batch is recompiled and resubmitted
    #[serde(default)]
    pub expiry_resubmits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Number of freshly generated recipients
    #[serde(default = "default_recipient_count")]
    pub recipient_count: usize,

    /// Lamports moved to every recipient
    #[serde(default = "default_lamports")]
    pub lamports_per_recipient: u64,

    /// Compute unit limit (0 = omit the instruction)
    #[serde(default)]
    pub compute_unit_limit: u32,

    /// Priority fee in micro-lamports per compute unit (0 = omit the instruction)
    #[serde(default)]
    pub compute_unit_price: u64,
}

// Default value functions
fn default_rpc_url() -> String { "http://127.0.0.1:8899".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_rate_limit() -> u32 { 50 }
fn default_keypair_path() -> String { "payer-keypair.json".to_string() }
fn default_true() -> bool { true }
fn default_extend_batch_limit() -> usize { MAX_EXTEND_ENTRIES }
fn default_visibility_delta() -> u64 { 1 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_watch_timeout() -> Option<u64> { Some(120) }
fn default_confirm_poll_interval_ms() -> u64 { 500 }
fn default_recipient_count() -> usize { 22 }
fn default_lamports() -> u64 { 1_000_000 }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
            commitment: Commitment::default(),
            rate_limit_rps: default_rate_limit(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
            create_if_missing: default_true(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            extend_batch_limit: default_extend_batch_limit(),
            visibility_delta_blocks: default_visibility_delta(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_watch_timeout(),
        }
    }
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            confirm_poll_interval_ms: default_confirm_poll_interval_ms(),
            skip_preflight: false,
            expiry_resubmits: 0,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            recipient_count: default_recipient_count(),
            lamports_per_recipient: default_lamports(),
            compute_unit_limit: 0,
            compute_unit_price: 0,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl SubmitterConfig {
    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnvVar { name: String, reason: String },
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `ALT_RPC_URL`, `ALT_KEYPAIR_PATH` and `ALT_COMMITMENT`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("ALT_RPC_URL") {
            self.rpc.url = url;
        }
        if let Ok(path) = std::env::var("ALT_KEYPAIR_PATH") {
            self.wallet.keypair_path = path;
        }
        if let Ok(commitment) = std::env::var("ALT_COMMITMENT") {
            self.rpc.commitment =
                commitment
                    .parse()
                    .map_err(|reason| ConfigError::InvalidEnvVar {
                        name: "ALT_COMMITMENT".to_string(),
                        reason,
                    })?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rpc.url.starts_with("http://") && !self.rpc.url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "Invalid RPC URL format: {}",
                self.rpc.url
            )));
        }

        if self.rpc.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "rpc.timeout_secs must be > 0".to_string(),
            ));
        }

        if self.table.extend_batch_limit == 0 || self.table.extend_batch_limit > MAX_EXTEND_ENTRIES
        {
            return Err(ConfigError::Validation(format!(
                "table.extend_batch_limit must be between 1 and {}",
                MAX_EXTEND_ENTRIES
            )));
        }

        if self.watcher.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "watcher.poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.watcher.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "watcher.timeout_secs must be > 0 when set".to_string(),
            ));
        }

        if self.submitter.confirm_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "submitter.confirm_poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.transfer.lamports_per_recipient == 0 {
            return Err(ConfigError::Validation(
                "transfer.lamports_per_recipient must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
