//! Configuration management for the curio indexer.
//!
//! Configuration is loaded from a TOML file with `${VAR_NAME}` environment
//! variable expansion, then validated before anything else starts. A bad
//! config is the one class of error that terminates the process.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Contract addresses
    pub contracts: ContractsConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Live sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Backfill worker configuration
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// JSONL / image storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP RPC URL (always required; backfill and polling use it)
    pub http_url: String,

    /// WebSocket RPC URL. Absent or empty means the live worker polls
    /// instead of subscribing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Chain ID (e.g., 421614 for Arbitrum Sepolia)
    pub chain_id: u64,
}

impl NetworkConfig {
    /// WS URL if configured and non-empty.
    pub fn ws_url(&self) -> Option<&str> {
        self.ws_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Contract addresses configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// CollectibleRegistryV1 address
    pub registry: Address,

    /// CollectibleNFTV1 address
    pub nft: Address,

    /// CollectibleMarketV1 address
    pub market: Address,
}

impl ContractsConfig {
    /// All three watched addresses, for combined log filters.
    pub fn all(&self) -> [Address; 3] {
        [self.registry, self.nft, self.market]
    }

    /// Which watched contract (if any) sits at this address. Logs from
    /// unknown addresses are discarded before decoding.
    pub fn contract_at(&self, address: Address) -> Option<crate::events::SourceContract> {
        if address == self.registry {
            Some(crate::events::SourceContract::Registry)
        } else if address == self.nft {
            Some(crate::events::SourceContract::Nft)
        } else if address == self.market {
            Some(crate::events::SourceContract::Market)
        } else {
            None
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://curio.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Live sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Blocks to wait before a log is considered final
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// Polling interval in milliseconds for new blocks (poll mode)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Backfill worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Blocks per getLogs chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Maximum blocks to look back when discovering the start block
    #[serde(default = "default_max_lookback")]
    pub max_lookback: u64,

    /// Backward stride for start-block discovery
    #[serde(default = "default_probe_stride")]
    pub probe_stride: u64,

    /// Forward refinement step once a populated window is found
    #[serde(default = "default_refine_step")]
    pub refine_step: u64,

    /// Pause between chunk fetches in milliseconds
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,

    /// Retry attempts per chunk before it is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_lookback: default_max_lookback(),
            probe_stride: default_probe_stride(),
            refine_step: default_refine_step(),
            pace_ms: default_pace_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// JSONL / image storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the JSONL event logs and uploaded images
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_confirmations() -> u64 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_chunk_size() -> u64 {
    2000
}

fn default_max_lookback() -> u64 {
    200_000
}

fn default_probe_stride() -> u64 {
    10_000
}

fn default_refine_step() -> u64 {
    1000
}

fn default_pace_ms() -> u64 {
    200
}

fn default_max_attempts() -> u32 {
    6
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax,
    /// e.g. `http_url = "${RPC_HTTP_URL}"`. Placeholders inside comments
    /// are left alone.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = Self::expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.http_url.is_empty() {
            anyhow::bail!("Network http_url cannot be empty");
        }
        if self.network.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }

        if self.contracts.registry.is_zero() {
            anyhow::bail!("Contracts registry must be a non-zero address");
        }
        if self.contracts.nft.is_zero() {
            anyhow::bail!("Contracts nft must be a non-zero address");
        }
        if self.contracts.market.is_zero() {
            anyhow::bail!("Contracts market must be a non-zero address");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sync.poll_interval_ms == 0 {
            anyhow::bail!("Sync poll_interval_ms must be > 0");
        }

        if self.backfill.chunk_size == 0 {
            anyhow::bail!("Backfill chunk_size must be > 0");
        }
        if self.backfill.probe_stride == 0 {
            anyhow::bail!("Backfill probe_stride must be > 0");
        }
        if self.backfill.refine_step == 0 {
            anyhow::bail!("Backfill refine_step must be > 0");
        }
        if self.backfill.max_attempts == 0 {
            anyhow::bail!("Backfill max_attempts must be > 0");
        }

        if self.storage.data_dir.trim().is_empty() {
            anyhow::bail!("Storage data_dir cannot be empty");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Expand `${VAR_NAME}` placeholders against the process environment.
    ///
    /// Placeholders after a `#` outside a double-quoted string are comment
    /// examples and stay untouched. Referencing an unset variable is an
    /// error.
    fn expand_env_vars(input: &str) -> Result<String> {
        let mut result = String::with_capacity(input.len());

        for line in input.split_inclusive('\n') {
            let mut in_string = false;
            let mut in_comment = false;
            let mut chars = line.char_indices().peekable();

            while let Some((pos, ch)) = chars.next() {
                if in_comment {
                    result.push(ch);
                    continue;
                }
                match ch {
                    '"' => {
                        in_string = !in_string;
                        result.push(ch);
                    }
                    '#' if !in_string => {
                        in_comment = true;
                        result.push(ch);
                    }
                    '$' if chars.peek().map(|&(_, c)| c) == Some('{') => {
                        chars.next(); // consume '{'
                        let mut var_name = String::new();
                        let mut found_close = false;
                        for (_, c) in chars.by_ref() {
                            if c == '}' {
                                found_close = true;
                                break;
                            }
                            var_name.push(c);
                        }
                        if !found_close {
                            anyhow::bail!(
                                "Unclosed environment variable placeholder at position {}",
                                pos
                            );
                        }
                        if var_name.is_empty() {
                            anyhow::bail!("Empty environment variable name at position {}", pos);
                        }
                        let value = std::env::var(&var_name).with_context(|| {
                            format!("Environment variable '{}' is not set", var_name)
                        })?;
                        result.push_str(&value);
                    }
                    _ => result.push(ch),
                }
            }
        }

        Ok(result)
    }
}
