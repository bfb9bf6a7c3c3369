//! Configuration for the sync cache
//!
//! Engine tunables load from a TOML file, from environment variables, or
//! fall back to defaults sized for typical operator-log volumes: a few
//! hundred streaming buffers living a few minutes each.
//!
//! The replay binary's CLI arguments live here too, using clap with env
//! fallbacks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::index::{ListPolicies, MergePolicy};
use crate::stream::EvictionPolicy;
use crate::types::{Result, SyncCacheError};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum open streaming buffers before LRU eviction
    #[serde(default = "default_max_streaming_entries")]
    pub max_streaming_entries: usize,

    /// Idle lifetime of a streaming buffer in milliseconds
    #[serde(default = "default_streaming_ttl_ms")]
    pub streaming_ttl_ms: u64,

    /// How often the async driver sweeps expired buffers
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Capacity of the update broadcast channel
    #[serde(default = "default_update_channel_capacity")]
    pub update_channel_capacity: usize,

    /// Merge policy for lists with no explicit entry
    #[serde(default)]
    pub default_list_policy: MergePolicy,

    /// List name (or full list key) -> merge policy
    #[serde(default)]
    pub list_policies: HashMap<String, MergePolicy>,
}

fn default_max_streaming_entries() -> usize { 500 }
fn default_streaming_ttl_ms() -> u64 { 180_000 } // 3 minutes
fn default_sweep_interval_ms() -> u64 { 30_000 }
fn default_update_channel_capacity() -> usize { 1000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_streaming_entries: default_max_streaming_entries(),
            streaming_ttl_ms: default_streaming_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            update_channel_capacity: default_update_channel_capacity(),
            default_list_policy: MergePolicy::default(),
            list_policies: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("SYNC_CACHE_MAX_STREAMING_ENTRIES") {
            config.max_streaming_entries = v;
        }
        if let Some(v) = env_parse("SYNC_CACHE_STREAMING_TTL_MS") {
            config.streaming_ttl_ms = v;
        }
        if let Some(v) = env_parse("SYNC_CACHE_SWEEP_INTERVAL_MS") {
            config.sweep_interval_ms = v;
        }

        config
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncCacheError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_streaming_entries == 0 {
            return Err(SyncCacheError::Config(
                "maxStreamingEntries must be at least 1".to_string(),
            ));
        }
        if self.streaming_ttl_ms == 0 {
            return Err(SyncCacheError::Config(
                "streamingTtlMs must be greater than 0".to_string(),
            ));
        }
        if self.update_channel_capacity == 0 {
            return Err(SyncCacheError::Config(
                "updateChannelCapacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn streaming_ttl(&self) -> Duration {
        Duration::from_millis(self.streaming_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(self.max_streaming_entries, self.streaming_ttl())
    }

    pub fn list_policies(&self) -> ListPolicies {
        let mut policies = ListPolicies::new(self.default_list_policy);
        for (name, policy) in &self.list_policies {
            policies.set(name, *policy);
        }
        policies
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// sync-cache-replay - feed recorded change events through the cache
#[derive(Parser, Debug, Clone)]
#[command(name = "sync-cache-replay")]
#[command(about = "Replay NDJSON change events and query results through the sync cache")]
pub struct ReplayArgs {
    /// NDJSON input file (reads stdin when omitted)
    #[arg(long, env = "SYNC_CACHE_INPUT")]
    pub input: Option<PathBuf>,

    /// TOML engine configuration file
    #[arg(long, env = "SYNC_CACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// List keys to print after the replay (repeatable)
    #[arg(long = "list")]
    pub lists: Vec<String>,

    /// Maximum open streaming buffers (overrides config)
    #[arg(long, env = "SYNC_CACHE_MAX_STREAMING_ENTRIES")]
    pub max_streaming_entries: Option<usize>,

    /// Streaming buffer TTL in milliseconds (overrides config)
    #[arg(long, env = "SYNC_CACHE_STREAMING_TTL_MS")]
    pub streaming_ttl_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl ReplayArgs {
    /// Resolve the effective engine configuration: file (or env), then CLI
    /// overrides.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::from_env(),
        };

        if let Some(max) = self.max_streaming_entries {
            config.max_streaming_entries = max;
        }
        if let Some(ttl) = self.streaming_ttl_ms {
            config.streaming_ttl_ms = ttl;
        }

        config.validate()?;
        Ok(config)
    }
}
