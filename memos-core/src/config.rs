//! Configuration for the MemOS scheduler.
//!
//! Maps directly to `scheduler.toml`. Every section and field has a default,
//! so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Top-level scheduler configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Stream partition settings.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Worker pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Consumer loop settings.
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Message validation limits.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Web-log buffer settings.
    #[serde(default)]
    pub web_log: WebLogConfig,
    /// Logging setup.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SchedulerConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `SchedulerError::Configuration` if the TOML is invalid or a
    /// value is out of range.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| SchedulerError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values the scheduler cannot run with.
    ///
    /// # Errors
    /// Returns `SchedulerError::Configuration` naming the offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let checks = [
            (self.stream.maxsize == 0, "stream.maxsize must be > 0"),
            (self.pool.max_workers_cap == 0, "pool.max_workers_cap must be > 0"),
            (self.consumer.batch_size == 0, "consumer.batch_size must be > 0"),
            (self.consumer.consume_interval_ms == 0, "consumer.consume_interval_ms must be > 0"),
            (self.consumer.eviction_interval_secs == 0, "consumer.eviction_interval_secs must be > 0"),
            (self.consumer.dead_letter_capacity == 0, "consumer.dead_letter_capacity must be > 0"),
            (self.web_log.buffer_size == 0, "web_log.buffer_size must be > 0"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(SchedulerError::Configuration((*msg).to_string())),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// What `put` does when its partition is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EnqueuePolicy {
    /// Wait until the consumer frees a slot.
    #[default]
    Block,
    /// Wait up to `timeout_ms`, then fail with `PartitionFull`.
    Timeout {
        /// Enqueue deadline in milliseconds.
        timeout_ms: u64,
    },
    /// Fail with `PartitionFull` immediately.
    FailFast,
}

/// Stream partition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of each (tenant, cube, label) partition.
    #[serde(default = "default_100")]
    pub maxsize: usize,
    /// Behaviour of `put` on a full partition.
    #[serde(default)]
    pub enqueue_policy: EnqueuePolicy,
    /// Empty partitions idle this long are reaped.
    #[serde(default = "default_600")]
    pub partition_idle_ttl_secs: u64,
}

impl StreamConfig {
    /// Idle TTL as a `Duration`.
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.partition_idle_ttl_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            maxsize: 100,
            enqueue_policy: EnqueuePolicy::Block,
            partition_idle_ttl_secs: 600,
        }
    }
}

/// Worker pool sizing: `min(max_workers_cap, host parallelism + worker_margin)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on worker count.
    #[serde(default = "default_32")]
    pub max_workers_cap: usize,
    /// Added to the host's available parallelism.
    #[serde(default = "default_16")]
    pub worker_margin: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers_cap: 32,
            worker_margin: 16,
        }
    }
}

/// Consumer loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Poll interval between drain passes.
    #[serde(default = "default_50_u64")]
    pub consume_interval_ms: u64,
    /// Max messages drained from one partition per pass.
    #[serde(default = "default_20")]
    pub batch_size: usize,
    /// How often idle partitions are reaped.
    #[serde(default = "default_60")]
    pub eviction_interval_secs: u64,
    /// Max dead-lettered batches kept before the oldest is dropped.
    #[serde(default = "default_1000")]
    pub dead_letter_capacity: usize,
}

impl ConsumerConfig {
    /// Poll interval as a `Duration`.
    #[must_use]
    pub fn consume_interval(&self) -> Duration {
        Duration::from_millis(self.consume_interval_ms)
    }

    /// Eviction interval as a `Duration`.
    #[must_use]
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consume_interval_ms: 50,
            batch_size: 20,
            eviction_interval_secs: 60,
            dead_letter_capacity: 1000,
        }
    }
}

/// Message validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Longest accepted message content, in characters.
    #[serde(default = "default_100_000")]
    pub max_content_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 100_000,
        }
    }
}

/// Web-log buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebLogConfig {
    /// Event logs kept for pollers before the oldest is dropped.
    #[serde(default = "default_100")]
    pub buffer_size: usize,
}

impl Default for WebLogConfig {
    fn default() -> Self {
        Self { buffer_size: 100 }
    }
}

/// Logging setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level used when `RUST_LOG` is unset: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_log_level() -> String { "info".to_string() }
fn default_16() -> usize { 16 }
fn default_20() -> usize { 20 }
fn default_32() -> usize { 32 }
fn default_50_u64() -> u64 { 50 }
fn default_60() -> u64 { 60 }
fn default_100() -> usize { 100 }
fn default_600() -> u64 { 600 }
fn default_1000() -> usize { 1000 }
fn default_100_000() -> usize { 100_000 }
