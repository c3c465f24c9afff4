//! Shard configuration, loadable from a TOML file with per-field defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::RetryPolicy;

/// Tunables for one shard context. Every field has a default, so an empty
/// config file (or none at all) yields a working configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ShardConfig {
    /// Width of the per-lease task-id block: each lease owns
    /// `[range_id << bits, (range_id + 1) << bits)`.
    #[serde(default = "default_range_size_bits")]
    pub range_size_bits: u32,

    /// Minimum interval between durable ack-level flushes. Mutations inside
    /// the window are held in memory and consolidated into the next flush.
    #[serde(default = "default_shard_update_min_interval_ms")]
    pub shard_update_min_interval_ms: i64,

    /// How far past a cluster's observed clock the timer read cursor is
    /// advanced on each update.
    #[serde(default = "default_timer_max_time_shift_ms")]
    pub timer_processor_max_time_shift_ms: i64,

    /// Emit a warning log when ack-level spreads or lags breach the
    /// thresholds below.
    #[serde(default)]
    pub emit_shard_diff_log: bool,

    /// Warn threshold for task-id spreads and lags.
    #[serde(default = "default_log_warn_transfer_level_diff")]
    pub log_warn_transfer_level_diff: i64,

    /// Warn threshold for timer spreads and lags, in ms.
    #[serde(default = "default_log_warn_timer_level_diff_ms")]
    pub log_warn_timer_level_diff_ms: i64,

    /// Warn when a single history append reaches this many bytes.
    #[serde(default = "default_history_size_log_threshold")]
    pub history_size_log_threshold: usize,

    /// Initial backoff of the lease acquisition loop.
    #[serde(default = "default_acquire_initial_backoff_ms")]
    pub acquire_initial_backoff_ms: u64,

    /// Backoff cap of the lease acquisition loop.
    #[serde(default = "default_acquire_max_backoff_ms")]
    pub acquire_max_backoff_ms: u64,

    /// Total budget of one acquisition attempt before the shard gives up
    /// and stops itself.
    #[serde(default = "default_acquire_budget_ms")]
    pub acquire_budget_ms: u64,

    /// Initial poll interval of the blocking engine accessor.
    #[serde(default = "default_engine_probe_initial_backoff_ms")]
    pub engine_probe_initial_backoff_ms: u64,

    /// Poll-interval cap of the blocking engine accessor.
    #[serde(default = "default_engine_probe_max_backoff_ms")]
    pub engine_probe_max_backoff_ms: u64,
}

fn default_range_size_bits() -> u32 {
    20
}

fn default_shard_update_min_interval_ms() -> i64 {
    5 * 60 * 1000
}

fn default_timer_max_time_shift_ms() -> i64 {
    1_000
}

fn default_log_warn_transfer_level_diff() -> i64 {
    3_000_000
}

fn default_log_warn_timer_level_diff_ms() -> i64 {
    30 * 60 * 1000
}

fn default_history_size_log_threshold() -> usize {
    10 * 1024 * 1024
}

fn default_acquire_initial_backoff_ms() -> u64 {
    50
}

fn default_acquire_max_backoff_ms() -> u64 {
    10_000
}

fn default_acquire_budget_ms() -> u64 {
    5 * 60 * 1000
}

fn default_engine_probe_initial_backoff_ms() -> u64 {
    5
}

fn default_engine_probe_max_backoff_ms() -> u64 {
    1_000
}

impl Default for ShardConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config deserializes to defaults")
    }
}

impl ShardConfig {
    /// Load from a TOML file; `None` yields all defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                Ok(toml::from_str(&text)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn acquire_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.acquire_initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.acquire_max_backoff_ms))
            .with_expiration(Duration::from_millis(self.acquire_budget_ms))
            .with_jitter(0.2)
    }

    pub fn engine_probe_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.engine_probe_initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.engine_probe_max_backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cfg = ShardConfig::default();
        assert_eq!(cfg.range_size_bits, 20);
        assert_eq!(cfg.shard_update_min_interval_ms, 300_000);
        assert_eq!(cfg.log_warn_transfer_level_diff, 3_000_000);
        assert_eq!(cfg.log_warn_timer_level_diff_ms, 1_800_000);
        assert!(!cfg.emit_shard_diff_log);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: ShardConfig =
            toml::from_str("range_size_bits = 8\nemit_shard_diff_log = true").unwrap();
        assert_eq!(cfg.range_size_bits, 8);
        assert!(cfg.emit_shard_diff_log);
        assert_eq!(cfg.acquire_initial_backoff_ms, 50);
    }
}
