//! Configuration management for TailStore
//!
//! Provides presets for server and embedded deployments and a
//! `validate()` pass that the engine runs before opening anything on disk.

use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::format::MAX_KEY_SIZE;

/// TailStore engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WAL segment rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Fsync the WAL on every commit
    pub sync_writes: bool,
    /// Maximum number of buffered writes in a single transaction
    pub max_txn_entries: usize,
    /// Maximum buffered bytes (keys + values + per-entry overhead) in a single transaction
    pub max_txn_bytes: usize,
    /// Maintenance thread cadence; the cached on-disk size is refreshed once per tick
    pub size_refresh_interval: Duration,
    /// How often the maintenance thread runs a GC cycle (expiry sweep + optional compaction)
    pub gc_interval: Duration,
    /// Compaction trigger: rewrite the log when dead space ratio exceeds this
    pub compaction_trigger_ratio: f64,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
}

impl Config {
    /// Server-class: large transactions, one-minute size accounting.
    pub fn server() -> Self {
        Self {
            wal_rotation_size_bytes: 64 * 1024 * 1024,
            sync_writes: false,
            max_txn_entries: 100_000,
            max_txn_bytes: 10 * 1024 * 1024,
            size_refresh_interval: Duration::from_secs(60),
            gc_interval: Duration::from_secs(5 * 60),
            compaction_trigger_ratio: 0.5,
            max_key_size: 1024,
            max_value_size: 32 * 1024 * 1024,
        }
    }

    /// Embedded-class: small transactions and segments, frequent accounting.
    pub fn embedded() -> Self {
        Self {
            wal_rotation_size_bytes: 8 * 1024 * 1024,
            sync_writes: false,
            max_txn_entries: 10_000,
            max_txn_bytes: 2 * 1024 * 1024,
            size_refresh_interval: Duration::from_secs(10),
            gc_interval: Duration::from_secs(60),
            compaction_trigger_ratio: 0.3,
            max_key_size: 512,
            max_value_size: 4 * 1024 * 1024,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfig(msg.into()));

        if self.wal_rotation_size_bytes < 64 * 1024 {
            return invalid("wal_rotation_size_bytes must be >= 64KB");
        }
        if self.max_txn_entries == 0 {
            return invalid("max_txn_entries must be > 0");
        }
        if self.max_txn_bytes == 0 {
            return invalid("max_txn_bytes must be > 0");
        }
        if self.size_refresh_interval.is_zero() {
            return invalid("size_refresh_interval must be > 0");
        }
        if self.gc_interval.is_zero() {
            return invalid("gc_interval must be > 0");
        }
        if self.compaction_trigger_ratio <= 0.0 || self.compaction_trigger_ratio >= 1.0 {
            return invalid("compaction_trigger_ratio must be in (0.0, 1.0)");
        }
        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return invalid("max_key_size must be in [1, 65535]");
        }
        if self.max_value_size == 0 || self.max_value_size > 128 * 1024 * 1024 {
            return invalid("max_value_size must be in [1, 128MB]");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::server() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_valid() {
        assert!(Config::server().validate().is_ok());
        assert!(Config::embedded().validate().is_ok());
    }

    #[test]
    fn test_preset_ordering() {
        let s = Config::server();
        let e = Config::embedded();
        assert!(s.max_txn_bytes > e.max_txn_bytes);
        assert!(s.size_refresh_interval > e.size_refresh_interval);
    }

    #[test]
    fn test_rejects_bad_ratio() {
        let mut config = Config::default();
        config.compaction_trigger_ratio = 1.0;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_txn_limits() {
        let mut config = Config::default();
        config.max_txn_entries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_txn_bytes = 0;
        assert!(config.validate().is_err());
    }
}
