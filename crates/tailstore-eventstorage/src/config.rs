//! Tail-sampling storage configuration.
//!
//! Holds the settings that shape event storage (flush interval, TTL, GC
//! cadence, storage limit) and opens a [`Storage`] from them. Policy
//! evaluation is configured elsewhere.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tailstore_core::{Config as EngineConfig, TailStoreEngine};
use tracing::info;

use crate::codec::Codec;
use crate::error::{Result, StorageError};
use crate::storage::Storage;

const MIN_DURATION: Duration = Duration::from_secs(1);

/// Tail-sampling storage configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TailSamplingConfig {
    pub enabled: bool,
    /// How often buffered writes are flushed and decisions are made
    pub interval: Duration,
    /// Time-to-live of stored events and decisions
    pub ttl: Duration,
    /// How often the engine runs GC
    pub storage_gc_interval: Duration,
    /// Human-readable storage limit, e.g. "3GB"; "0" disables the limit
    pub storage_limit: String,
    /// `storage_limit` in bytes
    pub storage_limit_parsed: u64,
}

impl Default for TailSamplingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            ttl: Duration::from_secs(30 * 60),
            storage_gc_interval: Duration::from_secs(5 * 60),
            storage_limit: "3GB".to_string(),
            storage_limit_parsed: 3_000_000_000,
        }
    }
}

impl TailSamplingConfig {
    /// Parse and set the storage limit.
    pub fn set_storage_limit(&mut self, limit: &str) -> Result<()> {
        self.storage_limit_parsed = parse_byte_size(limit)?;
        self.storage_limit = limit.to_string();
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StorageError::InvalidConfig(msg));

        for (name, value) in [
            ("interval", self.interval),
            ("ttl", self.ttl),
            ("storage_gc_interval", self.storage_gc_interval),
        ] {
            if value < MIN_DURATION {
                return invalid(format!("{} must be at least 1s, got {:?}", name, value));
            }
        }
        let parsed = parse_byte_size(&self.storage_limit)?;
        if parsed != self.storage_limit_parsed {
            return invalid(format!(
                "storage_limit_parsed {} does not match storage_limit {:?}",
                self.storage_limit_parsed, self.storage_limit
            ));
        }
        Ok(())
    }
}

/// Parse a human-readable byte size such as `"3GB"`, `"512 MiB"` or `"1.5k"`.
///
/// SI units (`kB`, `MB`, ...) are powers of 1000 and IEC units (`KiB`,
/// `MiB`, ...) powers of 1024. Units are case-insensitive; a bare number is
/// bytes. Commas in the number are ignored.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let invalid = || StorageError::InvalidConfig(format!("invalid byte size {:?}", s));

    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let number: f64 = number
        .replace(',', "")
        .parse()
        .map_err(|_| invalid())?;
    let multiplier =
        unit_multiplier(&unit.trim().to_ascii_lowercase()).ok_or_else(invalid)?;

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(StorageError::InvalidConfig(format!("byte size {:?} is too large", s)));
    }
    Ok(bytes as u64)
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    const KB: u64 = 1000;
    const KIB: u64 = 1024;
    let m = match unit {
        "" | "b" => 1,
        "k" | "kb" => KB,
        "ki" | "kib" => KIB,
        "m" | "mb" => KB.pow(2),
        "mi" | "mib" => KIB.pow(2),
        "g" | "gb" => KB.pow(3),
        "gi" | "gib" => KIB.pow(3),
        "t" | "tb" => KB.pow(4),
        "ti" | "tib" => KIB.pow(4),
        "p" | "pb" => KB.pow(5),
        "pi" | "pib" => KIB.pow(5),
        "e" | "eb" => KB.pow(6),
        "ei" | "eib" => KIB.pow(6),
        _ => return None,
    };
    Some(m)
}

/// Open the engine at `path` and build a [`Storage`] configured by `config`.
///
/// The engine runs GC every `storage_gc_interval`; its maintenance thread is
/// started before this returns.
pub fn open_storage<P: AsRef<Path>>(
    path: P,
    config: &TailSamplingConfig,
    codec: Arc<dyn Codec>,
) -> Result<Arc<Storage>> {
    config.validate()?;

    let engine_config = EngineConfig {
        gc_interval: config.storage_gc_interval,
        ..EngineConfig::default()
    };
    let engine = TailStoreEngine::open(path.as_ref(), engine_config)?;
    engine.start_maintenance()?;

    let storage = Storage::new(
        Arc::new(engine),
        codec,
        config.ttl,
        config.storage_limit_parsed,
    );
    info!(
        path = %path.as_ref().display(),
        ttl = ?config.ttl,
        limit = storage.limit(),
        "opened tail-sampling event storage"
    );
    Ok(Arc::new(storage))
}
