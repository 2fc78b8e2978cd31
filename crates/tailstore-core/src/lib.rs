//! TailStore Core: RAM-First Ordered Storage Engine
//!
//! An embedded key-value engine where an ordered RAM index is the primary
//! read surface and a segmented write-ahead log provides crash safety.
//!
//! # Architecture
//!
//! - **Read path**: served from an ordered RAM index, with prefix scans
//! - **Write path**: transactions buffer writes; commit appends one WAL
//!   batch, then publishes it to RAM
//! - **Expiry**: entries may carry a TTL; expired entries read as absent and
//!   are reclaimed by GC
//! - **Maintenance**: background size accounting, GC and log compaction
//!
//! The engine knows nothing about what it stores. Domain layers such as
//! tail-sampling event storage live in separate crates.

pub mod compaction;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod format;
pub mod maintenance;
pub mod sync;
pub mod txn;
pub mod wal;

// Re-export key types for convenience
pub use compaction::CompactionResult;
pub use config::Config;
pub use engine::{EngineStats, GcReport, TailStoreEngine};
pub use entry::{now_millis, Entry, Item};
pub use error::{EngineError, EngineResult};
pub use format::Operation;
pub use maintenance::MaintenanceHandle;
pub use txn::{PrefixIter, Txn};
pub use wal::{WalReader, WalWriter};
