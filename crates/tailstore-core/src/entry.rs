//! Entries written through a transaction and items read back from one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bookkeeping bytes charged per buffered write on top of key and value,
/// used for the transaction size limit and the live-bytes estimate.
pub(crate) const ENTRY_OVERHEAD: usize = 24;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Absolute expiry for an entry written now with `ttl`; 0 = never.
pub(crate) fn expiry_from_ttl(ttl: Option<Duration>, now: u64) -> u64 {
    match ttl {
        Some(ttl) => now.saturating_add(ttl.as_millis() as u64).max(1),
        None => 0,
    }
}

/// A write to buffer in a [`crate::Txn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Opaque tag byte stored alongside the value
    pub user_meta: u8,
    /// Time-to-live from the moment the entry is buffered
    pub ttl: Option<Duration>,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            user_meta: 0,
            ttl: None,
        }
    }

    pub fn with_meta(mut self, user_meta: u8) -> Self {
        self.user_meta = user_meta;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub(crate) fn charged_size(&self) -> usize {
        self.key.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// A committed value in the RAM index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub value: Vec<u8>,
    pub user_meta: u8,
    pub expires_at: u64,
}

impl Record {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }
}

/// One key as seen by a transaction: committed state overlaid with the
/// transaction's own pending writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    key: Vec<u8>,
    value: Vec<u8>,
    user_meta: u8,
    expires_at: u64,
    deleted: bool,
}

impl Item {
    pub(crate) fn live(key: Vec<u8>, record: &Record) -> Self {
        Self {
            key,
            value: record.value.clone(),
            user_meta: record.user_meta,
            expires_at: record.expires_at,
            deleted: false,
        }
    }

    pub(crate) fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            user_meta: 0,
            expires_at: 0,
            deleted: true,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn user_meta(&self) -> u8 {
        self.user_meta
    }

    /// Unix milliseconds after which the item is expired; 0 = never.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Deleted in this transaction, or past its TTL but not yet reclaimed
    /// by GC. Either way readers must treat it as absent.
    pub fn is_deleted_or_expired(&self) -> bool {
        self.deleted || (self.expires_at != 0 && self.expires_at <= now_millis())
    }
}
