//! Read-write transactions
//!
//! A [`Txn`] buffers writes in an ordered map and sees them on top of the
//! committed index (read-your-own-writes). Nothing reaches the WAL or the
//! shared index until [`Txn::commit`]; other transactions never observe a
//! partially applied batch.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::engine::Shared;
use crate::entry::{expiry_from_ttl, now_millis, Entry, Item, Record, ENTRY_OVERHEAD};
use crate::error::{EngineError, EngineResult};

/// A buffered write.
#[derive(Debug, Clone)]
pub(crate) enum Pending {
    Put(Record),
    Delete,
}

impl Pending {
    fn charged_size(&self, key: &[u8]) -> usize {
        match self {
            Pending::Put(record) => key.len() + record.value.len() + ENTRY_OVERHEAD,
            Pending::Delete => key.len() + ENTRY_OVERHEAD,
        }
    }
}

/// Read-write transaction over a [`crate::TailStoreEngine`].
///
/// Owned by a single caller. Dropping a transaction without committing
/// discards its writes.
pub struct Txn {
    shared: Arc<Shared>,
    pending: BTreeMap<Vec<u8>, Pending>,
    pending_bytes: usize,
}

impl Txn {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            pending: BTreeMap::new(),
            pending_bytes: 0,
        }
    }

    /// Buffer a put. Fails with [`EngineError::TxnTooBig`] when the write
    /// would push the transaction past `max_txn_entries` or `max_txn_bytes`;
    /// the transaction is left unchanged in that case.
    pub fn set_entry(&mut self, entry: &Entry) -> EngineResult<()> {
        self.check_key(&entry.key)?;
        let config = &self.shared.config;
        if entry.value.len() > config.max_value_size {
            return Err(EngineError::OversizedEntry {
                entry_size: entry.value.len() as u64,
                max_size: config.max_value_size as u64,
                component: "value",
            });
        }

        let record = Record {
            value: entry.value.clone(),
            user_meta: entry.user_meta,
            expires_at: expiry_from_ttl(entry.ttl, now_millis()),
        };
        self.buffer(entry.key.clone(), Pending::Put(record), entry.charged_size())
    }

    /// Buffer a delete of `key`. Deleting an absent key is not an error.
    pub fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        self.check_key(key)?;
        self.buffer(key.to_vec(), Pending::Delete, key.len() + ENTRY_OVERHEAD)
    }

    /// Look up `key`, seeing this transaction's own writes first.
    ///
    /// Returns [`EngineError::KeyNotFound`] when the key is absent, deleted,
    /// or past its TTL.
    pub fn get(&self, key: &[u8]) -> EngineResult<Item> {
        let now = now_millis();
        match self.pending.get(key) {
            Some(Pending::Put(record)) if !record.is_expired(now) => {
                return Ok(Item::live(key.to_vec(), record));
            }
            Some(_) => return Err(EngineError::KeyNotFound),
            None => {}
        }

        let index = self.shared.index.read();
        match index.map.get(key) {
            Some(record) if !record.is_expired(now) => Ok(Item::live(key.to_vec(), record)),
            _ => Err(EngineError::KeyNotFound),
        }
    }

    /// Every key starting with `prefix`, in ascending key order.
    ///
    /// Committed entries are overlaid with this transaction's pending
    /// writes. Keys deleted in this transaction come back as tombstones and
    /// expired entries are not filtered; check
    /// [`Item::is_deleted_or_expired`] before using an item.
    pub fn prefix_iter(&self, prefix: &[u8]) -> PrefixIter {
        let mut merged: BTreeMap<Vec<u8>, Item> = BTreeMap::new();
        {
            let index = self.shared.index.read();
            let committed = index
                .map
                .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(prefix));
            for (key, record) in committed {
                merged.insert(key.clone(), Item::live(key.clone(), record));
            }
        }

        let pending = self
            .pending
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));
        for (key, op) in pending {
            let item = match op {
                Pending::Put(record) => Item::live(key.clone(), record),
                Pending::Delete => Item::tombstone(key.clone()),
            };
            merged.insert(key.clone(), item);
        }

        PrefixIter {
            items: merged.into_values(),
        }
    }

    /// Write all buffered entries to the WAL as one batch and publish them.
    /// Committing an empty transaction is a no-op.
    pub fn commit(self) -> EngineResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.shared.commit_batch(self.pending)
    }

    /// Drop all buffered writes.
    pub fn discard(self) {}

    /// Number of buffered writes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Bytes charged against `max_txn_bytes` so far.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    fn check_key(&self, key: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let max = self.shared.config.max_key_size;
        if key.len() > max {
            return Err(EngineError::OversizedEntry {
                entry_size: key.len() as u64,
                max_size: max as u64,
                component: "key",
            });
        }
        Ok(())
    }

    fn buffer(&mut self, key: Vec<u8>, op: Pending, charge: usize) -> EngineResult<()> {
        // Overwriting a pending key replaces its charge instead of adding to it.
        let (entries, replaced) = match self.pending.get(&key) {
            Some(old) => (self.pending.len(), old.charged_size(&key)),
            None => (self.pending.len() + 1, 0),
        };
        let bytes = self.pending_bytes - replaced + charge;

        let config = &self.shared.config;
        if entries > config.max_txn_entries || bytes > config.max_txn_bytes {
            return Err(EngineError::TxnTooBig {
                pending_entries: self.pending.len(),
                pending_bytes: self.pending_bytes,
            });
        }

        self.pending.insert(key, op);
        self.pending_bytes = bytes;
        Ok(())
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("pending_len", &self.pending.len())
            .field("pending_bytes", &self.pending_bytes)
            .finish()
    }
}

/// Snapshot iterator returned by [`Txn::prefix_iter`].
pub struct PrefixIter {
    items: std::collections::btree_map::IntoValues<Vec<u8>, Item>,
}

impl Iterator for PrefixIter {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::engine::TailStoreEngine;
    use crate::entry::{Entry, ENTRY_OVERHEAD};
    use crate::error::EngineError;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_engine(config: Config) -> (TailStoreEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = TailStoreEngine::open(dir.path(), config).unwrap();
        (engine, dir)
    }

    fn keys(engine: &TailStoreEngine, prefix: &str) -> Vec<String> {
        engine
            .begin()
            .prefix_iter(prefix.as_bytes())
            .filter(|item| !item.is_deleted_or_expired())
            .map(|item| String::from_utf8(item.key().to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_read_your_own_writes() {
        let (engine, _dir) = test_engine(Config::default());
        let mut txn = engine.begin();
        txn.set_entry(&Entry::new("k", "v").with_meta(b'u')).unwrap();

        let item = txn.get(b"k").unwrap();
        assert_eq!(item.value(), b"v");
        assert_eq!(item.user_meta(), b'u');

        // Not visible to others until commit.
        assert!(engine.begin().get(b"k").unwrap_err().is_not_found());
        txn.commit().unwrap();
        assert!(engine.begin().get(b"k").is_ok());
    }

    #[test]
    fn test_pending_delete_hides_committed() {
        let (engine, _dir) = test_engine(Config::default());
        let mut txn = engine.begin();
        txn.set_entry(&Entry::new("k", "v")).unwrap();
        txn.commit().unwrap();

        let mut txn = engine.begin();
        txn.delete(b"k").unwrap();
        assert!(txn.get(b"k").unwrap_err().is_not_found());
        let tombstones: Vec<_> = txn.prefix_iter(b"k").collect();
        assert_eq!(tombstones.len(), 1);
        assert!(tombstones[0].is_deleted_or_expired());
        txn.discard();

        assert!(engine.begin().get(b"k").is_ok());
    }

    #[test]
    fn test_prefix_iter_ordered_and_bounded() {
        let (engine, _dir) = test_engine(Config::default());
        let mut txn = engine.begin();
        for key in ["a:3", "a:1", "b:1", "a", "a:2"] {
            txn.set_entry(&Entry::new(key, "v")).unwrap();
        }
        txn.commit().unwrap();

        assert_eq!(keys(&engine, "a:"), vec!["a:1", "a:2", "a:3"]);
        assert_eq!(keys(&engine, "b:"), vec!["b:1"]);
        assert!(keys(&engine, "c:").is_empty());
    }

    #[test]
    fn test_prefix_iter_pending_overrides_committed() {
        let (engine, _dir) = test_engine(Config::default());
        let mut txn = engine.begin();
        txn.set_entry(&Entry::new("p:1", "old")).unwrap();
        txn.set_entry(&Entry::new("p:2", "old")).unwrap();
        txn.commit().unwrap();

        let mut txn = engine.begin();
        txn.set_entry(&Entry::new("p:1", "new")).unwrap();
        txn.set_entry(&Entry::new("p:0", "new")).unwrap();
        let values: Vec<_> = txn.prefix_iter(b"p:").map(|i| i.value().to_vec()).collect();
        assert_eq!(values, vec![b"new".to_vec(), b"new".to_vec(), b"old".to_vec()]);
    }

    #[test]
    fn test_expired_entries_not_found() {
        let (engine, _dir) = test_engine(Config::default());
        let mut txn = engine.begin();
        txn.set_entry(&Entry::new("t", "v").with_ttl(Duration::from_millis(10))).unwrap();
        txn.commit().unwrap();

        std::thread::sleep(Duration::from_millis(30));
        let txn = engine.begin();
        assert!(txn.get(b"t").unwrap_err().is_not_found());
        let items: Vec<_> = txn.prefix_iter(b"t").collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_deleted_or_expired());
    }

    #[test]
    fn test_txn_too_big_by_entries() {
        let mut config = Config::default();
        config.max_txn_entries = 3;
        let (engine, _dir) = test_engine(config);

        let mut txn = engine.begin();
        for i in 0..3 {
            txn.set_entry(&Entry::new(format!("k{}", i), "v")).unwrap();
        }
        let err = txn.set_entry(&Entry::new("k3", "v")).unwrap_err();
        assert!(err.is_txn_too_big());
        assert_eq!(txn.pending_len(), 3);

        // Overwriting a buffered key does not grow the transaction.
        txn.set_entry(&Entry::new("k0", "v2")).unwrap();
        txn.commit().unwrap();
        assert_eq!(engine.len(), 3);
    }

    #[test]
    fn test_txn_too_big_by_bytes() {
        let mut config = Config::default();
        config.max_txn_bytes = 2 * (2 + 100 + ENTRY_OVERHEAD);
        let (engine, _dir) = test_engine(config);

        let mut txn = engine.begin();
        txn.set_entry(&Entry::new("k1", vec![0u8; 100])).unwrap();
        txn.set_entry(&Entry::new("k2", vec![0u8; 100])).unwrap();
        assert_eq!(txn.pending_bytes(), 2 * (2 + 100 + ENTRY_OVERHEAD));
        assert!(matches!(
            txn.set_entry(&Entry::new("k3", vec![0u8; 1])),
            Err(EngineError::TxnTooBig { pending_entries: 2, .. })
        ));
    }

    #[test]
    fn test_key_validation() {
        let (engine, _dir) = test_engine(Config::default());
        let mut txn = engine.begin();
        assert!(matches!(txn.set_entry(&Entry::new("", "v")), Err(EngineError::EmptyKey)));
        assert!(matches!(txn.delete(b""), Err(EngineError::EmptyKey)));
        assert!(matches!(
            txn.set_entry(&Entry::new(vec![b'k'; 2048], "v")),
            Err(EngineError::OversizedEntry { component: "key", .. })
        ));
    }

    #[test]
    fn test_empty_commit_is_noop() {
        let (engine, _dir) = test_engine(Config::default());
        engine.begin().commit().unwrap();
        assert_eq!(engine.stats().commits, 0);
    }
}
