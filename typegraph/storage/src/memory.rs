use std::collections::BTreeMap;
use std::iter::Peekable;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::store::{KvIter, SchemaStore, StoreTransaction};
use crate::timestamp::{Timestamp, TimestampGenerator};

#[derive(Debug, Clone)]
enum WriteOp {
    Put(Vec<u8>),
    Delete,
}

#[derive(Debug)]
struct Version {
    ts: Timestamp,
    /// `None` is a delete tombstone.
    value: Option<Arc<Vec<u8>>>,
}

/// Version history of one key, ascending by commit timestamp.
#[derive(Debug, Default)]
struct VersionChain {
    versions: RwLock<Vec<Version>>,
}

impl VersionChain {
    fn visible(&self, snapshot: Timestamp) -> Option<Arc<Vec<u8>>> {
        let versions = self.versions.read();
        versions
            .iter()
            .rev()
            .find(|version| version.ts <= snapshot)
            .and_then(|version| version.value.clone())
    }

    fn latest_ts(&self) -> Option<Timestamp> {
        self.versions.read().last().map(|version| version.ts)
    }

    fn push(&self, ts: Timestamp, value: Option<Arc<Vec<u8>>>) {
        self.versions.write().push(Version { ts, value });
    }
}

#[derive(Debug)]
struct StoreInner {
    entries: SkipMap<Vec<u8>, VersionChain>,
    clock: TimestampGenerator,
    /// Serialises commits; taken with a caller-provided timeout.
    commit_lock: Mutex<()>,
}

/// In-memory ordered store with snapshot isolation and atomic commit.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: SkipMap::new(),
                clock: TimestampGenerator::new(),
                commit_lock: Mutex::new(()),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaStore for MemoryStore {
    type Transaction = MemoryTransaction;

    fn begin(&self) -> MemoryTransaction {
        MemoryTransaction {
            store: self.inner.clone(),
            start_ts: self.inner.clock.current(),
            buffer: RwLock::new(BTreeMap::new()),
            state: AtomicU8::new(STATE_ACTIVE),
        }
    }
}

const STATE_ACTIVE: u8 = 0;
const STATE_COMMITTED: u8 = 1;
const STATE_ROLLED_BACK: u8 = 2;
const STATE_POISONED: u8 = 3;

/// A buffered transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    store: Arc<StoreInner>,
    start_ts: Timestamp,
    buffer: RwLock<BTreeMap<Vec<u8>, WriteOp>>,
    state: AtomicU8,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> StorageResult<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_ACTIVE => Ok(()),
            STATE_POISONED => Err(StorageError::TransactionPoisoned),
            _ => Err(StorageError::TransactionClosed),
        }
    }

    fn poison(&self) {
        self.state.store(STATE_POISONED, Ordering::Release);
    }

    /// Committed entries at `>= start`, restricted to `prefix` when given.
    fn committed_from(
        &self,
        start: Vec<u8>,
        prefix: Option<Vec<u8>>,
    ) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + '_ {
        let snapshot = self.start_ts;
        self.store
            .entries
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |entry| match &prefix {
                Some(prefix) => entry.key().starts_with(prefix),
                None => true,
            })
            .filter_map(move |entry| {
                entry
                    .value()
                    .visible(snapshot)
                    .map(|value| (entry.key().clone(), value.as_ref().clone()))
            })
    }

    /// Buffered entries at `>= start`, restricted to `prefix` when given.
    fn buffered_from(&self, start: &[u8], prefix: Option<&[u8]>) -> Vec<(Vec<u8>, WriteOp)> {
        self.buffer
            .read()
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| match prefix {
                Some(prefix) => key.starts_with(prefix),
                None => true,
            })
            .map(|(key, op)| (key.clone(), op.clone()))
            .collect()
    }

    fn merged_from(&self, start: Vec<u8>, prefix: Option<Vec<u8>>) -> KvIter<'_> {
        let buffered = self.buffered_from(&start, prefix.as_deref());
        let committed: Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> =
            Box::new(self.committed_from(start, prefix));
        Box::new(MergeIter {
            committed: committed.peekable(),
            buffered: buffered.into_iter().peekable(),
        })
    }
}

impl StoreTransaction for MemoryTransaction {
    fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_active()?;
        if let Some(op) = self.buffer.read().get(key) {
            return Ok(match op {
                WriteOp::Put(value) => Some(value.clone()),
                WriteOp::Delete => None,
            });
        }
        Ok(self
            .store
            .entries
            .get(key)
            .and_then(|entry| entry.value().visible(self.start_ts))
            .map(|value| value.as_ref().clone()))
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.ensure_active()?;
        self.buffer.write().insert(key, WriteOp::Put(value));
        Ok(())
    }

    fn delete(&self, key: Vec<u8>) -> StorageResult<()> {
        self.ensure_active()?;
        self.buffer.write().insert(key, WriteOp::Delete);
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> StorageResult<KvIter<'_>> {
        self.ensure_active()?;
        Ok(self.merged_from(prefix.to_vec(), Some(prefix.to_vec())))
    }

    fn seek(&self, key: &[u8]) -> StorageResult<KvIter<'_>> {
        self.ensure_active()?;
        Ok(self.merged_from(key.to_vec(), None))
    }

    fn commit(&self, timeout: Duration) -> StorageResult<Timestamp> {
        self.ensure_active()?;
        let _guard = self
            .store
            .commit_lock
            .try_lock_for(timeout)
            .ok_or(StorageError::CommitTimeout)?;

        let buffer = self.buffer.write();

        // First committer wins: any key with a version committed after this
        // transaction's snapshot fails the whole commit.
        for key in buffer.keys() {
            if let Some(entry) = self.store.entries.get(key) {
                if let Some(latest) = entry.value().latest_ts() {
                    if latest > self.start_ts {
                        drop(buffer);
                        self.poison();
                        return Err(StorageError::ConcurrentSchemaWrite);
                    }
                }
            }
        }

        let commit_ts = self.store.clock.next()?;
        for (key, op) in buffer.iter() {
            let entry = self
                .store
                .entries
                .get_or_insert_with(key.clone(), VersionChain::default);
            let value = match op {
                WriteOp::Put(value) => Some(Arc::new(value.clone())),
                WriteOp::Delete => None,
            };
            entry.value().push(commit_ts, value);
        }

        self.state.store(STATE_COMMITTED, Ordering::Release);
        Ok(commit_ts)
    }

    fn rollback(&self) -> StorageResult<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_ACTIVE | STATE_POISONED => {
                self.buffer.write().clear();
                self.state.store(STATE_ROLLED_BACK, Ordering::Release);
                Ok(())
            }
            _ => Err(StorageError::TransactionClosed),
        }
    }
}

/// Merges the committed snapshot with the write buffer; the buffer wins on
/// equal keys and buffered deletes suppress committed entries.
struct MergeIter<'a> {
    committed: Peekable<KvIter<'a>>,
    buffered: Peekable<std::vec::IntoIter<(Vec<u8>, WriteOp)>>,
}

impl Iterator for MergeIter<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        use std::cmp::Ordering;

        loop {
            let order = match (self.committed.peek(), self.buffered.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((committed_key, _)), Some((buffered_key, _))) => {
                    committed_key.cmp(buffered_key)
                }
            };
            if order == Ordering::Less {
                return self.committed.next();
            }
            if order == Ordering::Equal {
                // Shadowed by the buffered write.
                self.committed.next();
            }
            match self.buffered.next() {
                Some((key, WriteOp::Put(value))) => return Some((key, value)),
                Some((_, WriteOp::Delete)) => continue,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: &str) -> (Vec<u8>, Vec<u8>) {
        (key.as_bytes().to_vec(), value.as_bytes().to_vec())
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn reads_observe_own_writes() {
        let store = MemoryStore::new();
        let txn = store.begin();
        txn.put(b"a/1".to_vec(), b"x".to_vec()).unwrap();
        assert_eq!(txn.get(b"a/1").unwrap(), Some(b"x".to_vec()));
        txn.delete(b"a/1".to_vec()).unwrap();
        assert_eq!(txn.get(b"a/1").unwrap(), None);
    }

    #[test]
    fn scan_merges_buffer_with_committed_state() {
        let store = MemoryStore::new();

        let setup = store.begin();
        setup.put(b"a/1".to_vec(), b"one".to_vec()).unwrap();
        setup.put(b"a/3".to_vec(), b"three".to_vec()).unwrap();
        setup.put(b"b/1".to_vec(), b"other".to_vec()).unwrap();
        setup.commit(TIMEOUT).unwrap();

        let txn = store.begin();
        txn.put(b"a/2".to_vec(), b"two".to_vec()).unwrap();
        txn.put(b"a/3".to_vec(), b"THREE".to_vec()).unwrap();
        txn.delete(b"a/1".to_vec()).unwrap();

        let scanned: Vec<_> = txn.scan(b"a/").unwrap().collect();
        assert_eq!(scanned, vec![kv("a/2", "two"), kv("a/3", "THREE")]);
    }

    #[test]
    fn seek_starts_at_the_first_key_at_or_after() {
        let store = MemoryStore::new();
        let setup = store.begin();
        for key in [b"k1", b"k3", b"k5"] {
            setup.put(key.to_vec(), b"v".to_vec()).unwrap();
        }
        setup.commit(TIMEOUT).unwrap();

        let txn = store.begin();
        let keys: Vec<_> = txn.seek(b"k2").unwrap().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![b"k3".to_vec(), b"k5".to_vec()]);
    }

    #[test]
    fn snapshots_do_not_observe_later_commits() {
        let store = MemoryStore::new();
        let reader = store.begin();

        let writer = store.begin();
        writer.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        writer.commit(TIMEOUT).unwrap();

        assert_eq!(reader.get(b"k").unwrap(), None);
        assert_eq!(store.begin().get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn overlapping_writers_conflict() {
        let store = MemoryStore::new();
        let first = store.begin();
        let second = store.begin();
        first.put(b"k".to_vec(), b"1".to_vec()).unwrap();
        second.put(b"k".to_vec(), b"2".to_vec()).unwrap();

        first.commit(TIMEOUT).unwrap();
        assert!(matches!(
            second.commit(TIMEOUT),
            Err(StorageError::ConcurrentSchemaWrite)
        ));
        // Poisoned afterwards, but still rollback-able.
        assert!(matches!(
            second.get(b"k"),
            Err(StorageError::TransactionPoisoned)
        ));
        second.rollback().unwrap();
    }

    #[test]
    fn rollback_discards_every_buffered_write() {
        let store = MemoryStore::new();
        let txn = store.begin();
        txn.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        txn.rollback().unwrap();
        assert_eq!(store.begin().get(b"k").unwrap(), None);
    }

    #[test]
    fn committed_transactions_reject_further_operations() {
        let store = MemoryStore::new();
        let txn = store.begin();
        txn.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        txn.commit(TIMEOUT).unwrap();
        assert!(matches!(
            txn.put(b"k2".to_vec(), b"v".to_vec()),
            Err(StorageError::TransactionClosed)
        ));
    }

    #[test]
    fn commit_times_out_while_another_commit_holds_the_lock() {
        let store = MemoryStore::new();
        let txn = store.begin();
        txn.put(b"k".to_vec(), b"v".to_vec()).unwrap();

        let inner = store.inner.clone();
        let guard = inner.commit_lock.lock();
        assert!(matches!(
            txn.commit(Duration::from_millis(10)),
            Err(StorageError::CommitTimeout)
        ));
        drop(guard);
    }

    #[test]
    fn random_interleavings_preserve_scan_order() {
        use rand::Rng;

        let store = MemoryStore::new();
        let setup = store.begin();
        let mut rng = rand::rng();
        for _ in 0..64 {
            let key: u32 = rng.random_range(0..512);
            setup
                .put(key.to_be_bytes().to_vec(), b"v".to_vec())
                .unwrap();
        }
        setup.commit(TIMEOUT).unwrap();

        let txn = store.begin();
        for _ in 0..64 {
            let key: u32 = rng.random_range(0..512);
            if rng.random_bool(0.5) {
                txn.put(key.to_be_bytes().to_vec(), b"w".to_vec()).unwrap();
            } else {
                txn.delete(key.to_be_bytes().to_vec()).unwrap();
            }
        }

        let keys: Vec<_> = txn.scan(&[]).unwrap().map(|(key, _)| key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
    }
}
