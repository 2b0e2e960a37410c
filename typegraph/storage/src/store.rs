use std::time::Duration;

use crate::error::StorageResult;
use crate::timestamp::Timestamp;

/// Sorted stream of key-value pairs, ascending by key.
pub type KvIter<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

/// An ordered key-value store that hands out snapshot-isolated transactions.
pub trait SchemaStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Begin a transaction reading from the current committed snapshot.
    fn begin(&self) -> Self::Transaction;
}

/// A buffered transaction over an ordered key-value store.
///
/// Reads observe the transaction's own writes; isolation with respect to
/// other transactions is snapshot at transaction start. Nothing is durable
/// before [`StoreTransaction::commit`], which is atomic: either every
/// buffered write becomes visible or none.
pub trait StoreTransaction {
    /// The snapshot this transaction reads from.
    fn start_ts(&self) -> Timestamp;

    /// Point lookup. Absent keys are `None`, not an error.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Buffer a write of `key`.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Buffer a deletion of `key`.
    fn delete(&self, key: Vec<u8>) -> StorageResult<()>;

    /// Sorted scan of every key starting with `prefix`, merging the
    /// committed snapshot with this transaction's write buffer.
    fn scan(&self, prefix: &[u8]) -> StorageResult<KvIter<'_>>;

    /// Sorted scan starting at the first key `>= key`.
    fn seek(&self, key: &[u8]) -> StorageResult<KvIter<'_>>;

    /// Atomically publish the write buffer. Fails with
    /// [`crate::StorageError::ConcurrentSchemaWrite`] when another
    /// transaction committed an overlapping key first, and with
    /// [`crate::StorageError::CommitTimeout`] when the store write lock
    /// cannot be acquired within `timeout`.
    fn commit(&self, timeout: Duration) -> StorageResult<Timestamp>;

    /// Discard the write buffer. Valid on poisoned transactions.
    fn rollback(&self) -> StorageResult<()>;
}
