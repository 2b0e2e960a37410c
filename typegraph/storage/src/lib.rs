//! Ordered key-value backing store for the typegraph schema core.
//!
//! The schema graph talks to storage through the [`SchemaStore`] and
//! [`StoreTransaction`] traits: buffered writes with read-your-writes
//! visibility, snapshot isolation across transactions, and atomic commit.
//! [`MemoryStore`] is the in-memory reference implementation.

pub mod error;
pub mod memory;
pub mod store;
pub mod timestamp;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryStore, MemoryTransaction};
pub use store::{KvIter, SchemaStore, StoreTransaction};
pub use timestamp::{Timestamp, TimestampGenerator};
