use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("commit-ts overflow, reached {0}")]
    CommitTsOverflow(u64),
}

/// A commit timestamp. Versions carrying a timestamp at or below a
/// transaction's start timestamp are visible to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn with_ts(timestamp: u64) -> Self {
        Self(timestamp)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Monotone commit timestamp generator shared by all transactions of a store.
#[derive(Debug)]
pub struct TimestampGenerator {
    counter: AtomicU64,
}

impl TimestampGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Generate the next timestamp.
    pub fn next(&self) -> Result<Timestamp, TimestampError> {
        let previous = self.counter.fetch_add(1, Ordering::SeqCst);
        if previous == u64::MAX {
            return Err(TimestampError::CommitTsOverflow(previous));
        }
        Ok(Timestamp(previous + 1))
    }

    /// Get the current timestamp without incrementing.
    pub fn current(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::SeqCst))
    }
}

impl Default for TimestampGenerator {
    fn default() -> Self {
        Self::new()
    }
}
