use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::types::TypeId;

#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("type id space exhausted, reached {0}")]
    IdOverflow(TypeId),
}

/// Process-wide allocator for [`TypeId`]s.
///
/// Allocation is a single atomic fetch-add; ids handed out are never reused,
/// even when the transaction that requested them aborts. Ids below
/// [`TypeIdAllocator::FIRST_DYNAMIC`] are reserved for root vertices.
#[derive(Debug)]
pub struct TypeIdAllocator {
    counter: AtomicU32,
}

impl TypeIdAllocator {
    /// First id handed out for user-defined types.
    pub const FIRST_DYNAMIC: TypeId = 16;

    pub fn new() -> Self {
        Self::starting_at(Self::FIRST_DYNAMIC)
    }

    /// Resumes allocation at `next`, e.g. after recovering the highest
    /// persisted id from storage.
    pub fn starting_at(next: TypeId) -> Self {
        Self {
            counter: AtomicU32::new(next.max(Self::FIRST_DYNAMIC)),
        }
    }

    pub fn allocate(&self) -> Result<TypeId, AllocatorError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        if id == TypeId::MAX {
            return Err(AllocatorError::IdOverflow(id));
        }
        Ok(id)
    }

    /// Ensures future allocations are strictly above `id`.
    pub fn advance_past(&self, id: TypeId) {
        self.counter.fetch_max(id.saturating_add(1), Ordering::SeqCst);
    }
}

impl Default for TypeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
