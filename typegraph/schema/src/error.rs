use std::fmt::{Display, Formatter};

use thiserror::Error;
use typegraph_common::allocator::AllocatorError;
use typegraph_common::{Kind, Label};
use typegraph_encoding::EncodingError;
use typegraph_storage::StorageError;

use crate::validator::SchemaViolation;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// The violations collected by one validator invocation.
#[derive(Debug, PartialEq, Eq)]
pub struct Violations(pub Vec<SchemaViolation>);

impl Display for Violations {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, violation) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SchemaError {
    /// The mutation (or commit) violates structural schema rules. The
    /// transaction remains usable.
    #[error("schema validation failed: {0}")]
    Validation(Violations),
    /// Root vertices are immutable. The transaction remains usable.
    #[error("root type '{label}' may not be modified or deleted")]
    RootTypeMutation { label: Label },
    #[error("type '{label}' not found")]
    TypeNotFound { label: Label },
    #[error("'{label}' is a {actual:?} type, expected {expected:?}")]
    KindMismatch {
        label: Label,
        expected: Kind,
        actual: Kind,
    },
    /// The subtype graph reached itself while walking supertypes. Indicates
    /// a bug; the transaction is poisoned.
    #[error("cycle detected in the subtype graph at '{label}'")]
    SchemaCycle { label: Label },
    /// An adjacency held an edge whose peer did not hold the mirror entry.
    /// Indicates a bug; the transaction is poisoned.
    #[error("adjacency mirror asymmetry between type {from} and type {to}")]
    MirrorAsymmetry { from: u32, to: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
}

impl SchemaError {
    pub fn validation(violations: Vec<SchemaViolation>) -> Self {
        SchemaError::Validation(Violations(violations))
    }

    /// Violations attached to this error, when it is a validation failure.
    pub fn violations(&self) -> Option<&[SchemaViolation]> {
        match self {
            SchemaError::Validation(Violations(violations)) => Some(violations),
            _ => None,
        }
    }
}
