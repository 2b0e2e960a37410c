//! Shared model types for the typegraph schema core.
//!
//! This crate defines the identifiers, kind tags and label types that the
//! encoding, storage and schema layers exchange.

pub mod allocator;
pub mod label;
pub mod types;

pub use allocator::TypeIdAllocator;
pub use label::Label;
pub use types::{Annotation, Annotations, EdgeKind, Kind, TypeId, ValueType};
