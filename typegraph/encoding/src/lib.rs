//! Persisted key layout for the typegraph schema core.
//!
//! Every persisted record is addressed by a byte key rooted at a one-byte
//! schema version. Integer components are big-endian so byte-lexicographic
//! order equals numeric order, which the storage layer relies on for sorted
//! prefix scans.

pub mod error;
pub mod keys;
pub mod values;

pub use error::{EncodingError, EncodingResult};
pub use keys::{
    Direction, EdgeKeyParts, KeyBytes, PropertyTag, SCHEMA_VERSION, decode_edge_key,
    decode_index_key, decode_property_key, decode_vertex_key, edge_key, edge_kind_prefix,
    edge_prefix, index_key, index_kind_prefix, property_key, vertex_key, vertex_kind_prefix,
    vertex_prefix,
};
pub use values::{
    decode_bool, decode_edge_value, decode_type_id, decode_value_type, encode_bool,
    encode_edge_value, encode_type_id, encode_value_type,
};
