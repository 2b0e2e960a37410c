use smallvec::SmallVec;
use typegraph_common::{EdgeKind, Kind, Label, TypeId};

use crate::error::{EncodingError, EncodingResult};

/// Version byte at the root of every key. Readers reject anything else.
pub const SCHEMA_VERSION: u8 = 0;

const PREFIX_VERTEX: u8 = 0x10;
const PREFIX_INDEX: u8 = 0x20;

const DIRECTION_OUT: u8 = 0x30;
const DIRECTION_IN: u8 = 0x31;

const VERTEX_KEY_LEN: usize = 7;
const EDGE_KEY_LEN: usize = 2 * VERTEX_KEY_LEN + 2;
const PROPERTY_KEY_LEN: usize = VERTEX_KEY_LEN + 1;

/// Key buffers are short; edge keys (16 bytes) are the longest fixed shape.
pub type KeyBytes = SmallVec<[u8; 24]>;

/// Direction of an edge record. Every edge is written twice, once per
/// endpoint, so a prefix scan at either endpoint yields its incident edges
/// in sorted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    pub fn reversed(&self) -> Self {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Direction::Out => DIRECTION_OUT,
            Direction::In => DIRECTION_IN,
        }
    }

    fn from_byte(byte: u8) -> EncodingResult<Self> {
        match byte {
            DIRECTION_OUT => Ok(Direction::Out),
            DIRECTION_IN => Ok(Direction::In),
            _ => Err(EncodingError::MalformedKey("unknown direction byte")),
        }
    }
}

/// Scalar property slot appended to a vertex key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyTag {
    Label,
    Scope,
    Abstract,
    ValueType,
}

impl PropertyTag {
    fn to_byte(self) -> u8 {
        match self {
            PropertyTag::Label => 0x50,
            PropertyTag::Scope => 0x51,
            PropertyTag::Abstract => 0x52,
            PropertyTag::ValueType => 0x53,
        }
    }

    fn from_byte(byte: u8) -> EncodingResult<Self> {
        match byte {
            0x50 => Ok(PropertyTag::Label),
            0x51 => Ok(PropertyTag::Scope),
            0x52 => Ok(PropertyTag::Abstract),
            0x53 => Ok(PropertyTag::ValueType),
            _ => Err(EncodingError::MalformedKey("unknown property tag")),
        }
    }
}

fn kind_to_byte(kind: Kind) -> u8 {
    match kind {
        Kind::Root => 0x01,
        Kind::Entity => 0x02,
        Kind::Relation => 0x03,
        Kind::Attribute => 0x04,
        Kind::Role => 0x05,
    }
}

fn kind_from_byte(byte: u8) -> EncodingResult<Kind> {
    match byte {
        0x01 => Ok(Kind::Root),
        0x02 => Ok(Kind::Entity),
        0x03 => Ok(Kind::Relation),
        0x04 => Ok(Kind::Attribute),
        0x05 => Ok(Kind::Role),
        _ => Err(EncodingError::MalformedKey("unknown vertex kind byte")),
    }
}

fn edge_kind_to_byte(kind: EdgeKind) -> u8 {
    match kind {
        EdgeKind::Sub => 0x01,
        EdgeKind::Owns => 0x02,
        EdgeKind::OwnsKey => 0x03,
        EdgeKind::Plays => 0x04,
        EdgeKind::Relates => 0x05,
    }
}

fn edge_kind_from_byte(byte: u8) -> EncodingResult<EdgeKind> {
    match byte {
        0x01 => Ok(EdgeKind::Sub),
        0x02 => Ok(EdgeKind::Owns),
        0x03 => Ok(EdgeKind::OwnsKey),
        0x04 => Ok(EdgeKind::Plays),
        0x05 => Ok(EdgeKind::Relates),
        _ => Err(EncodingError::MalformedKey("unknown edge kind byte")),
    }
}

fn check_version(bytes: &[u8]) -> EncodingResult<()> {
    match bytes.first() {
        Some(&SCHEMA_VERSION) => Ok(()),
        Some(&other) => Err(EncodingError::UnsupportedSchemaVersion(other)),
        None => Err(EncodingError::MalformedKey("empty key")),
    }
}

/// Prefix covering every vertex-rooted key (vertices, edges, properties).
pub fn vertex_prefix() -> KeyBytes {
    SmallVec::from_slice(&[SCHEMA_VERSION, PREFIX_VERTEX])
}

/// Prefix covering every vertex-rooted key of one kind.
pub fn vertex_kind_prefix(kind: Kind) -> KeyBytes {
    SmallVec::from_slice(&[SCHEMA_VERSION, PREFIX_VERTEX, kind_to_byte(kind)])
}

/// `version ‖ vertex-prefix ‖ kind ‖ id (u32 BE)`
pub fn vertex_key(kind: Kind, id: TypeId) -> KeyBytes {
    let mut key = SmallVec::with_capacity(VERTEX_KEY_LEN);
    key.extend_from_slice(&[SCHEMA_VERSION, PREFIX_VERTEX, kind_to_byte(kind)]);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

pub fn decode_vertex_key(bytes: &[u8]) -> EncodingResult<(Kind, TypeId)> {
    check_version(bytes)?;
    if bytes.len() != VERTEX_KEY_LEN {
        return Err(EncodingError::MalformedKey("vertex key length"));
    }
    if bytes[1] != PREFIX_VERTEX {
        return Err(EncodingError::MalformedKey("not a vertex key"));
    }
    let kind = kind_from_byte(bytes[2])?;
    let id = TypeId::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
    Ok((kind, id))
}

/// Prefix covering all edge records of a vertex in one direction.
pub fn edge_prefix(from: (Kind, TypeId), direction: Direction) -> KeyBytes {
    let mut key = vertex_key(from.0, from.1);
    key.push(direction.to_byte());
    key
}

/// Prefix covering all edge records of one kind at a vertex in one direction.
pub fn edge_kind_prefix(from: (Kind, TypeId), direction: Direction, kind: EdgeKind) -> KeyBytes {
    let mut key = edge_prefix(from, direction);
    key.push(edge_kind_to_byte(kind));
    key
}

/// `vertex-key(from) ‖ direction ‖ edge-kind ‖ vertex-key(to)`
pub fn edge_key(
    from: (Kind, TypeId),
    direction: Direction,
    kind: EdgeKind,
    to: (Kind, TypeId),
) -> KeyBytes {
    let mut key = edge_kind_prefix(from, direction, kind);
    key.extend_from_slice(&vertex_key(to.0, to.1));
    key
}

/// Decoded components of an edge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeKeyParts {
    pub from: (Kind, TypeId),
    pub direction: Direction,
    pub kind: EdgeKind,
    pub to: (Kind, TypeId),
}

pub fn decode_edge_key(bytes: &[u8]) -> EncodingResult<EdgeKeyParts> {
    check_version(bytes)?;
    if bytes.len() != EDGE_KEY_LEN {
        return Err(EncodingError::MalformedKey("edge key length"));
    }
    let from = decode_vertex_key(&bytes[..VERTEX_KEY_LEN])?;
    let direction = Direction::from_byte(bytes[VERTEX_KEY_LEN])?;
    let kind = edge_kind_from_byte(bytes[VERTEX_KEY_LEN + 1])?;
    let to = decode_vertex_key(&bytes[VERTEX_KEY_LEN + 2..])?;
    Ok(EdgeKeyParts {
        from,
        direction,
        kind,
        to,
    })
}

/// `vertex-key ‖ property-tag`
pub fn property_key(kind: Kind, id: TypeId, tag: PropertyTag) -> KeyBytes {
    let mut key = vertex_key(kind, id);
    key.push(tag.to_byte());
    key
}

pub fn decode_property_key(bytes: &[u8]) -> EncodingResult<(Kind, TypeId, PropertyTag)> {
    check_version(bytes)?;
    if bytes.len() != PROPERTY_KEY_LEN {
        return Err(EncodingError::MalformedKey("property key length"));
    }
    let (kind, id) = decode_vertex_key(&bytes[..VERTEX_KEY_LEN])?;
    let tag = PropertyTag::from_byte(bytes[VERTEX_KEY_LEN])?;
    Ok((kind, id, tag))
}

/// Prefix covering every label-index entry of one kind.
pub fn index_kind_prefix(kind: Kind) -> KeyBytes {
    SmallVec::from_slice(&[SCHEMA_VERSION, PREFIX_INDEX, kind_to_byte(kind)])
}

/// `version ‖ index-prefix ‖ kind ‖ label ‖ 0x00 ‖ scope` → id bytes.
///
/// Labels never contain NUL, so the separator keeps the codec injective.
pub fn index_key(kind: Kind, label: &Label) -> KeyBytes {
    let mut key = index_kind_prefix(kind);
    key.extend_from_slice(label.name().as_bytes());
    key.push(0x00);
    if let Some(scope) = label.scope() {
        key.extend_from_slice(scope.as_bytes());
    }
    key
}

pub fn decode_index_key(bytes: &[u8]) -> EncodingResult<(Kind, Label)> {
    check_version(bytes)?;
    if bytes.len() < 4 {
        return Err(EncodingError::MalformedKey("index key length"));
    }
    if bytes[1] != PREFIX_INDEX {
        return Err(EncodingError::MalformedKey("not an index key"));
    }
    let kind = kind_from_byte(bytes[2])?;
    let rest = &bytes[3..];
    let separator = rest
        .iter()
        .position(|&b| b == 0x00)
        .ok_or(EncodingError::MalformedKey("missing label separator"))?;
    let name = str::from_utf8(&rest[..separator])
        .map_err(|_| EncodingError::MalformedKey("label is not utf-8"))?;
    let scope_bytes = &rest[separator + 1..];
    let label = if scope_bytes.is_empty() {
        Label::new(name)
    } else {
        let scope = str::from_utf8(scope_bytes)
            .map_err(|_| EncodingError::MalformedKey("scope is not utf-8"))?;
        Label::scoped(name, scope)
    };
    Ok((kind, label))
}
