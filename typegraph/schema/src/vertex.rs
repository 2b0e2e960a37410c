use parking_lot::RwLock;
use smol_str::SmolStr;
use typegraph_common::{Kind, Label, TypeId, TypeIdAllocator, ValueType};
use typegraph_encoding::Direction;

use crate::adjacency::TypeAdjacency;

/// Lifecycle of a vertex within the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStatus {
    /// Loaded from storage, unmodified.
    Persisted,
    /// Created by this transaction; nothing persisted yet.
    Buffered,
    /// Loaded from storage, property state changed by this transaction.
    Modified,
    /// Deleted by this transaction.
    Tombstoned,
}

#[derive(Debug)]
pub(crate) struct VertexState {
    /// `None` until properties are loaded (id-only dereference).
    pub label: Option<SmolStr>,
    pub scope: Option<SmolStr>,
    pub is_abstract: bool,
    pub value_type: Option<ValueType>,
    pub properties_loaded: bool,
    pub status: VertexStatus,
}

/// An in-memory type vertex.
///
/// Vertices are interned by id in the schema graph: dereferencing the same
/// id twice yields the same `Arc`. Scalar properties load lazily from
/// storage on first read; adjacency edges load lazily per direction.
#[derive(Debug)]
pub struct TypeVertex {
    id: TypeId,
    kind: Kind,
    pub(crate) state: RwLock<VertexState>,
    out: TypeAdjacency,
    inbound: TypeAdjacency,
}

impl TypeVertex {
    /// A vertex created by this transaction: properties are present and both
    /// adjacencies are trivially loaded.
    pub(crate) fn buffered(
        id: TypeId,
        kind: Kind,
        label: SmolStr,
        scope: Option<SmolStr>,
    ) -> Self {
        Self {
            id,
            kind,
            state: RwLock::new(VertexState {
                label: Some(label),
                scope,
                is_abstract: false,
                value_type: None,
                properties_loaded: true,
                status: VertexStatus::Buffered,
            }),
            out: TypeAdjacency::loaded(Direction::Out),
            inbound: TypeAdjacency::loaded(Direction::In),
        }
    }

    /// A vertex referenced by id; properties and edges load on demand.
    pub(crate) fn lazy(id: TypeId, kind: Kind) -> Self {
        Self {
            id,
            kind,
            state: RwLock::new(VertexState {
                label: None,
                scope: None,
                is_abstract: false,
                value_type: None,
                properties_loaded: false,
                status: VertexStatus::Persisted,
            }),
            out: TypeAdjacency::unloaded(Direction::Out),
            inbound: TypeAdjacency::unloaded(Direction::In),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.id < TypeIdAllocator::FIRST_DYNAMIC
    }

    pub fn status(&self) -> VertexStatus {
        self.state.read().status
    }

    pub fn is_tombstoned(&self) -> bool {
        self.status() == VertexStatus::Tombstoned
    }

    /// The vertex label. Properties must be loaded first; the schema graph
    /// guarantees this on every public path.
    pub fn label(&self) -> Label {
        let state = self.state.read();
        let name = state
            .label
            .clone()
            .unwrap_or_else(|| SmolStr::new_static("<unloaded>"));
        match &state.scope {
            Some(scope) => Label::scoped(name, scope.clone()),
            None => Label::new(name),
        }
    }

    pub fn is_abstract(&self) -> bool {
        self.state.read().is_abstract
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.state.read().value_type
    }

    pub fn properties_loaded(&self) -> bool {
        self.state.read().properties_loaded
    }

    pub(crate) fn outbound(&self) -> &TypeAdjacency {
        &self.out
    }

    pub(crate) fn inbound(&self) -> &TypeAdjacency {
        &self.inbound
    }

    pub(crate) fn adjacency(&self, direction: Direction) -> &TypeAdjacency {
        match direction {
            Direction::Out => &self.out,
            Direction::In => &self.inbound,
        }
    }

    /// Transition `Persisted` to `Modified`; buffered and tombstoned
    /// vertices keep their status.
    pub(crate) fn mark_modified(&self) {
        let mut state = self.state.write();
        if state.status == VertexStatus::Persisted {
            state.status = VertexStatus::Modified;
        }
    }

    pub(crate) fn mark_tombstoned(&self) {
        self.state.write().status = VertexStatus::Tombstoned;
    }
}
