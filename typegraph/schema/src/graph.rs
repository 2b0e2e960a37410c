use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use typegraph_common::{
    Annotation, Annotations, EdgeKind, Kind, Label, TypeId, TypeIdAllocator, ValueType,
};
use typegraph_encoding::{self as encoding, Direction, PropertyTag};
use typegraph_storage::{SchemaStore, StoreTransaction, Timestamp};

use crate::adjacency::EdgeSlots;
use crate::error::{SchemaError, SchemaResult};
use crate::instance::InstanceReader;
use crate::iter::TypeIdIter;
use crate::validator::{self, SchemaViolation};
use crate::vertex::{TypeVertex, VertexStatus};

/// Reserved ids of the root vertices, created once per store.
pub const ROOT_THING: TypeId = 1;
pub const ROOT_ENTITY: TypeId = 2;
pub const ROOT_RELATION: TypeId = 3;
pub const ROOT_ATTRIBUTE: TypeId = 4;
pub const ROOT_ROLE: TypeId = 5;

pub(crate) fn is_root_id(id: TypeId) -> bool {
    id < TypeIdAllocator::FIRST_DYNAMIC
}

fn root_id(kind: Kind) -> TypeId {
    match kind {
        Kind::Root => ROOT_THING,
        Kind::Entity => ROOT_ENTITY,
        Kind::Relation => ROOT_RELATION,
        Kind::Attribute => ROOT_ATTRIBUTE,
        Kind::Role => ROOT_ROLE,
    }
}

const ROOT_DEFINITIONS: [(TypeId, Kind, &str, Option<&str>); 5] = [
    (ROOT_THING, Kind::Root, "thing", None),
    (ROOT_ENTITY, Kind::Entity, "entity", None),
    (ROOT_RELATION, Kind::Relation, "relation", None),
    (ROOT_ATTRIBUTE, Kind::Attribute, "attribute", None),
    (ROOT_ROLE, Kind::Role, "role", Some("relation")),
];

/// Write the root vertices and their edges on first initialisation.
/// Idempotent: a store that already holds the `thing` root is left alone.
pub fn initialise<S: SchemaStore>(store: &S, timeout: Duration) -> SchemaResult<()> {
    let txn = store.begin();
    let thing_index = encoding::index_key(Kind::Root, &Label::new("thing"));
    if txn.get(&thing_index)?.is_some() {
        txn.rollback()?;
        return Ok(());
    }
    for (id, kind, name, scope) in ROOT_DEFINITIONS {
        let label = match scope {
            Some(scope) => Label::scoped(name, scope),
            None => Label::new(name),
        };
        txn.put(encoding::vertex_key(kind, id).to_vec(), Vec::new())?;
        txn.put(
            encoding::property_key(kind, id, PropertyTag::Label).to_vec(),
            name.as_bytes().to_vec(),
        )?;
        if let Some(scope) = scope {
            txn.put(
                encoding::property_key(kind, id, PropertyTag::Scope).to_vec(),
                scope.as_bytes().to_vec(),
            )?;
        }
        txn.put(
            encoding::property_key(kind, id, PropertyTag::Abstract).to_vec(),
            encoding::encode_bool(true).to_vec(),
        )?;
        txn.put(
            encoding::index_key(kind, &label).to_vec(),
            encoding::encode_type_id(id).to_vec(),
        )?;
    }
    for (id, kind) in [
        (ROOT_ENTITY, Kind::Entity),
        (ROOT_RELATION, Kind::Relation),
        (ROOT_ATTRIBUTE, Kind::Attribute),
        (ROOT_ROLE, Kind::Role),
    ] {
        write_edge_records(
            &txn,
            (kind, id),
            EdgeKind::Sub,
            (Kind::Root, ROOT_THING),
            None,
            &Annotations::new(),
        )?;
    }
    // The relation root declares the role root; subtype declarations
    // override it by default, which keeps it out of related-role closures.
    write_edge_records(
        &txn,
        (Kind::Relation, ROOT_RELATION),
        EdgeKind::Relates,
        (Kind::Role, ROOT_ROLE),
        None,
        &Annotations::new(),
    )?;
    txn.commit(timeout)?;
    Ok(())
}

fn write_edge_records<T: StoreTransaction>(
    txn: &T,
    from: (Kind, TypeId),
    kind: EdgeKind,
    to: (Kind, TypeId),
    overridden: Option<TypeId>,
    annotations: &Annotations,
) -> SchemaResult<()> {
    let value = encoding::encode_edge_value(overridden, annotations);
    txn.put(
        encoding::edge_key(from, Direction::Out, kind, to).to_vec(),
        value.clone(),
    )?;
    txn.put(
        encoding::edge_key(to, Direction::In, kind, from).to_vec(),
        value,
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ClosureKind {
    Supertypes,
    Subtypes,
    RelatedRoles,
    Owns,
    Plays,
}

#[derive(Debug)]
struct CachedClosure {
    epoch: u64,
    ids: Arc<Vec<TypeId>>,
}

/// A journalled deletion of one persisted edge (both direction records).
#[derive(Debug, Clone, Copy)]
struct EdgeDelete {
    from: (Kind, TypeId),
    kind: EdgeKind,
    to: (Kind, TypeId),
}

/// The transactional schema graph.
///
/// Owns the interned vertex cache, the label index, and epoch-stamped
/// transitive-closure caches; mutations validate declaratively at the call
/// site and the whole buffered state re-validates at commit before any byte
/// reaches storage.
#[derive(Debug)]
pub struct SchemaGraph<T: StoreTransaction> {
    store: T,
    allocator: Arc<TypeIdAllocator>,
    instances: Arc<dyn InstanceReader>,
    vertices: DashMap<TypeId, Arc<TypeVertex>>,
    labels: DashMap<(Kind, Label), TypeId>,
    closures: DashMap<(TypeId, ClosureKind), CachedClosure>,
    /// Bumped by every mutation; stale closure entries recompute lazily.
    epoch: AtomicU64,
    edge_deletes: RwLock<Vec<EdgeDelete>>,
    index_deletes: RwLock<Vec<(Kind, Label)>>,
    poisoned: AtomicBool,
}

impl<T: StoreTransaction> SchemaGraph<T> {
    pub fn new(
        store: T,
        allocator: Arc<TypeIdAllocator>,
        instances: Arc<dyn InstanceReader>,
    ) -> Self {
        Self {
            store,
            allocator,
            instances,
            vertices: DashMap::new(),
            labels: DashMap::new(),
            closures: DashMap::new(),
            epoch: AtomicU64::new(0),
            edge_deletes: RwLock::new(Vec::new()),
            index_deletes: RwLock::new(Vec::new()),
            poisoned: AtomicBool::new(false),
        }
    }

    pub(crate) fn instances(&self) -> &dyn InstanceReader {
        self.instances.as_ref()
    }

    fn ensure_usable(&self) -> SchemaResult<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(typegraph_storage::StorageError::TransactionPoisoned.into());
        }
        Ok(())
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    // ---- loading ----

    /// Get-or-load the vertex with the given id. Requesting the same id
    /// twice returns the same instance.
    pub(crate) fn vertex(&self, kind: Kind, id: TypeId) -> SchemaResult<Arc<TypeVertex>> {
        if let Some(vertex) = self.vertices.get(&id) {
            return Ok(vertex.clone());
        }
        let key = encoding::vertex_key(kind, id);
        if self.store.get(&key)?.is_none() {
            return Err(SchemaError::TypeNotFound {
                label: Label::new(format!("#{id}")),
            });
        }
        let vertex = self
            .vertices
            .entry(id)
            .or_insert_with(|| Arc::new(TypeVertex::lazy(id, kind)))
            .value()
            .clone();
        Ok(vertex)
    }

    /// Fetch persisted scalar properties on first access.
    pub(crate) fn ensure_properties(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<()> {
        if vertex.properties_loaded() {
            return Ok(());
        }
        let kind = vertex.kind();
        let id = vertex.id();
        let label = self
            .store
            .get(&encoding::property_key(kind, id, PropertyTag::Label))?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| typegraph_encoding::EncodingError::MalformedKey("label value"))
            })
            .transpose()?;
        let scope = self
            .store
            .get(&encoding::property_key(kind, id, PropertyTag::Scope))?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| typegraph_encoding::EncodingError::MalformedKey("scope value"))
            })
            .transpose()?;
        let is_abstract = self
            .store
            .get(&encoding::property_key(kind, id, PropertyTag::Abstract))?
            .map(|bytes| encoding::decode_bool(&bytes))
            .transpose()?
            .unwrap_or(false);
        let value_type = self
            .store
            .get(&encoding::property_key(kind, id, PropertyTag::ValueType))?
            .map(|bytes| encoding::decode_value_type(&bytes))
            .transpose()?;
        {
            let mut state = vertex.state.write();
            if state.properties_loaded {
                return Ok(());
            }
            if state.label.is_none() {
                state.label = label.map(SmolStr::from);
            }
            state.scope = scope.map(SmolStr::from);
            state.is_abstract = is_abstract;
            state.value_type = value_type;
            state.properties_loaded = true;
        }
        self.labels
            .insert((vertex.kind(), vertex.label()), vertex.id());
        Ok(())
    }

    /// Pull the persisted edges of one direction before its first use, so a
    /// later load can never resurrect an edge removed in this transaction.
    pub(crate) fn ensure_edges(
        &self,
        vertex: &Arc<TypeVertex>,
        direction: Direction,
    ) -> SchemaResult<()> {
        let adjacency = vertex.adjacency(direction);
        if adjacency.is_loaded() {
            return Ok(());
        }
        let prefix = encoding::edge_prefix((vertex.kind(), vertex.id()), adjacency.direction());
        let records: Vec<(Vec<u8>, Vec<u8>)> = self.store.scan(&prefix)?.collect();
        for (key, value) in records {
            let parts = encoding::decode_edge_key(&key)?;
            let (overridden, annotations) = encoding::decode_edge_value(&value)?;
            adjacency.cache(
                parts.kind,
                parts.to.1,
                EdgeSlots::loaded(parts.to.0, overridden, annotations),
            );
        }
        adjacency.mark_loaded();
        Ok(())
    }

    // ---- edge primitives (mirror-symmetric) ----

    fn put_edge(
        &self,
        from: &Arc<TypeVertex>,
        kind: EdgeKind,
        to: &Arc<TypeVertex>,
        overridden: Option<TypeId>,
        annotations: Annotations,
    ) -> SchemaResult<()> {
        self.ensure_edges(from, Direction::Out)?;
        self.ensure_edges(to, Direction::In)?;
        from.outbound().insert(
            kind,
            to.id(),
            EdgeSlots::buffered(to.kind(), overridden, annotations.clone()),
        );
        to.inbound().insert(
            kind,
            from.id(),
            EdgeSlots::buffered(from.kind(), overridden, annotations),
        );
        self.bump_epoch();
        Ok(())
    }

    fn remove_edge(
        &self,
        from: &Arc<TypeVertex>,
        kind: EdgeKind,
        to: &Arc<TypeVertex>,
    ) -> SchemaResult<()> {
        self.ensure_edges(from, Direction::Out)?;
        self.ensure_edges(to, Direction::In)?;
        let out = from.outbound().remove(kind, to.id());
        let inbound = to.inbound().remove(kind, from.id());
        match (&out, &inbound) {
            (Some(out), Some(_)) => {
                if out.persisted {
                    self.edge_deletes.write().push(EdgeDelete {
                        from: (from.kind(), from.id()),
                        kind,
                        to: (to.kind(), to.id()),
                    });
                }
            }
            // Removing an absent edge is a no-op.
            (None, None) => {}
            _ => {
                self.poison();
                tracing::error!(
                    from = from.id(),
                    to = to.id(),
                    ?kind,
                    "adjacency mirror asymmetry detected"
                );
                return Err(SchemaError::MirrorAsymmetry {
                    from: from.id(),
                    to: to.id(),
                });
            }
        }
        self.bump_epoch();
        Ok(())
    }

    /// Remove every incident edge of `vertex`, mirrors included.
    fn delete_all_edges(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<()> {
        self.ensure_edges(vertex, Direction::Out)?;
        self.ensure_edges(vertex, Direction::In)?;
        let outgoing: Vec<_> = vertex.outbound().iter_all().collect();
        for (key, slots) in outgoing {
            let peer = self.vertex(slots.peer_kind, key.peer)?;
            self.remove_edge(vertex, key.kind, &peer)?;
        }
        let incoming: Vec<_> = vertex.inbound().iter_all().collect();
        for (key, slots) in incoming {
            let peer = self.vertex(slots.peer_kind, key.peer)?;
            self.remove_edge(&peer, key.kind, vertex)?;
        }
        Ok(())
    }

    // ---- supertype walks and closures ----

    pub(crate) fn direct_supertype(
        &self,
        vertex: &Arc<TypeVertex>,
    ) -> SchemaResult<Option<Arc<TypeVertex>>> {
        self.ensure_edges(vertex, Direction::Out)?;
        match vertex.outbound().iter_kind(EdgeKind::Sub).next() {
            Some((key, slots)) => Ok(Some(self.vertex(slots.peer_kind, key.peer)?)),
            None => Ok(None),
        }
    }

    fn cached<F>(&self, id: TypeId, kind: ClosureKind, compute: F) -> SchemaResult<Arc<Vec<TypeId>>>
    where
        F: FnOnce() -> SchemaResult<Vec<TypeId>>,
    {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if let Some(entry) = self.closures.get(&(id, kind)) {
            if entry.epoch == epoch {
                return Ok(entry.ids.clone());
            }
        }
        let ids = Arc::new(compute()?);
        self.closures.insert(
            (id, kind),
            CachedClosure {
                epoch,
                ids: ids.clone(),
            },
        );
        Ok(ids)
    }

    /// All transitive supertypes of `vertex`, nearest first (not sorted).
    pub(crate) fn supertype_ids(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<Arc<Vec<TypeId>>> {
        self.cached(vertex.id(), ClosureKind::Supertypes, || {
            let mut ids = Vec::new();
            let mut visited: HashSet<TypeId> = HashSet::from([vertex.id()]);
            let mut current = vertex.clone();
            while let Some(supertype) = self.direct_supertype(&current)? {
                if !visited.insert(supertype.id()) {
                    self.poison();
                    self.ensure_properties(&supertype)?;
                    tracing::error!(vertex = vertex.id(), "cycle in the subtype graph");
                    return Err(SchemaError::SchemaCycle {
                        label: supertype.label(),
                    });
                }
                ids.push(supertype.id());
                current = supertype;
            }
            Ok(ids)
        })
    }

    /// All transitive subtypes of `vertex`, ascending by id.
    pub(crate) fn subtype_ids(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<Arc<Vec<TypeId>>> {
        self.cached(vertex.id(), ClosureKind::Subtypes, || {
            let mut found = BTreeSet::new();
            let mut stack = vec![vertex.clone()];
            while let Some(current) = stack.pop() {
                self.ensure_edges(&current, Direction::In)?;
                let children: Vec<_> = current.inbound().iter_kind(EdgeKind::Sub).collect();
                for (key, slots) in children {
                    if found.insert(key.peer) {
                        stack.push(self.vertex(slots.peer_kind, key.peer)?);
                    }
                }
            }
            Ok(found.into_iter().collect())
        })
    }

    /// Declared-plus-inherited outbound edges of the given kinds, keyed by
    /// peer id. A declared edge shadows an inherited edge to the same peer,
    /// and inherited peers named by a declared edge's overridden slot are
    /// excluded.
    pub(crate) fn inherited_edge_map(
        &self,
        vertex: &Arc<TypeVertex>,
        kinds: &[EdgeKind],
    ) -> SchemaResult<BTreeMap<TypeId, (EdgeKind, EdgeSlots)>> {
        self.ensure_edges(vertex, Direction::Out)?;
        let mut declared: Vec<(EdgeKind, TypeId, EdgeSlots)> = Vec::new();
        for &kind in kinds {
            declared.extend(
                vertex
                    .outbound()
                    .iter_kind(kind)
                    .map(|(key, slots)| (kind, key.peer, slots)),
            );
        }
        let mut map: BTreeMap<TypeId, (EdgeKind, EdgeSlots)> = BTreeMap::new();
        for (kind, peer, slots) in &declared {
            map.insert(*peer, (*kind, slots.clone()));
        }
        if let Some(supertype) = self.direct_supertype(vertex)? {
            let excluded: HashSet<TypeId> = declared
                .iter()
                .filter_map(|(_, _, slots)| slots.overridden)
                .collect();
            for (peer, entry) in self.inherited_edge_map(&supertype, kinds)? {
                if !excluded.contains(&peer) {
                    map.entry(peer).or_insert(entry);
                }
            }
        }
        Ok(map)
    }

    /// Related role types of a relation: declared roles plus inherited ones
    /// that no declared role overrides. Ascending by id.
    pub(crate) fn related_role_ids(
        &self,
        relation: &Arc<TypeVertex>,
    ) -> SchemaResult<Arc<Vec<TypeId>>> {
        let relation = relation.clone();
        self.cached(relation.id(), ClosureKind::RelatedRoles, || {
            let map = self.inherited_edge_map(&relation, &[EdgeKind::Relates])?;
            Ok(map.into_keys().collect())
        })
    }

    fn owns_ids(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<Arc<Vec<TypeId>>> {
        let vertex = vertex.clone();
        self.cached(vertex.id(), ClosureKind::Owns, || {
            let map = self.inherited_edge_map(&vertex, &[EdgeKind::Owns, EdgeKind::OwnsKey])?;
            Ok(map.into_keys().collect())
        })
    }

    fn plays_ids(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<Arc<Vec<TypeId>>> {
        let vertex = vertex.clone();
        self.cached(vertex.id(), ClosureKind::Plays, || {
            let map = self.inherited_edge_map(&vertex, &[EdgeKind::Plays])?;
            Ok(map.into_keys().collect())
        })
    }

    // ---- mutations ----

    /// Create a fresh type with the given kind and label, subtyping the
    /// root of its kind.
    pub fn create_type(&self, kind: Kind, label: &Label) -> SchemaResult<Arc<TypeVertex>> {
        self.ensure_usable()?;
        if kind == Kind::Root {
            return Err(SchemaError::RootTypeMutation {
                label: label.clone(),
            });
        }
        if self.get_type_of_kind(kind, label)?.is_some() {
            return Err(SchemaError::validation(vec![
                SchemaViolation::LabelAlreadyInUse {
                    label: label.clone(),
                },
            ]));
        }
        let id = self.allocator.allocate()?;
        let vertex = Arc::new(TypeVertex::buffered(
            id,
            kind,
            SmolStr::new(label.name()),
            label.scope().map(SmolStr::new),
        ));
        self.vertices.insert(id, vertex.clone());
        self.labels.insert((kind, label.clone()), id);
        let root = self.vertex(kind, root_id(kind))?;
        self.put_edge(&vertex, EdgeKind::Sub, &root, None, Annotations::new())?;
        self.bump_epoch();
        Ok(vertex)
    }

    /// Tombstone a type and remove every incident edge on both endpoints.
    pub fn delete_type(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(vertex)?;
        if vertex.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: vertex.label(),
            });
        }
        if self.instances.has_instances(vertex.id()) {
            return Err(SchemaError::validation(vec![
                SchemaViolation::TypeHasInstances {
                    label: vertex.label(),
                },
            ]));
        }
        let was_buffered = vertex.status() == VertexStatus::Buffered;
        self.delete_all_edges(vertex)?;
        self.labels.remove(&(vertex.kind(), vertex.label()));
        if was_buffered {
            // Never persisted: drop it entirely.
            self.vertices.remove(&vertex.id());
        } else {
            self.index_deletes
                .write()
                .push((vertex.kind(), vertex.label()));
            vertex.mark_tombstoned();
        }
        self.bump_epoch();
        Ok(())
    }

    /// Replace the single outbound `Sub` edge of `sub` with an edge to
    /// `supertype`.
    pub fn set_supertype(
        &self,
        sub: &Arc<TypeVertex>,
        supertype: &Arc<TypeVertex>,
    ) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(sub)?;
        self.ensure_properties(supertype)?;
        if sub.is_root() {
            return Err(SchemaError::RootTypeMutation { label: sub.label() });
        }
        if sub.kind() != supertype.kind() {
            return Err(SchemaError::KindMismatch {
                label: supertype.label(),
                expected: sub.kind(),
                actual: supertype.kind(),
            });
        }
        let violations = validator::validate_set_supertype(self, sub, supertype)?;
        if !violations.is_empty() {
            return Err(SchemaError::validation(violations));
        }
        self.ensure_edges(sub, Direction::Out)?;
        let existing: Vec<_> = sub.outbound().iter_kind(EdgeKind::Sub).collect();
        for (key, slots) in existing {
            let peer = self.vertex(slots.peer_kind, key.peer)?;
            self.remove_edge(sub, EdgeKind::Sub, &peer)?;
        }
        self.put_edge(sub, EdgeKind::Sub, supertype, None, Annotations::new())
    }

    /// Declare that `relation` relates a role named `role_name`, optionally
    /// overriding an inherited role. Returns the role type vertex, creating
    /// it (scoped by the relation's label) when it does not exist yet.
    pub fn set_relates(
        &self,
        relation: &Arc<TypeVertex>,
        role_name: &str,
        overridden: Option<&str>,
    ) -> SchemaResult<Arc<TypeVertex>> {
        self.ensure_usable()?;
        self.ensure_properties(relation)?;
        if relation.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: relation.label(),
            });
        }
        if relation.kind() != Kind::Relation {
            return Err(SchemaError::KindMismatch {
                label: relation.label(),
                expected: Kind::Relation,
                actual: relation.kind(),
            });
        }
        let overridden_role = match overridden {
            Some(name) => match self.resolve_inherited_role(relation, name)? {
                Some(role) => Some(role),
                None => {
                    return Err(SchemaError::validation(vec![
                        SchemaViolation::OverrideNotInherited {
                            label: relation.label(),
                            overridden: Label::new(name),
                        },
                    ]));
                }
            },
            None => None,
        };
        let relation_label = relation.label();
        let role_label = Label::scoped(role_name, relation_label.name());
        let role = match self.get_type_of_kind(Kind::Role, &role_label)? {
            Some(existing) => existing,
            None => {
                let id = self.allocator.allocate()?;
                let role = Arc::new(TypeVertex::buffered(
                    id,
                    Kind::Role,
                    SmolStr::new(role_name),
                    Some(SmolStr::new(relation_label.name())),
                ));
                self.vertices.insert(id, role.clone());
                self.labels.insert((Kind::Role, role_label), id);
                let role_supertype = match &overridden_role {
                    Some(overridden) => overridden.clone(),
                    None => self.vertex(Kind::Role, ROOT_ROLE)?,
                };
                self.put_edge(&role, EdgeKind::Sub, &role_supertype, None, Annotations::new())?;
                role
            }
        };
        // With no explicit override the edge shadows the root role, keeping
        // it out of related-role closures.
        let overridden_id = overridden_role.map_or(ROOT_ROLE, |role| role.id());
        self.put_edge(
            relation,
            EdgeKind::Relates,
            &role,
            Some(overridden_id),
            Annotations::new(),
        )?;
        Ok(role)
    }

    /// Remove a declared role, deleting its role type vertex.
    pub fn unset_relates(&self, relation: &Arc<TypeVertex>, role_name: &str) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(relation)?;
        if relation.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: relation.label(),
            });
        }
        let relation_label = relation.label();
        let role_label = Label::scoped(role_name, relation_label.name());
        let Some(role) = self.get_type_of_kind(Kind::Role, &role_label)? else {
            return Err(SchemaError::TypeNotFound { label: role_label });
        };
        let violations = validator::validate_unset_relates(self, relation, &role)?;
        if !violations.is_empty() {
            return Err(SchemaError::validation(violations));
        }
        self.remove_edge(relation, EdgeKind::Relates, &role)?;
        self.delete_type(&role)
    }

    /// Declare that `owner` owns `attribute`, optionally overriding an
    /// inherited ownership. The `Key` annotation selects the key encoding.
    pub fn set_owns(
        &self,
        owner: &Arc<TypeVertex>,
        attribute: &Arc<TypeVertex>,
        overridden: Option<&Arc<TypeVertex>>,
        annotations: Annotations,
    ) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(owner)?;
        self.ensure_properties(attribute)?;
        if owner.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: owner.label(),
            });
        }
        if matches!(owner.kind(), Kind::Role | Kind::Root) {
            return Err(SchemaError::KindMismatch {
                label: owner.label(),
                expected: Kind::Entity,
                actual: owner.kind(),
            });
        }
        if attribute.kind() != Kind::Attribute {
            return Err(SchemaError::KindMismatch {
                label: attribute.label(),
                expected: Kind::Attribute,
                actual: attribute.kind(),
            });
        }
        let violations =
            validator::validate_set_owns(self, owner, attribute, overridden, &annotations)?;
        if !violations.is_empty() {
            return Err(SchemaError::validation(violations));
        }
        self.ensure_edges(owner, Direction::Out)?;
        for kind in [EdgeKind::Owns, EdgeKind::OwnsKey] {
            if owner.outbound().contains(kind, attribute.id()) {
                self.remove_edge(owner, kind, attribute)?;
            }
        }
        let kind = if annotations.contains(Annotation::Key) {
            EdgeKind::OwnsKey
        } else {
            EdgeKind::Owns
        };
        self.put_edge(
            owner,
            kind,
            attribute,
            overridden.map(|vertex| vertex.id()),
            annotations,
        )
    }

    pub fn unset_owns(
        &self,
        owner: &Arc<TypeVertex>,
        attribute: &Arc<TypeVertex>,
    ) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_edges(owner, Direction::Out)?;
        for kind in [EdgeKind::Owns, EdgeKind::OwnsKey] {
            if owner.outbound().get(kind, attribute.id()).is_some() {
                self.remove_edge(owner, kind, attribute)?;
            }
        }
        Ok(())
    }

    /// Declare that `player` plays `role`, optionally overriding an
    /// inherited plays.
    pub fn set_plays(
        &self,
        player: &Arc<TypeVertex>,
        role: &Arc<TypeVertex>,
        overridden: Option<&Arc<TypeVertex>>,
    ) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(player)?;
        self.ensure_properties(role)?;
        if player.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: player.label(),
            });
        }
        if matches!(player.kind(), Kind::Role | Kind::Root) {
            return Err(SchemaError::KindMismatch {
                label: player.label(),
                expected: Kind::Entity,
                actual: player.kind(),
            });
        }
        if role.kind() != Kind::Role {
            return Err(SchemaError::KindMismatch {
                label: role.label(),
                expected: Kind::Role,
                actual: role.kind(),
            });
        }
        let violations = validator::validate_set_plays(self, player, overridden)?;
        if !violations.is_empty() {
            return Err(SchemaError::validation(violations));
        }
        self.put_edge(
            player,
            EdgeKind::Plays,
            role,
            overridden.map(|vertex| vertex.id()),
            Annotations::new(),
        )
    }

    pub fn unset_plays(
        &self,
        player: &Arc<TypeVertex>,
        role: &Arc<TypeVertex>,
    ) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.remove_edge(player, EdgeKind::Plays, role)
    }

    /// Rename a type. On a relation type, the scope of every declared role
    /// is rewritten to the new label; inherited roles keep the scope of the
    /// supertype that declares them.
    pub fn set_label(&self, vertex: &Arc<TypeVertex>, new_name: &str) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(vertex)?;
        if vertex.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: vertex.label(),
            });
        }
        let old_label = vertex.label();
        if old_label.name() == new_name {
            return Ok(());
        }
        let new_label = match old_label.scope() {
            Some(scope) => Label::scoped(new_name, scope),
            None => Label::new(new_name),
        };
        if self.get_type_of_kind(vertex.kind(), &new_label)?.is_some() {
            return Err(SchemaError::validation(vec![
                SchemaViolation::LabelAlreadyInUse { label: new_label },
            ]));
        }
        self.rename(vertex, |state| state.label = Some(SmolStr::new(new_name)), &old_label);
        if vertex.kind() == Kind::Relation {
            self.ensure_edges(vertex, Direction::Out)?;
            let declared: Vec<_> = vertex.outbound().iter_kind(EdgeKind::Relates).collect();
            for (key, slots) in declared {
                let role = self.vertex(slots.peer_kind, key.peer)?;
                self.ensure_properties(&role)?;
                let old_role_label = role.label();
                self.rename(
                    &role,
                    |state| state.scope = Some(SmolStr::new(new_name)),
                    &old_role_label,
                );
            }
        }
        self.bump_epoch();
        Ok(())
    }

    fn rename<F>(&self, vertex: &Arc<TypeVertex>, apply: F, old_label: &Label)
    where
        F: FnOnce(&mut crate::vertex::VertexState),
    {
        self.labels.remove(&(vertex.kind(), old_label.clone()));
        if vertex.status() != VertexStatus::Buffered {
            self.index_deletes
                .write()
                .push((vertex.kind(), old_label.clone()));
        }
        apply(&mut vertex.state.write());
        vertex.mark_modified();
        self.labels
            .insert((vertex.kind(), vertex.label()), vertex.id());
    }

    pub fn set_abstract(&self, vertex: &Arc<TypeVertex>, value: bool) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(vertex)?;
        if vertex.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: vertex.label(),
            });
        }
        let violations = validator::validate_set_abstract(self, vertex, value)?;
        if !violations.is_empty() {
            return Err(SchemaError::validation(violations));
        }
        vertex.state.write().is_abstract = value;
        vertex.mark_modified();
        self.bump_epoch();
        Ok(())
    }

    pub fn set_value_type(
        &self,
        vertex: &Arc<TypeVertex>,
        value_type: ValueType,
    ) -> SchemaResult<()> {
        self.ensure_usable()?;
        self.ensure_properties(vertex)?;
        if vertex.is_root() {
            return Err(SchemaError::RootTypeMutation {
                label: vertex.label(),
            });
        }
        if vertex.kind() != Kind::Attribute {
            return Err(SchemaError::KindMismatch {
                label: vertex.label(),
                expected: Kind::Attribute,
                actual: vertex.kind(),
            });
        }
        vertex.state.write().value_type = Some(value_type);
        vertex.mark_modified();
        self.bump_epoch();
        Ok(())
    }

    // ---- lookups and read surface ----

    /// Look up a type by label: scoped labels resolve to role types, plain
    /// labels to any other kind.
    pub fn get_type(&self, label: &Label) -> SchemaResult<Option<Arc<TypeVertex>>> {
        self.ensure_usable()?;
        let kinds: &[Kind] = if label.scope().is_some() {
            &[Kind::Role]
        } else {
            &[Kind::Entity, Kind::Relation, Kind::Attribute, Kind::Root]
        };
        for &kind in kinds {
            if let Some(vertex) = self.get_type_of_kind(kind, label)? {
                return Ok(Some(vertex));
            }
        }
        Ok(None)
    }

    pub(crate) fn get_type_of_kind(
        &self,
        kind: Kind,
        label: &Label,
    ) -> SchemaResult<Option<Arc<TypeVertex>>> {
        if let Some(id) = self.labels.get(&(kind, label.clone())).map(|entry| *entry) {
            let vertex = self.vertex(kind, id)?;
            return Ok((!vertex.is_tombstoned()).then_some(vertex));
        }
        let Some(bytes) = self.store.get(&encoding::index_key(kind, label))? else {
            return Ok(None);
        };
        let id = encoding::decode_type_id(&bytes)?;
        let vertex = self.vertex(kind, id)?;
        if vertex.is_tombstoned() {
            return Ok(None);
        }
        self.ensure_properties(&vertex)?;
        // The persisted index entry may be stale when the vertex was renamed
        // inside this transaction.
        if &vertex.label() != label {
            return Ok(None);
        }
        Ok(Some(vertex))
    }

    /// A vertex already present in the transaction's identity cache.
    pub fn cached_vertex(&self, id: TypeId) -> Option<Arc<TypeVertex>> {
        self.vertices.get(&id).map(|entry| entry.value().clone())
    }

    /// Label of a cached vertex, loading its properties if needed.
    pub fn label_of(&self, id: TypeId) -> SchemaResult<Option<Label>> {
        let Some(vertex) = self.cached_vertex(id) else {
            return Ok(None);
        };
        self.ensure_properties(&vertex)?;
        Ok(Some(vertex.label()))
    }

    pub(crate) fn vertices_snapshot(&self) -> Vec<Arc<TypeVertex>> {
        self.vertices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Transitive supertypes, ascending by id.
    pub fn supertypes(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<TypeIdIter> {
        self.ensure_usable()?;
        let mut ids = self.supertype_ids(vertex)?.as_ref().clone();
        ids.sort_unstable();
        Ok(TypeIdIter::from_sorted(ids))
    }

    /// Transitive subtypes, ascending by id.
    pub fn subtypes(&self, vertex: &Arc<TypeVertex>) -> SchemaResult<TypeIdIter> {
        self.ensure_usable()?;
        Ok(TypeIdIter::from_sorted(
            self.subtype_ids(vertex)?.as_ref().clone(),
        ))
    }

    /// Interning pass over query results, so callers can resolve returned
    /// ids through the vertex cache.
    fn load_vertices(&self, kind: Kind, ids: &[TypeId]) -> SchemaResult<()> {
        for &id in ids {
            self.vertex(kind, id)?;
        }
        Ok(())
    }

    /// Role types related by a relation type, ascending by id. Transitive
    /// queries include inherited, non-overridden roles.
    pub fn relates(&self, relation: &Arc<TypeVertex>, transitive: bool) -> SchemaResult<TypeIdIter> {
        self.ensure_usable()?;
        let ids: Vec<TypeId> = if transitive {
            self.related_role_ids(relation)?.as_ref().clone()
        } else {
            self.ensure_edges(relation, Direction::Out)?;
            relation
                .outbound()
                .iter_kind(EdgeKind::Relates)
                .map(|(key, _)| key.peer)
                .collect()
        };
        self.load_vertices(Kind::Role, &ids)?;
        Ok(TypeIdIter::from_sorted(ids))
    }

    /// The role a declared role overrides, when it overrides one.
    pub fn relates_overridden(
        &self,
        relation: &Arc<TypeVertex>,
        role_name: &str,
    ) -> SchemaResult<Option<Arc<TypeVertex>>> {
        self.ensure_usable()?;
        self.ensure_edges(relation, Direction::Out)?;
        let declared: Vec<_> = relation.outbound().iter_kind(EdgeKind::Relates).collect();
        for (key, slots) in declared {
            let role = self.vertex(slots.peer_kind, key.peer)?;
            self.ensure_properties(&role)?;
            if role.label().name() != role_name {
                continue;
            }
            return match slots.overridden {
                Some(overridden) if !is_root_id(overridden) => {
                    let vertex = self.vertex(Kind::Role, overridden)?;
                    self.ensure_properties(&vertex)?;
                    Ok(Some(vertex))
                }
                _ => Ok(None),
            };
        }
        Ok(None)
    }

    /// Attribute types owned by a type, ascending by id, optionally filtered
    /// to ownerships carrying an annotation.
    pub fn owns(
        &self,
        owner: &Arc<TypeVertex>,
        transitive: bool,
        filter: Option<Annotation>,
    ) -> SchemaResult<TypeIdIter> {
        self.ensure_usable()?;
        if transitive && filter.is_none() {
            let ids = self.owns_ids(owner)?.as_ref().clone();
            self.load_vertices(Kind::Attribute, &ids)?;
            return Ok(TypeIdIter::from_sorted(ids));
        }
        let ids: Vec<TypeId> = if transitive {
            self.inherited_edge_map(owner, &[EdgeKind::Owns, EdgeKind::OwnsKey])?
                .into_iter()
                .filter(|(_, (_, slots))| match filter {
                    Some(annotation) => slots.annotations.contains(annotation),
                    None => true,
                })
                .map(|(peer, _)| peer)
                .collect()
        } else {
            self.ensure_edges(owner, Direction::Out)?;
            let mut ids: Vec<TypeId> = [EdgeKind::Owns, EdgeKind::OwnsKey]
                .into_iter()
                .flat_map(|kind| owner.outbound().iter_kind(kind).collect::<Vec<_>>())
                .filter(|(_, slots)| match filter {
                    Some(annotation) => slots.annotations.contains(annotation),
                    None => true,
                })
                .map(|(key, _)| key.peer)
                .collect();
            ids.sort_unstable();
            ids
        };
        self.load_vertices(Kind::Attribute, &ids)?;
        Ok(TypeIdIter::from_sorted(ids))
    }

    /// Role types played by a type, ascending by id.
    pub fn plays(&self, player: &Arc<TypeVertex>, transitive: bool) -> SchemaResult<TypeIdIter> {
        self.ensure_usable()?;
        let ids: Vec<TypeId> = if transitive {
            self.plays_ids(player)?.as_ref().clone()
        } else {
            self.ensure_edges(player, Direction::Out)?;
            player
                .outbound()
                .iter_kind(EdgeKind::Plays)
                .map(|(key, _)| key.peer)
                .collect()
        };
        self.load_vertices(Kind::Role, &ids)?;
        Ok(TypeIdIter::from_sorted(ids))
    }

    fn resolve_inherited_role(
        &self,
        relation: &Arc<TypeVertex>,
        name: &str,
    ) -> SchemaResult<Option<Arc<TypeVertex>>> {
        let Some(supertype) = self.direct_supertype(relation)? else {
            return Ok(None);
        };
        if supertype.kind() != Kind::Relation {
            return Ok(None);
        }
        for &id in self.related_role_ids(&supertype)?.iter() {
            if is_root_id(id) {
                continue;
            }
            let role = self.vertex(Kind::Role, id)?;
            self.ensure_properties(&role)?;
            if role.label().name() == name {
                return Ok(Some(role));
            }
        }
        Ok(None)
    }

    // ---- commit and rollback ----

    /// Commit in two phases: a pure validation pass over the buffered state,
    /// then the flush into storage. A validation failure leaves the
    /// transaction usable; storage-level failures poison it.
    pub fn commit(&self, timeout: Duration) -> SchemaResult<Timestamp> {
        self.ensure_usable()?;
        let violations = validator::validate_commit(self)?;
        if !violations.is_empty() {
            return Err(SchemaError::validation(violations));
        }
        self.flush()?;
        match self.store.commit(timeout) {
            Ok(commit_ts) => Ok(commit_ts),
            Err(err) => {
                self.poison();
                Err(err.into())
            }
        }
    }

    /// Discard every buffered change, cache, and closure.
    pub fn rollback(&self) -> SchemaResult<()> {
        self.store.rollback()?;
        self.vertices.clear();
        self.labels.clear();
        self.closures.clear();
        self.edge_deletes.write().clear();
        self.index_deletes.write().clear();
        Ok(())
    }

    /// Serialise buffered state into the store transaction. Deletions go
    /// first so a key deleted and re-written in the same transaction ends up
    /// with its final value.
    fn flush(&self) -> SchemaResult<()> {
        for (kind, label) in self.index_deletes.read().iter() {
            self.store.delete(encoding::index_key(*kind, label).to_vec())?;
        }
        for delete in self.edge_deletes.read().iter() {
            self.store.delete(
                encoding::edge_key(delete.from, Direction::Out, delete.kind, delete.to).to_vec(),
            )?;
            self.store.delete(
                encoding::edge_key(delete.to, Direction::In, delete.kind, delete.from).to_vec(),
            )?;
        }
        let vertices = self.vertices_snapshot();
        for vertex in &vertices {
            let kind = vertex.kind();
            let id = vertex.id();
            match vertex.status() {
                VertexStatus::Persisted => {}
                VertexStatus::Tombstoned => {
                    self.store.delete(encoding::vertex_key(kind, id).to_vec())?;
                    for tag in [
                        PropertyTag::Label,
                        PropertyTag::Scope,
                        PropertyTag::Abstract,
                        PropertyTag::ValueType,
                    ] {
                        self.store
                            .delete(encoding::property_key(kind, id, tag).to_vec())?;
                    }
                }
                VertexStatus::Buffered | VertexStatus::Modified => {
                    if vertex.status() == VertexStatus::Buffered {
                        self.store
                            .put(encoding::vertex_key(kind, id).to_vec(), Vec::new())?;
                    }
                    let state = vertex.state.read();
                    if let Some(label) = &state.label {
                        self.store.put(
                            encoding::property_key(kind, id, PropertyTag::Label).to_vec(),
                            label.as_bytes().to_vec(),
                        )?;
                    }
                    if let Some(scope) = &state.scope {
                        self.store.put(
                            encoding::property_key(kind, id, PropertyTag::Scope).to_vec(),
                            scope.as_bytes().to_vec(),
                        )?;
                    }
                    self.store.put(
                        encoding::property_key(kind, id, PropertyTag::Abstract).to_vec(),
                        encoding::encode_bool(state.is_abstract).to_vec(),
                    )?;
                    if let Some(value_type) = state.value_type {
                        self.store.put(
                            encoding::property_key(kind, id, PropertyTag::ValueType).to_vec(),
                            encoding::encode_value_type(value_type).to_vec(),
                        )?;
                    }
                    drop(state);
                    self.store.put(
                        encoding::index_key(kind, &vertex.label()).to_vec(),
                        encoding::encode_type_id(id).to_vec(),
                    )?;
                }
            }
        }
        // Dirty edges, emitted from the outbound side only; every edge
        // writes two records.
        for vertex in &vertices {
            if vertex.is_tombstoned() {
                continue;
            }
            for (key, slots) in vertex.outbound().iter_all() {
                if !slots.dirty {
                    continue;
                }
                let value = encoding::encode_edge_value(slots.overridden, &slots.annotations);
                self.store.put(
                    encoding::edge_key(
                        (vertex.kind(), vertex.id()),
                        Direction::Out,
                        key.kind,
                        (slots.peer_kind, key.peer),
                    )
                    .to_vec(),
                    value.clone(),
                )?;
                self.store.put(
                    encoding::edge_key(
                        (slots.peer_kind, key.peer),
                        Direction::In,
                        key.kind,
                        (vertex.kind(), vertex.id()),
                    )
                    .to_vec(),
                    value,
                )?;
            }
        }
        Ok(())
    }
}
