use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use typegraph_common::{Annotations, EdgeKind, Kind, TypeId};
use typegraph_encoding::Direction;

/// Sort key of one adjacency entry: edge kind first, then peer id, so a
/// prefix walk over one kind yields peers ascending by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct AdjacencyKey {
    pub kind: EdgeKind,
    pub peer: TypeId,
}

/// Mutable payload of one adjacency entry.
#[derive(Debug, Clone)]
pub(crate) struct EdgeSlots {
    pub peer_kind: Kind,
    pub overridden: Option<TypeId>,
    pub annotations: Annotations,
    /// A record for this edge exists in storage; removal must delete it.
    pub persisted: bool,
    /// The record must be (re)written on commit.
    pub dirty: bool,
}

impl EdgeSlots {
    /// An edge created or replaced by this transaction.
    pub fn buffered(peer_kind: Kind, overridden: Option<TypeId>, annotations: Annotations) -> Self {
        Self {
            peer_kind,
            overridden,
            annotations,
            persisted: false,
            dirty: true,
        }
    }

    /// An edge loaded from storage.
    pub fn loaded(peer_kind: Kind, overridden: Option<TypeId>, annotations: Annotations) -> Self {
        Self {
            peer_kind,
            overridden,
            annotations,
            persisted: true,
            dirty: false,
        }
    }
}

/// One direction of a vertex's typed adjacency.
///
/// Entries live in a skip list: iteration is sorted, `seek` is logarithmic,
/// and a cursor stays valid while the adjacency is mutated underneath it —
/// it observes each entry either before or after the change and never
/// re-yields an emitted peer (the cursor key is strictly increasing).
#[derive(Debug)]
pub(crate) struct TypeAdjacency {
    direction: Direction,
    edges: SkipMap<AdjacencyKey, RwLock<EdgeSlots>>,
    /// Whether persisted edges have been pulled from storage.
    loaded: AtomicBool,
}

impl TypeAdjacency {
    pub fn loaded(direction: Direction) -> Self {
        Self {
            direction,
            edges: SkipMap::new(),
            loaded: AtomicBool::new(true),
        }
    }

    pub fn unloaded(direction: Direction) -> Self {
        Self {
            direction,
            edges: SkipMap::new(),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    pub fn get(&self, kind: EdgeKind, peer: TypeId) -> Option<EdgeSlots> {
        self.edges
            .get(&AdjacencyKey { kind, peer })
            .map(|entry| entry.value().read().clone())
    }

    pub fn contains(&self, kind: EdgeKind, peer: TypeId) -> bool {
        self.edges.contains_key(&AdjacencyKey { kind, peer })
    }

    /// Insert or replace an entry. A replaced entry keeps its persisted flag
    /// so the commit rewrites the existing storage record in place.
    pub fn insert(&self, kind: EdgeKind, peer: TypeId, mut slots: EdgeSlots) {
        let key = AdjacencyKey { kind, peer };
        if let Some(entry) = self.edges.get(&key) {
            let mut current = entry.value().write();
            slots.persisted = slots.persisted || current.persisted;
            *current = slots;
            return;
        }
        self.edges.insert(key, RwLock::new(slots));
    }

    /// Insert an edge loaded from storage. A pre-existing entry for the same
    /// slot wins: loaded state never clobbers in-transaction mutations.
    pub fn cache(&self, kind: EdgeKind, peer: TypeId, slots: EdgeSlots) {
        let key = AdjacencyKey { kind, peer };
        if self.edges.contains_key(&key) {
            return;
        }
        self.edges.insert(key, RwLock::new(slots));
    }

    /// Remove one entry, returning its payload.
    pub fn remove(&self, kind: EdgeKind, peer: TypeId) -> Option<EdgeSlots> {
        self.edges
            .remove(&AdjacencyKey { kind, peer })
            .map(|entry| entry.value().read().clone())
    }

    /// Forwardable cursor over every entry of one kind, ascending by peer.
    pub fn iter_kind(&self, kind: EdgeKind) -> AdjacencyCursor<'_> {
        AdjacencyCursor {
            edges: &self.edges,
            kind: Some(kind),
            next_key: AdjacencyKey { kind, peer: 0 },
            exhausted: false,
        }
    }

    /// Forwardable cursor over every entry, ascending by (kind, peer).
    pub fn iter_all(&self) -> AdjacencyCursor<'_> {
        AdjacencyCursor {
            edges: &self.edges,
            kind: None,
            next_key: AdjacencyKey {
                kind: EdgeKind::Sub,
                peer: 0,
            },
            exhausted: false,
        }
    }
}

/// A forwardable cursor over a typed adjacency.
///
/// Holds no reference into skip-list nodes between calls; each step resolves
/// the next entry at or after the cursor key, so concurrent inserts and
/// removals are tolerated.
pub(crate) struct AdjacencyCursor<'a> {
    edges: &'a SkipMap<AdjacencyKey, RwLock<EdgeSlots>>,
    /// Restrict to one edge kind when set.
    kind: Option<EdgeKind>,
    next_key: AdjacencyKey,
    exhausted: bool,
}

impl AdjacencyCursor<'_> {
    /// Advance the cursor to the first remaining peer `>= target`. Only
    /// meaningful for single-kind cursors.
    #[allow(dead_code)]
    pub fn seek(&mut self, target: TypeId) {
        if target > self.next_key.peer {
            self.next_key.peer = target;
        }
    }
}

impl Iterator for AdjacencyCursor<'_> {
    type Item = (AdjacencyKey, EdgeSlots);

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let entry = match self.edges.lower_bound(Bound::Included(&self.next_key)) {
            Some(entry) => entry,
            None => {
                self.exhausted = true;
                return None;
            }
        };
        let key = *entry.key();
        if let Some(kind) = self.kind {
            if key.kind != kind {
                self.exhausted = true;
                return None;
            }
        }
        let slots = entry.value().read().clone();
        match key.peer.checked_add(1) {
            Some(next_peer) => {
                self.next_key = AdjacencyKey {
                    kind: key.kind,
                    peer: next_peer,
                };
            }
            None => self.exhausted = true,
        }
        Some((key, slots))
    }
}
