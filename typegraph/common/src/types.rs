use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Internal identifier associated with a type vertex.
///
/// Ids are allocated by [`crate::TypeIdAllocator`] and are never reused, even
/// when the allocating transaction aborts. Root vertices occupy reserved ids
/// below [`crate::TypeIdAllocator::FIRST_DYNAMIC`].
pub type TypeId = u32;

/// The kind tag of a type vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// The `thing` root, supertype of every other type.
    Root,
    Entity,
    Relation,
    Attribute,
    Role,
}

impl Kind {
    /// Label of the root vertex of this kind.
    pub fn root_label(&self) -> &'static str {
        match self {
            Kind::Root => "thing",
            Kind::Entity => "entity",
            Kind::Relation => "relation",
            Kind::Attribute => "attribute",
            Kind::Role => "role",
        }
    }
}

/// The kind tag of a typed edge between two type vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Sub,
    Owns,
    OwnsKey,
    Plays,
    Relates,
}

impl EdgeKind {
    /// Returns true for the two ownership encodings.
    pub fn is_owns(&self) -> bool {
        matches!(self, EdgeKind::Owns | EdgeKind::OwnsKey)
    }
}

/// Value type of an attribute type vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Long,
    Double,
    String,
    DateTime,
}

/// A flag attached to an ownership edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Annotation {
    Key,
    Unique,
}

/// A small sorted set of [`Annotation`]s.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotations(SmallVec<[Annotation; 2]>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, annotation: Annotation) -> bool {
        self.0.binary_search(&annotation).is_ok()
    }

    pub fn insert(&mut self, annotation: Annotation) -> bool {
        match self.0.binary_search(&annotation) {
            Ok(_) => false,
            Err(index) => {
                self.0.insert(index, annotation);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Annotation> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Annotation> for Annotations {
    fn from_iter<T: IntoIterator<Item = Annotation>>(iter: T) -> Self {
        let mut set = SmallVec::from_iter(iter);
        set.sort_unstable();
        set.dedup();
        Self(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotations_are_sorted_and_deduplicated() {
        let set: Annotations = [Annotation::Unique, Annotation::Key, Annotation::Unique]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(Annotation::Key));
        assert!(set.contains(Annotation::Unique));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Annotation::Key, Annotation::Unique]
        );
    }

    #[test]
    fn annotations_insert_is_idempotent() {
        let mut set = Annotations::new();
        assert!(set.insert(Annotation::Key));
        assert!(!set.insert(Annotation::Key));
        assert_eq!(set.len(), 1);
    }
}
