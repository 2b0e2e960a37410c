//! Structural rule checks.
//!
//! Every function here is pure with respect to the graph: it collects
//! violations without mutating anything. Declaration rules run at the
//! mutation call site and reject the mutation outright; subtype and
//! commit rules run across the buffered state before the flush.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use typegraph_common::{Annotations, EdgeKind, Kind, Label, TypeId};
use typegraph_encoding::Direction;
use typegraph_storage::StoreTransaction;

use crate::error::SchemaResult;
use crate::graph::{SchemaGraph, is_root_id};
use crate::vertex::{TypeVertex, VertexStatus};

/// One structural rule violation, carrying the labels involved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("setting '{supertype}' as supertype of '{label}' would form a cycle")]
    SupertypeCycle { label: Label, supertype: Label },
    #[error("label '{label}' is already in use")]
    LabelAlreadyInUse { label: Label },
    #[error("type '{label}' has instances")]
    TypeHasInstances { label: Label },
    #[error("concrete attribute type '{label}' cannot subtype abstract '{supertype}'")]
    AbstractSupertype { label: Label, supertype: Label },
    #[error("'{overridden}' is not inherited by '{label}' and cannot be overridden")]
    OverrideNotInherited { label: Label, overridden: Label },
    #[error("override of '{overridden}' declared by '{label}' would no longer resolve")]
    DanglingOverride { label: Label, overridden: Label },
    #[error("role '{role}' of '{relation}' is overridden by subtype '{subtype}'")]
    RoleOverriddenBySubtype {
        relation: Label,
        role: Label,
        subtype: Label,
    },
    #[error("ownership of '{attribute}' by '{owner}' weakens inherited annotations")]
    OwnsAnnotationConflict { owner: Label, attribute: Label },
    #[error("concrete relation type '{relation}' relates no role")]
    RelationHasNoRole { relation: Label },
    #[error("concrete relation type '{relation}' declares abstract role '{role}'")]
    RelationHasAbstractRole { relation: Label, role: Label },
}

fn label_of<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
    kind: Kind,
    id: TypeId,
) -> SchemaResult<Label> {
    let vertex = graph.vertex(kind, id)?;
    graph.ensure_properties(&vertex)?;
    Ok(vertex.label())
}

/// Rules for `set_supertype`: no cycle, abstractness compatibility, and
/// every override declared in the moved subtree must still resolve against
/// the new supertype chain.
pub(crate) fn validate_set_supertype<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
    sub: &Arc<TypeVertex>,
    supertype: &Arc<TypeVertex>,
) -> SchemaResult<Vec<SchemaViolation>> {
    let mut violations = Vec::new();

    if supertype.id() == sub.id() || graph.supertype_ids(supertype)?.contains(&sub.id()) {
        violations.push(SchemaViolation::SupertypeCycle {
            label: sub.label(),
            supertype: supertype.label(),
        });
        // A would-be cycle invalidates every closure below; report it alone.
        return Ok(violations);
    }

    if sub.kind() == Kind::Attribute
        && !sub.is_abstract()
        && supertype.is_abstract()
        && !supertype.is_root()
    {
        violations.push(SchemaViolation::AbstractSupertype {
            label: sub.label(),
            supertype: supertype.label(),
        });
    }

    let inherited_roles: HashSet<TypeId> = if sub.kind() == Kind::Relation {
        graph.related_role_ids(supertype)?.iter().copied().collect()
    } else {
        HashSet::new()
    };
    let inherited_owns: HashSet<TypeId> = graph
        .inherited_edge_map(supertype, &[EdgeKind::Owns, EdgeKind::OwnsKey])?
        .into_keys()
        .collect();
    let inherited_plays: HashSet<TypeId> = graph
        .inherited_edge_map(supertype, &[EdgeKind::Plays])?
        .into_keys()
        .collect();
    validate_subtree_overrides(
        graph,
        sub,
        &inherited_roles,
        &inherited_owns,
        &inherited_plays,
        &mut violations,
    )?;
    Ok(violations)
}

/// Walk the subtree rooted at `vertex`, checking that every declared
/// override names something inherited through the (new) chain, and
/// propagating each level's own declarations downwards.
fn validate_subtree_overrides<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
    vertex: &Arc<TypeVertex>,
    inherited_roles: &HashSet<TypeId>,
    inherited_owns: &HashSet<TypeId>,
    inherited_plays: &HashSet<TypeId>,
    violations: &mut Vec<SchemaViolation>,
) -> SchemaResult<()> {
    graph.ensure_edges(vertex, Direction::Out)?;
    graph.ensure_properties(vertex)?;

    let relates: Vec<(TypeId, Option<TypeId>)> = vertex
        .outbound()
        .iter_kind(EdgeKind::Relates)
        .map(|(key, slots)| (key.peer, slots.overridden))
        .collect();
    let owns: Vec<(TypeId, Option<TypeId>)> = [EdgeKind::Owns, EdgeKind::OwnsKey]
        .into_iter()
        .flat_map(|kind| {
            vertex
                .outbound()
                .iter_kind(kind)
                .map(|(key, slots)| (key.peer, slots.overridden))
                .collect::<Vec<_>>()
        })
        .collect();
    let plays: Vec<(TypeId, Option<TypeId>)> = vertex
        .outbound()
        .iter_kind(EdgeKind::Plays)
        .map(|(key, slots)| (key.peer, slots.overridden))
        .collect();

    for (_, overridden) in &relates {
        if let Some(overridden) = overridden {
            if !is_root_id(*overridden) && !inherited_roles.contains(overridden) {
                violations.push(SchemaViolation::DanglingOverride {
                    label: vertex.label(),
                    overridden: label_of(graph, Kind::Role, *overridden)?,
                });
            }
        }
    }
    for (_, overridden) in &owns {
        if let Some(overridden) = overridden {
            if !inherited_owns.contains(overridden) {
                violations.push(SchemaViolation::DanglingOverride {
                    label: vertex.label(),
                    overridden: label_of(graph, Kind::Attribute, *overridden)?,
                });
            }
        }
    }
    for (_, overridden) in &plays {
        if let Some(overridden) = overridden {
            if !inherited_plays.contains(overridden) {
                violations.push(SchemaViolation::DanglingOverride {
                    label: vertex.label(),
                    overridden: label_of(graph, Kind::Role, *overridden)?,
                });
            }
        }
    }

    let own_roles: HashSet<TypeId> = relates
        .iter()
        .map(|(role, _)| *role)
        .chain(
            inherited_roles
                .iter()
                .copied()
                .filter(|id| !relates.iter().any(|(_, o)| *o == Some(*id))),
        )
        .collect();
    let own_owns: HashSet<TypeId> = owns
        .iter()
        .map(|(attribute, _)| *attribute)
        .chain(
            inherited_owns
                .iter()
                .copied()
                .filter(|id| !owns.iter().any(|(_, o)| *o == Some(*id))),
        )
        .collect();
    let own_plays: HashSet<TypeId> = plays
        .iter()
        .map(|(role, _)| *role)
        .chain(
            inherited_plays
                .iter()
                .copied()
                .filter(|id| !plays.iter().any(|(_, o)| *o == Some(*id))),
        )
        .collect();

    graph.ensure_edges(vertex, Direction::In)?;
    let children: Vec<_> = vertex
        .inbound()
        .iter_kind(EdgeKind::Sub)
        .filter(|(_, slots)| slots.peer_kind == vertex.kind())
        .collect();
    for (key, slots) in children {
        let child = graph.vertex(slots.peer_kind, key.peer)?;
        validate_subtree_overrides(graph, &child, &own_roles, &own_owns, &own_plays, violations)?;
    }
    Ok(())
}

/// Rule for `unset_relates`: no subtype may still override the role.
pub(crate) fn validate_unset_relates<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
    relation: &Arc<TypeVertex>,
    role: &Arc<TypeVertex>,
) -> SchemaResult<Vec<SchemaViolation>> {
    let mut violations = Vec::new();
    for &subtype_id in graph.subtype_ids(relation)?.iter() {
        let subtype = graph.vertex(Kind::Relation, subtype_id)?;
        graph.ensure_edges(&subtype, Direction::Out)?;
        let overrides_role = subtype
            .outbound()
            .iter_kind(EdgeKind::Relates)
            .any(|(_, slots)| slots.overridden == Some(role.id()));
        if overrides_role {
            graph.ensure_properties(&subtype)?;
            graph.ensure_properties(role)?;
            violations.push(SchemaViolation::RoleOverriddenBySubtype {
                relation: relation.label(),
                role: role.label(),
                subtype: subtype.label(),
            });
        }
    }
    Ok(violations)
}

/// Rules for `set_owns`: the override must name an inherited ownership, and
/// the annotation set must not weaken an inherited ownership of the same
/// attribute.
pub(crate) fn validate_set_owns<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
    owner: &Arc<TypeVertex>,
    attribute: &Arc<TypeVertex>,
    overridden: Option<&Arc<TypeVertex>>,
    annotations: &Annotations,
) -> SchemaResult<Vec<SchemaViolation>> {
    let mut violations = Vec::new();
    let inherited = match graph.direct_supertype(owner)? {
        Some(supertype) => {
            graph.inherited_edge_map(&supertype, &[EdgeKind::Owns, EdgeKind::OwnsKey])?
        }
        None => Default::default(),
    };
    if let Some(overridden) = overridden {
        if !inherited.contains_key(&overridden.id()) {
            graph.ensure_properties(overridden)?;
            violations.push(SchemaViolation::OverrideNotInherited {
                label: owner.label(),
                overridden: overridden.label(),
            });
        }
    }
    if let Some((_, inherited_slots)) = inherited.get(&attribute.id()) {
        let weakened = inherited_slots
            .annotations
            .iter()
            .any(|annotation| !annotations.contains(annotation));
        if weakened {
            violations.push(SchemaViolation::OwnsAnnotationConflict {
                owner: owner.label(),
                attribute: attribute.label(),
            });
        }
    }
    Ok(violations)
}

/// Rule for `set_plays`: the override must name an inherited plays.
pub(crate) fn validate_set_plays<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
    player: &Arc<TypeVertex>,
    overridden: Option<&Arc<TypeVertex>>,
) -> SchemaResult<Vec<SchemaViolation>> {
    let mut violations = Vec::new();
    if let Some(overridden) = overridden {
        let inherited = match graph.direct_supertype(player)? {
            Some(supertype) => graph.inherited_edge_map(&supertype, &[EdgeKind::Plays])?,
            None => Default::default(),
        };
        if !inherited.contains_key(&overridden.id()) {
            graph.ensure_properties(overridden)?;
            violations.push(SchemaViolation::OverrideNotInherited {
                label: player.label(),
                overridden: overridden.label(),
            });
        }
    }
    Ok(violations)
}

/// Rules for `set_abstract`: a type with instances cannot become abstract,
/// and a concrete attribute type cannot sit under an abstract supertype.
pub(crate) fn validate_set_abstract<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
    vertex: &Arc<TypeVertex>,
    value: bool,
) -> SchemaResult<Vec<SchemaViolation>> {
    let mut violations = Vec::new();
    if value {
        if graph.instances().has_instances(vertex.id()) {
            violations.push(SchemaViolation::TypeHasInstances {
                label: vertex.label(),
            });
        }
    } else if vertex.kind() == Kind::Attribute {
        if let Some(supertype) = graph.direct_supertype(vertex)? {
            graph.ensure_properties(&supertype)?;
            if supertype.is_abstract() && !supertype.is_root() {
                violations.push(SchemaViolation::AbstractSupertype {
                    label: vertex.label(),
                    supertype: supertype.label(),
                });
            }
        }
    }
    Ok(violations)
}

/// Commit-time pass over the buffered state: every concrete relation type
/// must relate a non-root role and must not declare an abstract role.
pub(crate) fn validate_commit<T: StoreTransaction>(
    graph: &SchemaGraph<T>,
) -> SchemaResult<Vec<SchemaViolation>> {
    // A role changed by this transaction drags its declaring relations into
    // the check, even when nothing touched the relation itself.
    for vertex in graph.vertices_snapshot() {
        if vertex.kind() != Kind::Role || vertex.is_tombstoned() {
            continue;
        }
        if matches!(vertex.status(), VertexStatus::Buffered | VertexStatus::Modified) {
            graph.ensure_edges(&vertex, Direction::In)?;
            let declaring: Vec<_> = vertex.inbound().iter_kind(EdgeKind::Relates).collect();
            for (key, slots) in declaring {
                graph.vertex(slots.peer_kind, key.peer)?;
            }
        }
    }

    let mut violations = Vec::new();
    for vertex in graph.vertices_snapshot() {
        if vertex.kind() != Kind::Relation || vertex.is_root() || vertex.is_tombstoned() {
            continue;
        }
        graph.ensure_properties(&vertex)?;
        if vertex.is_abstract() {
            continue;
        }
        let related = graph.related_role_ids(&vertex)?;
        if related.iter().all(|&id| is_root_id(id)) {
            violations.push(SchemaViolation::RelationHasNoRole {
                relation: vertex.label(),
            });
        }
        graph.ensure_edges(&vertex, Direction::Out)?;
        let declared: Vec<_> = vertex.outbound().iter_kind(EdgeKind::Relates).collect();
        for (key, slots) in declared {
            let role = graph.vertex(slots.peer_kind, key.peer)?;
            graph.ensure_properties(&role)?;
            if role.is_abstract() {
                violations.push(SchemaViolation::RelationHasAbstractRole {
                    relation: vertex.label(),
                    role: role.label(),
                });
            }
        }
    }
    Ok(violations)
}
