mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use typegraph_common::{Annotation, Annotations, Kind, Label, ValueType};
use typegraph_schema::{SchemaError, SchemaViolation};
use typegraph_storage::StorageError;

#[test]
fn create_then_rollback_leaves_no_trace() {
    let fixture = Fixture::new();

    let graph = fixture.graph();
    graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    assert!(graph.get_type(&Label::new("person")).unwrap().is_some());
    graph.rollback().unwrap();

    let fresh = fixture.graph();
    assert!(fresh.get_type(&Label::new("person")).unwrap().is_none());
}

#[test]
fn relates_with_override_hides_the_overridden_role() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    graph.set_relates(&marriage, "spouse", None).unwrap();
    let hetero = graph
        .create_type(Kind::Relation, &Label::new("hetero-marriage"))
        .unwrap();
    graph.set_supertype(&hetero, &marriage).unwrap();
    graph.set_relates(&hetero, "husband", Some("spouse")).unwrap();

    let related = graph.relates(&hetero, true).unwrap();
    assert_eq!(names(&graph, related), vec!["husband"]);

    let overridden = graph.relates_overridden(&hetero, "husband").unwrap().unwrap();
    assert_eq!(overridden.label().name(), "spouse");

    // The marriage relation still relates spouse.
    let related = graph.relates(&marriage, true).unwrap();
    assert_eq!(names(&graph, related), vec!["spouse"]);

    graph.commit(TIMEOUT).unwrap();

    // Everything holds when reloaded lazily from storage.
    let fresh = fixture.graph();
    let hetero = fresh.get_type(&Label::new("hetero-marriage")).unwrap().unwrap();
    let related = fresh.relates(&hetero, true).unwrap();
    assert_eq!(names(&fresh, related), vec!["husband"]);
    let overridden = fresh.relates_overridden(&hetero, "husband").unwrap().unwrap();
    assert_eq!(overridden.label().name(), "spouse");
}

#[test]
fn supertype_cycles_are_rejected_with_a_single_violation() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let a = graph.create_type(Kind::Entity, &Label::new("a")).unwrap();
    let b = graph.create_type(Kind::Entity, &Label::new("b")).unwrap();
    graph.set_supertype(&b, &a).unwrap();

    let err = graph.set_supertype(&a, &b).unwrap_err();
    let violations = err.violations().expect("validation error");
    assert_eq!(violations.len(), 1);
    assert!(matches!(violations[0], SchemaViolation::SupertypeCycle { .. }));

    // The graph is unchanged and usable: a still subtypes the entity root.
    let supertypes = graph.supertypes(&a).unwrap();
    assert_eq!(names(&graph, supertypes), vec!["thing", "entity"]);
}

#[test]
fn a_type_with_instances_cannot_become_abstract() {
    let fixture = Fixture::new();

    let setup = fixture.graph();
    let person = setup.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let person_id = person.id();
    setup.commit(TIMEOUT).unwrap();

    let graph = fixture.graph_with(Arc::new(FixedInstances(HashSet::from([person_id]))));
    let person = graph.get_type(&Label::new("person")).unwrap().unwrap();
    let err = graph.set_abstract(&person, true).unwrap_err();
    let violations = err.violations().expect("validation error");
    assert_eq!(violations.len(), 1);
    assert!(matches!(violations[0], SchemaViolation::TypeHasInstances { .. }));

    // Deletion is blocked for the same reason.
    let err = graph.delete_type(&person).unwrap_err();
    assert!(matches!(
        err.violations().unwrap()[0],
        SchemaViolation::TypeHasInstances { .. }
    ));
}

#[test]
fn commit_rejects_a_concrete_relation_without_roles() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();

    let err = graph.commit(TIMEOUT).unwrap_err();
    let violations = err.violations().expect("validation error");
    assert!(violations
        .iter()
        .any(|violation| matches!(violation, SchemaViolation::RelationHasNoRole { .. })));

    // The transaction survives the failed commit and can be rolled back.
    graph.rollback().unwrap();
    assert!(fixture.graph().get_type(&Label::new("marriage")).unwrap().is_none());
}

#[test]
fn an_abstract_relation_needs_no_roles() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    graph.set_abstract(&marriage, true).unwrap();
    graph.commit(TIMEOUT).unwrap();
}

#[test]
fn commit_rejects_a_concrete_relation_with_an_abstract_role() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    let spouse = graph.set_relates(&marriage, "spouse", None).unwrap();
    graph.set_abstract(&spouse, true).unwrap();

    let err = graph.commit(TIMEOUT).unwrap_err();
    assert!(err
        .violations()
        .unwrap()
        .iter()
        .any(|violation| matches!(violation, SchemaViolation::RelationHasAbstractRole { .. })));
}

#[test]
fn owns_iteration_is_sorted_and_forwardable() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    // Create in scrambled order; ids are allocated monotonically.
    let mut attribute_ids = Vec::new();
    for name in ["email", "age", "name", "phone", "address"] {
        let attribute = graph.create_type(Kind::Attribute, &Label::new(name)).unwrap();
        attribute_ids.push(attribute.id());
    }
    for &id in attribute_ids.iter().rev() {
        let attribute = graph.cached_vertex(id).unwrap();
        graph.set_owns(&person, &attribute, None, Annotations::new()).unwrap();
    }

    let mut sorted = attribute_ids.clone();
    sorted.sort_unstable();
    let owned: Vec<_> = graph.owns(&person, false, None).unwrap().collect();
    assert_eq!(owned, sorted);

    let mut iter = graph.owns(&person, false, None).unwrap();
    iter.seek(sorted[2]);
    assert_eq!(iter.collect::<Vec<_>>(), sorted[2..].to_vec());
}

#[test]
fn subtype_and_supertype_closures_agree() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let employee = graph.create_type(Kind::Entity, &Label::new("employee")).unwrap();
    let manager = graph.create_type(Kind::Entity, &Label::new("manager")).unwrap();
    let customer = graph.create_type(Kind::Entity, &Label::new("customer")).unwrap();
    graph.set_supertype(&employee, &person).unwrap();
    graph.set_supertype(&manager, &employee).unwrap();
    graph.set_supertype(&customer, &person).unwrap();

    let all = [&person, &employee, &manager, &customer];
    for vertex in all {
        let supertypes: HashSet<_> = graph.supertypes(vertex).unwrap().collect();
        for other in all {
            let subtypes: HashSet<_> = graph.subtypes(other).unwrap().collect();
            assert_eq!(
                supertypes.contains(&other.id()),
                subtypes.contains(&vertex.id()),
                "closure mismatch between {} and {}",
                vertex.label(),
                other.label()
            );
        }
    }

    let subtypes: Vec<_> = graph.subtypes(&person).unwrap().collect();
    assert_eq!(
        subtypes,
        vec![employee.id(), manager.id(), customer.id()]
    );
}

#[test]
fn renaming_a_relation_rescopes_its_declared_roles_only() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    graph.set_relates(&marriage, "spouse", None).unwrap();
    let hetero = graph
        .create_type(Kind::Relation, &Label::new("hetero-marriage"))
        .unwrap();
    graph.set_supertype(&hetero, &marriage).unwrap();
    graph.set_relates(&hetero, "husband", Some("spouse")).unwrap();

    graph.set_label(&marriage, "wedding").unwrap();

    assert!(graph.get_type(&Label::new("marriage")).unwrap().is_none());
    assert!(graph.get_type(&Label::new("wedding")).unwrap().is_some());
    let spouse = graph
        .get_type(&Label::scoped("spouse", "wedding"))
        .unwrap()
        .expect("declared role is rescoped");
    assert_eq!(spouse.label().scope(), Some("wedding"));
    assert!(graph.get_type(&Label::scoped("spouse", "marriage")).unwrap().is_none());
    // The subtype's declared role keeps its own scope.
    assert!(graph
        .get_type(&Label::scoped("husband", "hetero-marriage"))
        .unwrap()
        .is_some());

    graph.commit(TIMEOUT).unwrap();

    let fresh = fixture.graph();
    assert!(fresh.get_type(&Label::scoped("spouse", "wedding")).unwrap().is_some());
    assert!(fresh.get_type(&Label::scoped("spouse", "marriage")).unwrap().is_none());
}

#[test]
fn root_types_are_immutable() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let entity_root = graph.get_type(&Label::new("entity")).unwrap().unwrap();
    assert!(matches!(
        graph.set_label(&entity_root, "renamed"),
        Err(SchemaError::RootTypeMutation { .. })
    ));
    assert!(matches!(
        graph.set_abstract(&entity_root, false),
        Err(SchemaError::RootTypeMutation { .. })
    ));
    assert!(matches!(
        graph.delete_type(&entity_root),
        Err(SchemaError::RootTypeMutation { .. })
    ));

    // The transaction stays usable after a rejected root mutation.
    graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    graph.commit(TIMEOUT).unwrap();
}

#[test]
fn duplicate_labels_are_rejected() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let err = graph.create_type(Kind::Entity, &Label::new("person")).unwrap_err();
    assert!(matches!(
        err.violations().unwrap()[0],
        SchemaViolation::LabelAlreadyInUse { .. }
    ));
}

#[test]
fn interned_vertices_are_shared() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let looked_up = graph.get_type(&Label::new("person")).unwrap().unwrap();
    assert!(Arc::ptr_eq(&person, &looked_up));
}

#[test]
fn overlapping_schema_writers_conflict_at_commit() {
    let fixture = Fixture::new();

    let first = fixture.graph();
    let second = fixture.graph();
    let a = first.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let b = second.create_type(Kind::Entity, &Label::new("person")).unwrap();
    // Distinct ids, same label: both transactions write the same index key.
    assert_ne!(a.id(), b.id());

    first.commit(TIMEOUT).unwrap();
    let err = second.commit(TIMEOUT).unwrap_err();
    assert!(matches!(
        err,
        SchemaError::Storage(StorageError::ConcurrentSchemaWrite)
    ));

    // The loser is poisoned and must roll back.
    assert!(matches!(
        second.create_type(Kind::Entity, &Label::new("other")),
        Err(SchemaError::Storage(StorageError::TransactionPoisoned))
    ));
    second.rollback().unwrap();
}

#[test]
fn key_ownership_uses_the_key_encoding_and_filters() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let email = graph.create_type(Kind::Attribute, &Label::new("email")).unwrap();
    let name = graph.create_type(Kind::Attribute, &Label::new("name")).unwrap();
    graph.set_value_type(&email, ValueType::String).unwrap();
    graph.set_value_type(&name, ValueType::String).unwrap();

    let key: Annotations = [Annotation::Key].into_iter().collect();
    graph.set_owns(&person, &email, None, key).unwrap();
    graph.set_owns(&person, &name, None, Annotations::new()).unwrap();

    let keyed: Vec<_> = graph.owns(&person, false, Some(Annotation::Key)).unwrap().collect();
    assert_eq!(keyed, vec![email.id()]);
    let all: Vec<_> = graph.owns(&person, false, None).unwrap().collect();
    assert_eq!(all, vec![email.id(), name.id()]);

    graph.commit(TIMEOUT).unwrap();

    let fresh = fixture.graph();
    let person = fresh.get_type(&Label::new("person")).unwrap().unwrap();
    let keyed: Vec<_> = fresh.owns(&person, false, Some(Annotation::Key)).unwrap().collect();
    assert_eq!(keyed, vec![email.id()]);
    let email = fresh.get_type(&Label::new("email")).unwrap().unwrap();
    assert_eq!(email.value_type(), Some(ValueType::String));
}

#[test]
fn redeclaring_an_inherited_key_ownership_without_key_is_rejected() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let employee = graph.create_type(Kind::Entity, &Label::new("employee")).unwrap();
    graph.set_supertype(&employee, &person).unwrap();
    let email = graph.create_type(Kind::Attribute, &Label::new("email")).unwrap();

    let key: Annotations = [Annotation::Key].into_iter().collect();
    graph.set_owns(&person, &email, None, key).unwrap();

    let err = graph
        .set_owns(&employee, &email, None, Annotations::new())
        .unwrap_err();
    assert!(matches!(
        err.violations().unwrap()[0],
        SchemaViolation::OwnsAnnotationConflict { .. }
    ));
}

#[test]
fn plays_inheritance_and_override() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    let spouse = graph.set_relates(&marriage, "spouse", None).unwrap();
    let hetero = graph
        .create_type(Kind::Relation, &Label::new("hetero-marriage"))
        .unwrap();
    graph.set_supertype(&hetero, &marriage).unwrap();
    let husband = graph.set_relates(&hetero, "husband", Some("spouse")).unwrap();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let man = graph.create_type(Kind::Entity, &Label::new("man")).unwrap();
    graph.set_supertype(&man, &person).unwrap();

    graph.set_plays(&person, &spouse, None).unwrap();
    graph.set_plays(&man, &husband, Some(&spouse)).unwrap();

    let played: Vec<_> = graph.plays(&man, true).unwrap().collect();
    assert_eq!(played, vec![husband.id()]);
    let played: Vec<_> = graph.plays(&person, true).unwrap().collect();
    assert_eq!(played, vec![spouse.id()]);

    // Overriding a plays that is not inherited is rejected.
    let stranger = graph.create_type(Kind::Entity, &Label::new("stranger")).unwrap();
    let err = graph.set_plays(&stranger, &husband, Some(&spouse)).unwrap_err();
    assert!(matches!(
        err.violations().unwrap()[0],
        SchemaViolation::OverrideNotInherited { .. }
    ));
}

#[test]
fn unsetting_an_overridden_role_is_rejected() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    graph.set_relates(&marriage, "spouse", None).unwrap();
    let hetero = graph
        .create_type(Kind::Relation, &Label::new("hetero-marriage"))
        .unwrap();
    graph.set_supertype(&hetero, &marriage).unwrap();
    graph.set_relates(&hetero, "husband", Some("spouse")).unwrap();

    let err = graph.unset_relates(&marriage, "spouse").unwrap_err();
    assert!(matches!(
        err.violations().unwrap()[0],
        SchemaViolation::RoleOverriddenBySubtype { .. }
    ));
}

#[test]
fn overriding_a_role_that_is_not_inherited_is_rejected() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    graph.set_relates(&marriage, "spouse", None).unwrap();

    // spouse is declared, not inherited; it cannot be overridden here.
    let err = graph.set_relates(&marriage, "partner", Some("spouse")).unwrap_err();
    assert!(matches!(
        err.violations().unwrap()[0],
        SchemaViolation::OverrideNotInherited { .. }
    ));
}

#[test]
fn deleting_a_type_removes_its_edges_on_both_endpoints() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let email = graph.create_type(Kind::Attribute, &Label::new("email")).unwrap();
    graph.set_owns(&person, &email, None, Annotations::new()).unwrap();
    graph.commit(TIMEOUT).unwrap();

    let graph = fixture.graph();
    let email = graph.get_type(&Label::new("email")).unwrap().unwrap();
    graph.delete_type(&email).unwrap();
    graph.commit(TIMEOUT).unwrap();

    let fresh = fixture.graph();
    assert!(fresh.get_type(&Label::new("email")).unwrap().is_none());
    let person = fresh.get_type(&Label::new("person")).unwrap().unwrap();
    assert_eq!(fresh.owns(&person, true, None).unwrap().count(), 0);
}

#[test]
fn moving_a_subtype_invalidates_dangling_overrides() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let marriage = graph.create_type(Kind::Relation, &Label::new("marriage")).unwrap();
    graph.set_relates(&marriage, "spouse", None).unwrap();
    let partnership = graph
        .create_type(Kind::Relation, &Label::new("partnership"))
        .unwrap();
    graph.set_relates(&partnership, "partner", None).unwrap();
    let hetero = graph
        .create_type(Kind::Relation, &Label::new("hetero-marriage"))
        .unwrap();
    graph.set_supertype(&hetero, &marriage).unwrap();
    graph.set_relates(&hetero, "husband", Some("spouse")).unwrap();

    // Re-parenting hetero-marriage under partnership leaves the husband
    // override of spouse unresolvable.
    let err = graph.set_supertype(&hetero, &partnership).unwrap_err();
    assert!(err
        .violations()
        .unwrap()
        .iter()
        .any(|violation| matches!(violation, SchemaViolation::DanglingOverride { .. })));
}

#[test]
fn commit_makes_all_writes_visible_atomically() {
    let fixture = Fixture::new();
    let graph = fixture.graph();

    let person = graph.create_type(Kind::Entity, &Label::new("person")).unwrap();
    let employee = graph.create_type(Kind::Entity, &Label::new("employee")).unwrap();
    graph.set_supertype(&employee, &person).unwrap();

    // A transaction begun before the commit sees none of it.
    let reader_before = fixture.graph();
    graph.commit(TIMEOUT).unwrap();
    assert!(reader_before.get_type(&Label::new("person")).unwrap().is_none());

    // A transaction begun after the commit sees all of it.
    let reader_after = fixture.graph();
    let person = reader_after.get_type(&Label::new("person")).unwrap().unwrap();
    let subtypes: Vec<_> = reader_after.subtypes(&person).unwrap().collect();
    assert_eq!(subtypes, vec![employee.id()]);
}
