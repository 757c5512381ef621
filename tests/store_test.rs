mod helpers;

use anamnesis::memory::associations::{associations_for, create_association, delete_association, neighbors};
use anamnesis::memory::store::{
    create_memory, delete_memory, forget_memory, get_memory, get_memory_by_id, touch_memory, update_embedding,
    update_memory,
};
use anamnesis::memory::types::{MemoryType, NewAssociation, NewMemory, RelationType, SourceKind};
use anamnesis::GraphError;
use helpers::{test_db, test_embedding, TEST_MODEL};

#[test]
fn write_then_read_is_field_for_field_identical() {
    let conn = test_db();
    let mut new = NewMemory::new("Alice is allergic to peanuts", MemoryType::Fact)
        .with_importance(0.9)
        .with_username("alice")
        .with_channel("telegram")
        .with_source(SourceKind::Conversation);
    new.provenance.session_id = Some("sess-1".into());
    new.provenance.message_id = Some("msg-7".into());
    new.provenance.chat_id = Some("chat-3".into());

    let created = create_memory(&conn, new).unwrap();
    update_embedding(&conn, &created.uid, &test_embedding(3), TEST_MODEL).unwrap();

    let read = get_memory(&conn, &created.uid).unwrap().unwrap();
    assert_eq!(read.uid, created.uid);
    assert_eq!(read.content, "Alice is allergic to peanuts");
    assert_eq!(read.memory_type, MemoryType::Fact);
    assert_eq!(read.importance, 0.9);
    assert_eq!(read.confidence, None);
    assert_eq!(read.created_at, created.created_at);
    assert_eq!(read.updated_at, created.updated_at);
    assert_eq!(read.provenance, created.provenance);
    assert_eq!(read.provenance.session_id.as_deref(), Some("sess-1"));
    assert_eq!(read.embedding, Some(test_embedding(3)));
    assert_eq!(read.embedding_model.as_deref(), Some(TEST_MODEL));

    let by_id = get_memory_by_id(&conn, created.id).unwrap().unwrap();
    assert_eq!(by_id, read);
}

#[test]
fn missing_memory_is_none_not_error() {
    let conn = test_db();
    assert!(get_memory(&conn, "does-not-exist").unwrap().is_none());
    assert!(get_memory_by_id(&conn, 42).unwrap().is_none());
}

#[test]
fn defaults_come_from_the_type() {
    let conn = test_db();
    let routine = create_memory(&conn, NewMemory::new("Gym on Mondays", MemoryType::Routine)).unwrap();
    assert_eq!(routine.importance, MemoryType::Routine.default_importance());
    assert_eq!(routine.confidence, Some(0.5));

    let clamped = create_memory(
        &conn,
        NewMemory::new("Too important", MemoryType::Goal).with_importance(3.0),
    )
    .unwrap();
    assert_eq!(clamped.importance, 1.0);
}

#[test]
fn update_rewrites_fields_and_drops_stale_embedding() {
    let conn = test_db();
    let m = create_memory(&conn, NewMemory::new("Likes jazz", MemoryType::Preference)).unwrap();
    update_embedding(&conn, &m.uid, &test_embedding(1), TEST_MODEL).unwrap();

    let mut edited = get_memory(&conn, &m.uid).unwrap().unwrap();
    edited.importance = 0.4;
    assert!(update_memory(&conn, &edited).unwrap());
    let same_content = get_memory(&conn, &m.uid).unwrap().unwrap();
    assert_eq!(same_content.importance, 0.4);
    assert!(same_content.embedding.is_some(), "unchanged content keeps its vector");
    assert!(same_content.updated_at >= m.updated_at);

    edited.content = "Likes bebop jazz".into();
    update_memory(&conn, &edited).unwrap();
    let new_content = get_memory(&conn, &m.uid).unwrap().unwrap();
    assert!(new_content.embedding.is_none());
    assert!(new_content.embedding_model.is_none());
}

#[test]
fn forget_is_soft_and_delete_is_hard() {
    let conn = test_db();
    let m = create_memory(&conn, NewMemory::new("Old address", MemoryType::Fact)).unwrap();

    assert!(forget_memory(&conn, &m.uid).unwrap());
    assert!(!forget_memory(&conn, &m.uid).unwrap(), "already forgotten");
    let forgotten = get_memory(&conn, &m.uid).unwrap().unwrap();
    assert!(forgotten.forgotten);
    assert!(forgotten.forgotten_at.is_some());

    assert!(delete_memory(&conn, &m.uid).unwrap());
    assert!(get_memory(&conn, &m.uid).unwrap().is_none());
    assert!(!delete_memory(&conn, &m.uid).unwrap());
}

#[test]
fn touch_increments_access() {
    let conn = test_db();
    let m = create_memory(&conn, NewMemory::new("Coffee order", MemoryType::Preference)).unwrap();
    assert_eq!(m.access_count, 0);
    assert!(m.last_accessed_at.is_none());

    touch_memory(&conn, &m.uid).unwrap();
    touch_memory(&conn, &m.uid).unwrap();
    let touched = get_memory(&conn, &m.uid).unwrap().unwrap();
    assert_eq!(touched.access_count, 2);
    assert!(touched.last_accessed_at.is_some());
}

#[test]
fn association_lifecycle_and_cascade() {
    let conn = test_db();
    let a = create_memory(&conn, NewMemory::new("Moved to Lisbon", MemoryType::Event)).unwrap();
    let b = create_memory(&conn, NewMemory::new("Lives in Lisbon", MemoryType::Fact)).unwrap();

    let first = create_association(&conn, NewAssociation::new(&a.uid, RelationType::ResultOf, &b.uid)).unwrap();
    assert!(!first.deduplicated);
    assert!(first.association.directed);
    let again = create_association(&conn, NewAssociation::new(&a.uid, RelationType::ResultOf, &b.uid)).unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.association.uid, first.association.uid);

    assert_eq!(associations_for(&conn, &b.uid).unwrap().len(), 1);
    assert!(delete_association(&conn, &first.association.uid).unwrap());
    assert!(associations_for(&conn, &a.uid).unwrap().is_empty());

    create_association(&conn, NewAssociation::new(&a.uid, RelationType::RelatedTo, &b.uid)).unwrap();
    delete_memory(&conn, &b.uid).unwrap();
    assert!(associations_for(&conn, &a.uid).unwrap().is_empty(), "edges cascade with their memory");
}

#[test]
fn association_to_missing_memory_is_typed_error() {
    let conn = test_db();
    let a = create_memory(&conn, NewMemory::new("Exists", MemoryType::Fact)).unwrap();
    let err = create_association(&conn, NewAssociation::new(&a.uid, RelationType::RelatedTo, "ghost")).unwrap_err();
    assert_eq!(
        err.downcast_ref::<GraphError>(),
        Some(&GraphError::MemoryNotFound("ghost".into()))
    );
}

#[test]
fn directed_edges_only_traverse_forward() {
    let conn = test_db();
    let a = create_memory(&conn, NewMemory::new("Rain", MemoryType::Observation)).unwrap();
    let b = create_memory(&conn, NewMemory::new("Wet streets", MemoryType::Observation)).unwrap();
    create_association(&conn, NewAssociation::new(&b.uid, RelationType::CausedBy, &a.uid)).unwrap();

    let from_b: Vec<String> = neighbors(&conn, &b.uid, 1).unwrap().into_iter().map(|n| n.uid).collect();
    assert_eq!(from_b, vec![a.uid.clone()]);
    assert!(neighbors(&conn, &a.uid, 1).unwrap().is_empty());
}
