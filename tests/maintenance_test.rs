mod helpers;

use std::sync::Arc;

use anamnesis::config::MaintenanceConfig;
use anamnesis::memory::associations::associations_for;
use anamnesis::memory::maintenance::{next_cron_occurrence, Maintainer};
use anamnesis::memory::metadata::{Metadata, RoutineMetadata, TriggerKind};
use anamnesis::memory::parse_ts;
use anamnesis::memory::store::{create_memory, get_memory, update_embedding};
use anamnesis::memory::types::{MemoryType, NewMemory, RelationType};
use chrono::{Duration, Utc};
use helpers::{embedding_with_similarity, set_importance, stub_providers, test_db, test_embedding, test_manager, StubChat, TEST_MODEL};

fn maintainer() -> Maintainer {
    Maintainer::new(MaintenanceConfig::default())
}

#[test]
fn repeated_decay_is_monotonic_and_stops_at_floor() {
    let conn = test_db();
    let m = create_memory(&conn, NewMemory::new("Saw a heron", MemoryType::Observation).with_importance(0.12)).unwrap();

    let mut previous = 0.12;
    for _ in 0..20 {
        maintainer().decay_importance(&conn).unwrap();
        let now = get_memory(&conn, &m.uid).unwrap().unwrap().importance;
        assert!(now <= previous);
        previous = now;
    }
    // decay stops once the value is at or below the floor
    assert!(previous <= 0.1);
    assert!(previous > 0.1 * 0.98 - 1e-12);
}

#[test]
fn near_duplicates_merge_into_the_earlier_memory() {
    let conn = test_db();
    let keeper = create_memory(&conn, NewMemory::new("Allergic to shellfish", MemoryType::Fact)).unwrap();
    let dup = create_memory(&conn, NewMemory::new("Has a shellfish allergy", MemoryType::Fact)).unwrap();
    update_embedding(&conn, &keeper.uid, &test_embedding(0), TEST_MODEL).unwrap();
    update_embedding(&conn, &dup.uid, &embedding_with_similarity(0, 0.97), TEST_MODEL).unwrap();

    let pairs = maintainer().merge_duplicates(&conn, Some(TEST_MODEL)).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].keeper_uid, keeper.uid);
    assert_eq!(pairs[0].duplicate_uid, dup.uid);
    assert!((pairs[0].similarity - 0.97).abs() < 1e-4);

    assert!(!get_memory(&conn, &keeper.uid).unwrap().unwrap().forgotten);
    assert!(get_memory(&conn, &dup.uid).unwrap().unwrap().forgotten);

    let edges = associations_for(&conn, &dup.uid).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].relation, RelationType::Updates);
    assert_eq!(edges[0].source_uid, keeper.uid);
    assert_eq!(edges[0].target_uid, dup.uid);

    // a second run finds nothing left to merge
    assert!(maintainer().merge_duplicates(&conn, Some(TEST_MODEL)).unwrap().is_empty());
}

#[test]
fn pairs_below_threshold_survive() {
    let conn = test_db();
    let a = create_memory(&conn, NewMemory::new("Plays chess", MemoryType::Fact)).unwrap();
    let b = create_memory(&conn, NewMemory::new("Plays go", MemoryType::Fact)).unwrap();
    update_embedding(&conn, &a.uid, &test_embedding(0), TEST_MODEL).unwrap();
    update_embedding(&conn, &b.uid, &embedding_with_similarity(0, 0.9), TEST_MODEL).unwrap();

    assert!(maintainer().merge_duplicates(&conn, Some(TEST_MODEL)).unwrap().is_empty());
    assert!(!get_memory(&conn, &b.uid).unwrap().unwrap().forgotten);
}

#[test]
fn identity_is_never_the_duplicate() {
    let conn = test_db();
    let fact = create_memory(&conn, NewMemory::new("Goes by Sam", MemoryType::Fact).with_importance(1.0)).unwrap();
    let who = create_memory(&conn, NewMemory::new("Name is Sam", MemoryType::Identity)).unwrap();
    update_embedding(&conn, &fact.uid, &test_embedding(0), TEST_MODEL).unwrap();
    update_embedding(&conn, &who.uid, &test_embedding(0), TEST_MODEL).unwrap();

    maintainer().merge_duplicates(&conn, Some(TEST_MODEL)).unwrap();
    assert!(!get_memory(&conn, &who.uid).unwrap().unwrap().forgotten);
}

#[test]
fn identity_survives_a_full_run_below_the_floor() {
    let conn = test_db();
    let who = create_memory(&conn, NewMemory::new("Lives with two cats", MemoryType::Identity)).unwrap();
    let trivia = create_memory(&conn, NewMemory::new("It rained once", MemoryType::Observation)).unwrap();
    set_importance(&conn, &who.uid, 0.05);
    set_importance(&conn, &trivia.uid, 0.05);

    let report = maintainer().run(&conn, None).unwrap();
    assert_eq!(report.forgotten, 1);

    let who = get_memory(&conn, &who.uid).unwrap().unwrap();
    assert!(!who.forgotten);
    assert_eq!(who.importance, 0.05);
    assert!(get_memory(&conn, &trivia.uid).unwrap().unwrap().forgotten);
}

#[test]
fn cron_next_occurrence_is_strictly_after_now() {
    let at_nine = parse_ts("2026-05-04T09:00:00Z").unwrap();
    assert_eq!(
        next_cron_occurrence("0 9 * * *", at_nine),
        parse_ts("2026-05-05T09:00:00Z")
    );
    assert_eq!(next_cron_occurrence("*/15 * * * *", at_nine), parse_ts("2026-05-04T09:15:00Z"));
    assert_eq!(next_cron_occurrence("every morning", at_nine), None);
}

#[tokio::test]
async fn manager_maintenance_and_due_routines() {
    let manager = test_manager(stub_providers(Arc::new(StubChat::new("[]"))));
    let routine = manager
        .create_memory(NewMemory::new("Stand-up every five minutes", MemoryType::Routine))
        .await
        .unwrap();
    manager
        .set_metadata(
            &routine.uid,
            Metadata::Routine(RoutineMetadata {
                trigger_kind: TriggerKind::Cron,
                trigger_value: "*/5 * * * *".into(),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

    let scheduled = manager.get_memory(&routine.uid).await.unwrap().unwrap();
    let next = scheduled.next_trigger_at.expect("cron routine gets a trigger");
    assert!(next > Utc::now() - Duration::seconds(1));
    assert!(next <= Utc::now() + Duration::minutes(5));

    assert!(manager.due_routines(Utc::now() - Duration::minutes(10)).await.unwrap().is_empty());
    let due = manager.due_routines(next).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].uid, routine.uid);

    let report = manager.run_maintenance().await.unwrap();
    assert_eq!(report.importance_decayed, 1);
    assert_eq!(report.merged, 0);
}

#[tokio::test]
async fn metadata_must_match_memory_type() {
    let manager = test_manager(stub_providers(Arc::new(StubChat::new("[]"))));
    let fact = manager
        .create_memory(NewMemory::new("Owns a kayak", MemoryType::Fact))
        .await
        .unwrap();
    let err = manager
        .set_metadata(&fact.uid, Metadata::Routine(RoutineMetadata::default()))
        .await;
    assert!(err.is_err());
    assert!(manager.get_metadata(&fact.uid).await.unwrap().is_none());
}
