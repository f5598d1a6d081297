//! Integration tests for `PgEventStore` and `PgManifest`.
//!
//! Run with `DATABASE_URL` pointing at a disposable database and
//! `cargo test -- --ignored`.

use chronicle_core::error::DomainError;
use chronicle_core::manifest::Manifest;
use chronicle_core::store::{EventStore, StoredEvent};
use chronicle_event_store::pg_event_store::PgEventStore;
use chronicle_event_store::pg_manifest::PgManifest;
use sqlx::PgPool;
use uuid::Uuid;

fn make_stored_event(aggregate_id: Uuid, version: i64) -> StoredEvent {
    StoredEvent::new(
        aggregate_id,
        Uuid::new_v4(),
        version,
        format!(r#"{{"version":{version}}}"#),
    )
}

// --- load_events ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_load_events_returns_empty_vec_for_nonexistent_aggregate(pool: PgPool) {
    let store = PgEventStore::new(pool);

    let events = store.load_events(Uuid::new_v4()).await.unwrap();

    assert!(events.is_empty());
}

// --- append + load round-trip ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_append_and_load_single_event(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    let event = make_stored_event(aggregate_id, 1);

    store.append(event.clone()).await.unwrap();

    let loaded = store.load_events(aggregate_id).await.unwrap();
    assert_eq!(loaded, vec![event]);
}

// --- ordering ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_append_events_preserves_version_order(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    let events = vec![
        make_stored_event(aggregate_id, 1),
        make_stored_event(aggregate_id, 2),
        make_stored_event(aggregate_id, 3),
    ];

    store.append_events(events).await.unwrap();

    let loaded = store.load_events(aggregate_id).await.unwrap();
    let versions: Vec<i64> = loaded.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    let last = store.last_event(aggregate_id).await.unwrap().unwrap();
    assert_eq!(last.version, 3);
}

// --- aggregate isolation ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_aggregate_isolation(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let agg_a = Uuid::new_v4();
    let agg_b = Uuid::new_v4();

    store.append(make_stored_event(agg_a, 1)).await.unwrap();
    store.append(make_stored_event(agg_b, 1)).await.unwrap();

    let loaded_a = store.load_events(agg_a).await.unwrap();
    let loaded_b = store.load_events(agg_b).await.unwrap();
    assert_eq!(loaded_a.len(), 1);
    assert_eq!(loaded_b.len(), 1);
    assert_eq!(loaded_a[0].aggregate_id, agg_a);
    assert_eq!(loaded_b[0].aggregate_id, agg_b);
}

// --- concurrency ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrency_conflict_on_duplicate_version(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    store.append(make_stored_event(aggregate_id, 1)).await.unwrap();

    let result = store.append(make_stored_event(aggregate_id, 1)).await;

    match result {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id: conflict_agg_id,
            expected,
            actual,
        }) => {
            assert_eq!(conflict_agg_id, aggregate_id);
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_conflicting_batch_is_rolled_back(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    store
        .append_events(vec![
            make_stored_event(aggregate_id, 1),
            make_stored_event(aggregate_id, 2),
        ])
        .await
        .unwrap();

    // Version 3 is free but version 2 is taken, so nothing may land.
    let result = store
        .append_events(vec![
            make_stored_event(aggregate_id, 3),
            make_stored_event(aggregate_id, 2),
        ])
        .await;

    assert!(result.is_err_and(|e| e.is_concurrency_conflict()));
    let loaded = store.load_events(aggregate_id).await.unwrap();
    assert_eq!(loaded.len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_append_empty_batch_is_noop(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    store.append_events(Vec::new()).await.unwrap();

    assert!(store.load_events(aggregate_id).await.unwrap().is_empty());
}

// --- manifest ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_manifest_compare_and_set(pool: PgPool) {
    let manifest = PgManifest::new(pool);
    let aggregate_id = Uuid::new_v4();

    assert_eq!(manifest.version(aggregate_id).await.unwrap(), None);
    manifest.update_manifest(aggregate_id, 0, 1).await.unwrap();
    manifest.update_manifest(aggregate_id, 1, 2).await.unwrap();
    let stale = manifest.update_manifest(aggregate_id, 1, 2).await;

    assert!(matches!(
        stale,
        Err(DomainError::ConcurrencyConflict { expected: 1, actual: 2, .. })
    ));
    assert_eq!(manifest.version(aggregate_id).await.unwrap(), Some(2));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_manifest_lagging_entry_is_advanced(pool: PgPool) {
    let manifest = PgManifest::new(pool);
    let aggregate_id = Uuid::new_v4();
    manifest.update_manifest(aggregate_id, 0, 1).await.unwrap();

    manifest.update_manifest(aggregate_id, 3, 4).await.unwrap();

    assert_eq!(manifest.version(aggregate_id).await.unwrap(), Some(4));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_manifest_remove_drops_entry(pool: PgPool) {
    let manifest = PgManifest::new(pool);
    let aggregate_id = Uuid::new_v4();
    manifest.update_manifest(aggregate_id, 0, 3).await.unwrap();

    manifest.remove(aggregate_id).await.unwrap();

    assert_eq!(manifest.version(aggregate_id).await.unwrap(), None);
    manifest.update_manifest(aggregate_id, 0, 1).await.unwrap();
}
