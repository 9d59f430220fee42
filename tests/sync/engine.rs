//! RemoteSyncEngine reads and writes against a recording remote.

use serde_json::json;

use shop_sync::config::{SyncOptions, DEFAULT_ASSET_URL_PREFIX};
use shop_sync::error::SyncError;
use shop_sync::remote::Filter;
use shop_sync::types::{Collection, Record};

use crate::common::{harness, harness_with, Call, START_MS};

// ============================================================================
// get_all
// ============================================================================

#[tokio::test]
async fn get_all_serves_cache_within_fetch_window() {
    let h = harness();
    h.remote.inner.insert(Collection::Items, "a", json!({"name": "A"}));
    h.remote.inner.insert(Collection::Items, "b", json!({"name": "B"}));

    let first = h.engine.get_all(Collection::Items, false).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].id.as_deref(), Some("a"));

    h.clock.advance(4_999);
    let second = h.engine.get_all(Collection::Items, false).await.unwrap();
    assert_eq!(second, first);

    let queries = h.remote.count(|c| matches!(c, Call::Query(..)));
    assert_eq!(queries, 1, "second read served from cache");
}

#[tokio::test]
async fn get_all_fetches_incrementally_after_window() {
    let h = harness();
    h.remote.inner.insert(Collection::Items, "a", json!({"name": "A"}));
    h.engine.get_all(Collection::Items, false).await.unwrap();

    h.clock.advance(5_000);
    h.remote.inner.insert(
        Collection::Items,
        "a",
        json!({"name": "A2", "docUpdated": START_MS + 10}),
    );
    let items = h.engine.get_all(Collection::Items, false).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name(), Some("A2"), "remote copy wins");

    let calls = h.remote.calls();
    assert_eq!(calls[0], Call::Query(Collection::Items, None));
    assert_eq!(
        calls[1],
        Call::Query(
            Collection::Items,
            Some(Filter::greater_than("docUpdated", START_MS))
        )
    );
}

#[tokio::test]
async fn force_refetches_everything() {
    let h = harness();
    h.remote.inner.insert(Collection::Parts, "p", json!({}));
    h.engine.get_all(Collection::Parts, false).await.unwrap();
    h.engine.get_all(Collection::Parts, true).await.unwrap();

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], Call::Query(Collection::Parts, None));
}

#[tokio::test]
async fn remotely_deleted_records_land_in_the_bucket() {
    let h = harness();
    h.remote.inner.insert(Collection::Items, "live", json!({"name": "L"}));
    h.remote
        .inner
        .insert(Collection::Items, "gone", json!({"name": "G", "deleted": true}));

    let items = h.engine.get_all(Collection::Items, false).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id.as_deref(), Some("live"));

    let bucket = h.engine.get_all(Collection::Deleted, false).await.unwrap();
    assert_eq!(bucket.len(), 1);
    assert_eq!(bucket[0].origin(), Some(Collection::Items));
}

#[tokio::test]
async fn deleted_bucket_never_queries_remote() {
    let h = harness();
    let bucket = h.engine.get_all(Collection::Deleted, true).await.unwrap();
    assert!(bucket.is_empty());
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn network_failure_is_an_error_not_an_empty_list() {
    let h = harness();
    h.remote.inner.set_offline(true);
    let err = h.engine.get_all(Collection::Shops, false).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote { ref collection, .. } if collection == "shops"));
}

#[tokio::test]
async fn malformed_remote_documents_are_skipped() {
    let h = harness();
    h.remote.inner.insert(Collection::Items, "bad", json!([1, 2]));
    h.remote.inner.insert(Collection::Items, "ok", json!({"name": "ok"}));
    let items = h.engine.get_all(Collection::Items, false).await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn get_merges_single_record() {
    let h = harness();
    h.remote.inner.insert(Collection::Users, "u1", json!({"name": "Ann"}));

    let user = h.engine.get("u1", Collection::Users).await.unwrap().unwrap();
    assert_eq!(user.name(), Some("Ann"));
    assert!(h.engine.cache().contains(Collection::Users, "u1"));
    assert!(h.engine.get("nope", Collection::Users).await.unwrap().is_none());
}

// ============================================================================
// update / update_all / add
// ============================================================================

#[tokio::test]
async fn update_assigns_id_stamps_time_and_skips_uploaded_asset() {
    let h = harness();
    let image = format!("{DEFAULT_ASSET_URL_PREFIX}v0/b/photo.png");
    let record = Record::new().with("name", "Saw").with("image", image.clone());

    let mutation = h.engine.update(record, Collection::Items).await.unwrap();
    assert!(mutation.is_confirmed());
    let id = mutation.record.id.clone().unwrap();
    assert_eq!(mutation.record.doc_updated, Some(START_MS));

    let remote = h.remote.inner.doc(Collection::Items, &id).unwrap();
    assert!(remote.get("image").is_none(), "uploaded asset not re-sent");
    assert_eq!(remote["docUpdated"], json!(START_MS));

    let cached = h.engine.cache().find_cached(Collection::Items, &id).unwrap();
    assert_eq!(cached.field("image"), Some(&json!(image)), "cache keeps the asset");
}

#[tokio::test]
async fn inline_asset_is_sent() {
    let h = harness();
    let record = Record::with_id("i").with("image", "data:image/png;base64,AAAA");
    h.engine.update(record, Collection::Items).await.unwrap();
    let remote = h.remote.inner.doc(Collection::Items, "i").unwrap();
    assert!(remote.get("image").is_some());
}

#[tokio::test]
async fn update_merges_onto_cached_record() {
    let h = harness();
    h.engine
        .cache()
        .update_cache(Collection::Shops, vec![Record::with_id("s").with("name", "Main").with("city", "Pécs")]);

    let m = h
        .engine
        .update(Record::with_id("s").with("name", "Central"), Collection::Shops)
        .await
        .unwrap();
    assert_eq!(m.record.name(), Some("Central"));
    assert_eq!(m.record.field("city"), Some(&json!("Pécs")));
}

#[tokio::test]
async fn failed_update_still_applies_locally() {
    let h = harness();
    h.remote.inner.set_offline(true);
    let m = h
        .engine
        .update(Record::with_id("x").with("name", "Offline"), Collection::Services)
        .await
        .unwrap();
    assert!(!m.is_confirmed());
    assert!(matches!(m.error(), Some(SyncError::Remote { .. })));
    assert!(h.engine.cache().contains(Collection::Services, "x"));
}

#[tokio::test]
async fn writes_to_the_deleted_bucket_are_refused() {
    let h = harness();
    let err = h
        .engine
        .update(Record::with_id("x"), Collection::Deleted)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::LocalOnly(_)));
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn update_all_commits_one_batch() {
    let h = harness();
    let records = vec![
        Record::with_id("1").with("n", 1),
        Record::with_id("2").with("n", 2),
        Record::new().with("n", 3),
    ];
    let mutations = h.engine.update_all(records, Collection::Parts).await.unwrap();

    assert_eq!(mutations.len(), 3);
    assert!(mutations.iter().all(|m| m.is_confirmed()));
    assert_eq!(h.remote.batch_sizes(), vec![3]);
    assert_eq!(h.remote.count(|c| matches!(c, Call::Set(..))), 0);
    assert_eq!(h.engine.cache().get_cached(Collection::Parts).unwrap().len(), 3);
}

#[tokio::test]
async fn failed_batch_marks_every_mutation_local() {
    let h = harness();
    h.remote.inner.reject_writes(Collection::Parts, true);
    let mutations = h
        .engine
        .update_all(vec![Record::with_id("1"), Record::with_id("2")], Collection::Parts)
        .await
        .unwrap();
    assert!(mutations.iter().all(|m| !m.is_confirmed()));
    assert_eq!(h.engine.cache().get_cached(Collection::Parts).unwrap().len(), 2);
}

#[tokio::test]
async fn add_writes_back_remote_id() {
    let h = harness();
    let m = h
        .engine
        .add(Record::new().with("title", "Brake job"), Collection::Completions)
        .await
        .unwrap();
    let id = m.record.id.clone().unwrap();
    assert!(h.remote.inner.doc(Collection::Completions, &id).is_some());
    assert!(h.engine.cache().contains(Collection::Completions, &id));
}

#[tokio::test]
async fn failed_add_leaves_cache_untouched() {
    let h = harness();
    h.remote.inner.reject_writes(Collection::Completions, true);
    let err = h
        .engine
        .add(Record::new().with("title", "x"), Collection::Completions)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Remote { .. }));
    assert!(h.engine.cache().get_cached(Collection::Completions).is_none());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn configured_ttls_apply_on_open() {
    let mut options = SyncOptions::default();
    options.ttl_ms.insert(Collection::Items, 100);
    let h = harness_with(options);

    h.remote.inner.insert(Collection::Items, "a", json!({}));
    h.engine.get_all(Collection::Items, false).await.unwrap();
    h.clock.advance(101);
    assert!(h.engine.cache().get_cached(Collection::Items).is_none());
}

#[tokio::test]
async fn invalid_options_fail_open() {
    use shop_sync::config::EngineOptions;
    use shop_sync::{MemoryRemote, MemoryStore, RemoteSyncEngine, ShopSyncError};
    use std::sync::Arc;

    let options = SyncOptions {
        bulk_delete_chunk: 0,
        ..SyncOptions::default()
    };
    let result = RemoteSyncEngine::open(
        EngineOptions::new(Arc::new(MemoryRemote::new()), Arc::new(MemoryStore::new()))
            .with_sync(options),
    );
    assert!(matches!(result, Err(ShopSyncError::Config(_))));
}
