//! Soft delete, restore and permanent delete through the deleted bucket.

use serde_json::json;

use shop_sync::error::SyncError;
use shop_sync::types::{Collection, Record};

use crate::common::{deleted_record, harness, Call, START_MS};

fn in_items(h: &crate::common::Harness, id: &str) -> bool {
    h.engine.cache().contains(Collection::Items, id)
}

fn in_bucket(h: &crate::common::Harness, id: &str) -> bool {
    h.engine.cache().contains(Collection::Deleted, id)
}

#[tokio::test]
async fn remove_moves_record_into_bucket() {
    let h = harness();
    h.engine.cache().update_cache(
        Collection::Items,
        vec![Record::with_id("k").with("name", "Oil").with("note", serde_json::Value::Null)],
    );

    h.clock.advance(10);
    let m = h.engine.remove("k", Collection::Items).await.unwrap();
    assert!(m.is_confirmed());
    assert!(!in_items(&h, "k"));
    assert!(in_bucket(&h, "k"));

    let moved = h.engine.cache().find_cached(Collection::Deleted, "k").unwrap();
    assert!(moved.is_deleted());
    assert_eq!(moved.origin(), Some(Collection::Items));
    assert_eq!(moved.doc_updated, Some(START_MS + 10));
    assert!(!moved.fields.contains_key("note"), "null fields stripped");

    let remote = h.remote.inner.doc(Collection::Items, "k").unwrap();
    assert_eq!(remote["deleted"], json!(true));
    assert_eq!(remote["docType"], json!("items"));
}

#[tokio::test]
async fn remove_of_uncached_record_is_a_no_op() {
    let h = harness();
    assert!(h.engine.remove("ghost", Collection::Items).await.is_none());
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn remove_while_offline_still_moves_locally() {
    let h = harness();
    h.engine
        .cache()
        .update_cache(Collection::Parts, vec![Record::with_id("p")]);
    h.remote.inner.set_offline(true);

    let m = h.engine.remove("p", Collection::Parts).await.unwrap();
    assert!(!m.is_confirmed());
    assert!(!h.engine.cache().contains(Collection::Parts, "p"));
    assert!(in_bucket(&h, "p"));
}

#[tokio::test]
async fn record_is_never_in_both_places() {
    let h = harness();
    let ids: Vec<String> = (0..20).map(|i| format!("r{i}")).collect();
    h.engine.cache().update_cache(
        Collection::Items,
        ids.iter().map(|id| Record::with_id(id.clone())).collect(),
    );

    for (i, id) in ids.iter().enumerate() {
        if i % 2 == 0 {
            h.engine.remove(id, Collection::Items).await.unwrap();
        }
        if i % 4 == 0 {
            h.engine.restore(id).await.unwrap();
        }
        for id in &ids {
            assert!(
                !(in_items(&h, id) && in_bucket(&h, id)),
                "{id} visible in origin and bucket"
            );
        }
    }
}

#[tokio::test]
async fn refetch_of_deleted_record_keeps_exclusivity() {
    let h = harness();
    h.engine
        .cache()
        .update_cache(Collection::Items, vec![Record::with_id("z").with("name", "Z")]);
    h.remote
        .inner
        .insert(Collection::Items, "z", json!({"name": "Z", "deleted": true}));

    h.engine.get_all(Collection::Items, true).await.unwrap();
    assert!(!in_items(&h, "z"));
    assert!(in_bucket(&h, "z"));
}

#[tokio::test]
async fn refetch_of_revived_record_leaves_bucket() {
    let h = harness();
    h.remote
        .inner
        .insert(Collection::Items, "k", json!({"name": "Oil"}));
    h.engine.get_all(Collection::Items, true).await.unwrap();
    h.engine.remove("k", Collection::Items).await.unwrap();
    assert!(in_bucket(&h, "k"));

    // Another device restores it.
    h.remote.inner.insert(
        Collection::Items,
        "k",
        json!({"name": "Oil", "deleted": false, "docUpdated": START_MS + 10_000}),
    );
    h.clock.advance(h.engine.options().fetch_window_ms + 1_000);
    h.engine.get_all(Collection::Items, false).await.unwrap();

    assert!(in_items(&h, "k"));
    assert!(!in_bucket(&h, "k"), "k visible in origin and bucket");
}

#[tokio::test]
async fn writes_to_soft_deleted_record_are_refused() {
    let h = harness();
    h.engine
        .cache()
        .update_cache(Collection::Items, vec![Record::with_id("k").with("name", "Oil")]);
    h.engine.remove("k", Collection::Items).await.unwrap();
    h.remote.clear_calls();

    let err = h
        .engine
        .update(Record::with_id("k").with("name", "Grease"), Collection::Items)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SoftDeleted { .. }));

    let err = h
        .engine
        .update_all(
            vec![Record::with_id("other"), Record::with_id("k")],
            Collection::Items,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SoftDeleted { .. }));

    assert!(h.remote.calls().is_empty());
    assert!(!in_items(&h, "k"));
    assert!(in_bucket(&h, "k"));
}

#[tokio::test]
async fn restore_of_absent_id_changes_nothing() {
    let h = harness();
    h.engine
        .cache()
        .update_cache(Collection::Deleted, vec![deleted_record("other", Collection::Items)]);
    let before = h.engine.cache().get_cached(Collection::Deleted);

    assert!(h.engine.restore("missing").await.is_none());
    assert!(h.remote.calls().is_empty());
    assert_eq!(h.engine.cache().get_cached(Collection::Deleted), before);
    assert!(h.engine.cache().get_cached(Collection::Items).is_none());
}

#[tokio::test]
async fn restore_without_origin_is_refused() {
    let h = harness();
    let mut untyped = deleted_record("u", Collection::Items);
    untyped.doc_type = None;
    h.engine
        .cache()
        .update_cache(Collection::Deleted, vec![untyped]);

    assert!(h.engine.restore("u").await.is_none());
    assert!(in_bucket(&h, "u"));
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn restore_returns_record_to_origin() {
    let h = harness();
    h.engine
        .cache()
        .update_cache(Collection::Services, vec![Record::with_id("t").with("name", "Tune-up")]);
    h.engine.remove("t", Collection::Services).await.unwrap();

    let m = h.engine.restore("t").await.unwrap();
    assert!(m.is_confirmed());
    assert_eq!(m.record.deleted, Some(false));
    assert!(h.engine.cache().contains(Collection::Services, "t"));
    assert!(!in_bucket(&h, "t"));

    let remote = h.remote.inner.doc(Collection::Services, "t").unwrap();
    assert_eq!(remote["deleted"], json!(false));
}

#[tokio::test]
async fn remove_permanent_returns_refreshed_bucket() {
    let h = harness();
    h.remote
        .inner
        .insert(Collection::Parts, "a", json!({"deleted": true, "docType": "parts"}));
    h.engine.cache().update_cache(
        Collection::Deleted,
        vec![
            deleted_record("a", Collection::Parts),
            deleted_record("b", Collection::Items),
        ],
    );

    let bucket = h.engine.remove_permanent("a").await;
    assert_eq!(bucket.len(), 1);
    assert_eq!(bucket[0].id.as_deref(), Some("b"));
    assert!(h.remote.inner.doc(Collection::Parts, "a").is_none());
    assert!(h
        .remote
        .calls()
        .contains(&Call::Delete(Collection::Parts, "a".to_string())));

    let unchanged = h.engine.remove_permanent("nope").await;
    assert_eq!(unchanged, bucket);
}

#[tokio::test]
async fn remove_permanent_many_chunks_batches() {
    let h = harness();
    let ids: Vec<String> = (0..102).map(|i| i.to_string()).collect();
    h.engine.cache().update_cache(
        Collection::Deleted,
        ids.iter()
            .map(|id| deleted_record(id, Collection::Items))
            .collect(),
    );

    let report = h.engine.remove_permanent_many(&ids).await;
    assert_eq!(h.remote.batch_sizes(), vec![100, 2]);
    assert_eq!(report.batches, vec![100, 2]);
    assert_eq!(report.deleted.len(), 102);
    assert!(report.is_complete());
    assert!(h.engine.cache().get_cached(Collection::Deleted).is_none());
}

#[tokio::test]
async fn bucket_typed_records_are_never_deleted_remotely() {
    let h = harness();
    h.engine.cache().update_cache(
        Collection::Deleted,
        vec![
            deleted_record("self", Collection::Deleted),
            deleted_record("ok", Collection::Items),
        ],
    );

    let bucket = h.engine.remove_permanent("self").await;
    assert_eq!(bucket.len(), 2);

    let report = h
        .engine
        .remove_permanent_many(&["self".to_string(), "ok".to_string()])
        .await;
    assert_eq!(report.skipped, vec!["self".to_string()]);
    assert_eq!(report.deleted, vec!["ok".to_string()]);
    assert!(!h
        .remote
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Delete(Collection::Deleted, _))));
    assert_eq!(h.remote.batch_sizes(), vec![1]);
}
