//! SqliteStore against real database files.

use std::sync::Arc;

use serde_json::json;

use shop_sync::cache::LoadOutcome;
use shop_sync::clock::ManualClock;
use shop_sync::config::EngineOptions;
use shop_sync::error::StorageError;
use shop_sync::remote::MemoryRemote;
use shop_sync::storage::{DurableStore, SqliteStore};
use shop_sync::sync::RemoteSyncEngine;
use shop_sync::types::{Collection, Record};

// ============================================================================
// Test helpers
// ============================================================================

fn db_path(dir: &tempfile::TempDir) -> String {
    dir.path().join("shop.db").to_string_lossy().into_owned()
}

fn open(path: &str, tables: &[&str]) -> SqliteStore {
    let store = SqliteStore::open(path).expect("open sqlite file");
    store.open_or_create(tables).expect("create tables");
    store
}

// ============================================================================
// DurableStore contract
// ============================================================================

#[test]
fn get_all_keeps_insertion_order_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    {
        let store = open(&path, &["items"]);
        store.put("items", "b", &json!({"id": "b"})).unwrap();
        store.put("items", "a", &json!({"id": "a"})).unwrap();
        store.put("items", "b", &json!({"id": "b", "v": 2})).unwrap();
    }

    let store = open(&path, &["items"]);
    assert_eq!(
        store.get_all("items").unwrap(),
        vec![json!({"id": "b", "v": 2}), json!({"id": "a"})]
    );
}

#[test]
fn tables_are_isolated() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.open_or_create(&["items", "parts"]).unwrap();
    store.put("items", "1", &json!(1)).unwrap();
    store.put("parts", "1", &json!(2)).unwrap();

    store.clear("items").unwrap();
    assert!(store.get_all("items").unwrap().is_empty());
    assert_eq!(store.get("parts", "1").unwrap(), Some(json!(2)));
}

#[test]
fn unregistered_table_and_unopened_store_are_errors() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(matches!(
        store.get_all("items"),
        Err(StorageError::NotInitialized)
    ));
    store.open_or_create(&["items"]).unwrap();
    assert!(matches!(
        store.put("nope", "k", &json!(null)),
        Err(StorageError::TableNotRegistered(_))
    ));
}

#[test]
fn replace_all_swaps_table_contents() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.open_or_create(&["users"]).unwrap();
    store.put("users", "old", &json!({"id": "old"})).unwrap();

    store
        .replace_all(
            "users",
            &[
                ("x".to_string(), json!({"id": "x"})),
                ("y".to_string(), json!({"id": "y"})),
            ],
        )
        .unwrap();
    assert_eq!(store.get_all("users").unwrap().len(), 2);
    assert!(store.get("users", "old").unwrap().is_none());
    assert!(store.delete("users", "x").unwrap());
    assert!(!store.delete("users", "x").unwrap());
}

#[test]
fn corrupt_rows_surface_as_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    open(&path, &["items"]);

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "INSERT INTO entries (tbl, key, value) VALUES ('items', 'bad', '{oops')",
        [],
    )
    .unwrap();
    drop(raw);

    let store = open(&path, &["items"]);
    assert!(matches!(
        store.get("items", "bad"),
        Err(StorageError::Corruption { .. })
    ));
}

// ============================================================================
// Engine over SQLite
// ============================================================================

#[tokio::test]
async fn cache_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(1_000));

    {
        let engine = RemoteSyncEngine::open(
            EngineOptions::new(
                Arc::new(MemoryRemote::new()),
                Arc::new(SqliteStore::open(&path).unwrap()),
            )
            .with_clock(clock.clone()),
        )
        .unwrap();
        let cache = engine.cache();
        cache.update_cache(Collection::Users, vec![Record::with_id("u").with("name", "Ann")]);
        cache.update_cache(Collection::Settings, vec![Record::with_id("cfg")]);
        cache.update_cache(Collection::Items, vec![Record::with_id("i1"), Record::with_id("i2")]);
        engine.shutdown();
    }

    let engine = RemoteSyncEngine::open(
        EngineOptions::new(
            Arc::new(MemoryRemote::new()),
            Arc::new(SqliteStore::open(&path).unwrap()),
        )
        .with_clock(clock),
    )
    .unwrap();
    let cache = engine.cache();
    assert_eq!(cache.load_persisted(), LoadOutcome::Loaded { records: 4 });
    assert_eq!(
        cache.find_cached(Collection::Users, "u").unwrap().name(),
        Some("Ann")
    );
    let items = cache.get_cached(Collection::Items).unwrap();
    assert_eq!(items[0].id.as_deref(), Some("i1"));
    assert_eq!(items[1].id.as_deref(), Some("i2"));
}
