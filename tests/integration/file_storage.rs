//! Store persistence through JSON files

use super::support::counter_slice;
use serde_json::json;
use strata::store::JsonFileStorage;
use strata::{combine_slices, PersistOptions, Store};
use tempfile::TempDir;

fn options(primary: &JsonFileStorage, sensitive: &JsonFileStorage) -> PersistOptions {
    PersistOptions::new()
        .persist(primary.clone())
        .persist_sensitive(sensitive.clone())
        .persisted_data(primary.clone())
        .persisted_sensitive_data(sensitive.clone())
}

/// State written by one store is restored by the next
#[tokio::test]
async fn test_round_trip_through_files() {
    let temp_dir = TempDir::new().unwrap();
    let primary = JsonFileStorage::new(temp_dir.path().join("state.json"));
    let sensitive = JsonFileStorage::new(temp_dir.path().join("secure/state.json"));

    {
        let root = combine_slices("root", vec![counter_slice("counter")]).unwrap();
        let store = Store::new(root, options(&primary, &sensitive)).unwrap();
        store.persistor().wait_restored().await;

        for case in ["increment", "increment", "sensitiveIncrement"] {
            store.dispatch(store.action("counter", case).unwrap()).unwrap();
        }
        store.persistor().flush();
    }

    assert_eq!(
        primary.read().unwrap().unwrap().to_json(),
        json!({"counter": {"value": 2}})
    );
    assert_eq!(
        sensitive.read().unwrap().unwrap().to_json(),
        json!({"counter": {"sensitiveValue": 1}})
    );

    let root = combine_slices("root", vec![counter_slice("counter")]).unwrap();
    let store = Store::new(root, options(&primary, &sensitive)).unwrap();
    store.persistor().wait_restored().await;
    assert_eq!(
        store.state().to_json(),
        json!({"counter": {"value": 2, "sensitiveValue": 1}})
    );
}

/// A corrupt file restores nothing instead of failing
#[tokio::test]
async fn test_corrupt_file_restores_initial_state() {
    let temp_dir = TempDir::new().unwrap();
    let primary = JsonFileStorage::new(temp_dir.path().join("state.json"));
    let sensitive = JsonFileStorage::new(temp_dir.path().join("sensitive.json"));
    std::fs::write(primary.path(), "{ not json").unwrap();

    let root = combine_slices("root", vec![counter_slice("counter")]).unwrap();
    let store = Store::new(root, options(&primary, &sensitive)).unwrap();
    store.persistor().wait_restored().await;

    assert_eq!(
        store.state().to_json(),
        json!({"counter": {"value": 0, "sensitiveValue": 0}})
    );
}
