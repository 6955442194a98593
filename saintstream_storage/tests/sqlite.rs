#![expect(clippy::expect_used, reason = "Test failure should panic with context")]

use saintstream_core::KeyValueStore;
use saintstream_storage::SqliteKeyValueStore;
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> SqliteKeyValueStore {
    SqliteKeyValueStore::new(&dir.path().join("history.db"))
        .await
        .expect("Failed to open database")
}

#[tokio::test]
async fn test_set_then_get() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = open_store(&dir).await;

    assert_eq!(store.get("moviebot_guest").await.expect("get"), None);

    store
        .set("moviebot_guest", r#"[{"role":"user","content":"hi"}]"#)
        .await
        .expect("set");
    assert_eq!(
        store.get("moviebot_guest").await.expect("get").as_deref(),
        Some(r#"[{"role":"user","content":"hi"}]"#)
    );
}

#[tokio::test]
async fn test_set_overwrites_existing_value() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = open_store(&dir).await;

    store.set("moviebot_u-1", "first").await.expect("set");
    store.set("moviebot_u-1", "second").await.expect("set");

    assert_eq!(
        store.get("moviebot_u-1").await.expect("get").as_deref(),
        Some("second")
    );
    assert_eq!(store.keys().await.expect("keys"), vec!["moviebot_u-1"]);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = open_store(&dir).await;

    store.set("moviebot_guest", "[]").await.expect("set");
    store.delete("moviebot_guest").await.expect("delete");
    store.delete("moviebot_guest").await.expect("second delete");

    assert_eq!(store.get("moviebot_guest").await.expect("get"), None);
}

#[tokio::test]
async fn test_values_survive_reopen() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    {
        let store = open_store(&dir).await;
        store.set("moviebot_u-2", "kept").await.expect("set");
        store.set("moviebot_guest", "also kept").await.expect("set");
    }

    let store = open_store(&dir).await;
    assert_eq!(
        store.keys().await.expect("keys"),
        vec!["moviebot_guest", "moviebot_u-2"]
    );
    assert_eq!(
        store.get("moviebot_u-2").await.expect("get").as_deref(),
        Some("kept")
    );
}
