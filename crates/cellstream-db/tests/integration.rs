//! Integration tests for the `cellstream-db` store layer.
//!
//! These tests require a live `Dragonfly` instance.
//! Run with:
//!
//! ```bash
//! docker run -d -p 6379:6379 docker.dragonflydb.io/dragonflydb/dragonfly
//! cargo test -p cellstream-db -- --ignored
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use cellstream_db::{CellStore, DragonflyStore, MemoryStore, StoreError};

/// Dragonfly connection URL for the local Docker instance.
const DRAGONFLY_URL: &str = "redis://localhost:6379";

async fn exercise_replace<S: CellStore>(store: &S) {
    let key = b"89c25a3";

    assert_eq!(store.get(key).await.expect("get"), None);

    store.put(key, br#"{"features":[]}"#).await.expect("put");
    store.delete(key).await.expect("delete");
    assert_eq!(store.get(key).await.expect("get after delete"), None);

    let value = br#"{"features":[{"id":"p1"}]}"#;
    store.put(key, value).await.expect("put after delete");
    assert_eq!(store.get(key).await.expect("get").as_deref(), Some(&value[..]));
}

#[tokio::test]
async fn memory_store_replace_sequence() {
    let store = MemoryStore::new();
    exercise_replace(&store).await;
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_replace_sequence() {
    let store = DragonflyStore::connect(DRAGONFLY_URL)
        .await
        .expect("Failed to connect to Dragonfly");
    store.flush_all().await.expect("Failed to flush");

    exercise_replace(&store).await;

    store.flush_all().await.expect("Failed to flush");
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_values_are_binary_safe() {
    let store = DragonflyStore::connect(DRAGONFLY_URL)
        .await
        .expect("Failed to connect to Dragonfly");
    store.flush_all().await.expect("Failed to flush");

    let value: Vec<u8> = (0u8..=255).collect();
    store.put(b"binary", &value).await.expect("put");
    assert_eq!(store.get(b"binary").await.expect("get"), Some(value));

    store.flush_all().await.expect("Failed to flush");
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_commands_fail_fast_after_quit() {
    let store = DragonflyStore::connect(DRAGONFLY_URL)
        .await
        .expect("Failed to connect to Dragonfly");
    store.quit().await.expect("quit");

    let result = store.get(b"89c25a3").await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn dragonfly_rejects_bad_url() {
    let result = DragonflyStore::connect("not a url").await;
    assert!(result.is_err());
}
