use kern_cache::{InProcessMapBackend, Microcache, SharedTableBackend};
use std::time::Duration;

#[tokio::test]
async fn path_priority_style_round_trip() {
    let cache = Microcache::with_backend(InProcessMapBackend::new());
    cache.store("k1", "v1".to_string(), Some(Duration::from_secs(60))).await;
    let (v, hit) = cache.fetch::<String>("k1").await;
    assert!(hit);
    assert_eq!(v.as_deref(), Some("v1"));
}

#[tokio::test]
async fn shared_table_backend_respects_row_cap() {
    let cache = Microcache::with_backend(SharedTableBackend::new(1, 4096));
    assert!(cache.add("a", 1i32, None).await);
    // Second distinct key exceeds the row cap — write is silently dropped.
    assert!(!cache.add("b", 2i32, None).await);
    let (v, hit) = cache.fetch::<i32>("b").await;
    assert!(!hit);
    assert_eq!(v, None);
}

#[tokio::test]
async fn shared_table_backend_rejects_oversized_values() {
    let cache = Microcache::with_backend(SharedTableBackend::new(10, 8));
    let big = "x".repeat(100);
    assert!(!cache.add("k", big, None).await);
}

#[tokio::test]
async fn never_expires_without_ttl() {
    let cache = Microcache::with_backend(InProcessMapBackend::new());
    cache.store("k", 1i32, None).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (v, hit) = cache.fetch::<i32>("k").await;
    assert!(hit);
    assert_eq!(v, Some(1));
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn embedded_sql_backend_round_trips() {
    use kern_cache::EmbeddedSqlBackend;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sqlite");
    let backend = EmbeddedSqlBackend::open(&path).await.unwrap();
    let cache = Microcache::with_backend(backend);

    cache.store("k", 9i32, Some(Duration::from_secs(60))).await;
    let (v, hit) = cache.fetch::<i32>("k").await;
    assert!(hit);
    assert_eq!(v, Some(9));

    assert!(cache.delete("k").await);
    let (_, hit) = cache.fetch::<i32>("k").await;
    assert!(!hit);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn embedded_sql_backend_entry_is_idempotent() {
    use kern_cache::EmbeddedSqlBackend;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sqlite");
    let backend = EmbeddedSqlBackend::open(&path).await.unwrap();
    let cache = Microcache::with_backend(backend);
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .entry(
                    "computed",
                    || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            "result".to_string()
                        }
                    },
                    Some(Duration::from_secs(60)),
                )
                .await
                .unwrap()
        }));
    }

    for h in handles {
        assert_eq!(h.await.unwrap(), "result");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
