//! Exercises the `/v1/rag/health` liveness probe contract: an unreachable
//! store reports `available: false` within the configured timeout, and a
//! reachable one reports `available: true`.

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use ragbridge::vectorstore::{VectorStore, VectorStoreCache};

#[tokio::test]
async fn check_connection_reports_available_for_reachable_store() {
    let app = Router::new().route("/", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let cache = VectorStoreCache::new();
    let store = VectorStore::for_collection(&cache, &format!("http://{addr}"), "docs", 1024);
    let (available, detail) = store.check_connection(Duration::from_secs(2)).await;

    assert!(available);
    assert!(detail.is_none());
}

#[tokio::test]
async fn check_connection_reports_unavailable_for_unreachable_store() {
    // Port 1 is reserved and nothing will ever accept on it locally.
    let cache = VectorStoreCache::new();
    let store = VectorStore::for_collection(&cache, "http://127.0.0.1:1", "docs", 1024);
    let (available, detail) = store.check_connection(Duration::from_millis(500)).await;

    assert!(!available);
    assert!(detail.is_some());
}
