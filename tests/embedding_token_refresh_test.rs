//! Exercises the embedding client's 401-triggered token refresh against a
//! local mock OAuth2 + embedding endpoint (scenario: "Token refresh on
//! 401" — exactly one token fetch, one 401, one token refetch, one
//! successful embedding call).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use ragbridge::embeddings::EmbeddingClient;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Counters {
    token_calls: Arc<AtomicUsize>,
    embed_calls: Arc<AtomicUsize>,
}

async fn token_handler(State(counters): State<Counters>) -> Json<Value> {
    counters.token_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "access_token": "test-token" }))
}

async fn embed_handler(State(counters): State<Counters>) -> (axum::http::StatusCode, Json<Value>) {
    let call_number = counters.embed_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call_number == 1 {
        (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "error": "expired" })))
    } else {
        (axum::http::StatusCode::OK, Json(json!({ "data": [{ "embedding": [0.1, 0.2, 0.3] }] })))
    }
}

async fn spawn_mock_server(counters: Counters) -> SocketAddr {
    let app = Router::new()
        .route("/token", post(token_handler))
        .route("/embed", post(embed_handler))
        .with_state(counters);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn embed_retries_once_after_401_and_succeeds() {
    let counters = Counters::default();
    let addr = spawn_mock_server(counters.clone()).await;

    let client = EmbeddingClient::new(
        format!("http://{addr}/token"),
        format!("http://{addr}/embed"),
        "client-id",
        "client-secret",
        "embeddings",
        "test-embedding-model",
        10,
    );

    let result = client.embed(&["hello world".to_string()]).await.unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result[0], vec![0.1, 0.2, 0.3]);
    assert_eq!(counters.embed_calls.load(Ordering::SeqCst), 2, "expected one 401 then one success");
    assert_eq!(counters.token_calls.load(Ordering::SeqCst), 2, "expected initial fetch plus one refresh");
}
