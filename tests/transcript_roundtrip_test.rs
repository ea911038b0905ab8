//! Exercises `TranscriptStore::save` followed by `TranscriptStore::load`
//! against a mock platform backend, verifying the chat history round-trips
//! byte-for-byte through the folder/object/file creation and content
//! read/write calls.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use ragbridge::platform::{Credentials, PlatformClient};
use ragbridge::transcript::TranscriptStore;
use ragbridge::types::{ChatMessage, ChatTranscript};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct MockState {
    file_content: Arc<Mutex<Option<String>>>,
}

async fn find_children(State(_state): State<MockState>, Path(_parent): Path<String>) -> Json<Value> {
    Json(json!([]))
}

async fn create_folder(State(_state): State<MockState>, Path(_parent): Path<String>) -> Json<Value> {
    Json(json!({ "id": "folder-1", "name": "Диалоги с ИИ-помощником" }))
}

async fn create_object(State(_state): State<MockState>, Path(_folder): Path<String>) -> Json<Value> {
    Json(json!({ "id": "obj-1" }))
}

async fn object_files(State(_state): State<MockState>, Path(_object): Path<String>) -> Json<Value> {
    Json(json!([{ "fileId": "file-1", "name": "chat_history.json", "size": 0, "contentType": "application/json" }]))
}

async fn write_file(State(state): State<MockState>, Path(_file): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    let content = body.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    *state.file_content.lock().unwrap() = Some(content);
    Json(json!({ "ok": true }))
}

async fn read_file(State(state): State<MockState>, Path(_file): Path<String>) -> Json<Value> {
    let content = state.file_content.lock().unwrap().clone().unwrap_or_default();
    Json(json!({ "content": content }))
}

async fn spawn_mock_platform(state: MockState) -> std::net::SocketAddr {
    let app = Router::new()
        .route("/platform-api/v1/folder/{parent}/children/find", post(find_children))
        .route("/platform-api/v1/folder/{parent}/children", post(create_folder))
        .route("/platform-api/v1/folder/{folder}/objects", post(create_object))
        .route("/platform-api/v1/object/{object}/files", get(object_files))
        .route("/platform-api/v1/file/{file}/write", post(write_file))
        .route("/platform-api/v1/file/{file}/read", get(read_file))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn save_then_load_round_trips_transcript() {
    let state = MockState::default();
    let addr = spawn_mock_platform(state).await;

    let platform = Arc::new(PlatformClient::new(format!("http://{addr}")));
    let store = TranscriptStore::new(platform, "authority-1");
    let creds = Credentials { referer: "https://platform.example.com/doc/123", jsessionid: "sess-abc" };

    let transcript = ChatTranscript {
        messages: vec![
            ChatMessage { role: "user".into(), content: "What is the refund policy?".into() },
            ChatMessage { role: "assistant".into(), content: "Refunds are processed within 14 days.".into() },
        ],
    };

    let object_id = store.save(&creds, "parent-folder", "Refund question", "20260801120000", &transcript).await.unwrap();
    assert_eq!(object_id, "obj-1");

    let loaded = store.load(&creds, &object_id).await.unwrap();
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.messages[1].content, "Refunds are processed within 14 days.");
}
