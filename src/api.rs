//! REST API route handlers (§4.10, §6).
//!
//! Every handler returns HTTP 200 on both success and handled application
//! errors — clients branch on the presence of an `error` field in the body.
//! A genuinely unhandled panic is the only thing that should ever produce a
//! non-200 status, and that is caught by [`crate::server`]'s fallback layer,
//! not by anything in this module.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::{self, AgentLoop};
use crate::embeddings::EmbeddingClient;
use crate::error::ServiceError;
use crate::hooks::Hooks;
use crate::llm::{LlmClient, LlmClientCache};
use crate::platform::{Credentials, PlatformClient};
use crate::retriever::HybridRetriever;
use crate::search::HttpSearchProvider;
use crate::tools::{final_answer_tool, rag_tool, reasoning_tool, web_search_tool, ToolRegistry};
use crate::transcript::TranscriptStore;
use crate::types::{BaseUrl, ChatMessage, ChatTranscript, LlmClientParams, Message, ModelName, Temperature};
use crate::vectorstore::{VectorStore, VectorStoreCache};
use crate::config::ServiceConfig;

/// Scope requested from the embedding token endpoint. The request contract
/// supplies a single `embed_url`; this implementation uses it as both the
/// OAuth token endpoint and the embedding endpoint, matching deployments
/// that front both behind the same gateway path.
const EMBED_SCOPE: &str = "embeddings";

/// Process-wide resources shared across requests: client caches and the
/// loaded configuration. Per-request credentials (LLM keys, platform
/// session) never live here — they arrive fresh with every call (§5).
pub struct AppState {
    pub config: ServiceConfig,
    pub llm_cache: Arc<LlmClientCache>,
    pub vector_store_cache: Arc<VectorStoreCache>,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            llm_cache: Arc::new(LlmClientCache::new()),
            vector_store_cache: Arc::new(VectorStoreCache::new()),
        }
    }
}

fn error_envelope(err: &ServiceError) -> Value {
    json!({
        "error": err.to_string(),
        "detail": err.to_string(),
        "code": err.code(),
    })
}

// ---------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------
// POST /v1/generate
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub current_message: String,
    #[serde(default)]
    pub chat_history_irv_id: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub llm_api_key: String,
    #[serde(default)]
    pub llm_url: String,
    #[serde(default)]
    pub llm_model_name: String,
    #[serde(default)]
    pub embed_api_key: Option<String>,
    #[serde(default)]
    pub embed_url: Option<String>,
    #[serde(default)]
    pub embed_model_name: Option<String>,
    #[serde(default)]
    pub search_api_key: Option<String>,
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default)]
    pub vdb_url: Option<String>,
    #[serde(default)]
    pub file_irv_ids: Option<Vec<String>>,
    #[serde(default)]
    pub internet: bool,
    #[serde(default)]
    pub knowledge_base: bool,
    #[serde(default)]
    pub irv_id: Option<String>,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> impl IntoResponse {
    match run_generate(&state, &headers, req).await {
        Ok(value) => Json(value),
        Err(err) => {
            tracing::warn!(code = err.code(), detail = %err, "generate request failed");
            Json(error_envelope(&err))
        }
    }
}

async fn run_generate(state: &AppState, headers: &HeaderMap, req: GenerateRequest) -> Result<Value, ServiceError> {
    if req.current_message.trim().is_empty() {
        return Err(ServiceError::MissingCurrentMessage);
    }
    if req.knowledge_base && req.vdb_url.as_deref().unwrap_or("").trim().is_empty() {
        return Err(ServiceError::MissingVdbUrl);
    }
    if req.knowledge_base {
        match req.embed_api_key.as_deref() {
            None => return Err(ServiceError::MissingEmbedApiKey),
            Some(k) if k.trim().is_empty() => return Err(ServiceError::EmptyEmbedApiKey),
            Some(_) => {}
        }
    }

    let params = LlmClientParams {
        base_url: BaseUrl::new(&req.llm_url)?,
        api_key: req.llm_api_key.clone(),
        model: ModelName::new(&req.llm_model_name)?,
        temperature: Temperature::new(req.temperature.unwrap_or(0.0))?,
        max_tokens: req.max_tokens,
    };

    let mut messages = Vec::new();
    if let Some(prompt) = &req.system_prompt {
        messages.push(Message::system(prompt.clone()));
    }
    messages.push(Message::user(req.current_message.clone()));

    let llm = Arc::new(LlmClient::new(state.llm_cache.clone(), state.config.llm.max_retries));

    let result = if !req.internet && !req.knowledge_base {
        let value = llm.generate_structured(&params, &messages, state.config.llm.max_retry_count).await?;
        match value {
            Value::Object(map) => Value::Object(map),
            other => json!({ "answer": other }),
        }
    } else {
        run_agent(state, &req, &params, llm.clone(), messages.clone()).await?
    };

    let mut response = result;
    save_transcript_best_effort(state, headers, &req, &messages, &response).await;
    if let Value::Object(map) = &mut response {
        map.entry("chat_history").or_insert_with(|| json!({ "irv_id": req.chat_history_irv_id }));
    }

    Ok(response)
}

async fn run_agent(
    state: &AppState,
    req: &GenerateRequest,
    params: &LlmClientParams,
    llm: Arc<LlmClient>,
    messages: Vec<Message>,
) -> Result<Value, ServiceError> {
    let registry = ToolRegistry::new();
    registry.register(reasoning_tool());
    let slot = Arc::new(Mutex::new(None));
    registry.register(final_answer_tool(slot.clone()));

    if req.internet {
        let provider = Arc::new(HttpSearchProvider::new(
            req.search_url.clone().unwrap_or_default(),
            req.search_api_key.clone(),
        ));
        registry.register(web_search_tool(provider));
    }

    if req.knowledge_base {
        let retriever = build_retriever(state, req)?;
        registry.register(rag_tool(Arc::new(retriever)));
    }

    let hooks = agent::with_step_logging(Hooks::new(), state.config.execution.logs_dir.clone());
    let agent_loop = AgentLoop::new(llm);

    let outcome = agent_loop
        .execute(params, messages, Arc::new(registry), slot, &hooks, state.config.execution.max_iterations)
        .await
        .map_err(ServiceError::from)?;

    Ok(json!({
        "answer": outcome.answer,
        "chat_title": outcome.chat_title,
        "chat_summary": outcome.chat_summary,
    }))
}

fn build_retriever(state: &AppState, req: &GenerateRequest) -> Result<HybridRetriever, ServiceError> {
    let vdb_url = req.vdb_url.as_deref().ok_or(ServiceError::MissingVdbUrl)?;
    let vector_store = VectorStore::for_collection(
        &state.vector_store_cache,
        vdb_url,
        &state.config.qdrant.collection_name,
        state.config.qdrant.vector_size,
    );
    let embedder = Arc::new(build_embedding_client(state, req)?);

    let reranker_params = if state.config.rag.reranker.enabled {
        Some(LlmClientParams {
            base_url: BaseUrl::new(&state.config.rag.reranker.api_url)?,
            api_key: String::new(),
            model: ModelName::new(&state.config.rag.reranker.model)?,
            temperature: Temperature::default(),
            max_tokens: None,
        })
    } else {
        None
    };

    Ok(HybridRetriever::new(
        vector_store,
        embedder,
        reranker_params,
        state.config.rag.hybrid_search.clone(),
        state.config.rag.reranker.clone(),
    ))
}

fn build_embedding_client(state: &AppState, req: &GenerateRequest) -> Result<EmbeddingClient, ServiceError> {
    let key = req.embed_api_key.as_deref().ok_or(ServiceError::MissingEmbedApiKey)?;
    let url = req.embed_url.as_deref().ok_or(ServiceError::Validation("embed_url is required".into()))?;
    let model = req.embed_model_name.as_deref().unwrap_or("embedding-model");

    let (client_id, client_secret) = match key.split_once(':') {
        Some((id, secret)) => (id, secret),
        None => (key, key),
    };

    Ok(EmbeddingClient::new(
        url,
        url,
        client_id,
        client_secret,
        EMBED_SCOPE,
        model,
        state.config.embeddings.batch_size,
    ))
}

/// Persist the chat transcript under the current document's dialogs folder.
/// A failure here is logged and swallowed — never surfaced as the request's
/// error (§7 "transcript persistence errors ... never fail the enclosing
/// generate call").
async fn save_transcript_best_effort(
    state: &AppState,
    headers: &HeaderMap,
    req: &GenerateRequest,
    request_messages: &[Message],
    response: &Value,
) {
    let Some(irv_id) = req.irv_id.as_deref() else { return };
    let Some((referer, jsessionid)) = session_credentials(headers) else { return };
    let platform_base = match platform_base_url(&referer) {
        Some(base) => base,
        None => return,
    };

    let creds = Credentials { referer: &referer, jsessionid: &jsessionid };
    let platform = Arc::new(PlatformClient::new(platform_base));

    let naming_authority_id = match platform.get_object_version(&creds, irv_id, true, false).await {
        Ok(version) => version.naming_authority_id.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "transcript save: could not resolve naming authority");
            String::new()
        }
    };

    let store = TranscriptStore::new(platform, naming_authority_id);
    let transcript = build_transcript(request_messages, response);
    let timestamp = chrono_timestamp();
    let chat_title = response.get("chat_title").and_then(|v| v.as_str()).unwrap_or("Chat").to_string();

    if let Err(e) = store.save(&creds, irv_id, &chat_title, &timestamp, &transcript).await {
        tracing::warn!(error = %e, "failed to persist chat transcript");
    }
}

fn build_transcript(request_messages: &[Message], response: &Value) -> ChatTranscript {
    let mut messages: Vec<ChatMessage> = request_messages
        .iter()
        .filter_map(|m| {
            let text: String = m
                .content
                .iter()
                .filter_map(|b| match b {
                    crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            if text.is_empty() {
                None
            } else {
                Some(ChatMessage { role: format!("{:?}", m.role).to_lowercase(), content: text })
            }
        })
        .collect();

    let answer = response
        .get("answer")
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    messages.push(ChatMessage { role: "assistant".to_string(), content: answer });

    ChatTranscript { messages }
}

fn session_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let referer = headers.get("referer")?.to_str().ok()?.to_string();
    let cookie_header = headers.get("cookie")?.to_str().ok()?;
    let jsessionid = cookie_header.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("JSESSIONID=").map(str::to_string)
    })?;
    Some((referer, jsessionid))
}

fn platform_base_url(referer: &str) -> Option<String> {
    let scheme_end = referer.find("://")? + 3;
    let host_start = scheme_end;
    let host_end = referer[host_start..].find('/').map(|i| host_start + i).unwrap_or(referer.len());
    Some(referer[..host_end].to_string())
}

fn chrono_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
}

// ---------------------------------------------------------------------
// POST /v1/rag/manage
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RagManageRequest {
    pub action: String,
    pub irv_id: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub vdb_url: Option<String>,
    #[serde(default)]
    pub embed_api_key: Option<String>,
    #[serde(default)]
    pub embed_url: Option<String>,
    #[serde(default)]
    pub embed_model_name: Option<String>,
}

pub async fn rag_manage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RagManageRequest>,
) -> impl IntoResponse {
    match run_rag_manage(&state, &headers, req).await {
        Ok(value) => Json(value),
        Err(err) => Json(error_envelope(&err)),
    }
}

async fn run_rag_manage(state: &AppState, headers: &HeaderMap, req: RagManageRequest) -> Result<Value, ServiceError> {
    let vdb_url = req.vdb_url.as_deref().ok_or(ServiceError::MissingVdbUrl)?;
    let vector_store = VectorStore::for_collection(
        &state.vector_store_cache,
        vdb_url,
        &state.config.qdrant.collection_name,
        state.config.qdrant.vector_size,
    );
    let document_id = req.document_id.clone().unwrap_or_else(|| req.irv_id.clone());

    match req.action.as_str() {
        "remove" => {
            vector_store.delete_by_filter(json!({
                "must": [{"key": "document_id", "match": {"value": document_id}}]
            })).await?;
            Ok(json!({ "document_id": document_id, "action": "remove", "success": true }))
        }
        "add" => {
            let (referer, jsessionid) = session_credentials(headers)
                .ok_or_else(|| ServiceError::Validation("missing Referer/JSESSIONID for rag/manage add".into()))?;
            let platform_base = platform_base_url(&referer)
                .ok_or_else(|| ServiceError::Validation("could not derive platform base url from Referer".into()))?;
            let creds = Credentials { referer: &referer, jsessionid: &jsessionid };
            let platform = Arc::new(PlatformClient::new(platform_base));

            let key = req.embed_api_key.as_deref().ok_or(ServiceError::MissingEmbedApiKey)?;
            if key.trim().is_empty() {
                return Err(ServiceError::EmptyEmbedApiKey);
            }
            let url = req.embed_url.as_deref().ok_or_else(|| ServiceError::Validation("embed_url is required".into()))?;
            let model = req.embed_model_name.as_deref().unwrap_or("embedding-model");
            let (client_id, client_secret) = key.split_once(':').unwrap_or((key, key));
            let embedder = Arc::new(EmbeddingClient::new(
                url,
                url,
                client_id,
                client_secret,
                EMBED_SCOPE,
                model,
                state.config.embeddings.batch_size,
            ));

            let indexer = crate::indexer::Indexer::new(vector_store, embedder, platform);
            let summary = indexer.add_document(&creds, &document_id, &req.irv_id).await?;
            Ok(json!({
                "document_id": document_id,
                "action": "add",
                "files_processed": summary.files_processed,
                "chunks_saved": summary.chunks_saved,
                "toc_chunks_saved": summary.toc_chunks_saved,
                "table_chunks_saved": summary.table_chunks_saved,
                "files": summary.files,
            }))
        }
        other => Err(ServiceError::InvalidAction(other.to_string())),
    }
}

// ---------------------------------------------------------------------
// POST /v1/rag/health
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct VdbHealthRequest {
    pub vdb_url: String,
}

pub async fn rag_health(State(state): State<Arc<AppState>>, Json(req): Json<VdbHealthRequest>) -> Json<Value> {
    let store = VectorStore::for_collection(
        &state.vector_store_cache,
        &req.vdb_url,
        &state.config.qdrant.collection_name,
        state.config.qdrant.vector_size,
    );
    let (available, detail) = store.check_connection(std::time::Duration::from_secs(5)).await;
    Json(json!({ "available": available, "detail": detail }))
}

// ---------------------------------------------------------------------
// POST /v1/rag/collections
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListCollectionsRequest {
    pub vdb_url: String,
}

pub async fn rag_list_collections(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListCollectionsRequest>,
) -> impl IntoResponse {
    let store = VectorStore::for_collection(
        &state.vector_store_cache,
        &req.vdb_url,
        &state.config.qdrant.collection_name,
        state.config.qdrant.vector_size,
    );
    match store.list_collections().await {
        Ok(collections) => Json(json!({ "collections": collections })),
        Err(e) => Json(error_envelope(&ServiceError::from(e))),
    }
}

// ---------------------------------------------------------------------
// DELETE /v1/rag/collections/{name}
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeleteCollectionRequest {
    pub vdb_url: String,
}

pub async fn rag_delete_collection(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<DeleteCollectionRequest>,
) -> impl IntoResponse {
    let store = VectorStore::for_collection(&state.vector_store_cache, &req.vdb_url, &name, state.config.qdrant.vector_size);
    match store.delete_collection().await {
        Ok(()) => Json(json!({ "collection": name, "deleted": true })),
        Err(e) => Json(error_envelope(&ServiceError::from(e))),
    }
}

// ---------------------------------------------------------------------
// GET /v1/cache/info, DELETE /v1/cache/clear
// ---------------------------------------------------------------------

pub async fn cache_info(State(_state): State<Arc<AppState>>) -> Json<Value> {
    // The connection-pool cache never exposes iteration over its keys, so
    // this endpoint reports only that it is alive and clearable.
    Json(json!({ "cache": "llm_clients", "evictable": true }))
}

pub async fn cache_clear(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.llm_cache.clear();
    Json(json!({ "cleared": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_code_and_message() {
        let err = ServiceError::MissingCurrentMessage;
        let envelope = error_envelope(&err);
        assert_eq!(envelope["code"], "missing_current_message");
        assert!(envelope["error"].as_str().unwrap().contains("current_message"));
    }

    #[test]
    fn session_credentials_parses_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert("referer", "https://platform.example.com/docs/123".parse().unwrap());
        headers.insert("cookie", "theme=dark; JSESSIONID=abc123; other=1".parse().unwrap());
        let (referer, jsessionid) = session_credentials(&headers).unwrap();
        assert_eq!(referer, "https://platform.example.com/docs/123");
        assert_eq!(jsessionid, "abc123");
    }

    #[test]
    fn session_credentials_missing_cookie_returns_none() {
        let mut headers = HeaderMap::new();
        headers.insert("referer", "https://platform.example.com".parse().unwrap());
        assert!(session_credentials(&headers).is_none());
    }

    #[test]
    fn platform_base_url_strips_path() {
        assert_eq!(
            platform_base_url("https://platform.example.com/docs/123?x=1"),
            Some("https://platform.example.com".to_string())
        );
        assert_eq!(platform_base_url("not-a-url"), None);
    }

    #[test]
    fn build_transcript_appends_assistant_answer() {
        let messages = vec![Message::user("hello")];
        let response = json!({ "answer": "hi there" });
        let transcript = build_transcript(&messages, &response);
        assert_eq!(transcript.messages.len(), 2);
        assert_eq!(transcript.messages[1].content, "hi there");
    }
}
