//! Error taxonomy for the RAG bridge service.
//!
//! Each component owns a `thiserror`-derived error enum at its boundary.
//! [`ServiceError`] wraps every component error and is the only type the
//! HTTP edge ever translates into the wire envelope (see [`crate::api`]).

use thiserror::Error;

/// Result type alias using [`ServiceError`].
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors from the LLM client adapter (§4.3).
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM authentication failed: {0}")]
    Auth(String),

    #[error("LLM rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("LLM rejected the request: {0}")]
    BadRequest(String),

    #[error("could not reach LLM endpoint: {0}")]
    Connection(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("LLM returned no choices")]
    EmptyResponse,

    #[error("structured output is missing the required 'answer' field")]
    MissingAnswerField,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the agent loop's bounded retry (§4.1) should retry this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Auth(_) | LlmError::RateLimit(_) | LlmError::BadRequest(_) => false,
            LlmError::Connection(_)
            | LlmError::Timeout
            | LlmError::Provider(_)
            | LlmError::EmptyResponse
            | LlmError::MissingAnswerField
            | LlmError::Json(_) => true,
            LlmError::Http(e) => !e.is_status() || e.status().is_none_or(|s| s.is_server_error()),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LlmError::Auth(_) => "llm_auth_error",
            LlmError::RateLimit(_) => "rate_limit",
            LlmError::BadRequest(_) => "bad_request",
            LlmError::Connection(_) => "connection_error",
            LlmError::Timeout => "timeout",
            LlmError::Provider(_) => "provider_error",
            LlmError::EmptyResponse => "empty_response",
            LlmError::MissingAnswerField => "missing_answer_field",
            LlmError::Http(_) => "llm_api_error",
            LlmError::Json(_) => "llm_api_error",
        }
    }
}

/// Errors from the OAuth2-backed embedding client (§4.4).
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding token request failed: {0}")]
    TokenAuth(String),

    #[error("embedding token refresh failed after one retry: {0}")]
    TokenRefreshFailed(String),

    #[error("could not reach embedding endpoint: {0}")]
    Connection(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("embedding endpoint rejected the request: {0}")]
    BadRequest(String),

    #[error("embedding endpoint returned a server error: {0}")]
    ServerError(String),

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Connection(_) | EmbeddingError::Timeout | EmbeddingError::ServerError(_)
        )
    }

    pub fn code(&self) -> &'static str {
        "embedding_error"
    }
}

/// Errors from the Qdrant-compatible vector store adapter (§4.7).
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("could not reach vector store: {0}")]
    Connection(String),

    #[error("vector store request timed out")]
    Timeout,

    #[error("vector store error: {0}")]
    Other(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl VectorStoreError {
    pub fn code(&self) -> &'static str {
        match self {
            VectorStoreError::Connection(_) => "qdrant_connection_error",
            VectorStoreError::Timeout => "qdrant_timeout",
            VectorStoreError::Other(_) | VectorStoreError::Http(_) | VectorStoreError::Json(_) => {
                "qdrant_error"
            }
        }
    }
}

/// Errors from the agent loop driver (§4.1).
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent exceeded the maximum of {0} iterations")]
    IterationLimitExceeded(u32),

    #[error("provider did not return a tool call")]
    NoToolCall,

    #[error("tool arguments failed validation: {0}")]
    InvalidToolArguments(String),

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    #[error("tool '{name}' failed: {detail}")]
    ToolExecution { name: String, detail: String },

    #[error("failed to create agent: {0}")]
    CreationError(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AgentError {
    /// Whether this error is retryable within an agent phase (§4.1 retry policy).
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::NoToolCall
            | AgentError::InvalidToolArguments(_)
            | AgentError::IterationLimitExceeded(_) => false,
            AgentError::ToolNotFound(_) | AgentError::ToolExecution { .. } => false,
            AgentError::CreationError(_) => false,
            AgentError::Llm(e) => e.is_retryable(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AgentError::IterationLimitExceeded(_) => "agent_incomplete",
            AgentError::CreationError(_) => "agent_creation_error",
            AgentError::Llm(e) => e.code(),
            _ => "agent_execution_error",
        }
    }
}

/// Errors from the hybrid retriever and indexer (§4.5, §4.6).
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("{0} file(s) failed during indexing: {1:?}")]
    PerFileFailures(usize, Vec<(String, String)>),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl RetrievalError {
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::PerFileFailures(..) => "rag_processing_error",
            RetrievalError::VectorStore(e) => e.code(),
            RetrievalError::Embedding(e) => e.code(),
        }
    }
}

/// Errors from the `web_search` tool's external search provider.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("could not reach search provider: {0}")]
    Connection(String),

    #[error("search provider rejected the request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SearchError {
    pub fn code(&self) -> &'static str {
        "web_search_error"
    }
}

/// Errors from the document-management platform adapter (§4.9).
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("request is missing a JSESSIONID cookie")]
    MissingJsessionid,

    #[error("request is missing a Referer header")]
    MissingReferer,

    #[error("object version not found: {0}")]
    NotFound(String),

    #[error("platform request failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PlatformError {
    pub fn code(&self) -> &'static str {
        match self {
            PlatformError::MissingJsessionid => "missing_jsessionid",
            PlatformError::MissingReferer => "missing_referer",
            _ => "internal_error",
        }
    }
}

/// Errors from loading or saving the chat transcript (§4.8).
///
/// Per §7, these are logged and swallowed by the caller — never surfaced
/// as a failed `/v1/generate` response — but are still a typed boundary
/// so callers can decide how to log them.
#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("could not parse transcript content: {0}")]
    Parse(String),
}

/// The top-level error type translated exactly once at the HTTP edge.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("current_message is required and must be non-empty")]
    MissingCurrentMessage,

    #[error("action must be 'add' or 'remove'")]
    InvalidAction(String),

    #[error("qdrant.collection_name is required")]
    MissingCollectionName,

    #[error("vdb_url is required")]
    MissingVdbUrl,

    #[error("embed_api_key must not be empty")]
    EmptyEmbedApiKey,

    #[error("embed_api_key is required")]
    MissingEmbedApiKey,

    #[error("messages must not be empty")]
    MissingMessages,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// The stable error code surfaced in the `{error, detail, code}` envelope (§7).
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::MissingCurrentMessage => "missing_current_message",
            ServiceError::InvalidAction(_) => "invalid_action",
            ServiceError::MissingCollectionName => "missing_collection_name",
            ServiceError::MissingVdbUrl => "missing_vdb_url",
            ServiceError::EmptyEmbedApiKey => "empty_embed_api_key",
            ServiceError::MissingEmbedApiKey => "missing_embed_api_key",
            ServiceError::MissingMessages => "missing_messages",
            ServiceError::Llm(e) => e.code(),
            ServiceError::Embedding(e) => e.code(),
            ServiceError::VectorStore(e) => e.code(),
            ServiceError::Agent(e) => e.code(),
            ServiceError::Retrieval(e) => e.code(),
            ServiceError::Platform(e) => e.code(),
            ServiceError::Search(e) => e.code(),
            ServiceError::Internal(_) => "internal_error",
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServiceError::Internal(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_retry_classification() {
        assert!(!LlmError::Auth("bad key".into()).is_retryable());
        assert!(!LlmError::RateLimit("slow down".into()).is_retryable());
        assert!(!LlmError::BadRequest("malformed".into()).is_retryable());
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Provider("500".into()).is_retryable());
        assert!(LlmError::EmptyResponse.is_retryable());
    }

    #[test]
    fn agent_error_codes() {
        assert_eq!(AgentError::NoToolCall.code(), "agent_execution_error");
        assert_eq!(
            AgentError::IterationLimitExceeded(5).code(),
            "agent_incomplete"
        );
        assert!(!AgentError::NoToolCall.is_retryable());
    }

    #[test]
    fn service_error_codes_roundtrip() {
        assert_eq!(ServiceError::MissingCurrentMessage.code(), "missing_current_message");
        let err: ServiceError = LlmError::RateLimit("x".into()).into();
        assert_eq!(err.code(), "rate_limit");
        let err: ServiceError = AgentError::ToolNotFound("ghost".into()).into();
        assert_eq!(err.code(), "agent_execution_error");
    }

    #[test]
    fn vector_store_error_codes() {
        assert_eq!(VectorStoreError::Timeout.code(), "qdrant_timeout");
        assert_eq!(VectorStoreError::Connection("down".into()).code(), "qdrant_connection_error");
    }
}
