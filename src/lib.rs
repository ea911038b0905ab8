//! # ragbridge
//!
//! A question-answering service that sits in front of an enterprise
//! document-management platform: a single `/v1/generate` endpoint dispatches
//! either a direct structured-output LLM call or a bounded tool-calling agent
//! loop (reasoning, web search, retrieval-augmented lookup) and an indexing
//! surface (`/v1/rag/*`) that keeps a Qdrant-compatible vector store in sync
//! with the platform's documents.
//!
//! ## Architecture
//!
//! - **types**: message/content-block model, OpenAI wire types, RAG/indexing
//!   data model.
//! - **error**: the `ServiceError` taxonomy surfaced at the HTTP edge, plus
//!   one error enum per component.
//! - **config**: layered TOML + environment-variable service configuration.
//! - **retry**: exponential backoff with jitter, shared by every component
//!   that talks to an upstream HTTP service.
//! - **hooks**: lifecycle events around tool execution in the agent loop.
//! - **llm**: OpenAI-compatible chat completions client (streaming,
//!   function calling, structured output).
//! - **embeddings**: OAuth2 client-credentials embedding provider.
//! - **vectorstore**: Qdrant-compatible REST client.
//! - **reranker** / **retriever**: hybrid dense+lexical retrieval with
//!   optional LLM reranking.
//! - **search**: pluggable web search provider.
//! - **chunker** / **indexer**: document ingestion into the vector store.
//! - **transcript**: chat history persistence on the platform.
//! - **platform**: the platform adapter (object versions, files, folders).
//! - **tools** / **agent**: the tool-calling framework and its driving loop.
//! - **api** / **server**: the HTTP surface.
//! - **context**: manual token estimation and history truncation helpers.

mod chunker;
mod reranker;

pub mod agent;
pub mod api;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod hooks;
pub mod indexer;
pub mod llm;
pub mod platform;
pub mod retriever;
pub mod retry;
pub mod search;
pub mod server;
pub mod tools;
pub mod transcript;
pub mod types;
pub mod utils;
pub mod vectorstore;

// --- Context management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Error handling ---

pub use error::{Result, ServiceError};

// --- Lifecycle hooks ---

pub use hooks::{
    HookDecision, Hooks, PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent,
    HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE, HOOK_USER_PROMPT_SUBMIT,
};

// --- Tool system ---

pub use tools::{Tool, ToolBuilder, ToolRegistry};

// --- Core types ---

pub use types::{
    BaseUrl, ContentBlock, LlmClientParams, Message, MessageRole, ModelName, Temperature,
    TextBlock, ToolResultBlock, ToolUseBlock,
};

// --- Configuration ---

pub use config::ServiceConfig;
