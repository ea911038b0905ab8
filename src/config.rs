//! Typed, validated service configuration (§6 "Configuration", ambient).
//!
//! Settings load once at process start from an optional TOML file plus
//! environment-variable overrides (prefix `RAG_SERVICE_`), mirroring the
//! layered file+env approach of the originating service's settings module.
//! A missing file is not an error as long as every required field has a
//! default or an environment override; a present-but-unparsable file is
//! startup-fatal.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Retry and client-cache behavior for the LLM adapter (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Retry cap for LLM calls made from inside the agent loop (§4.1).
    pub max_retries: u32,
    /// Retry cap for single-shot LLM calls on a missing `answer` field (§4.3).
    pub max_retry_count: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_count: 3,
        }
    }
}

/// Agent loop execution bounds (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_iterations: u32,
    pub max_clarifications: u32,
    /// Directory for per-step agent logs; empty disables step logging.
    pub logs_dir: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_clarifications: 0,
            logs_dir: String::new(),
        }
    }
}

/// Hybrid search pool sizes (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchConfig {
    pub enabled: bool,
    pub vector_top_k: u32,
    pub text_top_k: u32,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vector_top_k: 20,
            text_top_k: 20,
        }
    }
}

/// Reranker toggle (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model: String,
    pub api_url: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "dengcao/Qwen3-Reranker-0.6B:F16".to_string(),
            api_url: "http://localhost:11434".to_string(),
        }
    }
}

/// Retrieval-level settings (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: u32,
    pub hybrid_search: HybridSearchConfig,
    pub reranker: RerankerConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            hybrid_search: HybridSearchConfig::default(),
            reranker: RerankerConfig::default(),
        }
    }
}

/// Vector store collection defaults (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub collection_name: String,
    pub vector_size: u32,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            collection_name: "smart_rag_documents".to_string(),
            vector_size: 1024,
        }
    }
}

/// Embedding batching (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub batch_size: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

/// HTTP edge bind settings (ambient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Structured logging settings (ambient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

/// The complete, process-wide service configuration (§3 "Service Config").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub llm: LlmConfig,
    pub execution: ExecutionConfig,
    pub rag: RagConfig,
    pub qdrant: QdrantConfig,
    pub embeddings: EmbeddingsConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

const ENV_PREFIX: &str = "RAG_SERVICE_";

impl ServiceConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `RAG_SERVICE_*` environment overrides on top.
    ///
    /// A missing file falls back to defaults entirely; a file that exists
    /// but fails to parse is a startup-fatal error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ServiceError::internal(format!("reading config file: {e}")))?;
            toml::from_str(&raw)
                .map_err(|e| ServiceError::internal(format!("parsing config file: {e}")))?
        } else {
            ServiceConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `RAG_SERVICE_*` environment overrides, mirroring the
    /// originating service's env-var precedence over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var(format!("{ENV_PREFIX}QDRANT_COLLECTION_NAME")) {
            self.qdrant.collection_name = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}QDRANT_VECTOR_SIZE")) {
            if let Ok(n) = v.parse() {
                self.qdrant.vector_size = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}HTTP_BIND_ADDR")) {
            self.http.bind_addr = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}HTTP_PORT")) {
            if let Ok(n) = v.parse() {
                self.http.port = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}LOGGING_LEVEL")) {
            self.logging.level = v;
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}LOGGING_LOG_FILE")) {
            self.logging.log_file = Some(v);
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}EXECUTION_MAX_ITERATIONS")) {
            if let Ok(n) = v.parse() {
                self.execution.max_iterations = n;
            }
        }
        if let Ok(v) = env::var(format!("{ENV_PREFIX}RAG_TOP_K")) {
            if let Ok(n) = v.parse() {
                self.rag.top_k = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.llm.max_retries, 3);
        assert_eq!(cfg.execution.max_iterations, 15);
        assert_eq!(cfg.execution.max_clarifications, 0);
        assert_eq!(cfg.rag.top_k, 5);
        assert_eq!(cfg.rag.hybrid_search.vector_top_k, 20);
        assert_eq!(cfg.rag.hybrid_search.text_top_k, 20);
        assert_eq!(cfg.qdrant.collection_name, "smart_rag_documents");
        assert_eq!(cfg.qdrant.vector_size, 1024);
        assert_eq!(cfg.embeddings.batch_size, 10);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServiceConfig::load("/nonexistent/path/to/config.toml").unwrap();
        assert_eq!(cfg.qdrant.collection_name, "smart_rag_documents");
    }

    #[test]
    fn load_parses_partial_toml_with_defaults() {
        let dir = std::env::temp_dir().join(format!(
            "ragbridge-config-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[rag]\ntop_k = 8\n").unwrap();

        let cfg = ServiceConfig::load(&path).unwrap();
        assert_eq!(cfg.rag.top_k, 8);
        assert_eq!(cfg.qdrant.collection_name, "smart_rag_documents");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: test runs in an isolated process; this variable is not
        // consumed by anything outside this crate's config loader.
        unsafe {
            env::set_var("RAG_SERVICE_RAG_TOP_K", "12");
        }
        let cfg = ServiceConfig::load("/nonexistent/path/to/config.toml").unwrap();
        assert_eq!(cfg.rag.top_k, 12);
        unsafe {
            env::remove_var("RAG_SERVICE_RAG_TOP_K");
        }
    }
}
