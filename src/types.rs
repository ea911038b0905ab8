//! Core data types: validated scalars, the internal conversation model,
//! the OpenAI-compatible wire format, and the RAG/indexing data model (§3).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ServiceError;

/// A non-empty, validated LLM model name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    pub fn new(name: impl Into<String>) -> Result<Self, ServiceError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("model name must not be empty".into()));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated `http(s)://` base URL for an LLM or embedding endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, ServiceError> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ServiceError::Validation(format!(
                "base url must start with http:// or https://, got: {url}"
            )));
        }
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A temperature value clamped to the `0.0..=2.0` range accepted by
/// OpenAI-compatible completion endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> Result<Self, ServiceError> {
        if !(0.0..=2.0).contains(&value) {
            return Err(ServiceError::Validation(format!(
                "temperature must be between 0.0 and 2.0, got: {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Default for Temperature {
    fn default() -> Self {
        Self(0.0)
    }
}

/// Per-call LLM client parameters, supplied with each `/v1/generate`
/// request rather than fixed at process start (§4.3).
#[derive(Debug, Clone)]
pub struct LlmClientParams {
    pub base_url: BaseUrl,
    pub api_key: String,
    pub model: ModelName,
    pub temperature: Temperature,
    pub max_tokens: Option<u32>,
}

// ---------------------------------------------------------------------
// Internal conversation representation
// ---------------------------------------------------------------------

/// Role of a message participant in the internal conversation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A block of message content; a message may carry several of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Value,
}

/// Detail level hint for an attached image, forwarded to the vision API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

impl Default for ImageDetail {
    fn default() -> Self {
        ImageDetail::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub url: String,
    #[serde(default)]
    pub detail: ImageDetail,
}

impl ImageBlock {
    pub fn from_url(url: impl Into<String>) -> Result<Self, ServiceError> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ServiceError::Validation(
                "image url must start with http:// or https://".into(),
            ));
        }
        Ok(Self {
            url,
            detail: ImageDetail::default(),
        })
    }

    pub fn from_base64(data_uri: impl Into<String>) -> Result<Self, ServiceError> {
        let url = data_uri.into();
        if !url.starts_with("data:") {
            return Err(ServiceError::Validation(
                "base64 image must be a data: URI".into(),
            ));
        }
        Ok(Self {
            url,
            detail: ImageDetail::default(),
        })
    }

    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }
}

/// A single turn in the internal conversation representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(
            MessageRole::System,
            vec![ContentBlock::Text(TextBlock { text: text.into() })],
        )
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(
            MessageRole::User,
            vec![ContentBlock::Text(TextBlock { text: text.into() })],
        )
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn user_with_blocks(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Result<Self, ServiceError> {
        let image = ImageBlock::from_url(image_url)?;
        Ok(Self::user_with_blocks(vec![
            ContentBlock::Text(TextBlock { text: text.into() }),
            ContentBlock::Image(image),
        ]))
    }

    pub fn user_with_image_detail(
        text: impl Into<String>,
        image_url: impl Into<String>,
        detail: ImageDetail,
    ) -> Result<Self, ServiceError> {
        let image = ImageBlock::from_url(image_url)?.with_detail(detail);
        Ok(Self::user_with_blocks(vec![
            ContentBlock::Text(TextBlock { text: text.into() }),
            ContentBlock::Image(image),
        ]))
    }

    pub fn user_with_base64_image(
        text: impl Into<String>,
        data_uri: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let image = ImageBlock::from_base64(data_uri)?;
        Ok(Self::user_with_blocks(vec![
            ContentBlock::Text(TextBlock { text: text.into() }),
            ContentBlock::Image(image),
        ]))
    }
}

// ---------------------------------------------------------------------
// OpenAI-compatible wire format
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentPart {
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: OpenAIImageUrl },
}

impl OpenAIContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        OpenAIContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>, detail: Option<String>) -> Self {
        OpenAIContentPart::ImageUrl {
            image_url: OpenAIImageUrl {
                url: url.into(),
                detail,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAIContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,
    /// JSON-encoded argument object, per the OpenAI wire format.
    pub arguments: String,
}

/// Controls whether/which tool the model must call (§4.1 action-selection
/// phase forces a single tool call via `ToolChoice::Required`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Function { r#type: ForcedFunctionType, function: ForcedFunctionName },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ForcedFunctionType {
    #[serde(rename = "function")]
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcedFunctionName {
    pub name: String,
}

impl ToolChoice {
    pub fn auto() -> Self {
        ToolChoice::Mode(ToolChoiceMode::Auto)
    }

    pub fn required() -> Self {
        ToolChoice::Mode(ToolChoiceMode::Required)
    }

    pub fn none() -> Self {
        ToolChoice::Mode(ToolChoiceMode::None)
    }

    pub fn function(name: impl Into<String>) -> Self {
        ToolChoice::Function {
            r#type: ForcedFunctionType::Function,
            function: ForcedFunctionName { name: name.into() },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    /// Forces a single tool call during the agent loop's action-selection
    /// phase; left `None` during the free-form reasoning phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// A single streamed chunk of an OpenAI-compatible chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    #[allow(dead_code)]
    pub index: u32,
    pub delta: OpenAIDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIDelta {
    #[allow(dead_code)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[allow(dead_code)]
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub call_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIFunctionDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A non-streaming OpenAI-compatible chat completion response, used by
/// the embedding client's OAuth token exchange and the reranker (§4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIResponse {
    pub id: String,
    pub choices: Vec<OpenAIResponseChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIResponseChoice {
    pub message: OpenAIMessage,
    pub finish_reason: Option<String>,
}

// ---------------------------------------------------------------------
// RAG / indexing data model (§3)
// ---------------------------------------------------------------------

/// The category of a document chunk produced by the chunking pipeline (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Toc,
    Table,
}

/// Metadata stored alongside a chunk's embedding vector in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub document_id: String,
    pub file_id: String,
    pub file_name: String,
    pub chunk_index: u32,
    pub chunk_type: ChunkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_section: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A single point upserted into the Qdrant-compatible vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A versioned document object on the enterprise platform (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub io_id: String,
    pub version_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub naming_authority_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

/// A single file attached to an [`ObjectVersion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub irvf_id: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// One message in a persisted chat transcript (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The chat history attached to a platform object version, persisted as
/// `chat_history.json` (§4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatTranscript {
    pub messages: Vec<ChatMessage>,
}

/// A retrieved chunk with its similarity/rerank score, returned from the
/// hybrid retriever (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub payload: ChunkPayload,
    pub score: f32,
}

/// Per-file outcome recorded by the indexer when a batch index request
/// touches several files (§4.6). Only `chunks_saved` (the `Text` chunks)
/// were actually embedded and upserted; `toc_chunks_saved` and
/// `table_chunks_saved` are produced by the chunker and counted but never
/// sent to the embedder or the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIndexOutcome {
    pub file_id: String,
    pub file_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub chunks_saved: usize,
    pub toc_chunks_saved: usize,
    pub table_chunks_saved: usize,
}

/// Aggregate result of an "add" indexing run (§4.6 step 8): per-file detail
/// plus the summary counts the API response reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub files_processed: usize,
    pub chunks_saved: usize,
    pub toc_chunks_saved: usize,
    pub table_chunks_saved: usize,
    pub files: Vec<FileIndexOutcome>,
}

/// Arbitrary structured metadata filter applied to a retrieval query.
pub type MetadataFilter = HashMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_name_rejects_empty() {
        assert!(ModelName::new("").is_err());
        assert!(ModelName::new("  ").is_err());
        assert!(ModelName::new("gpt-4").is_ok());
    }

    #[test]
    fn base_url_requires_scheme() {
        assert!(BaseUrl::new("ftp://example.com").is_err());
        assert!(BaseUrl::new("https://api.example.com").is_ok());
    }

    #[test]
    fn temperature_range() {
        assert!(Temperature::new(-0.1).is_err());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(0.7).is_ok());
    }

    #[test]
    fn message_constructors_build_expected_blocks() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content.len(), 1);
    }

    #[test]
    fn image_block_validates_scheme() {
        assert!(ImageBlock::from_url("not-a-url").is_err());
        assert!(ImageBlock::from_url("https://example.com/img.png").is_ok());
        assert!(ImageBlock::from_base64("plain-text").is_err());
        assert!(ImageBlock::from_base64("data:image/png;base64,abcd").is_ok());
    }

    #[test]
    fn tool_choice_serializes_to_openai_shapes() {
        let auto = serde_json::to_value(ToolChoice::auto()).unwrap();
        assert_eq!(auto, serde_json::json!("auto"));

        let forced = serde_json::to_value(ToolChoice::function("final_answer")).unwrap();
        assert_eq!(
            forced,
            serde_json::json!({"type": "function", "function": {"name": "final_answer"}})
        );
    }

    #[test]
    fn openai_function_arguments_round_trip_through_json_string() {
        let func = OpenAIFunction {
            name: "rag".to_string(),
            arguments: serde_json::json!({"query": "hello"}).to_string(),
        };
        let parsed: Value = serde_json::from_str(&func.arguments).unwrap();
        assert_eq!(parsed["query"], "hello");
    }

    #[test]
    fn chunk_payload_serializes_extra_fields_flattened() {
        let mut extra = serde_json::Map::new();
        extra.insert("source".to_string(), Value::String("upload".to_string()));
        let payload = ChunkPayload {
            text: "chunk text".to_string(),
            document_id: "doc-1".to_string(),
            file_id: "file-1".to_string(),
            file_name: "report.pdf".to_string(),
            chunk_index: 0,
            chunk_type: ChunkType::Text,
            hierarchy_level: None,
            section_number: None,
            parent_section: None,
            extra,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["source"], "upload");
        assert!(value.get("hierarchy_level").is_none());
    }
}
