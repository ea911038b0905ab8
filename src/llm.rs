//! LLM client adapter: OpenAI-compatible chat completions with function
//! calling, streaming aggregation, and structured-output parsing (§4.3).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

use crate::error::LlmError;
use crate::retry::{retry_with_backoff_conditional, RetryConfig};
use crate::types::{
    ContentBlock, LlmClientParams, Message, MessageRole, OpenAIContent, OpenAIFunction,
    OpenAIMessage, OpenAIRequest, OpenAIToolCall, ToolChoice,
};
use crate::utils::{parse_sse_stream, ToolCallAggregator};

/// Stream of aggregated content blocks from a single completion call.
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<ContentBlock, LlmError>> + Send>>;

/// Memoizes HTTP clients by `(first-10-chars-of-api-key, base_url)` so the
/// agent loop and single-shot callers can share connection pools across a
/// long-lived process without re-creating clients on every call.
#[derive(Default)]
pub struct LlmClientCache {
    clients: Mutex<HashMap<(String, String), reqwest::Client>>,
}

impl LlmClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.clients.lock().expect("client cache lock poisoned").clear();
    }

    fn get_or_create(&self, params: &LlmClientParams) -> reqwest::Client {
        let key = (key_prefix(&params.api_key), params.base_url.as_str().to_string());
        let mut clients = self.clients.lock().expect("client cache lock poisoned");
        clients
            .entry(key)
            .or_insert_with(|| {
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(60))
                    .build()
                    .expect("failed to build HTTP client")
            })
            .clone()
    }
}

fn key_prefix(api_key: &str) -> String {
    api_key.chars().take(10).collect()
}

/// A completed, non-streaming chat completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<crate::types::ToolUseBlock>,
}

/// Talks to any OpenAI-compatible chat-completions endpoint (§4.3).
pub struct LlmClient {
    cache: Arc<LlmClientCache>,
    retry_config: RetryConfig,
}

impl LlmClient {
    pub fn new(cache: Arc<LlmClientCache>, max_retries: u32) -> Self {
        Self {
            cache,
            retry_config: RetryConfig::new().with_max_attempts(max_retries.max(1)),
        }
    }

    /// Converts the internal conversation model to OpenAI wire messages.
    ///
    /// A [`ContentBlock::ToolResult`] produces its own `role: "tool"`
    /// message (OpenAI has no way to carry a tool result alongside other
    /// content in one message); every other block on that turn still
    /// contributes to a single `user`/`assistant`/`system` message.
    fn to_openai_messages(messages: &[Message]) -> Vec<OpenAIMessage> {
        let mut out = Vec::with_capacity(messages.len());

        for msg in messages {
            let role = match msg.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            };

            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for block in &msg.content {
                match block {
                    ContentBlock::Text(t) => text_parts.push(t.text.clone()),
                    ContentBlock::ToolUse(tool_use) => tool_calls.push(OpenAIToolCall {
                        id: tool_use.id.clone(),
                        call_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: tool_use.name.clone(),
                            arguments: tool_use.input.to_string(),
                        },
                    }),
                    ContentBlock::ToolResult(result) => {
                        let content = match &result.content {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        out.push(OpenAIMessage {
                            role: "tool".to_string(),
                            content: Some(OpenAIContent::Text(content)),
                            tool_calls: None,
                            tool_call_id: Some(result.tool_use_id.clone()),
                        });
                    }
                    ContentBlock::Image(_) => {}
                }
            }

            if !text_parts.is_empty() || !tool_calls.is_empty() {
                out.push(OpenAIMessage {
                    role: role.to_string(),
                    content: if text_parts.is_empty() { None } else { Some(OpenAIContent::Text(text_parts.join("\n"))) },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                });
            }
        }

        out
    }

    /// Send a streaming chat completion request, returning aggregated
    /// content blocks. Used by the agent loop's reasoning/action phases.
    pub async fn generate_stream(
        &self,
        params: &LlmClientParams,
        messages: &[Message],
        tool_schemas: Option<Vec<Value>>,
        tool_choice: Option<ToolChoice>,
    ) -> Result<ContentStream, LlmError> {
        let http = self.cache.get_or_create(params);

        let request = OpenAIRequest {
            model: params.model.as_str().to_string(),
            messages: Self::to_openai_messages(messages),
            stream: true,
            max_tokens: params.max_tokens,
            temperature: Some(params.temperature.value()),
            tools: tool_schemas,
            tool_choice,
        };

        let url = format!("{}/chat/completions", params.base_url.as_str());
        let response = send_request(&http, &url, &params.api_key, &request).await?;

        let sse_stream = parse_sse_stream(response);
        let stream = sse_stream.scan(ToolCallAggregator::new(), |aggregator, chunk_result| {
            let result = match chunk_result {
                Ok(chunk) => match aggregator.process_chunk(chunk) {
                    Ok(blocks) if blocks.is_empty() => Some(None),
                    Ok(blocks) => Some(Some(Ok(blocks))),
                    Err(e) => Some(Some(Err(e))),
                },
                Err(e) => Some(Some(Err(e))),
            };
            futures::future::ready(result)
        });

        let flattened = stream.filter_map(|item| async move { item }).flat_map(|result| {
            futures::stream::iter(match result {
                Ok(blocks) => blocks.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            })
        });

        Ok(Box::pin(flattened))
    }

    /// Run `generate_stream` to completion and collect all content blocks,
    /// applying the agent loop's bounded (non-backed-off) retry policy
    /// (§4.1 "Retry policy").
    pub async fn generate(
        &self,
        params: &LlmClientParams,
        messages: &[Message],
        tool_schemas: Option<Vec<Value>>,
        tool_choice: Option<ToolChoice>,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        retry_with_backoff_conditional(
            self.retry_config.clone(),
            LlmError::is_retryable,
            || async {
                let mut stream = self
                    .generate_stream(params, messages, tool_schemas.clone(), tool_choice.clone())
                    .await?;

                let mut blocks = Vec::new();
                while let Some(block) = stream.next().await {
                    blocks.push(block?);
                }
                if blocks.is_empty() {
                    return Err(LlmError::EmptyResponse);
                }
                Ok(blocks)
            },
        )
        .await
    }

    /// Single-shot structured-output call used outside the agent loop (the
    /// `internet=false, knowledge_base=false` direct mode dispatch), retrying
    /// up to `max_retry_count` times when the parsed JSON lacks `answer`.
    pub async fn generate_structured(
        &self,
        params: &LlmClientParams,
        messages: &[Message],
        max_retry_count: u32,
    ) -> Result<Value, LlmError> {
        let config = RetryConfig::new().with_max_attempts(max_retry_count.max(1));

        retry_with_backoff_conditional(config, LlmError::is_retryable, || async {
            let blocks = self.generate(params, messages, None, None).await?;
            let text = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text(t) => Some(t.text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");

            let parsed = parse_structured(&text);
            match &parsed {
                Value::Object(map) if map.contains_key("answer") => Ok(parsed),
                _ => Err(LlmError::MissingAnswerField),
            }
        })
        .await
    }
}

/// Extracts a JSON object from model output, tolerating a fenced code block
/// (` ```json ... ``` `) or bare `{...}` text; returns the raw string as a
/// JSON string value when no object can be located (§4.3).
pub fn parse_structured(content: &str) -> Value {
    let trimmed = content.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
        if let Some(end) = after_fence.find("```") {
            let candidate = after_fence[..end].trim();
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return value;
            }
        }
    }

    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }

    Value::String(trimmed.to_string())
}

async fn send_request(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    request: &OpenAIRequest,
) -> Result<reqwest::Response, LlmError> {
    let response = http
        .post(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "application/json")
        .json(request)
        .send()
        .await?;

    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    Err(match status.as_u16() {
        401 | 403 => LlmError::Auth(body),
        429 => LlmError::RateLimit(body),
        400..=499 => LlmError::BadRequest(format!("{status}: {body}")),
        _ => LlmError::Provider(format!("{status}: {body}")),
    })
}
