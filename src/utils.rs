//! Streaming utilities for SSE parsing and tool call aggregation (§4.1, §4.3).
//!
//! The LLM client adapter consumes chat completions as Server-Sent Events.
//! Two problems need solving: turning the raw byte stream into typed
//! [`OpenAIChunk`] values, and reassembling tool-call arguments that the
//! provider streams as fragmented JSON strings across many chunks.

use std::collections::HashMap;
use std::pin::Pin;

use futures::stream::{Stream, StreamExt};

use crate::error::LlmError;
use crate::types::{ContentBlock, OpenAIChunk, TextBlock, ToolUseBlock};

/// Aggregates streaming deltas into complete content blocks.
///
/// Buffers text and tool-call deltas across chunks and only emits
/// [`ContentBlock`]s once a chunk carries a `finish_reason`. Tool call
/// arguments arrive as raw string fragments (the model may split the JSON
/// mid-token) and are concatenated before being parsed.
pub struct ToolCallAggregator {
    text_buffer: String,
    tool_calls: HashMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAggregator {
    pub fn new() -> Self {
        Self {
            text_buffer: String::new(),
            tool_calls: HashMap::new(),
        }
    }

    /// Process one chunk, returning completed blocks only when generation
    /// finished in this chunk (empty otherwise).
    pub fn process_chunk(&mut self, chunk: OpenAIChunk) -> Result<Vec<ContentBlock>, LlmError> {
        let mut blocks = Vec::new();

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text_buffer.push_str(&content);
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for tool_call in tool_calls {
                    let entry = self.tool_calls.entry(tool_call.index).or_default();

                    if let Some(id) = tool_call.id {
                        entry.id = Some(id);
                    }

                    if let Some(function) = tool_call.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }
                        if let Some(args) = function.arguments {
                            entry.arguments.push_str(&args);
                        }
                    }
                }
            }

            if choice.finish_reason.is_some() {
                if !self.text_buffer.is_empty() {
                    blocks.push(ContentBlock::Text(TextBlock {
                        text: std::mem::take(&mut self.text_buffer),
                    }));
                }

                for (_, partial) in self.tool_calls.drain() {
                    if let (Some(id), Some(name)) = (partial.id, partial.name) {
                        let input: serde_json::Value = if partial.arguments.is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(&partial.arguments)?
                        };
                        blocks.push(ContentBlock::ToolUse(ToolUseBlock { id, name, input }));
                    }
                }
            }
        }

        Ok(blocks)
    }
}

impl Default for ToolCallAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a raw HTTP response body as a Server-Sent Events stream,
/// yielding one [`OpenAIChunk`] per `data: ` line and skipping the
/// `data: [DONE]` sentinel.
pub fn parse_sse_stream(
    body: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<OpenAIChunk, LlmError>> + Send>> {
    let stream = body.bytes_stream().filter_map(move |result| async move {
        let bytes = match result {
            Ok(b) => b,
            Err(e) => return Some(Err(LlmError::Http(e))),
        };

        let text = String::from_utf8_lossy(&bytes);

        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if data == "[DONE]" {
                    continue;
                }

                let chunk: OpenAIChunk = match serde_json::from_str(data) {
                    Ok(c) => c,
                    Err(e) => return Some(Err(LlmError::Json(e))),
                };

                return Some(Ok(chunk));
            }
        }

        None
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OpenAIChoice, OpenAIDelta, OpenAIFunctionDelta, OpenAIToolCallDelta};

    fn chunk(choices: Vec<OpenAIChoice>) -> OpenAIChunk {
        OpenAIChunk {
            id: "test".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices,
        }
    }

    #[test]
    fn aggregates_text_across_chunks() {
        let mut aggregator = ToolCallAggregator::new();

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: Some("Hello ".to_string()),
                    tool_calls: None,
                },
                finish_reason: None,
            }]))
            .unwrap();
        assert_eq!(blocks.len(), 0);

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: Some("world".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }]))
            .unwrap();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            ContentBlock::Text(text) => assert_eq!(text.text, "Hello world"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn aggregates_tool_call_arguments_across_chunks() {
        let mut aggregator = ToolCallAggregator::new();

        aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 0,
                        id: Some("call_123".to_string()),
                        call_type: Some("function".to_string()),
                        function: Some(OpenAIFunctionDelta {
                            name: Some("rag".to_string()),
                            arguments: Some(r#"{"query":"#.to_string()),
                        }),
                    }]),
                },
                finish_reason: None,
            }]))
            .unwrap();

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 0,
                        id: None,
                        call_type: None,
                        function: Some(OpenAIFunctionDelta {
                            name: None,
                            arguments: Some(r#""invoices"}"#.to_string()),
                        }),
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }]))
            .unwrap();

        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            ContentBlock::ToolUse(tool) => {
                assert_eq!(tool.id, "call_123");
                assert_eq!(tool.name, "rag");
                assert_eq!(tool.input["query"], "invoices");
            }
            _ => panic!("expected tool use block"),
        }
    }

    #[test]
    fn incomplete_tool_call_without_name_is_dropped() {
        let mut aggregator = ToolCallAggregator::new();

        let blocks = aggregator
            .process_chunk(chunk(vec![OpenAIChoice {
                index: 0,
                delta: OpenAIDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        call_type: None,
                        function: None,
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }]))
            .unwrap();

        assert!(blocks.is_empty());
    }
}
