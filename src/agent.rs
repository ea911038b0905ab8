//! Agent loop driver: the reasoning → action-selection → action cycle that
//! drives a multi-turn tool-calling run (§4.1).
//!
//! Every iteration makes two forced LLM calls. The **reasoning phase** calls
//! the model with only the `reasoning` tool offered and `tool_choice`
//! pinned to that function, so the model must externalize its plan before
//! it can act. The **action-selection phase** then calls the model again
//! with the full toolkit (`reasoning`, `final_answer`, and whichever
//! optional tools — `web_search`, `rag` — the caller registered) under
//! `ToolChoice::Required`, picking whichever tool the reasoning step
//! decided on. Picking `final_answer` ends the run; any other tool
//! executes and feeds its result back as the next turn's context. A run
//! that exhausts `max_iterations` without calling `final_answer` fails
//! with [`AgentError::IterationLimitExceeded`] rather than returning a
//! best-effort answer.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::AgentError;
use crate::hooks::{Hooks, PostToolUseEvent, PreToolUseEvent};
use crate::llm::LlmClient;
use crate::tools::{FinalAnswerPayload, ToolRegistry};
use crate::types::{ContentBlock, LlmClientParams, Message, MessageRole, ToolChoice, ToolResultBlock, ToolUseBlock};

/// The agent run's result once `final_answer` has been called.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    pub chat_title: Option<String>,
    pub chat_summary: Option<String>,
    pub iterations: u32,
}

pub struct AgentLoop {
    llm: Arc<LlmClient>,
}

impl AgentLoop {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Run the agent loop to completion (a `final_answer` call) or until
    /// `max_iterations` is exhausted.
    pub async fn execute(
        &self,
        params: &LlmClientParams,
        mut messages: Vec<Message>,
        registry: Arc<ToolRegistry>,
        final_answer_slot: Arc<Mutex<Option<FinalAnswerPayload>>>,
        hooks: &Hooks,
        max_iterations: u32,
    ) -> Result<AgentOutcome, AgentError> {
        let action_schemas = registry.openai_schemas();
        let reasoning_tool = registry.get("reasoning").ok_or_else(|| AgentError::ToolNotFound("reasoning".to_string()))?;
        let reasoning_schema = vec![reasoning_tool.to_openai_format()];

        for iteration in 0..max_iterations {
            // Reasoning phase: force the model to externalize its plan
            // before it is allowed to act.
            let reasoning_blocks = self
                .llm
                .generate(params, &messages, Some(reasoning_schema.clone()), Some(ToolChoice::function("reasoning")))
                .await?;
            let reasoning_use = find_tool_use(&reasoning_blocks).ok_or(AgentError::NoToolCall)?.clone();
            messages.push(Message::assistant(reasoning_blocks));
            self.run_tool(&registry, &reasoning_use, &mut messages, hooks).await?;

            // Action-selection phase: force exactly one tool call over the
            // full toolkit based on the reasoning just recorded.
            let blocks = self
                .llm
                .generate(params, &messages, Some(action_schemas.clone()), Some(ToolChoice::required()))
                .await?;

            let tool_use = find_tool_use(&blocks).ok_or(AgentError::NoToolCall)?.clone();
            messages.push(Message::assistant(blocks));

            self.run_tool(&registry, &tool_use, &mut messages, hooks).await?;

            if tool_use.name == "final_answer" {
                let payload = final_answer_slot
                    .lock()
                    .expect("final answer slot lock poisoned")
                    .clone()
                    .ok_or_else(|| AgentError::ToolExecution {
                        name: "final_answer".to_string(),
                        detail: "tool reported success but stored no payload".to_string(),
                    })?;

                return Ok(AgentOutcome {
                    answer: payload.answer,
                    chat_title: payload.chat_title,
                    chat_summary: payload.chat_summary,
                    iterations: iteration + 1,
                });
            }
        }

        Err(AgentError::IterationLimitExceeded(max_iterations))
    }

    async fn run_tool(
        &self,
        registry: &ToolRegistry,
        tool_use: &ToolUseBlock,
        messages: &mut Vec<Message>,
        hooks: &Hooks,
    ) -> Result<(), AgentError> {
        let pre_event = PreToolUseEvent::new(
            tool_use.name.clone(),
            tool_use.input.clone(),
            tool_use.id.clone(),
            history_snapshot(messages),
        );

        if let Some(decision) = hooks.execute_pre_tool_use(pre_event).await {
            if !decision.continue_execution {
                let reason = decision.reason.unwrap_or_else(|| "blocked by hook".to_string());
                push_tool_result(messages, &tool_use.id, Value::String(reason.clone()));
                return Err(AgentError::ToolExecution { name: tool_use.name.clone(), detail: reason });
            }
        }

        let tool = registry.get(&tool_use.name).ok_or_else(|| AgentError::ToolNotFound(tool_use.name.clone()))?;
        let result = tool.execute(tool_use.input.clone()).await;

        let result_value = match &result {
            Ok(text) => Value::String(text.clone()),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        push_tool_result(messages, &tool_use.id, result_value.clone());

        let post_event = PostToolUseEvent::new(
            tool_use.name.clone(),
            tool_use.input.clone(),
            tool_use.id.clone(),
            result_value,
            history_snapshot(messages),
        );
        hooks.execute_post_tool_use(post_event).await;

        result
            .map(|_| ())
            .map_err(|e| AgentError::ToolExecution { name: tool_use.name.clone(), detail: e.to_string() })
    }
}

/// Reserved for a future interactive mode: append a user-supplied
/// clarification and let the loop resume from where it left off. Not
/// wired into any caller yet.
#[allow(dead_code)]
pub fn provide_clarification(messages: &mut Vec<Message>, clarification: impl Into<String>) {
    messages.push(Message::user(clarification));
}

fn find_tool_use(blocks: &[ContentBlock]) -> Option<&ToolUseBlock> {
    blocks.iter().find_map(|b| match b {
        ContentBlock::ToolUse(t) => Some(t),
        _ => None,
    })
}

fn push_tool_result(messages: &mut Vec<Message>, tool_use_id: &str, content: Value) {
    messages.push(Message::new(
        MessageRole::Tool,
        vec![ContentBlock::ToolResult(ToolResultBlock { tool_use_id: tool_use_id.to_string(), content })],
    ));
}

fn history_snapshot(messages: &[Message]) -> Vec<Value> {
    messages.iter().filter_map(|m| serde_json::to_value(m).ok()).collect()
}

/// Wraps `hooks` with a `PostToolUse` handler that appends one JSON line
/// per tool call to `<logs_dir>/steps.jsonl` (§4.1 "Step logging"). A blank
/// `logs_dir` disables step logging entirely.
pub fn with_step_logging(hooks: Hooks, logs_dir: impl Into<String>) -> Hooks {
    let logs_dir = logs_dir.into();
    if logs_dir.trim().is_empty() {
        return hooks;
    }

    hooks.add_post_tool_use(move |event| {
        let logs_dir = logs_dir.clone();
        async move {
            if let Err(err) = append_step_log(&logs_dir, &event).await {
                tracing::warn!(error = %err, "failed to write agent step log");
            }
            None
        }
    })
}

async fn append_step_log(logs_dir: &str, event: &PostToolUseEvent) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    tokio::fs::create_dir_all(logs_dir).await?;
    let path = format!("{}/steps.jsonl", logs_dir.trim_end_matches('/'));
    let line = serde_json::json!({
        "tool_name": event.tool_name,
        "tool_input": event.tool_input,
        "tool_use_id": event.tool_use_id,
        "tool_result": event.tool_result,
    });

    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    Ok(())
}
