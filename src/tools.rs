//! Tool framework: JSON-Schema-derived function-calling definitions and the
//! process-wide registry the agent loop dispatches against (§4.2).
//!
//! A [`Tool`] pairs an OpenAI-compatible function schema with a handler that
//! returns a plain string (JSON-encoded when the result is structured). The
//! [`tool()`] builder accepts the same simple-type-notation, extended, or
//! full-JSON-Schema shapes the handler conversion in [`convert_schema_to_openai`]
//! understands. Built-in tools (`reasoning`, `final_answer`, `web_search`,
//! `rag`) are constructed the same way as any other tool; the agent loop
//! does not special-case them beyond recognizing `final_answer` as terminal.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;
use crate::retriever::HybridRetriever;
use crate::search::SearchProvider;

/// Handler signature every tool wraps: takes the call's JSON arguments,
/// returns a string result (§4.2 "invoke ... must be a string").
pub type ToolHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send>>
        + Send
        + Sync,
>;

/// A single callable tool: name, description, input schema, and handler.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ServiceError>> + Send + 'static,
    {
        let name = name.into();
        let description = description.into();
        let input_schema = convert_schema_to_openai(input_schema);

        Self {
            name,
            description,
            input_schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Invoke the tool's handler with the given JSON arguments.
    pub async fn execute(&self, arguments: Value) -> Result<String, ServiceError> {
        (self.handler)(arguments).await
    }

    /// Render the tool in OpenAI's function-calling `tools` array format.
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Convert simple-type-notation, extended, or full JSON Schema into the
/// complete object schema OpenAI's function calling expects.
fn convert_schema_to_openai(schema: Value) -> Value {
    if schema.is_object() {
        let obj = schema
            .as_object()
            .expect("BUG: is_object() returned true but as_object() returned None");
        if obj.contains_key("type") && obj.contains_key("properties") {
            return schema;
        }

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (param_name, param_type) in obj {
            if let Some(type_str) = param_type.as_str() {
                properties.insert(param_name.clone(), type_to_json_schema(type_str));
                required.push(param_name.clone());
            } else if param_type.is_object() {
                let mut prop = param_type.clone();
                let prop_obj = prop
                    .as_object_mut()
                    .expect("BUG: is_object() returned true but as_object_mut() returned None");

                let is_optional = prop_obj
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let is_required = prop_obj.remove("required").and_then(|v| v.as_bool());
                let has_default = prop_obj.contains_key("default");

                properties.insert(param_name.clone(), prop);

                if let Some(true) = is_required {
                    required.push(param_name.clone());
                } else if is_optional || is_required == Some(false) {
                    // explicitly optional
                } else if !has_default {
                    required.push(param_name.clone());
                }
            }
        }

        return serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required
        });
    }

    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

/// Fluent builder for [`Tool`]. Start with [`tool()`], add parameters with
/// [`ToolBuilder::param`] or a complete schema with [`ToolBuilder::schema`],
/// finish with [`ToolBuilder::build`].
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({}),
        }
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if !self.schema.is_object() {
            self.schema = serde_json::json!({});
        }
        let obj = self
            .schema
            .as_object_mut()
            .expect("BUG: schema should be an object after initialization");
        obj.insert(name.to_string(), Value::String(type_str.to_string()));
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ServiceError>> + Send + 'static,
    {
        Tool::new(self.name, self.description, self.schema, handler)
    }
}

/// Start building a tool: `tool("name", "description").param(...).build(...)`.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Process-wide `name -> Tool` map the agent loop dispatches function calls
/// against (§4.2 "registry").
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<Mutex<HashMap<String, Arc<Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Tool) {
        let mut tools = self.tools.lock().expect("tool registry lock poisoned");
        tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.lock().expect("tool registry lock poisoned").get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.lock().expect("tool registry lock poisoned").keys().cloned().collect()
    }

    pub fn openai_schemas(&self) -> Vec<Value> {
        self.tools
            .lock()
            .expect("tool registry lock poisoned")
            .values()
            .map(|t| t.to_openai_format())
            .collect()
    }
}

/// Bookkeeping fields the model fills in on a `reasoning` call (§4.2).
/// The handler does no I/O; it exists so the model externalizes its plan
/// into a structured, loggable shape each cycle.
#[derive(Debug, Deserialize)]
struct ReasoningArgs {
    reasoning_steps: Option<Vec<String>>,
    current_situation: Option<String>,
    plan_status: Option<String>,
    enough_data: Option<bool>,
    remaining_steps: Option<u32>,
    task_completed: Option<bool>,
}

/// Builds the `reasoning` tool: pure bookkeeping, always succeeds, echoes a
/// short acknowledgement the model can use as the next turn's context.
pub fn reasoning_tool() -> Tool {
    tool(
        "reasoning",
        "Record your current plan, situation assessment, and whether you have \
         enough information to answer. Call this before taking any other action.",
    )
    .schema(serde_json::json!({
        "reasoning_steps": {"type": "array", "items": {"type": "string"}, "optional": true},
        "current_situation": {"type": "string", "optional": true},
        "plan_status": {"type": "string", "optional": true},
        "enough_data": {"type": "boolean", "optional": true},
        "remaining_steps": {"type": "integer", "optional": true},
        "task_completed": {"type": "boolean", "optional": true}
    }))
    .build(|args| async move {
        let parsed: ReasoningArgs = serde_json::from_value(args).unwrap_or(ReasoningArgs {
            reasoning_steps: None,
            current_situation: None,
            plan_status: None,
            enough_data: None,
            remaining_steps: None,
            task_completed: None,
        });

        let situation = parsed.current_situation.unwrap_or_else(|| "no situation noted".into());
        let status = parsed.plan_status.unwrap_or_else(|| "in progress".into());
        Ok(format!("Acknowledged. Situation: {situation}. Plan status: {status}."))
    })
}

/// Payload the `final_answer` tool captures; read by the agent loop driver
/// to close out a run (§4.1 step 5).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinalAnswerPayload {
    pub answer: String,
    pub chat_title: Option<String>,
    pub chat_summary: Option<String>,
}

/// Builds the `final_answer` tool. The handler stores the payload into the
/// shared slot so the agent loop can read it back after the tool call
/// completes, then returns a short confirmation string as the tool result.
pub fn final_answer_tool(slot: Arc<Mutex<Option<FinalAnswerPayload>>>) -> Tool {
    tool(
        "final_answer",
        "Provide the final answer to the user's question and end the task. \
         Call this only once you have enough information to answer.",
    )
    .schema(serde_json::json!({
        "answer": "string",
        "chat_title": {"type": "string", "optional": true},
        "chat_summary": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let slot = slot.clone();
        async move {
            let answer = args
                .get("answer")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ServiceError::validation("final_answer requires an 'answer' field")
                })?
                .to_string();

            let payload = FinalAnswerPayload {
                answer: answer.clone(),
                chat_title: args.get("chat_title").and_then(|v| v.as_str()).map(String::from),
                chat_summary: args.get("chat_summary").and_then(|v| v.as_str()).map(String::from),
            };

            *slot.lock().expect("final answer slot lock poisoned") = Some(payload);
            Ok(answer)
        }
    })
}

/// Builds the `web_search` tool over a pluggable [`SearchProvider`],
/// truncating each result's content to `max_content_length` before
/// serializing the source list back to the model.
pub fn web_search_tool(provider: Arc<dyn SearchProvider>) -> Tool {
    tool(
        "web_search",
        "Search the public internet for information relevant to the task.",
    )
    .schema(serde_json::json!({
        "query": "string",
        "max_results": {"type": "integer", "optional": true, "default": 5},
        "max_content_length": {"type": "integer", "optional": true, "default": 2000}
    }))
    .build(move |args| {
        let provider = provider.clone();
        async move {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ServiceError::validation("web_search requires a 'query' field"))?;
            let max_results = args.get("max_results").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
            let max_len = args
                .get("max_content_length")
                .and_then(|v| v.as_u64())
                .unwrap_or(2000) as usize;

            let results = provider
                .search(query, max_results)
                .await
                .map_err(ServiceError::from)?;

            let truncated: Vec<Value> = results
                .into_iter()
                .map(|r| {
                    let mut content = r.content;
                    if content.len() > max_len {
                        content.truncate(max_len);
                    }
                    serde_json::json!({
                        "title": r.title,
                        "url": r.url,
                        "content": content,
                    })
                })
                .collect();

            serde_json::to_string(&truncated).map_err(|e| ServiceError::Internal(e.to_string()))
        }
    })
}

/// Builds the `rag` tool over a [`HybridRetriever`], formatting the
/// retrieved chunks into a flat snippet list with relevance scores.
pub fn rag_tool(retriever: Arc<HybridRetriever>) -> Tool {
    tool(
        "rag",
        "Search the knowledge base of indexed documents for information relevant to the task.",
    )
    .schema(serde_json::json!({
        "query": "string",
        "max_results": {"type": "integer", "optional": true, "default": 10},
        "document_id": {"type": "string", "optional": true}
    }))
    .build(move |args| {
        let retriever = retriever.clone();
        async move {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ServiceError::validation("rag requires a 'query' field"))?;
            let top_k = args.get("max_results").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
            let document_id = args.get("document_id").and_then(|v| v.as_str());

            let hits = retriever
                .retrieve(query, top_k, document_id)
                .await
                .map_err(ServiceError::from)?;

            let formatted: Vec<Value> = hits
                .into_iter()
                .map(|h| {
                    serde_json::json!({
                        "id": h.id,
                        "text": h.text,
                        "score": h.score,
                        "metadata": h.metadata,
                    })
                })
                .collect();

            serde_json::to_string(&formatted).map_err(|e| ServiceError::Internal(e.to_string()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_to_json_schema() {
        assert_eq!(type_to_json_schema("string"), json!({"type": "string"}));
        assert_eq!(type_to_json_schema("integer"), json!({"type": "integer"}));
        assert_eq!(type_to_json_schema("number"), json!({"type": "number"}));
        assert_eq!(type_to_json_schema("bool"), json!({"type": "boolean"}));
    }

    #[test]
    fn test_convert_simple_schema() {
        let schema = json!({"location": "string", "units": "string"});
        let result = convert_schema_to_openai(schema);
        assert_eq!(result["type"], "object");
        assert_eq!(result["properties"]["location"]["type"], "string");
        assert_eq!(result["required"], json!(["location", "units"]));
    }

    #[test]
    fn test_convert_full_schema() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let result = convert_schema_to_openai(schema.clone());
        assert_eq!(result, schema);
    }

    #[tokio::test]
    async fn test_tool_creation() {
        let add_tool = tool("add", "Add two numbers")
            .param("a", "number")
            .param("b", "number")
            .build(|args| async move {
                let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok((a + b).to_string())
            });

        assert_eq!(add_tool.name(), "add");
        let result = add_tool.execute(json!({"a": 5.0, "b": 3.0})).await.unwrap();
        assert_eq!(result, "8");
    }

    #[test]
    fn test_tool_to_openai_format() {
        let t = tool("test", "Test tool")
            .param("param1", "string")
            .build(|_| async { Ok(String::new()) });

        let format = t.to_openai_format();
        assert_eq!(format["type"], "function");
        assert_eq!(format["function"]["name"], "test");
        assert!(format["function"]["parameters"].is_object());
    }

    #[test]
    fn test_param_after_non_object_schema() {
        let t = tool("test", "Test tool")
            .schema(json!("string"))
            .param("key", "number")
            .build(|_| async { Ok(String::new()) });

        let format = t.to_openai_format();
        assert!(format["function"]["parameters"]["properties"]["key"].is_object());
    }

    #[tokio::test]
    async fn final_answer_tool_stores_payload_and_returns_answer() {
        let slot = Arc::new(Mutex::new(None));
        let t = final_answer_tool(slot.clone());
        let result = t
            .execute(json!({"answer": "42", "chat_title": "The Answer"}))
            .await
            .unwrap();
        assert_eq!(result, "42");
        let stored = slot.lock().unwrap().clone().unwrap();
        assert_eq!(stored.answer, "42");
        assert_eq!(stored.chat_title.as_deref(), Some("The Answer"));
    }

    #[tokio::test]
    async fn final_answer_tool_rejects_missing_answer() {
        let slot = Arc::new(Mutex::new(None));
        let t = final_answer_tool(slot);
        let result = t.execute(json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reasoning_tool_echoes_situation() {
        let t = reasoning_tool();
        let result = t
            .execute(json!({"current_situation": "gathering docs", "plan_status": "on track"}))
            .await
            .unwrap();
        assert!(result.contains("gathering docs"));
        assert!(result.contains("on track"));
    }

    #[test]
    fn registry_stores_and_retrieves_by_name() {
        let registry = ToolRegistry::new();
        registry.register(reasoning_tool());
        assert!(registry.get("reasoning").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["reasoning".to_string()]);
    }
}
