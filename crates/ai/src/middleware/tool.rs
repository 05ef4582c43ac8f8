//! Tool advertisement and tool-call execution.
//!
//! The model is told about available tools through a rendered system
//! prompt, and asked to emit invocations in an explicit delimited markup:
//!
//! ```text
//! <tool_call>
//! <tool_name>NAME</tool_name>
//! <parameters>{"key": "value"}</parameters>
//! </tool_call>
//! ```
//!
//! Extraction uses a small hand-written tag scanner rather than a regex,
//! so JSON bodies containing angle brackets or braces cannot confuse it.
//! A malformed call is skipped and logged; its siblings still execute.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    messages::{ChatMessage, ChatRole},
    middleware::context_insert_index,
};

/// External tool-execution provider the middleware consumes.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// The tool catalog. Fetched every time tools are advertised; the
    /// provider owns any caching.
    async fn available_tools(&self) -> anyhow::Result<Vec<ToolInfo>>;

    /// Execute one tool with parsed JSON parameters.
    async fn execute_tool(&self, name: &str, parameters: Value, user_id: &str) -> anyhow::Result<Value>;
}

/// Static description of one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON-schema-like parameter description: property name to
    /// `{"type": ..., "description": ..., "required": ...}`.
    pub parameters: Value,
    pub required: bool,
}

/// A parsed tool invocation extracted from model output. Ephemeral.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool_name: String,
    pub parameters: Value,
}

/// Outcome of executing one tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionResult {
    pub tool_name: String,
    pub success: bool,
    pub result: Value,
    /// Wall-clock execution time in seconds, ≥ 0.
    pub execution_time: f64,
}

pub struct ToolMiddleware {
    provider: Arc<dyn ToolProvider>,
}

impl ToolMiddleware {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self { provider }
    }

    /// Whether tool advertisement should run for this conversation.
    pub fn should_apply_tools(messages: &[ChatMessage], use_tools: bool, tool_count: usize) -> bool {
        use_tools && !messages.is_empty() && tool_count > 0 && messages.iter().any(|m| m.role == ChatRole::User)
    }

    /// Advertise available tools by extending the system prompt.
    ///
    /// The prompt is appended to the first existing system message so a
    /// context message injected earlier keeps its position; without any
    /// system message a new leading one is inserted. Catalog fetch
    /// failures degrade to "no tools", never fail the request.
    pub async fn process(&self, messages: Vec<ChatMessage>, use_tools: bool) -> Vec<ChatMessage> {
        if !use_tools || messages.is_empty() {
            return messages;
        }

        let tools = match self.provider.available_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                log::warn!("failed to fetch tool catalog, continuing without tools: {e}");
                return messages;
            }
        };

        if !Self::should_apply_tools(&messages, use_tools, tools.len()) {
            return messages;
        }

        let prompt = create_tool_prompt(&tools);
        let mut messages = messages;

        match messages.iter_mut().find(|m| m.role == ChatRole::System) {
            Some(system) => {
                system.content.push_str("\n\n");
                system.content.push_str(&prompt);
            }
            None => {
                let index = context_insert_index(&messages);
                messages.insert(index, ChatMessage::system(prompt));
            }
        }

        log::debug!("advertised {} tools to the model", tools.len());

        messages
    }

    /// Extract and execute every tool call embedded in a model response.
    ///
    /// Calls run sequentially in the order they appear. Failures are
    /// captured per call, never raised.
    pub async fn execute_tools_from_response(&self, ai_response: &str, user_id: &str) -> Vec<ToolExecutionResult> {
        let calls = extract_tool_calls(ai_response);
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let started = Instant::now();

            let (success, result) = match self
                .provider
                .execute_tool(&call.tool_name, call.parameters, user_id)
                .await
            {
                Ok(value) => (true, value),
                Err(e) => {
                    log::warn!("tool '{}' failed: {e}", call.tool_name);
                    (false, json!({ "error": e.to_string() }))
                }
            };

            results.push(ToolExecutionResult {
                tool_name: call.tool_name,
                success,
                result,
                execution_time: started.elapsed().as_secs_f64(),
            });
        }

        results
    }
}

/// Render the deterministic tool prompt: one block per tool plus the
/// fixed instruction block describing the invocation markup.
pub(crate) fn create_tool_prompt(tools: &[ToolInfo]) -> String {
    let mut prompt = String::from("You have access to the following tools:\n");

    for tool in tools {
        prompt.push_str(&format!("\n## {}\n{}\n", tool.name, tool.description));

        if let Some(properties) = tool.parameters.as_object() {
            if !properties.is_empty() {
                prompt.push_str("Parameters:\n");
            }

            for (name, schema) in properties {
                let param_type = schema.get("type").and_then(Value::as_str).unwrap_or("any");
                let required = schema.get("required").and_then(Value::as_bool).unwrap_or(false);
                let description = schema.get("description").and_then(Value::as_str).unwrap_or("");

                prompt.push_str(&format!(
                    "- {name} ({param_type}, {}): {description}\n",
                    if required { "required" } else { "optional" }
                ));
            }
        }
    }

    prompt.push_str(
        "\nTo call a tool, emit exactly this markup in your response:\n\
         <tool_call>\n\
         <tool_name>NAME</tool_name>\n\
         <parameters>{\"key\": \"value\"}</parameters>\n\
         </tool_call>\n\
         The parameters block must be valid JSON. You may emit multiple \
         tool calls in one response.",
    );

    prompt
}

/// Scan model output for `<tool_call>` blocks.
///
/// Blocks missing a tag or carrying malformed JSON are skipped
/// individually; scanning continues after the closing tag.
pub(crate) fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some((block, after)) = next_delimited(rest, "<tool_call>", "</tool_call>") {
        rest = after;

        let Some((name, _)) = next_delimited(block, "<tool_name>", "</tool_name>") else {
            log::warn!("tool call block missing <tool_name>, skipping");
            continue;
        };

        let Some((parameters, _)) = next_delimited(block, "<parameters>", "</parameters>") else {
            log::warn!("tool call block missing <parameters>, skipping");
            continue;
        };

        let parameters = match serde_json::from_str(parameters.trim()) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("tool call has malformed JSON parameters, skipping: {e}");
                continue;
            }
        };

        calls.push(ToolCall {
            tool_name: name.trim().to_string(),
            parameters,
        });
    }

    calls
}

/// Find the first `open`...`close` span in `haystack`. Returns the inner
/// text and the remainder after `close`.
fn next_delimited<'a>(haystack: &'a str, open: &str, close: &str) -> Option<(&'a str, &'a str)> {
    let start = haystack.find(open)? + open.len();
    let len = haystack[start..].find(close)?;

    Some((&haystack[start..start + len], &haystack[start + len + close.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticTools(Vec<ToolInfo>);

    #[async_trait]
    impl ToolProvider for StaticTools {
        async fn available_tools(&self) -> anyhow::Result<Vec<ToolInfo>> {
            Ok(self.0.clone())
        }

        async fn execute_tool(&self, name: &str, parameters: Value, _user_id: &str) -> anyhow::Result<Value> {
            match name {
                "failing" => anyhow::bail!("boom"),
                _ => Ok(json!({ "echo": parameters })),
            }
        }
    }

    fn search_tool() -> ToolInfo {
        ToolInfo {
            name: "web_search".into(),
            description: "Search the web.".into(),
            parameters: json!({
                "query": { "type": "string", "required": true, "description": "Search terms" },
                "limit": { "type": "integer", "required": false }
            }),
            required: false,
        }
    }

    fn middleware() -> ToolMiddleware {
        ToolMiddleware::new(Arc::new(StaticTools(vec![search_tool()])))
    }

    #[test]
    fn should_apply_requires_flag_tools_and_user_message() {
        let messages = vec![ChatMessage::user("q")];
        assert!(ToolMiddleware::should_apply_tools(&messages, true, 1));
        assert!(!ToolMiddleware::should_apply_tools(&messages, false, 1));
        assert!(!ToolMiddleware::should_apply_tools(&messages, true, 0));
        assert!(!ToolMiddleware::should_apply_tools(&[], true, 1));
    }

    #[test]
    fn prompt_renders_parameter_table() {
        let prompt = create_tool_prompt(&[search_tool()]);

        assert!(prompt.contains("## web_search"));
        assert!(prompt.contains("- query (string, required): Search terms"));
        assert!(prompt.contains("- limit (integer, optional):"));
        assert!(prompt.contains("<tool_call>"));
    }

    #[tokio::test]
    async fn appends_to_existing_system_message() {
        let messages = vec![ChatMessage::system("Base prompt."), ChatMessage::user("q")];
        let result = middleware().process(messages, true).await;

        assert_eq!(result.len(), 2);
        assert!(result[0].content.starts_with("Base prompt.\n\n"));
        assert!(result[0].content.contains("## web_search"));
    }

    #[tokio::test]
    async fn inserts_leading_system_message_when_absent() {
        let result = middleware().process(vec![ChatMessage::user("q")], true).await;

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, ChatRole::System);
    }

    #[tokio::test]
    async fn disabled_flag_leaves_messages_untouched() {
        let messages = vec![ChatMessage::user("q")];
        let result = middleware().process(messages.clone(), false).await;
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn extracts_single_tool_call() {
        let text = "Let me search.\n<tool_call>\n<tool_name>web_search</tool_name>\n\
                    <parameters>{\"query\": \"capital of France\"}</parameters>\n</tool_call>";

        let calls = extract_tool_calls(text);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "web_search");
        assert_eq!(calls[0].parameters, json!({ "query": "capital of France" }));
    }

    #[test]
    fn extracts_multiple_tool_calls_in_order() {
        let text = "<tool_call><tool_name>a</tool_name><parameters>{\"n\": 1}</parameters></tool_call>\
                    middle text\
                    <tool_call><tool_name>b</tool_name><parameters>{\"n\": 2}</parameters></tool_call>";

        let calls = extract_tool_calls(text);

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_name, "a");
        assert_eq!(calls[1].tool_name, "b");
    }

    #[test]
    fn markup_from_prompt_documentation_round_trips() {
        // The exact shape the instruction block tells the model to emit.
        let documented = "<tool_call>\n<tool_name>NAME</tool_name>\n\
                          <parameters>{\"key\": \"value\"}</parameters>\n</tool_call>";

        let calls = extract_tool_calls(documented);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "NAME");
        assert_eq!(calls[0].parameters, json!({ "key": "value" }));
    }

    #[test]
    fn malformed_json_skips_only_that_call() {
        let text = "<tool_call><tool_name>bad</tool_name><parameters>{not json}</parameters></tool_call>\
                    <tool_call><tool_name>good</tool_name><parameters>{}</parameters></tool_call>";

        let calls = extract_tool_calls(text);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "good");
    }

    #[test]
    fn plain_text_extracts_nothing() {
        assert!(extract_tool_calls("no tools here").is_empty());
        assert!(extract_tool_calls("<tool_call>unterminated").is_empty());
    }

    #[tokio::test]
    async fn executes_calls_sequentially_with_timing() {
        let text = "<tool_call><tool_name>web_search</tool_name><parameters>{\"q\": 1}</parameters></tool_call>\
                    <tool_call><tool_name>failing</tool_name><parameters>{}</parameters></tool_call>";

        let results = middleware().execute_tools_from_response(text, "user-1").await;

        assert_eq!(results.len(), 2);

        assert!(results[0].success);
        assert_eq!(results[0].result, json!({ "echo": { "q": 1 } }));
        assert!(results[0].execution_time >= 0.0);

        assert!(!results[1].success);
        assert_eq!(results[1].result, json!({ "error": "boom" }));
    }
}
