//! Ollama HTTP payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::message::{Message, ToolCall};
use crate::engine::catalog::ToolSchema;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .as_ref()
                .map(|calls| calls.iter().map(ChatToolCall::from).collect()),
            tool_name: message.name.clone(),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatToolCall {
    pub function: ChatToolCallFunction,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatToolCallFunction {
    pub name: String,
    pub arguments: Value,
}

impl From<&ToolCall> for ChatToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            function: ChatToolCallFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatToolDefinition>>,
}

impl ChatRequest {
    /// Streaming request. An empty tool list is left out of the payload
    /// entirely rather than sent as `[]`.
    pub fn streaming(model: &str, messages: &[Message], tools: &[ToolSchema]) -> Self {
        Self {
            model: model.to_string(),
            messages: messages.iter().map(ChatMessage::from).collect(),
            stream: true,
            tools: (!tools.is_empty())
                .then(|| tools.iter().map(ChatToolDefinition::from).collect()),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ChatToolFunction,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatToolFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

impl From<&ToolSchema> for ChatToolDefinition {
    fn from(schema: &ToolSchema) -> Self {
        Self {
            kind: "function".to_string(),
            function: ChatToolFunction {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: schema.parameters.clone(),
            },
        }
    }
}

/// One line of the `/api/chat` NDJSON stream.
#[derive(Deserialize, Debug, Default)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<ChatResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
pub struct ChatToolCallDelta {
    pub function: Option<ChatToolCallFunctionDelta>,
}

#[derive(Deserialize, Debug)]
pub struct ChatToolCallFunctionDelta {
    #[serde(default)]
    pub index: Option<u32>,
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Deserialize, Debug)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

pub mod models;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_empty_tools() {
        let request = ChatRequest::streaming("llama3", &[Message::user("hi")], &[]);
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({
                "model": "llama3",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })
        );
    }

    #[test]
    fn request_carries_tool_calls_and_results() {
        let messages = vec![
            Message::user("read x"),
            Message::assistant("", vec![ToolCall::new("read_file", json!({"path": "x"}))]),
            Message::tool("read_file", "hello"),
        ];
        let tools = vec![ToolSchema {
            name: "read_file".to_string(),
            description: Some("Read a file".to_string()),
            parameters: json!({"type": "object"}),
        }];
        let value =
            serde_json::to_value(ChatRequest::streaming("llama3", &messages, &tools)).expect("serialize");

        assert_eq!(
            value["messages"][1]["tool_calls"],
            json!([{"function": {"name": "read_file", "arguments": {"path": "x"}}}])
        );
        assert_eq!(value["messages"][2]["tool_name"], json!("read_file"));
        assert_eq!(
            value["tools"],
            json!([{
                "type": "function",
                "function": {
                    "name": "read_file",
                    "description": "Read a file",
                    "parameters": {"type": "object"}
                }
            }])
        );
    }

    #[test]
    fn response_line_parses_tool_calls() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"read_file","arguments":{"path":"x.txt"}}}]},"done":false}"#;
        let response: ChatResponse = serde_json::from_str(line).expect("parse");
        let message = response.message.expect("message");
        let calls = message.tool_calls.expect("tool calls");
        let function = calls[0].function.as_ref().expect("function");
        assert_eq!(function.name.as_deref(), Some("read_file"));
        assert_eq!(function.arguments, Some(json!({"path": "x.txt"})));
        assert!(!response.done);
    }
}
