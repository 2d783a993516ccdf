use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, ContentBlock, InitializeResult, ListToolsResult, RpcError, Tool,
};
use serde_json::{json, Value};

use crate::engine::provider::{ToolContent, ToolDescriptor, ToolResult};

pub(crate) const MCP_METHOD_NOT_FOUND: i64 = -32601;

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

pub(crate) fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, String> {
    parse_response(message)
}

pub(crate) fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, String> {
    parse_response(message)
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, String> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| err.to_string())
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())
        }
        ServerMessage::Error(error) => Err(format_rpc_error(&error.error)),
        other => Err(format_unexpected_server_message(&other)),
    }
}

pub(crate) fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}

fn format_unexpected_server_message(message: &ServerMessage) -> String {
    format!("Unexpected MCP server message: {message:?}")
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}

/// Maps an advertised MCP tool onto the engine's descriptor. The input schema
/// is passed through untouched; a schema that fails to serialize degrades to
/// an argument-less object.
pub fn tool_descriptor(tool: Tool) -> ToolDescriptor {
    let parameters =
        serde_json::to_value(&tool.input_schema).unwrap_or_else(|_| json!({"type": "object"}));
    ToolDescriptor::new(tool.name, tool.description, parameters)
}

pub fn tool_result(result: CallToolResult) -> ToolResult {
    let content = result
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::TextContent(text) => ToolContent::Text(text.text.clone()),
            other => ToolContent::NonText {
                kind: content_kind(other),
            },
        })
        .collect();
    ToolResult {
        content,
        is_error: result.is_error.unwrap_or(false),
    }
}

fn content_kind(block: &ContentBlock) -> String {
    serde_json::to_value(block)
        .ok()
        .and_then(|value| {
            value
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string())
}
