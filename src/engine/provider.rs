//! Capability contract for tool providers.
//!
//! A provider is any long-lived connection that can describe its tools and
//! execute them. The stdio MCP client in [`crate::mcp`] is the production
//! implementation; tests use in-memory fakes.

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::error::ProviderError;

/// Placeholder substituted for every non-text item in a tool result.
pub const NON_TEXT_PLACEHOLDER: &str = "\n[Non-text output received]";

/// A tool as described by its provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema for the tool arguments.
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: Option<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description,
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
    /// Image, audio, embedded resource, ... `kind` is the provider's tag.
    NonText { kind: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    /// Set when the provider answered but flagged the call as failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: true,
        }
    }

    /// Concatenates every text item; non-text items become
    /// [`NON_TEXT_PLACEHOLDER`] so their position is not lost.
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        for item in &self.content {
            match item {
                ToolContent::Text(text) => output.push_str(text),
                ToolContent::NonText { .. } => output.push_str(NON_TEXT_PLACEHOLDER),
            }
        }
        output
    }
}

#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Stable identifier used in logs and collision reports.
    fn id(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_text_concatenates_text_and_marks_non_text() {
        let result = ToolResult {
            content: vec![
                ToolContent::Text("first ".to_string()),
                ToolContent::NonText {
                    kind: "image".to_string(),
                },
                ToolContent::Text(" last".to_string()),
            ],
            is_error: false,
        };
        assert_eq!(
            result.to_text(),
            "first \n[Non-text output received] last"
        );
    }

    #[test]
    fn empty_result_is_empty_text() {
        assert_eq!(ToolResult::default().to_text(), "");
    }
}
