use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::core::message::Message;
use crate::engine::catalog::ToolSchema;
use crate::engine::error::StreamError;

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, StreamError>>;

/// Argument payload of a tool-call fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentsFragment {
    /// Complete structured arguments (Ollama sends these).
    Complete(Value),
    /// A slice of a JSON text that continues in later fragments.
    Partial(String),
}

/// Tool-call data carried by one chunk. Any field may be missing; fragments
/// sharing an `index` belong to the same call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCallFragment {
    pub index: Option<u32>,
    pub name: Option<String>,
    pub arguments: Option<ArgumentsFragment>,
}

impl ToolCallFragment {
    pub fn complete(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            index: None,
            name: Some(name.into()),
            arguments: Some(ArgumentsFragment::Complete(arguments)),
        }
    }
}

/// One incremental unit of model output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(fragments: Vec<ToolCallFragment>) -> Self {
        Self {
            content: None,
            tool_calls: fragments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty) && self.tool_calls.is_empty()
    }
}

/// Model streaming endpoint.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Opens a completion stream. `tools` may be empty, in which case no tool
    /// advertisement is sent.
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChunkStream, StreamError>;
}
