use std::time::Duration;
use thiserror::Error;

/// Fatal to the current turn: the model stream could not be opened or broke
/// part way through.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("{0}")]
    Api(String),

    #[error("stream interrupted: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failure reported by a tool provider for a listing or a call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider {0} is not connected")]
    Disconnected(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Rpc(String),
}

/// Recoverable failure of a single tool call. These are folded into the
/// conversation as tool-role messages; they never end a turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    #[error("Error: Tool '{0}' not found in any active session.")]
    NotFound(String),

    #[error("Error executing tool: {source}")]
    Provider {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error("Error executing tool: timed out after {}s", .after.as_secs_f32())]
    TimedOut { name: String, after: Duration },

    #[error("Error executing tool: {message}")]
    ErrorResult { name: String, message: String },
}

impl ToolFailure {
    pub fn tool_name(&self) -> &str {
        match self {
            ToolFailure::NotFound(name) => name,
            ToolFailure::Provider { name, .. }
            | ToolFailure::TimedOut { name, .. }
            | ToolFailure::ErrorResult { name, .. } => name,
        }
    }

    /// Short line interleaved into the live output.
    pub fn diagnostic(&self) -> String {
        match self {
            ToolFailure::NotFound(name) => format!("\n[Error: Tool {name} not found]"),
            ToolFailure::Provider { source, .. } => format!(" [Error: {source}]"),
            ToolFailure::TimedOut { after, .. } => {
                format!(" [Error: timed out after {}s]", after.as_secs_f32())
            }
            ToolFailure::ErrorResult { message, .. } => format!(" [Error: {message}]"),
        }
    }
}
