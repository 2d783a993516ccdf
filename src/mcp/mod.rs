//! Tool providers launched as child processes and spoken to with MCP over
//! stdio.

pub mod client;
pub mod fs_server;
pub mod protocol;
pub mod registry;

pub use registry::{McpProvider, ProviderRegistry, StartupFailure};
