use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::core::config::ProviderConfig;
use crate::engine::error::ProviderError;
use crate::engine::provider::{ToolDescriptor, ToolProvider, ToolResult};
use crate::mcp::client::StdioClient;
use crate::mcp::protocol::{tool_descriptor, tool_result};

const MCP_STARTUP_CONCURRENCY_LIMIT: usize = 3;

/// A started provider process behind the [`ToolProvider`] contract.
pub struct McpProvider {
    config: ProviderConfig,
    client: Arc<StdioClient>,
}

impl McpProvider {
    /// Spawns the configured command and completes the MCP handshake.
    pub async fn start(config: &ProviderConfig) -> Result<Self, String> {
        let client = StdioClient::connect(config).await?;
        client.initialize().await?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    pub fn display_name(&self) -> &str {
        self.config.display_name()
    }

    pub fn is_alive(&self) -> bool {
        !self.client.is_closed()
    }

    fn ensure_alive(&self) -> Result<(), ProviderError> {
        if self.client.is_closed() {
            return Err(ProviderError::Disconnected(self.config.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolProvider for McpProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        self.ensure_alive()?;
        let tools = self.client.list_tools().await.map_err(ProviderError::Rpc)?;
        Ok(tools.into_iter().map(tool_descriptor).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        self.ensure_alive()?;
        let arguments = arguments_object(arguments)?;
        let result = self
            .client
            .call_tool(name, arguments)
            .await
            .map_err(ProviderError::Rpc)?;
        Ok(tool_result(result))
    }
}

/// Tool arguments travel as a JSON object; `null` means none.
fn arguments_object(arguments: Value) -> Result<Option<Map<String, Value>>, ProviderError> {
    match arguments {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => Err(ProviderError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// A provider that could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
    pub id: String,
    pub message: String,
}

/// Every provider started for the session, in config order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<McpProvider>>,
    failures: Vec<StartupFailure>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts each configured provider with bounded concurrency. A provider
    /// that fails is recorded in [`ProviderRegistry::failures`] and skipped.
    pub async fn connect_all(configs: &[&ProviderConfig]) -> Self {
        let results: Vec<(String, Result<McpProvider, String>)> = stream::iter(configs.iter())
            .map(|config| async move { (config.id.clone(), McpProvider::start(config).await) })
            .buffered(MCP_STARTUP_CONCURRENCY_LIMIT)
            .collect()
            .await;

        let mut registry = Self::new();
        for (id, result) in results {
            match result {
                Ok(provider) => {
                    info!(server_id = %id, "Tool provider started");
                    registry.providers.push(Arc::new(provider));
                }
                Err(message) => {
                    warn!(server_id = %id, error = %message, "Tool provider failed to start");
                    registry.failures.push(StartupFailure { id, message });
                }
            }
        }
        registry
    }

    pub fn live(&self) -> &[Arc<McpProvider>] {
        &self.providers
    }

    pub fn failures(&self) -> &[StartupFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Snapshot handed to catalog building at the start of each turn.
    pub fn providers(&self) -> Vec<Arc<dyn ToolProvider>> {
        self.providers
            .iter()
            .map(|provider| provider.clone() as Arc<dyn ToolProvider>)
            .collect()
    }
}
