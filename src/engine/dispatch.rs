use std::time::Duration;

use tracing::debug;

use crate::core::message::ToolCall;
use crate::engine::catalog::ToolCatalog;
use crate::engine::error::ToolFailure;

/// Executes one call against the provider that owns it in `catalog`.
///
/// Returns the text to record as the tool-role message. Every failure mode
/// (unknown tool, provider error, timeout, explicit error result) comes back
/// as a [`ToolFailure`] for the caller to fold into the conversation.
pub async fn dispatch_call(
    catalog: &ToolCatalog,
    call: &ToolCall,
    timeout: Option<Duration>,
) -> Result<String, ToolFailure> {
    let entry = catalog
        .get(&call.name)
        .ok_or_else(|| ToolFailure::NotFound(call.name.clone()))?;

    debug!(tool = %call.name, provider = %entry.provider.id(), "Dispatching tool call");
    let invocation = entry.provider.call_tool(&call.name, call.arguments.clone());
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, invocation)
            .await
            .map_err(|_| ToolFailure::TimedOut {
                name: call.name.clone(),
                after: limit,
            })?,
        None => invocation.await,
    };

    let result = outcome.map_err(|source| ToolFailure::Provider {
        name: call.name.clone(),
        source,
    })?;

    let text = result.to_text();
    if result.is_error {
        return Err(ToolFailure::ErrorResult {
            name: call.name.clone(),
            message: text,
        });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::build_catalog;
    use crate::engine::error::ProviderError;
    use crate::engine::provider::{ToolContent, ToolProvider, ToolResult};
    use crate::engine::testing::FakeProvider;
    use serde_json::json;
    use std::sync::Arc;

    async fn catalog_with(provider: FakeProvider) -> ToolCatalog {
        let providers: Vec<Arc<dyn ToolProvider>> = vec![Arc::new(provider)];
        build_catalog(&providers, None).await
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let catalog = ToolCatalog::new();
        let err = dispatch_call(&catalog, &ToolCall::new("ghost", json!({})), None)
            .await
            .expect_err("should fail");
        assert_eq!(err, ToolFailure::NotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn successful_call_returns_text_with_placeholders() {
        let provider = FakeProvider::new("img").with_result(
            "snap",
            ToolResult {
                content: vec![
                    ToolContent::Text("saved to out.png".to_string()),
                    ToolContent::NonText {
                        kind: "image".to_string(),
                    },
                ],
                is_error: false,
            },
        );
        let catalog = catalog_with(provider).await;

        let text = dispatch_call(&catalog, &ToolCall::new("snap", json!({})), None)
            .await
            .expect("call succeeds");
        assert_eq!(text, "saved to out.png\n[Non-text output received]");
    }

    #[tokio::test]
    async fn arguments_reach_the_provider() {
        let provider = FakeProvider::new("fs").with_tool("read_file", "ok");
        let calls = provider.calls();
        let catalog = catalog_with(provider).await;

        dispatch_call(
            &catalog,
            &ToolCall::new("read_file", json!({"path": "x.txt"})),
            None,
        )
        .await
        .expect("call succeeds");

        assert_eq!(
            calls.lock().expect("lock").as_slice(),
            &[("read_file".to_string(), json!({"path": "x.txt"}))]
        );
    }

    #[tokio::test]
    async fn provider_error_is_wrapped() {
        let provider = FakeProvider::new("fs")
            .with_tool("read_file", "unused")
            .failing_call("read_file", "permission denied");
        let catalog = catalog_with(provider).await;

        let err = dispatch_call(&catalog, &ToolCall::new("read_file", json!({})), None)
            .await
            .expect_err("should fail");
        assert_eq!(
            err,
            ToolFailure::Provider {
                name: "read_file".to_string(),
                source: ProviderError::Rpc("permission denied".to_string()),
            }
        );
        assert_eq!(err.to_string(), "Error executing tool: permission denied");
    }

    #[tokio::test]
    async fn explicit_error_result_is_a_failure() {
        let provider =
            FakeProvider::new("fs").with_result("read_file", ToolResult::error("no such file"));
        let catalog = catalog_with(provider).await;

        let err = dispatch_call(&catalog, &ToolCall::new("read_file", json!({})), None)
            .await
            .expect_err("should fail");
        assert_eq!(err.to_string(), "Error executing tool: no such file");
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let provider = FakeProvider::new("slow")
            .with_tool("wait", "late")
            .with_call_delay(Duration::from_secs(5));
        let catalog = catalog_with(provider).await;

        let err = dispatch_call(
            &catalog,
            &ToolCall::new("wait", json!({})),
            Some(Duration::from_millis(20)),
        )
        .await
        .expect_err("should time out");
        assert!(matches!(err, ToolFailure::TimedOut { ref name, .. } if name == "wait"));
    }
}
