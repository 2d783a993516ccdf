use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, Implementation,
    InitializeRequestParams, InitializeResult, ListToolsResult, PaginatedRequestParams,
    RequestId, Tool, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::config::ProviderConfig;
use crate::mcp::protocol;

const STDIO_CONTROL_TIMEOUT_SECONDS: u64 = 60;
const STDIO_WRITE_TIMEOUT_SECONDS: u64 = 10;
pub const MCP_MAX_TOOL_LIST: usize = 100;

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

/// One provider process spoken to with newline-delimited JSON-RPC.
///
/// Responses are matched to requests by id. Dropping the client kills the
/// child.
pub struct StdioClient {
    stdin: Mutex<ChildStdin>,
    pending: PendingRequests,
    next_request_id: AtomicI64,
    server_id: String,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    /// Bounds `initialize` and `tools/list`. Tool calls are bounded by the
    /// caller's tool timeout alone.
    control_timeout: Duration,
}

/// Drops the pending entry for a request whose future goes away before the
/// response arrives.
struct PendingGuard {
    pending: PendingRequests,
    request_id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&self.request_id);
            return;
        }
        let pending = self.pending.clone();
        let request_id = self.request_id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pending.lock().await.remove(&request_id);
            });
        }
    }
}

impl StdioClient {
    pub async fn connect(config: &ProviderConfig) -> Result<Arc<Self>, String> {
        Self::connect_with_timeout(config, Duration::from_secs(STDIO_CONTROL_TIMEOUT_SECONDS)).await
    }

    pub(crate) async fn connect_with_timeout(
        config: &ProviderConfig,
        control_timeout: Duration,
    ) -> Result<Arc<Self>, String> {
        debug!(
            server_id = %config.id,
            command = %config.command,
            args = ?config.args,
            "Starting MCP stdio server"
        );
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| format!("Failed to start `{}`: {}", config.command, err))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let client = Arc::new(Self {
            stdin: Mutex::new(stdin),
            pending: pending.clone(),
            next_request_id: AtomicI64::new(0),
            server_id: config.id.clone(),
            closed: closed.clone(),
            shutdown: shutdown.clone(),
            control_timeout,
        });

        Self::spawn_stdout_reader(pending.clone(), stdout, client.server_id.clone());
        Self::spawn_stderr_drain(stderr, client.server_id.clone());

        let server_id = client.server_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!(server_id = %server_id, status = ?status, "MCP stdio server exited");
                }
                _ = shutdown.cancelled() => {
                    let _ = child.kill().await;
                    debug!(server_id = %server_id, "MCP stdio server stopped");
                }
            }
            closed.store(true, Ordering::SeqCst);
            pending.lock().await.clear();
        });

        Ok(client)
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// True once the child process has exited.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn spawn_stdout_reader(
        pending: PendingRequests,
        stdout: tokio::process::ChildStdout,
        server_id: String,
    ) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let value = match serde_json::from_str::<Value>(&line) {
                    Ok(value) => value,
                    Err(_) => {
                        debug!(server_id = %server_id, "Ignoring non-JSON line from MCP server");
                        continue;
                    }
                };
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Ok(message) = serde_json::from_value::<ServerMessage>(item.clone()) {
                            Self::dispatch_message(&pending, message, &server_id).await;
                        }
                    }
                } else if let Ok(message) = serde_json::from_value::<ServerMessage>(value) {
                    Self::dispatch_message(&pending, message, &server_id).await;
                }
            }
        });
    }

    fn spawn_stderr_drain(stderr: tokio::process::ChildStderr, server_id: String) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                debug!(server_id = %server_id, stderr = %line, "MCP stdio server stderr");
            }
        });
    }

    async fn dispatch_message(pending: &PendingRequests, message: ServerMessage, server_id: &str) {
        match &message {
            ServerMessage::Response(response) => {
                debug!(
                    server_id = %server_id,
                    response_id = ?response.id,
                    "Received MCP stdio response"
                );
                if let Some(tx) = pending.lock().await.remove(&response.id) {
                    let _ = tx.send(message);
                }
            }
            ServerMessage::Error(error) => {
                debug!(
                    server_id = %server_id,
                    error_id = ?error.id,
                    error_code = error.error.code,
                    "Received MCP stdio error"
                );
                if let Some(id) = error.id.as_ref() {
                    if let Some(tx) = pending.lock().await.remove(id) {
                        let _ = tx.send(message);
                    }
                }
            }
            // Sampling and other server-initiated requests are not offered in
            // our client capabilities.
            ServerMessage::Request(request) => {
                debug!(
                    server_id = %server_id,
                    method = %request.method(),
                    "Ignoring MCP stdio server request"
                );
            }
            ServerMessage::Notification(_) => {
                debug!(server_id = %server_id, "Received MCP stdio notification");
            }
        }
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        RequestId::Integer(id)
    }

    async fn write_line(&self, payload: &str) -> Result<(), String> {
        let write_timeout = Duration::from_secs(STDIO_WRITE_TIMEOUT_SECONDS);
        let mut stdin = tokio::time::timeout(write_timeout, self.stdin.lock())
            .await
            .map_err(|_| "Timed out waiting for MCP stdio stdin lock.".to_string())?;
        tokio::time::timeout(write_timeout, stdin.write_all(payload.as_bytes()))
            .await
            .map_err(|_| "Timed out writing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.write_all(b"\n"))
            .await
            .map_err(|_| "Timed out writing MCP stdio request newline.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.flush())
            .await
            .map_err(|_| "Timed out flushing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    /// Sends one request and waits for its response, for at most `timeout`
    /// when given. A server exit ends the wait with an error.
    async fn send_request(
        &self,
        request: RequestFromClient,
        timeout: Option<Duration>,
    ) -> Result<ServerMessage, String> {
        if self.is_closed() {
            return Err("MCP stdio server has exited.".to_string());
        }
        let request_id = self.next_request_id();
        debug!(
            server_id = %self.server_id,
            request_id = ?request_id,
            "Sending MCP stdio request"
        );
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            request_id: request_id.clone(),
        };

        self.write_line(&payload).await?;

        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                debug!(
                    server_id = %self.server_id,
                    request_id = ?request_id,
                    timeout_ms = limit.as_millis() as u64,
                    "MCP stdio request timed out"
                );
                "MCP stdio request timed out.".to_string()
            })?,
            None => rx.await,
        };
        response.map_err(|_| "MCP stdio response channel closed.".to_string())
    }

    #[cfg(test)]
    async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        self.write_line(&payload).await
    }

    /// Runs the MCP handshake: `initialize`, then the `initialized`
    /// notification.
    pub async fn initialize(&self) -> Result<InitializeResult, String> {
        let response = self
            .send_request(
                RequestFromClient::InitializeRequest(client_details()),
                Some(self.control_timeout),
            )
            .await?;
        let result = protocol::parse_initialize_result(response)?;
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await?;
        debug!(
            server_id = %self.server_id,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP stdio server initialized"
        );
        Ok(result)
    }

    /// Lists every tool, following `next_cursor` until [`MCP_MAX_TOOL_LIST`]
    /// is reached. A server without the `tools/list` method offers nothing.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, String> {
        collect_tool_pages(|cursor| self.fetch_tools_page(cursor)).await
    }

    async fn fetch_tools_page(
        &self,
        cursor: Option<String>,
    ) -> Result<Option<ListToolsResult>, String> {
        let response = self
            .send_request(
                RequestFromClient::ListToolsRequest(paginated_params(cursor)),
                Some(self.control_timeout),
            )
            .await?;
        if protocol::is_method_not_found(&response) {
            return Ok(None);
        }
        protocol::parse_list_tools(response).map(Some)
    }

    /// Calls a tool and waits as long as the server takes; callers bound the
    /// wait with their own tool timeout.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, String> {
        let mut params = CallToolRequestParams::new(name);
        if let Some(arguments) = arguments {
            params = params.with_arguments(arguments);
        }
        let response = self
            .send_request(RequestFromClient::CallToolRequest(params), None)
            .await?;
        protocol::parse_call_tool(response)
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn client_details() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "toolchat".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("toolchat".to_string()),
            description: None,
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

fn paginated_params(cursor: Option<String>) -> Option<PaginatedRequestParams> {
    cursor.map(|cursor| PaginatedRequestParams {
        cursor: Some(cursor),
        meta: None,
    })
}

/// Drains a paginated tool listing. `fetch` returns `Ok(None)` when the
/// server does not implement listing.
pub(crate) async fn collect_tool_pages<F, Fut>(mut fetch: F) -> Result<Vec<Tool>, String>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Option<ListToolsResult>, String>>,
{
    let mut tools = Vec::new();
    let mut cursor = None;
    loop {
        let Some(page) = fetch(cursor).await? else {
            break;
        };
        tools.extend(page.tools);
        if tools.len() >= MCP_MAX_TOOL_LIST {
            tools.truncate(MCP_MAX_TOOL_LIST);
            break;
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn sample_tool(name: String) -> Tool {
        Tool {
            annotations: None,
            description: None,
            execution: None,
            icons: Vec::new(),
            input_schema: rust_mcp_schema::ToolInputSchema::new(Vec::new(), None, None),
            meta: None,
            name,
            output_schema: None,
            title: None,
        }
    }

    fn page(range: std::ops::Range<usize>, next: Option<&str>) -> ListToolsResult {
        ListToolsResult {
            meta: None,
            next_cursor: next.map(str::to_string),
            tools: range.map(|idx| sample_tool(format!("tool-{idx}"))).collect(),
        }
    }

    #[tokio::test]
    async fn pagination_caps_the_tool_list() {
        let calls = StdMutex::new(Vec::new());
        let tools = collect_tool_pages(|cursor: Option<String>| {
            calls.lock().unwrap().push(cursor.clone());
            let result = match cursor.as_deref() {
                None => Ok(Some(page(0..60, Some("c1")))),
                Some("c1") => Ok(Some(page(60..120, Some("c2")))),
                Some(other) => Err(format!("Unexpected cursor: {other}")),
            };
            async move { result }
        })
        .await
        .expect("pagination should succeed");

        assert_eq!(tools.len(), MCP_MAX_TOOL_LIST);
        assert_eq!(tools.last().map(|t| t.name.as_str()), Some("tool-99"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![None, Some("c1".to_string())]
        );
    }

    #[tokio::test]
    async fn pagination_stops_without_cursor() {
        let tools = collect_tool_pages(|cursor: Option<String>| {
            let result = match cursor {
                None => Ok(Some(page(0..3, None))),
                Some(_) => Err("no more pages".to_string()),
            };
            async move { result }
        })
        .await
        .expect("pagination should succeed");
        assert_eq!(tools.len(), 3);
    }

    #[tokio::test]
    async fn missing_list_method_means_no_tools() {
        let tools = collect_tool_pages(|_| async { Ok(None) })
            .await
            .expect("method not found is not an error");
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn page_errors_propagate() {
        let result = collect_tool_pages(|_| async { Err("boom".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn handshake_list_and_call_over_stdio() {
        let script = r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":0,"result":{"capabilities":{"tools":{}},"protocolVersion":"2025-11-25","serverInfo":{"name":"echo","version":"1.0.0"}}}'
read -r line
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"echo","inputSchema":{"type":"object"}}]}}'
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"hi"}]}}'
read -r line
"#;
        let mut config = ProviderConfig::new("echo", "sh");
        config.args = vec!["-c".to_string(), script.to_string()];

        let client = StdioClient::connect(&config).await.expect("spawn");
        let init = client.initialize().await.expect("initialize");
        assert_eq!(init.server_info.name, "echo");

        let tools = client.list_tools().await.expect("list");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = client.call_tool("echo", None).await.expect("call");
        assert_eq!(result.content.len(), 1);
        assert_eq!(client.server_id(), "echo");
    }

    #[cfg(unix)]
    fn scripted(id: &str, script: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new(id, "sh");
        config.args = vec!["-c".to_string(), script.to_string()];
        config
    }

    #[cfg(unix)]
    const INIT_REPLY: &str = r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":0,"result":{"capabilities":{"tools":{}},"protocolVersion":"2025-11-25","serverInfo":{"name":"slow","version":"1.0.0"}}}'
read -r line
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn tool_calls_outlast_the_control_timeout() {
        let script = format!(
            r#"{INIT_REPLY}read -r line
sleep 1
printf '%s\n' '{{"jsonrpc":"2.0","id":1,"result":{{"content":[{{"type":"text","text":"rendered"}}]}}}}'
read -r line
read -r line
"#
        );
        let client = StdioClient::connect_with_timeout(
            &scripted("render", &script),
            Duration::from_millis(200),
        )
        .await
        .expect("spawn");
        client.initialize().await.expect("initialize");

        let result = client.call_tool("render", None).await.expect("call");
        assert_eq!(result.content.len(), 1);

        // The listing after it gets no reply and is cut off.
        let err = client.list_tools().await.expect_err("listing should time out");
        assert_eq!(err, "MCP stdio request timed out.");
        assert_eq!(client.pending_requests().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_call_releases_its_pending_entry() {
        let script = format!("{INIT_REPLY}read -r line\nread -r line\n");
        let client = StdioClient::connect(&scripted("mute", &script))
            .await
            .expect("spawn");
        client.initialize().await.expect("initialize");

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), client.call_tool("wait", None)).await;
        assert!(abandoned.is_err());

        for _ in 0..10 {
            if client.pending_requests().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn missing_command_fails_to_connect() {
        let config = ProviderConfig::new("ghost", "toolchat-no-such-binary");
        let err = StdioClient::connect(&config)
            .await
            .err()
            .expect("spawn should fail");
        assert!(err.starts_with("Failed to start `toolchat-no-such-binary`"));
    }
}
