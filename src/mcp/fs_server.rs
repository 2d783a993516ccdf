//! Built-in file-system tool server.
//!
//! `toolchat fs-server DIR` speaks MCP over stdin/stdout and offers
//! `read_file`, `write_file`, `list_directory` and `create_directory`, all
//! confined to `DIR`.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, Implementation, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerCapabilitiesTools, TextContent, Tool, ToolInputSchema,
    LATEST_PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::mcp::protocol::MCP_METHOD_NOT_FOUND;

const JSONRPC_PARSE_ERROR: i64 = -32700;
const JSONRPC_INVALID_PARAMS: i64 = -32602;
const JSONRPC_INTERNAL_ERROR: i64 = -32603;

#[derive(Error, Debug)]
pub enum FsToolError {
    #[error("Path escapes the served directory: {0}")]
    Escape(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("Error {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

/// The four file tools, rooted at one directory.
pub struct FsTools {
    root: PathBuf,
}

impl FsTools {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a tool path onto the served directory. Relative paths start at
    /// the root; absolute ones must already lie under it. Symlinks leading
    /// out of the root are rejected too.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsToolError> {
        let escape = || FsToolError::Escape(path.to_string());
        let requested = Path::new(path);
        let relative = if requested.is_absolute() {
            requested.strip_prefix(&self.root).map_err(|_| escape())?
        } else {
            requested
        };

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if resolved == self.root {
                        return Err(escape());
                    }
                    resolved.pop();
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        let existing = resolved
            .ancestors()
            .find(|ancestor| ancestor.exists())
            .unwrap_or(self.root.as_path());
        let canonical = std::fs::canonicalize(existing).map_err(|_| escape())?;
        if !canonical.starts_with(&self.root) {
            return Err(escape());
        }
        Ok(resolved)
    }

    pub async fn read_file(&self, path: &str) -> Result<String, FsToolError> {
        let target = self.resolve(path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|source| io_error("reading file", path, source))
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<String, FsToolError> {
        let target = self.resolve(path)?;
        tokio::fs::write(&target, content)
            .await
            .map_err(|source| io_error("writing file", path, source))?;
        Ok(format!("Successfully wrote to {path}"))
    }

    /// Entry names, sorted, one per line. Directories end with `/`.
    pub async fn list_directory(&self, path: &str) -> Result<String, FsToolError> {
        let target = self.resolve(path)?;
        let listing_err = |source| io_error("listing directory", path, source);
        let mut entries = tokio::fs::read_dir(&target).await.map_err(listing_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(listing_err)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|kind| kind.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }

    pub async fn create_directory(&self, path: &str) -> Result<String, FsToolError> {
        let target = self.resolve(path)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|source| io_error("creating directory", path, source))?;
        Ok(format!("Successfully created directory {path}"))
    }

    pub fn tools(&self) -> Vec<Tool> {
        vec![
            tool(
                "read_file",
                "Read the content of a file.",
                &[("path", "File to read, relative to the served directory")],
                &["path"],
            ),
            tool(
                "write_file",
                "Write content to a file.",
                &[
                    ("path", "File to write, relative to the served directory"),
                    ("content", "Text to write"),
                ],
                &["path", "content"],
            ),
            tool(
                "list_directory",
                "List files and directories in the given path.",
                &[("path", "Directory to list (default: .)")],
                &[],
            ),
            tool(
                "create_directory",
                "Create a new directory, including missing parents.",
                &[("path", "Directory to create")],
                &["path"],
            ),
        ]
    }

    /// Runs one tool. `None` means the tool does not exist; tool failures come
    /// back as error results so the model can read them.
    pub async fn call(&self, name: &str, arguments: &Map<String, Value>) -> Option<CallToolResult> {
        let outcome = match name {
            "read_file" => match required(arguments, "path") {
                Ok(path) => self.read_file(path).await,
                Err(err) => Err(err),
            },
            "write_file" => match (required(arguments, "path"), required(arguments, "content")) {
                (Ok(path), Ok(content)) => self.write_file(path, content).await,
                (Err(err), _) | (_, Err(err)) => Err(err),
            },
            "list_directory" => {
                let path = arguments.get("path").and_then(Value::as_str).unwrap_or(".");
                self.list_directory(path).await
            }
            "create_directory" => match required(arguments, "path") {
                Ok(path) => self.create_directory(path).await,
                Err(err) => Err(err),
            },
            _ => return None,
        };

        Some(match outcome {
            Ok(text) => CallToolResult::text_content(vec![TextContent::new(text, None, None)]),
            Err(err) => {
                debug!(tool = %name, error = %err, "File tool failed");
                let mut result =
                    CallToolResult::text_content(vec![TextContent::new(err.to_string(), None, None)]);
                result.is_error = Some(true);
                result
            }
        })
    }

    /// Answers one JSON-RPC message. Notifications get no reply.
    pub async fn handle(&self, message: Value) -> Option<Value> {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let Some(id) = message.get("id").cloned() else {
            debug!(method, "File server notification");
            return None;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let result = match method {
            "initialize" => to_result(&initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => to_result(&ListToolsResult {
                meta: None,
                next_cursor: None,
                tools: self.tools(),
            }),
            "tools/call" => match serde_json::from_value::<CallToolRequestParams>(params) {
                Ok(params) => {
                    let arguments = params.arguments.unwrap_or_default();
                    match self.call(&params.name, &arguments).await {
                        Some(result) => to_result(&result),
                        None => Err((
                            JSONRPC_INVALID_PARAMS,
                            format!("Unknown tool: {}", params.name),
                        )),
                    }
                }
                Err(err) => Err((JSONRPC_INVALID_PARAMS, format!("Invalid params: {err}"))),
            },
            other => Err((MCP_METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };

        Some(match result {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => error_reply(id, code, &message),
        })
    }
}

/// Serves newline-delimited JSON-RPC until `input` ends.
pub async fn serve<R, W>(tools: &FsTools, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    debug!(root = %tools.root().display(), "File server started");
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(message) => tools.handle(message).await,
            Err(err) => Some(error_reply(
                Value::Null,
                JSONRPC_PARSE_ERROR,
                &format!("Parse error: {err}"),
            )),
        };
        if let Some(reply) = reply {
            let mut payload = reply.to_string();
            payload.push('\n');
            output.write_all(payload.as_bytes()).await?;
            output.flush().await?;
        }
    }
    Ok(())
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        instructions: None,
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        server_info: Implementation {
            name: "toolchat-fs".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("File system".to_string()),
            description: None,
            icons: Vec::new(),
            website_url: None,
        },
    }
}

fn tool(name: &str, description: &str, properties: &[(&str, &str)], required: &[&str]) -> Tool {
    let properties: HashMap<String, Map<String, Value>> = properties
        .iter()
        .map(|(property, description)| {
            let mut schema = Map::new();
            schema.insert("type".to_string(), json!("string"));
            schema.insert("description".to_string(), json!(description));
            (property.to_string(), schema)
        })
        .collect();
    Tool {
        annotations: None,
        description: Some(description.to_string()),
        execution: None,
        icons: Vec::new(),
        input_schema: ToolInputSchema::new(
            required.iter().map(|name| name.to_string()).collect(),
            Some(properties),
            None,
        ),
        meta: None,
        name: name.to_string(),
        output_schema: None,
        title: None,
    }
}

fn required<'a>(arguments: &'a Map<String, Value>, name: &'static str) -> Result<&'a str, FsToolError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or(FsToolError::MissingArgument(name))
}

fn io_error(action: &'static str, path: &str, source: io::Error) -> FsToolError {
    FsToolError::Io {
        action,
        path: path.to_string(),
        source,
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, (i64, String)> {
    serde_json::to_value(value).map_err(|err| (JSONRPC_INTERNAL_ERROR, err.to_string()))
}

fn error_reply(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
}
