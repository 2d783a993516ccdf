//! Streaming client for Ollama's `/api/chat` endpoint.
//!
//! The response body is newline-delimited JSON. Each line is decoded into a
//! [`StreamChunk`]; a line with `"done": true` ends the stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use memchr::memchr;
use tracing::{debug, trace};

use crate::api::{ChatRequest, ChatResponse};
use crate::core::message::Message;
use crate::engine::catalog::ToolSchema;
use crate::engine::error::StreamError;
use crate::engine::model::{ArgumentsFragment, ChatModel, ChunkStream, StreamChunk, ToolCallFragment};
use crate::utils::url::construct_api_url;

#[derive(Clone)]
pub struct OllamaChatModel {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaChatModel {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChunkStream, StreamError> {
        let request = ChatRequest::streaming(model, messages, tools);
        let chat_url = construct_api_url(&self.base_url, "api/chat");
        debug!(url = %chat_url, model, messages = messages.len(), tools = tools.len(), "Sending chat request");

        let response = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|err| StreamError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            debug!(%status, "Chat request rejected");
            return Err(StreamError::Api(format_api_error(&error_text)));
        }

        Ok(ndjson_chunks(response.bytes_stream().boxed()))
    }
}

struct LineReader {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    finished: bool,
}

/// Splits the body on newlines and decodes each line. Stops after the first
/// error or the `done` line; a body that ends without `done` simply ends.
fn ndjson_chunks(body: BoxStream<'static, reqwest::Result<Bytes>>) -> ChunkStream {
    let reader = LineReader {
        body,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if reader.finished {
                return None;
            }

            if let Some(newline_pos) = memchr(b'\n', &reader.buffer) {
                let line: Vec<u8> = reader.buffer.drain(..=newline_pos).collect();
                match decode_line(&line[..newline_pos]) {
                    LineOutcome::Skip => continue,
                    LineOutcome::Chunk(chunk) => return Some((Ok(chunk), reader)),
                    LineOutcome::Last(chunk) => {
                        reader.finished = true;
                        if chunk.is_empty() {
                            return None;
                        }
                        return Some((Ok(chunk), reader));
                    }
                    LineOutcome::Error(err) => {
                        reader.finished = true;
                        return Some((Err(err), reader));
                    }
                }
            }

            match reader.body.next().await {
                Some(Ok(bytes)) => reader.buffer.extend_from_slice(&bytes),
                Some(Err(err)) => {
                    reader.finished = true;
                    return Some((Err(StreamError::Transport(err.to_string())), reader));
                }
                None => {
                    reader.finished = true;
                    // A final line without its newline.
                    let rest = std::mem::take(&mut reader.buffer);
                    return match decode_line(&rest) {
                        LineOutcome::Chunk(chunk) | LineOutcome::Last(chunk) if !chunk.is_empty() => {
                            Some((Ok(chunk), reader))
                        }
                        LineOutcome::Error(err) => Some((Err(err), reader)),
                        _ => None,
                    };
                }
            }
        }
    })
    .boxed()
}

#[derive(Debug)]
enum LineOutcome {
    Skip,
    Chunk(StreamChunk),
    Last(StreamChunk),
    Error(StreamError),
}

fn decode_line(raw: &[u8]) -> LineOutcome {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(err) => return LineOutcome::Error(StreamError::Malformed(format!("invalid UTF-8: {err}"))),
    };
    if line.is_empty() {
        return LineOutcome::Skip;
    }
    trace!(line, "Stream line");

    let response = match serde_json::from_str::<ChatResponse>(line) {
        Ok(response) => response,
        Err(_) => return LineOutcome::Error(StreamError::Api(format_api_error(line))),
    };

    if let Some(error) = response.error {
        return LineOutcome::Error(StreamError::Api(format!("API Error: {error}")));
    }

    let chunk = response.message.map(into_chunk).unwrap_or_default();
    if response.done {
        LineOutcome::Last(chunk)
    } else {
        LineOutcome::Chunk(chunk)
    }
}

/// Maps Ollama's message shape onto engine fragments. Ollama sends complete
/// argument objects, never partial text.
fn into_chunk(message: crate::api::ChatResponseMessage) -> StreamChunk {
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|call| call.function)
        .map(|function| ToolCallFragment {
            index: function.index,
            name: function.name,
            arguments: function.arguments.map(ArgumentsFragment::Complete),
        })
        .collect();

    StreamChunk {
        content: message.content.filter(|text| !text.is_empty()),
        tool_calls,
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// One-line description of an error body: the summary when the body is JSON
/// with a recognizable message, otherwise the body itself.
fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "API Error: <empty response>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
            return format!("API Error: {summary}");
        }
        return format!("API Error: {json_value}");
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("API Error: {collapsed}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(parts: &[&str]) -> BoxStream<'static, reqwest::Result<Bytes>> {
        let owned: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|part| Ok(Bytes::from(part.to_string())))
            .collect();
        stream::iter(owned).boxed()
    }

    async fn collect(parts: &[&str]) -> Vec<Result<StreamChunk, StreamError>> {
        ndjson_chunks(body(parts)).collect().await
    }

    #[tokio::test]
    async fn content_lines_become_chunks_across_split_reads() {
        let items = collect(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n{\"mess",
            "age\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ])
        .await;

        let chunks: Vec<StreamChunk> = items.into_iter().map(|item| item.expect("chunk")).collect();
        assert_eq!(
            chunks,
            vec![StreamChunk::content("Hel"), StreamChunk::content("lo")]
        );
    }

    #[tokio::test]
    async fn done_line_stops_reading() {
        let items = collect(&[
            "{\"message\":{\"content\":\"a\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"ignored\"},\"done\":false}\n",
        ])
        .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().expect("chunk"), &StreamChunk::content("a"));
    }

    #[tokio::test]
    async fn tool_calls_are_complete_fragments() {
        let items = collect(&[
            "{\"message\":{\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"read_file\",\"arguments\":{\"path\":\"x.txt\"}}}]},\"done\":false}\n",
        ])
        .await;
        assert_eq!(
            items[0].as_ref().expect("chunk"),
            &StreamChunk::tool_calls(vec![ToolCallFragment::complete(
                "read_file",
                json!({"path": "x.txt"})
            )])
        );
    }

    #[tokio::test]
    async fn error_line_ends_stream_with_error() {
        let items = collect(&[
            "{\"message\":{\"content\":\"a\"},\"done\":false}\n",
            "{\"error\":\"model runner has unexpectedly stopped\"}\n",
            "{\"message\":{\"content\":\"b\"},\"done\":false}\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1].as_ref().expect_err("error"),
            &StreamError::Api("API Error: model runner has unexpectedly stopped".to_string())
        );
    }

    #[tokio::test]
    async fn unterminated_final_line_is_decoded() {
        let items = collect(&["{\"message\":{\"content\":\"tail\"},\"done\":false}"]).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().expect("chunk"), &StreamChunk::content("tail"));
    }

    #[tokio::test]
    async fn garbage_line_is_malformed_api_output() {
        let items = collect(&["not json at all\n"]).await;
        assert_eq!(
            items,
            vec![Err(StreamError::Api("API Error: not json at all".to_string()))]
        );
    }

    #[test]
    fn format_api_error_uses_summary_when_present() {
        assert_eq!(
            format_api_error(r#"{"error":"model 'nope' not found"}"#),
            "API Error: model 'nope' not found"
        );
        assert_eq!(
            format_api_error(r#"{"error":{"message":"overloaded   right now"}}"#),
            "API Error: overloaded right now"
        );
    }

    #[test]
    fn format_api_error_handles_other_bodies() {
        assert_eq!(format_api_error(r#"{"status":"failed"}"#), r#"API Error: {"status":"failed"}"#);
        assert_eq!(format_api_error("  "), "API Error: <empty response>");
        assert_eq!(
            format_api_error("<html>\n<body>Bad Gateway</body>\n</html>"),
            "API Error: <html> <body>Bad Gateway</body> </html>"
        );
    }

    #[test]
    fn extract_error_summary_prefers_nested_message() {
        let value = json!({"error": {"message": "nested"}, "message": "top"});
        assert_eq!(extract_error_summary(&value).as_deref(), Some("nested"));
        let value = json!({"message": "top"});
        assert_eq!(extract_error_summary(&value).as_deref(), Some("top"));
    }
}
