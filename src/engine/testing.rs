//! In-memory model and provider doubles for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::core::message::Message;
use crate::engine::catalog::ToolSchema;
use crate::engine::error::{ProviderError, StreamError};
use crate::engine::model::{ChatModel, ChunkStream, StreamChunk};
use crate::engine::provider::{ToolDescriptor, ToolProvider, ToolResult};

pub type RecordedCalls = Arc<Mutex<Vec<(String, Value)>>>;

#[derive(Default)]
pub struct FakeProvider {
    id: String,
    tools: Vec<ToolDescriptor>,
    results: HashMap<String, ToolResult>,
    call_failures: HashMap<String, String>,
    listing_fails: bool,
    listing_delay: Option<Duration>,
    call_delay: Option<Duration>,
    calls: RecordedCalls,
}

impl FakeProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_tool(self, name: &str, reply: &str) -> Self {
        self.with_result(name, ToolResult::text(reply))
    }

    pub fn with_result(mut self, name: &str, result: ToolResult) -> Self {
        self.tools.push(ToolDescriptor::new(
            name,
            Some(format!("{name} tool")),
            json!({"type": "object", "properties": {}}),
        ));
        self.results.insert(name.to_string(), result);
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    pub fn failing_call(mut self, name: &str, message: &str) -> Self {
        self.call_failures
            .insert(name.to_string(), message.to_string());
        self
    }

    pub fn with_listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = Some(delay);
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> RecordedCalls {
        self.calls.clone()
    }
}

#[async_trait]
impl ToolProvider for FakeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        if let Some(delay) = self.listing_delay {
            tokio::time::sleep(delay).await;
        }
        if self.listing_fails {
            return Err(ProviderError::Rpc("listing failed".to_string()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ProviderError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((name.to_string(), arguments));
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.call_failures.get(name) {
            return Err(ProviderError::Rpc(message.clone()));
        }
        self.results
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::Rpc(format!("unknown tool {name}")))
    }
}

/// One scripted response from [`ScriptedModel`].
pub enum Round {
    Chunks(Vec<Result<StreamChunk, StreamError>>),
    /// Emits the chunks, then never finishes.
    Hang(Vec<StreamChunk>),
    OpenError(StreamError),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Replays one [`Round`] per `stream` call and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    rounds: Mutex<VecDeque<Round>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Number of streams that have been dropped so far.
    pub fn released_streams(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ChunkStream, StreamError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                model: model.to_string(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
            });

        let round = self
            .rounds
            .lock()
            .expect("rounds lock")
            .pop_front()
            .unwrap_or(Round::Chunks(Vec::new()));

        let stream: ChunkStream = match round {
            Round::OpenError(err) => return Err(err),
            Round::Chunks(items) => stream::iter(items).boxed(),
            Round::Hang(chunks) => stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
        };
        let guard = DropCounter(self.released.clone());
        Ok(stream
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }
}
