//! Tool-augmented conversation turns.
//!
//! A [`Turn`] streams one model response, collects the tool calls it asks
//! for, runs them against the [`ToolCatalog`] snapshot and streams again with
//! the results appended, until a response requests no tools.
//!
//! ```text
//! Streaming ──(stream ends)──▶ AwaitingTools ──(no calls)──▶ Done
//!     ▲                             │
//!     │                        (calls pending)
//!     │                             ▼
//!     └────(batch processed)── ExecutingTools
//!
//! Streaming ──(stream error)──▶ Failed
//! any non-terminal state ──(cancel token)──▶ Cancelled
//! ```
//!
//! The conversation only ever receives complete messages: the assistant
//! message of a round is appended once its stream has finished, and each
//! tool message once its call has returned.

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod pending;
pub mod provider;
#[cfg(test)]
pub mod testing;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::conversation::Conversation;
use crate::core::message::{Message, ToolCall};
use crate::engine::catalog::ToolCatalog;
use crate::engine::dispatch::dispatch_call;
use crate::engine::error::StreamError;
use crate::engine::model::{ChatModel, ChunkStream};
use crate::engine::pending::PendingCalls;

pub use catalog::build_catalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Streaming,
    AwaitingTools,
    ExecutingTools,
    Done,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnState::Done | TurnState::Failed | TurnState::Cancelled
        )
    }
}

/// A piece of live output. Only `Content` is model text; the other kinds are
/// produced by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Content(String),
    Progress(String),
    Diagnostic(String),
}

impl Fragment {
    pub fn as_text(&self) -> &str {
        match self {
            Fragment::Content(text) | Fragment::Progress(text) | Fragment::Diagnostic(text) => {
                text
            }
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Fragment::Content(_))
    }
}

/// Caller policy for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnOptions {
    /// Per tool call. A timed-out call is reported like any other tool failure.
    pub tool_timeout: Option<Duration>,
    /// Upper bound on model streams per turn. `None` leaves the loop
    /// unbounded; termination is then up to the model or the cancel token.
    pub max_rounds: Option<usize>,
}

pub struct TurnEngine {
    model: Arc<dyn ChatModel>,
    options: TurnOptions,
}

impl TurnEngine {
    pub fn new(model: Arc<dyn ChatModel>, options: TurnOptions) -> Self {
        Self { model, options }
    }

    pub fn options(&self) -> TurnOptions {
        self.options
    }

    /// Starts a turn over `conversation`, which must already end with the
    /// user's message.
    pub fn run_turn<'a>(
        &'a self,
        model: &'a str,
        conversation: &'a mut Conversation,
        catalog: &'a ToolCatalog,
        cancel: CancellationToken,
    ) -> Turn<'a> {
        Turn {
            engine: self,
            model,
            conversation,
            catalog,
            cancel,
            state: TurnState::Streaming,
            stream: None,
            content: String::new(),
            pending: PendingCalls::new(),
            queue: VecDeque::new(),
            announced: false,
            rounds: 0,
        }
    }
}

/// One running turn. Pull fragments with [`Turn::next_fragment`] or adapt it
/// with [`Turn::into_stream`]. Once it returns `None` it stays finished.
pub struct Turn<'a> {
    engine: &'a TurnEngine,
    model: &'a str,
    conversation: &'a mut Conversation,
    catalog: &'a ToolCatalog,
    cancel: CancellationToken,
    state: TurnState,
    stream: Option<ChunkStream>,
    content: String,
    pending: PendingCalls,
    queue: VecDeque<ToolCall>,
    /// The call at the front of `queue` has had its progress line emitted.
    announced: bool,
    rounds: usize,
}

enum Wait<T> {
    Ready(T),
    Cancelled,
}

impl<'a> Turn<'a> {
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Number of model streams opened so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn conversation(&self) -> &Conversation {
        self.conversation
    }

    pub fn into_stream(self) -> impl Stream<Item = Fragment> + 'a {
        stream::unfold(self, |mut turn| async move {
            let fragment = turn.next_fragment().await?;
            Some((fragment, turn))
        })
    }

    /// Advances the state machine to the next fragment of output.
    pub async fn next_fragment(&mut self) -> Option<Fragment> {
        loop {
            if self.cancel.is_cancelled() && !self.state.is_terminal() {
                self.cancel_turn();
            }

            match self.state {
                TurnState::Done | TurnState::Failed | TurnState::Cancelled => return None,
                TurnState::Streaming => {
                    if let Some(fragment) = self.advance_stream().await {
                        return Some(fragment);
                    }
                }
                TurnState::AwaitingTools => self.commit_assistant_message(),
                TurnState::ExecutingTools => {
                    if let Some(fragment) = self.advance_tools().await {
                        return Some(fragment);
                    }
                }
            }
        }
    }

    async fn advance_stream(&mut self) -> Option<Fragment> {
        if self.stream.is_none() {
            if let Some(limit) = self.engine.options.max_rounds {
                if self.rounds >= limit {
                    warn!(rounds = self.rounds, "Tool round limit reached; stopping turn");
                    self.state = TurnState::Failed;
                    return Some(Fragment::Diagnostic(format!(
                        "\n[Stopped: tool round limit ({limit}) reached]"
                    )));
                }
            }

            self.rounds += 1;
            debug!(model = %self.model, round = self.rounds, tools = self.catalog.len(), "Opening model stream");
            let schemas = self.catalog.schemas();
            let opening = self
                .engine
                .model
                .stream(self.model, self.conversation.messages(), &schemas);
            let cancel = self.cancel.clone();
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wait::Cancelled,
                result = opening => Wait::Ready(result),
            };
            match opened {
                Wait::Cancelled => {
                    self.cancel_turn();
                    return None;
                }
                Wait::Ready(Ok(stream)) => self.stream = Some(stream),
                Wait::Ready(Err(err)) => return Some(self.fail(err)),
            }
        }

        let next = {
            let Some(stream) = self.stream.as_mut() else {
                return None;
            };
            let cancel = self.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Wait::Cancelled,
                item = stream.next() => Wait::Ready(item),
            }
        };

        match next {
            Wait::Cancelled => {
                self.cancel_turn();
                None
            }
            Wait::Ready(Some(Ok(chunk))) => {
                for fragment in chunk.tool_calls {
                    self.pending.absorb(fragment);
                }
                match chunk.content {
                    Some(text) if !text.is_empty() => {
                        self.content.push_str(&text);
                        Some(Fragment::Content(text))
                    }
                    _ => None,
                }
            }
            Wait::Ready(Some(Err(err))) => Some(self.fail(err)),
            Wait::Ready(None) => {
                self.stream = None;
                self.state = TurnState::AwaitingTools;
                None
            }
        }
    }

    fn commit_assistant_message(&mut self) {
        let calls = std::mem::take(&mut self.pending).finish();
        let content = std::mem::take(&mut self.content);
        debug!(round = self.rounds, tool_calls = calls.len(), "Model response complete");
        self.conversation
            .push(Message::assistant(content, calls.clone()));

        if calls.is_empty() {
            self.state = TurnState::Done;
        } else {
            self.queue = calls.into();
            self.announced = false;
            self.state = TurnState::ExecutingTools;
        }
    }

    async fn advance_tools(&mut self) -> Option<Fragment> {
        let Some(call) = self.queue.front().cloned() else {
            self.state = TurnState::Streaming;
            return None;
        };

        if !self.announced && self.catalog.contains(&call.name) {
            self.announced = true;
            return Some(Fragment::Progress(format!(
                "\n[Executing tool: {}...]",
                call.name
            )));
        }

        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wait::Cancelled,
            result = dispatch_call(self.catalog, &call, self.engine.options.tool_timeout) => Wait::Ready(result),
        };
        let Wait::Ready(outcome) = outcome else {
            self.cancel_turn();
            return None;
        };

        self.queue.pop_front();
        self.announced = false;
        match outcome {
            Ok(text) => {
                self.conversation.push(Message::tool(&call.name, text));
                None
            }
            Err(failure) => {
                warn!(tool = %call.name, error = %failure, "Tool call failed");
                self.conversation
                    .push(Message::tool(failure.tool_name(), failure.to_string()));
                Some(Fragment::Diagnostic(failure.diagnostic()))
            }
        }
    }

    fn fail(&mut self, err: StreamError) -> Fragment {
        warn!(model = %self.model, error = %err, "Model stream failed");
        self.stream = None;
        self.content.clear();
        self.pending = PendingCalls::new();
        self.state = TurnState::Failed;
        Fragment::Diagnostic(format!("\n[Model Error: {err}]"))
    }

    fn cancel_turn(&mut self) {
        debug!(state = ?self.state, "Turn cancelled");
        self.stream = None;
        self.content.clear();
        self.pending = PendingCalls::new();
        self.queue.clear();
        self.state = TurnState::Cancelled;
    }
}
