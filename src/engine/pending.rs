//! Accumulates tool-call fragments from a model stream into finished calls.
//!
//! This is the only place that knows about fragment shapes. Whatever the
//! model endpoint produced, the engine only ever sees [`ToolCall`] values.

use serde_json::{Map, Value};

use crate::core::message::ToolCall;
use crate::engine::model::{ArgumentsFragment, ToolCallFragment};

#[derive(Debug, Default)]
enum PendingArguments {
    #[default]
    Empty,
    Complete(Value),
    Text(String),
}

#[derive(Debug)]
struct PendingEntry {
    index: Option<u32>,
    name: Option<String>,
    arguments: PendingArguments,
}

/// Order-preserving list of calls requested during one streamed response.
///
/// Fragments carrying an index are merged into the entry that first used that
/// index, however the data was split across chunks. Fragments without an
/// index each start a new call. Entries keep the order in which they first
/// appeared.
#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: Vec<PendingEntry>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn absorb(&mut self, fragment: ToolCallFragment) {
        let existing = fragment.index.and_then(|index| {
            self.entries
                .iter_mut()
                .find(|entry| entry.index == Some(index))
        });

        match existing {
            Some(entry) => merge(entry, fragment),
            None => {
                let mut entry = PendingEntry {
                    index: fragment.index,
                    name: None,
                    arguments: PendingArguments::Empty,
                };
                merge(&mut entry, fragment);
                self.entries.push(entry);
            }
        }
    }

    /// Finishes every entry into a [`ToolCall`], in first-seen order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.entries
            .into_iter()
            .map(|entry| ToolCall {
                name: entry.name.unwrap_or_default(),
                arguments: finish_arguments(entry.arguments),
            })
            .collect()
    }
}

fn merge(entry: &mut PendingEntry, fragment: ToolCallFragment) {
    if let Some(name) = fragment.name.filter(|name| !name.is_empty()) {
        entry.name = Some(name);
    }

    match fragment.arguments {
        None => {}
        Some(ArgumentsFragment::Complete(value)) => {
            entry.arguments = PendingArguments::Complete(value);
        }
        Some(ArgumentsFragment::Partial(text)) => match &mut entry.arguments {
            PendingArguments::Text(buffer) => buffer.push_str(&text),
            other => *other = PendingArguments::Text(text),
        },
    }
}

fn finish_arguments(arguments: PendingArguments) -> Value {
    match arguments {
        PendingArguments::Empty => Value::Object(Map::new()),
        PendingArguments::Complete(Value::String(text)) => parse_argument_text(text),
        PendingArguments::Complete(value) => value,
        PendingArguments::Text(text) => parse_argument_text(text),
    }
}

/// Decodes a JSON argument text. Text that is not valid JSON is kept as a
/// string so the provider can report it.
fn parse_argument_text(text: String) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(trimmed).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn indexed(index: u32, name: Option<&str>, arguments: Option<&str>) -> ToolCallFragment {
        ToolCallFragment {
            index: Some(index),
            name: name.map(str::to_string),
            arguments: arguments.map(|text| ArgumentsFragment::Partial(text.to_string())),
        }
    }

    #[test]
    fn complete_fragments_without_index_become_separate_calls() {
        let mut pending = PendingCalls::new();
        pending.absorb(ToolCallFragment::complete("a", json!({"x": 1})));
        pending.absorb(ToolCallFragment::complete("b", json!({})));

        let calls = pending.finish();
        assert_eq!(
            calls,
            vec![
                ToolCall::new("a", json!({"x": 1})),
                ToolCall::new("b", json!({})),
            ]
        );
    }

    #[test]
    fn indexed_fragments_merge_across_chunks() {
        let mut pending = PendingCalls::new();
        pending.absorb(indexed(0, Some("read_file"), Some("{\"pa")));
        pending.absorb(indexed(1, Some("list_dir"), None));
        pending.absorb(indexed(0, None, Some("th\": \"x.txt\"}")));
        pending.absorb(indexed(1, None, Some("{}")));

        let calls = pending.finish();
        assert_eq!(
            calls,
            vec![
                ToolCall::new("read_file", json!({"path": "x.txt"})),
                ToolCall::new("list_dir", json!({})),
            ]
        );
    }

    #[test]
    fn repeated_complete_fragment_for_same_index_is_not_duplicated() {
        let mut pending = PendingCalls::new();
        let fragment = ToolCallFragment {
            index: Some(3),
            name: Some("play".to_string()),
            arguments: Some(ArgumentsFragment::Complete(json!({"track": "a"}))),
        };
        pending.absorb(fragment.clone());
        pending.absorb(fragment);

        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending.finish(),
            vec![ToolCall::new("play", json!({"track": "a"}))]
        );
    }

    #[test]
    fn stringified_arguments_are_decoded() {
        let mut pending = PendingCalls::new();
        pending.absorb(ToolCallFragment::complete(
            "search",
            Value::String("{\"q\": \"rust\"}".to_string()),
        ));
        assert_eq!(
            pending.finish(),
            vec![ToolCall::new("search", json!({"q": "rust"}))]
        );
    }

    #[test]
    fn invalid_argument_text_is_kept_verbatim() {
        let mut pending = PendingCalls::new();
        pending.absorb(indexed(0, Some("broken"), Some("{not json")));
        assert_eq!(
            pending.finish(),
            vec![ToolCall::new("broken", Value::String("{not json".to_string()))]
        );
    }

    #[test]
    fn missing_arguments_default_to_empty_object() {
        let mut pending = PendingCalls::new();
        pending.absorb(indexed(0, Some("ping"), None));
        assert_eq!(pending.finish(), vec![ToolCall::new("ping", json!({}))]);
    }
}
