//! Saved chats and the index of previously saved files.
//!
//! A saved chat is a JSON object `{"model": ..., "history": [...]}`. The index
//! file is a JSON array of `{"fileName", "path"}` entries, one per saved chat,
//! with at most one entry per absolute path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::message::Message;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported history format in {}", .0.display())]
    Format(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub path: String,
}

impl HistoryEntry {
    pub fn label(&self) -> String {
        format!("{} ({})", self.file_name, self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedChat {
    pub model: Option<String>,
    pub history: Vec<Message>,
}

#[derive(Serialize)]
struct ChatFileOut<'a> {
    model: &'a str,
    history: &'a [Message],
}

#[derive(Deserialize)]
struct ChatFileIn {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    history: Value,
}

pub struct ChatStore {
    index_path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl ChatStore {
    /// Opens the index at `index_path`. A missing or unreadable index starts
    /// out empty; it is created on the first save.
    pub fn open(index_path: impl AsRef<Path>) -> Self {
        let index_path = resolve_path(index_path.as_ref());
        let entries = match read_json::<Vec<HistoryEntry>>(&index_path) {
            Ok(entries) => entries,
            Err(HistoryError::NotFound(_)) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "Ignoring unreadable chat index");
                Vec::new()
            }
        };
        Self {
            index_path,
            entries,
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Writes the chat to `name` and records it in the index, replacing any
    /// entry that points at the same file. Returns the absolute path written.
    pub fn save(
        &mut self,
        name: &str,
        model: &str,
        messages: &[Message],
    ) -> Result<PathBuf, HistoryError> {
        let path = resolve_path(Path::new(name.trim()));
        let body = serde_json::to_string(&ChatFileOut {
            model,
            history: messages,
        })
        .map_err(|source| HistoryError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, body.as_bytes())?;

        let path_text = path.display().to_string();
        self.entries.retain(|entry| entry.path != path_text);
        self.entries.push(HistoryEntry {
            file_name: name.trim().to_string(),
            path: path_text,
        });
        self.write_index()?;

        debug!(path = %path.display(), messages = messages.len(), "Saved chat");
        Ok(path)
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<SavedChat, HistoryError> {
        load_chat(path.as_ref())
    }

    fn write_index(&self) -> Result<(), HistoryError> {
        let body =
            serde_json::to_string(&self.entries).map_err(|source| HistoryError::Json {
                path: self.index_path.clone(),
                source,
            })?;
        write_atomic(&self.index_path, body.as_bytes())
    }
}

/// Reads a saved chat. A plain-string `history` from older files becomes a
/// single user message.
pub fn load_chat(path: &Path) -> Result<SavedChat, HistoryError> {
    let path = resolve_path(path);
    let file: ChatFileIn = read_json(&path)?;
    let history = match file.history {
        Value::Null => Vec::new(),
        Value::String(text) => vec![Message::user(text)],
        Value::Array(_) => {
            serde_json::from_value(file.history).map_err(|source| HistoryError::Json {
                path: path.clone(),
                source,
            })?
        }
        _ => return Err(HistoryError::Format(path)),
    };
    Ok(SavedChat {
        model: file.model,
        history,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, HistoryError> {
    if !path.is_file() {
        return Err(HistoryError::NotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(|source| HistoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| HistoryError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), HistoryError> {
    let write_err = |source: std::io::Error| HistoryError::Write {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).map_err(write_err)?;
    }

    let mut temp_file = match parent {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(write_err)?;
    temp_file.write_all(contents).map_err(write_err)?;
    temp_file.as_file_mut().sync_all().map_err(write_err)?;
    temp_file
        .persist(path)
        .map_err(|err| write_err(err.error))?;
    Ok(())
}

/// Expands a leading `~` and makes the path absolute.
pub fn resolve_path(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };
    std::path::absolute(&expanded).unwrap_or(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::ToolCall;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> Vec<Message> {
        vec![
            Message::user("read x"),
            Message::assistant("", vec![ToolCall::new("read_file", json!({"path": "x"}))]),
            Message::tool("read_file", "hello"),
            Message::assistant("It says hello", Vec::new()),
        ]
    }

    #[test]
    fn save_then_load_restores_model_and_messages() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = ChatStore::open(dir.path().join(".historyList.json"));
        let target = dir.path().join("chat.json");

        let written = store
            .save(target.to_str().expect("utf8"), "llama3", &sample())
            .expect("save");
        assert_eq!(written, target);

        let loaded = store.load(&target).expect("load");
        assert_eq!(loaded.model.as_deref(), Some("llama3"));
        assert_eq!(loaded.history, sample());

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(&target).expect("read")).expect("json");
        assert_eq!(raw["model"], json!("llama3"));
        assert_eq!(raw["history"][2], json!({"role": "tool", "content": "hello", "name": "read_file"}));
    }

    #[test]
    fn index_has_one_entry_per_path() {
        let dir = TempDir::new().expect("tempdir");
        let index = dir.path().join(".historyList.json");
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");

        let mut store = ChatStore::open(&index);
        store.save(a.to_str().expect("utf8"), "m", &[]).expect("save a");
        store.save(b.to_str().expect("utf8"), "m", &[]).expect("save b");
        store.save(a.to_str().expect("utf8"), "m", &sample()).expect("resave a");

        let reopened = ChatStore::open(&index);
        let paths: Vec<&str> = reopened.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![b.display().to_string(), a.display().to_string()]
        );

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(&index).expect("read")).expect("json");
        assert!(raw[0].get("fileName").is_some());
    }

    #[test]
    fn legacy_string_history_becomes_user_message() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("old.json");
        fs::write(&path, r#"{"model": "mistral", "history": "we talked about rust"}"#)
            .expect("write");

        let loaded = load_chat(&path).expect("load");
        assert_eq!(loaded.model.as_deref(), Some("mistral"));
        assert_eq!(loaded.history, vec![Message::user("we talked about rust")]);
    }

    #[test]
    fn missing_or_corrupt_index_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        assert!(ChatStore::open(dir.path().join("none.json")).entries().is_empty());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{not json").expect("write");
        assert!(ChatStore::open(&corrupt).entries().is_empty());
    }

    #[test]
    fn load_errors_name_the_file() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("missing.json");
        let err = load_chat(&missing).expect_err("should fail");
        assert!(matches!(err, HistoryError::NotFound(_)));
        assert!(err.to_string().contains("missing.json"));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"model": "m", "history": 42}"#).expect("write");
        assert!(matches!(load_chat(&bad), Err(HistoryError::Format(_))));
    }
}
