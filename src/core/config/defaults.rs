use std::path::PathBuf;
use std::time::Duration;

use crate::core::config::data::Config;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_EOF_STRING: &str = "EOF";
pub const DEFAULT_VOICE_TRIGGER: &str = "<<";
pub const DEFAULT_HISTORY_INDEX: &str = ".historyList.json";

impl Config {
    pub fn ollama_url(&self) -> &str {
        self.ollama_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_OLLAMA_URL)
    }

    pub fn eof_string(&self) -> &str {
        self.eof_string
            .as_deref()
            .filter(|marker| !marker.is_empty())
            .unwrap_or(DEFAULT_EOF_STRING)
    }

    pub fn voice_trigger(&self) -> &str {
        self.voice_trigger
            .as_deref()
            .filter(|trigger| !trigger.is_empty())
            .unwrap_or(DEFAULT_VOICE_TRIGGER)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn max_tool_rounds(&self) -> Option<usize> {
        self.max_tool_rounds.filter(|rounds| *rounds > 0)
    }

    pub fn history_index(&self) -> PathBuf {
        self.history_index
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_INDEX))
    }

    pub fn set_eof_string(&mut self, marker: &str) {
        let marker = marker.trim();
        self.eof_string = (!marker.is_empty()).then(|| marker.to_string());
    }
}
