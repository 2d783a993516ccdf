use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Id of the built-in file-system provider.
pub const BUILTIN_FS_PROVIDER_ID: &str = "fs";

/// A tool provider launched as a child process and spoken to over stdio.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub id: String,
    pub display_name: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Disabled providers start only when named with `--enable`.
    pub enabled: Option<bool>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            enabled: None,
        }
    }

    /// The `fs-server` subcommand of `command`, rooted at `root`. Off unless
    /// enabled by id.
    pub fn builtin_fs(command: impl Into<String>, root: &Path) -> Self {
        Self {
            display_name: Some("File system".to_string()),
            args: vec!["fs-server".to_string(), root.display().to_string()],
            enabled: Some(false),
            ..Self::new(BUILTIN_FS_PROVIDER_ID, command)
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the Ollama server
    pub ollama_url: Option<String>,
    /// Model used when neither `--model` nor a loaded chat names one
    pub default_model: Option<String>,
    /// Marker that submits the multi-line input buffer
    pub eof_string: Option<String>,
    /// Input line that toggles speech recording
    pub voice_trigger: Option<String>,
    /// Per tool call, in seconds
    pub tool_timeout_secs: Option<u64>,
    /// Upper bound on model rounds per turn
    pub max_tool_rounds: Option<usize>,
    /// Chat history index file
    pub history_index: Option<PathBuf>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    pub fn get_provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// Appends `provider` unless an entry with its id exists already, so a
    /// configured provider always wins over a built-in one.
    pub fn add_builtin_provider(&mut self, provider: ProviderConfig) -> bool {
        if self.get_provider(&provider.id).is_some() {
            return false;
        }
        self.providers.push(provider);
        true
    }

    /// Providers to start: every enabled entry plus those named in `forced`,
    /// in config order.
    pub fn active_providers(&self, forced: &[String]) -> Vec<&ProviderConfig> {
        self.providers
            .iter()
            .filter(|p| {
                p.is_enabled() || forced.iter().any(|id| p.id.eq_ignore_ascii_case(id))
            })
            .collect()
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
