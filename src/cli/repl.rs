//! The interactive chat loop.
//!
//! Input lines collect in a buffer until the configured EOF marker shows up;
//! the text before the marker becomes the next user message. Lines that parse
//! as commands are handled immediately and never reach the buffer.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::commands::{help_text, parse_input, LoadTarget, ReplCommand};
use crate::core::config::data::path_display;
use crate::core::config::Config;
use crate::core::conversation::Conversation;
use crate::core::extract::ResponseExtractor;
use crate::core::history::ChatStore;
use crate::core::message::ToolCall;
use crate::engine::dispatch::dispatch_call;
use crate::engine::provider::ToolProvider;
use crate::engine::{build_catalog, Fragment, TurnEngine, TurnState};
use crate::utils::clipboard::copy_to_clipboard;

const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub struct Session<W: Write> {
    config: Config,
    config_path: PathBuf,
    model: String,
    engine: TurnEngine,
    providers: Vec<Arc<dyn ToolProvider>>,
    conversation: Conversation,
    store: ChatStore,
    out: W,
    styled: bool,
    interrupt_on_ctrl_c: bool,
    buffer: String,
    extractor: Option<ResponseExtractor>,
    last_save: Option<String>,
    auto_save: bool,
    recording: bool,
}

impl<W: Write> Session<W> {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        model: String,
        engine: TurnEngine,
        providers: Vec<Arc<dyn ToolProvider>>,
        out: W,
    ) -> Self {
        let store = ChatStore::open(config.history_index());
        Self {
            config,
            config_path,
            model,
            engine,
            providers,
            conversation: Conversation::new(),
            store,
            out,
            styled: false,
            interrupt_on_ctrl_c: false,
            buffer: String::new(),
            extractor: None,
            last_save: None,
            auto_save: false,
            recording: false,
        }
    }

    /// Resumes a saved chat; `saved_as` becomes the auto-save target.
    pub fn with_conversation(mut self, conversation: Conversation, saved_as: Option<String>) -> Self {
        self.conversation = conversation;
        self.last_save = saved_as;
        self
    }

    /// Colours progress and diagnostic lines.
    pub fn styled(mut self, styled: bool) -> Self {
        self.styled = styled;
        self
    }

    /// Ctrl-C cancels a running turn, and quits at the prompt.
    pub fn interrupt_on_ctrl_c(mut self, enabled: bool) -> Self {
        self.interrupt_on_ctrl_c = enabled;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            if self.buffer.is_empty() {
                write!(self.out, ">> ")?;
                self.out.flush()?;
            }
            let line = if self.interrupt_on_ctrl_c {
                tokio::select! {
                    line = lines.next_line() => line?,
                    _ = tokio::signal::ctrl_c() => None,
                }
            } else {
                lines.next_line().await?
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                break;
            };
            if !self.handle_line(&line, &mut lines).await? {
                break;
            }
        }
        Ok(())
    }

    /// Returns `false` when the session should end.
    async fn handle_line<R: AsyncBufRead + Unpin>(
        &mut self,
        line: &str,
        lines: &mut Lines<R>,
    ) -> io::Result<bool> {
        match parse_input(line, self.config.voice_trigger()) {
            ReplCommand::Exit => return Ok(false),
            ReplCommand::Help => {
                let help = help_text(self.config.eof_string(), self.config.voice_trigger());
                write!(self.out, "{help}")?;
            }
            ReplCommand::Save(name) => {
                let name = match name {
                    Some(name) => Some(name),
                    None => self.ask("Name of the chat to save: ", lines).await?,
                };
                match name {
                    Some(name) => self.save(&name)?,
                    None => self.notice("Save cancelled.")?,
                }
            }
            ReplCommand::Load(None) => self.list_saved()?,
            ReplCommand::Load(Some(target)) => self.load(target)?,
            ReplCommand::ToggleAutoSave => self.toggle_auto_save()?,
            ReplCommand::Settings => self.show_settings()?,
            ReplCommand::SetEof(marker) => {
                let marker = match marker {
                    Some(marker) => Some(marker),
                    None => {
                        let prompt = format!(
                            "Current EOF marker: {}\nNew EOF marker: ",
                            self.config.eof_string()
                        );
                        self.ask(&prompt, lines).await?
                    }
                };
                if let Some(marker) = marker {
                    self.set_eof(&marker)?;
                }
            }
            ReplCommand::Tools => self.show_tools().await?,
            ReplCommand::Shell(command) => self.run_shell(&command).await?,
            ReplCommand::CodeBlocks(index) => self.show_code_blocks(index)?,
            ReplCommand::Tables(index) => self.show_tables(index)?,
            ReplCommand::ToggleRecording => self.toggle_recording().await?,
            ReplCommand::Invalid(message) => self.notice(&message)?,
            ReplCommand::Text(text) => self.push_input(&text).await?,
        }
        Ok(true)
    }

    async fn ask<R: AsyncBufRead + Unpin>(
        &mut self,
        prompt: &str,
        lines: &mut Lines<R>,
    ) -> io::Result<Option<String>> {
        write!(self.out, "{prompt}")?;
        self.out.flush()?;
        let answer = lines.next_line().await?;
        Ok(answer
            .map(|answer| answer.trim().to_string())
            .filter(|answer| !answer.is_empty()))
    }

    fn notice(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{message}")
    }

    async fn push_input(&mut self, text: &str) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(text);
        match take_submission(&mut self.buffer, self.config.eof_string()) {
            Some(content) if !content.trim().is_empty() => self.submit(content).await,
            _ => Ok(()),
        }
    }

    /// Runs one turn for `content` and renders it as it streams.
    pub async fn submit(&mut self, content: String) -> io::Result<()> {
        self.conversation.push_user(content);
        let catalog = build_catalog(&self.providers, self.engine.options().tool_timeout).await;
        let cancel = CancellationToken::new();
        let interrupt = self
            .interrupt_on_ctrl_c
            .then(|| spawn_interrupt(cancel.clone()));

        let mut answer = String::new();
        let outcome = {
            let mut turn =
                self.engine
                    .run_turn(&self.model, &mut self.conversation, &catalog, cancel);
            let mut written = Ok(());
            while let Some(fragment) = turn.next_fragment().await {
                if let Fragment::Content(text) = &fragment {
                    answer.push_str(text);
                }
                written = write_fragment(&mut self.out, &fragment, self.styled);
                if written.is_err() {
                    break;
                }
            }
            written.map(|_| turn.state())
        };
        if let Some(handle) = interrupt {
            handle.abort();
        }

        let state = outcome?;
        debug!(state = ?state, messages = self.conversation.len(), "Turn finished");
        if state == TurnState::Cancelled {
            write!(self.out, "\n[Interrupted]")?;
        }
        writeln!(self.out)?;
        writeln!(self.out)?;
        self.extractor = Some(ResponseExtractor::new(answer));

        if self.auto_save {
            if let Some(name) = self.last_save.clone() {
                match self
                    .store
                    .save(&name, &self.model, self.conversation.messages())
                {
                    Ok(_) => self.notice(&format!("Auto-saved to {name}"))?,
                    Err(err) => self.notice(&format!("Auto-save failed: {err}"))?,
                }
            }
        }
        Ok(())
    }

    fn save(&mut self, name: &str) -> io::Result<()> {
        match self
            .store
            .save(name, &self.model, self.conversation.messages())
        {
            Ok(path) => {
                self.last_save = Some(name.to_string());
                self.notice(&format!("Saved chat to {}", path_display(&path)))
            }
            Err(err) => self.notice(&format!("Save failed: {err}")),
        }
    }

    fn list_saved(&mut self) -> io::Result<()> {
        if self.store.entries().is_empty() {
            let index = path_display(self.store.index_path());
            return self.notice(&format!("No saved chats found in {index}."));
        }
        writeln!(self.out, "Saved chats:")?;
        for (i, entry) in self.store.entries().iter().enumerate() {
            writeln!(self.out, "  {}. {}", i + 1, entry.label())?;
        }
        self.notice("Use /load N to load one.")
    }

    fn load(&mut self, target: LoadTarget) -> io::Result<()> {
        let (label, path) = match target {
            LoadTarget::Entry(number) => {
                let entry = number
                    .checked_sub(1)
                    .and_then(|index| self.store.entries().get(index));
                match entry {
                    Some(entry) => (entry.file_name.clone(), entry.path.clone()),
                    None => return self.notice(&format!("No saved chat number {number}.")),
                }
            }
            LoadTarget::Path(path) => (path.clone(), path),
        };

        match self.store.load(&path) {
            Ok(saved) => {
                let count = saved.history.len();
                self.conversation.replace(saved.history);
                if let Some(model) = saved.model {
                    self.model = model;
                }
                self.extractor = None;
                self.last_save = Some(path);
                self.notice(&format!("Loaded chat: {label} ({count} messages)"))?;
                let model = self.model.clone();
                self.notice(&format!("Active model: {model}"))
            }
            Err(err) => self.notice(&format!("Error during load: {err}")),
        }
    }

    fn toggle_auto_save(&mut self) -> io::Result<()> {
        let Some(name) = self.last_save.clone() else {
            return self.notice("You must use /save at least once before enabling auto-save.");
        };
        self.auto_save = !self.auto_save;
        let status = if self.auto_save { "enabled" } else { "disabled" };
        self.notice(&format!("Auto-save to {name} is now {status}."))
    }

    fn show_settings(&mut self) -> io::Result<()> {
        writeln!(self.out, "Config path: {}", path_display(&self.config_path))?;
        if !self.config_path.exists() {
            return self.notice("Config file does not exist yet (using defaults).");
        }
        match std::fs::read_to_string(&self.config_path) {
            Ok(content) => writeln!(self.out, "\n{content}"),
            Err(err) => self.notice(&format!("Error reading config file: {err}")),
        }
    }

    fn set_eof(&mut self, marker: &str) -> io::Result<()> {
        self.config.set_eof_string(marker);
        let marker = self.config.eof_string().to_string();
        match self.config.save_to_path(&self.config_path) {
            Ok(()) => self.notice(&format!("EOF marker updated to '{marker}' and saved.")),
            Err(err) => self.notice(&format!("EOF marker updated to '{marker}' (not saved: {err})")),
        }
    }

    async fn show_tools(&mut self) -> io::Result<()> {
        let catalog = build_catalog(&self.providers, self.engine.options().tool_timeout).await;
        if catalog.is_empty() {
            return self.notice("No tools available.");
        }
        writeln!(self.out, "Available tools:")?;
        for entry in catalog.entries() {
            let descriptor = &entry.descriptor;
            match descriptor.description.as_deref() {
                Some(description) => writeln!(
                    self.out,
                    "  {} ({}) - {}",
                    descriptor.name,
                    entry.provider.id(),
                    description
                )?,
                None => writeln!(self.out, "  {} ({})", descriptor.name, entry.provider.id())?,
            }
        }
        for collision in catalog.collisions() {
            writeln!(
                self.out,
                "  note: {} from {} is shadowed by {}",
                collision.tool, collision.shadowed, collision.winner
            )?;
        }
        Ok(())
    }

    async fn run_shell(&mut self, command: &str) -> io::Result<()> {
        if command.is_empty() {
            return self.notice("Usage: !<command>");
        }
        match shell_command(command).output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.trim().is_empty() {
                    writeln!(self.out, "{}", stdout.trim())?;
                }
                if !stderr.trim().is_empty() {
                    writeln!(self.out, "{}", stderr.trim())?;
                }
                if !output.status.success() {
                    match output.status.code() {
                        Some(code) => self.notice(&format!("Command exited with code {code}"))?,
                        None => self.notice("Command terminated by a signal")?,
                    }
                }
                Ok(())
            }
            Err(err) => self.notice(&format!("Error executing command: {err}")),
        }
    }

    fn show_code_blocks(&mut self, index: Option<usize>) -> io::Result<()> {
        let Some(extractor) = &self.extractor else {
            return writeln!(self.out, "No response generated yet to extract from.");
        };
        match index {
            None => {
                if extractor.code_blocks().is_empty() {
                    return writeln!(self.out, "No code blocks found.");
                }
                for (i, block) in extractor.code_blocks().iter().enumerate() {
                    let language = block.language.as_deref().unwrap_or("");
                    writeln!(self.out, "[{i}] {language}")?;
                    writeln!(self.out, "```{language}\n{}\n```", block.code)?;
                }
                Ok(())
            }
            Some(i) => match extractor.code_block(i) {
                Ok(block) => {
                    writeln!(self.out, "{}", block.code)?;
                    let copied = copy_to_clipboard(&block.code);
                    report_copy(&mut self.out, "Code", copied)
                }
                Err(err) => writeln!(self.out, "{err}"),
            },
        }
    }

    fn show_tables(&mut self, index: Option<usize>) -> io::Result<()> {
        let Some(extractor) = &self.extractor else {
            return writeln!(self.out, "No response generated yet to extract from.");
        };
        match index {
            None => {
                if extractor.tables().is_empty() {
                    return writeln!(self.out, "No tables found.");
                }
                for (i, table) in extractor.tables().iter().enumerate() {
                    writeln!(self.out, "[{i}]\n{table}")?;
                }
                Ok(())
            }
            Some(i) => match extractor.table(i) {
                Ok(table) => {
                    writeln!(self.out, "{table}")?;
                    let copied = copy_to_clipboard(table);
                    report_copy(&mut self.out, "Table", copied)
                }
                Err(err) => writeln!(self.out, "{err}"),
            },
        }
    }

    /// Starts or stops speech recording on whichever provider offers the
    /// recording tools; a finished transcription joins the input buffer.
    async fn toggle_recording(&mut self) -> io::Result<()> {
        if self.providers.is_empty() {
            return self.notice("Error: No tool providers are running.");
        }
        let catalog = build_catalog(&self.providers, self.engine.options().tool_timeout).await;
        if !catalog.contains("start_recording") {
            return self.notice("Error: No running provider offers speech recording.");
        }
        let timeout = self.engine.options().tool_timeout;

        if !self.recording {
            let call = ToolCall::new("start_recording", json!({}));
            match dispatch_call(&catalog, &call, timeout).await {
                Ok(text) => {
                    self.recording = true;
                    let text = if text.trim().is_empty() {
                        "Recording..."
                    } else {
                        text.trim()
                    };
                    self.notice(text)
                }
                Err(failure) => self.notice(&failure.to_string()),
            }
        } else {
            self.notice("Stopping recording and transcribing...")?;
            self.recording = false;
            let call = ToolCall::new("stop_recording", json!({}));
            match dispatch_call(&catalog, &call, timeout).await {
                Ok(text) => {
                    let text = text.trim();
                    self.notice(&format!("Transcribed: {text}"))?;
                    if !self.buffer.is_empty() && !self.buffer.ends_with(char::is_whitespace) {
                        self.buffer.push(' ');
                    }
                    self.buffer.push_str(text);
                    Ok(())
                }
                Err(failure) => self.notice(&format!("Error stopping recording: {failure}")),
            }
        }
    }
}

/// Splits the buffer at the first EOF marker. The text before it is returned
/// and the buffer is cleared; without a marker the buffer is left alone.
pub(crate) fn take_submission(buffer: &mut String, marker: &str) -> Option<String> {
    let position = buffer.find(marker)?;
    let content = buffer[..position].trim_end().to_string();
    buffer.clear();
    Some(content)
}

fn write_fragment<W: Write>(out: &mut W, fragment: &Fragment, styled: bool) -> io::Result<()> {
    match fragment {
        Fragment::Content(text) => write!(out, "{text}")?,
        Fragment::Progress(text) if styled => writeln!(out, "{DIM}{text}{RESET}")?,
        Fragment::Diagnostic(text) if styled => writeln!(out, "{RED}{text}{RESET}")?,
        other => writeln!(out, "{}", other.as_text())?,
    }
    out.flush()
}

fn report_copy<W: Write>(out: &mut W, what: &str, copied: Result<(), String>) -> io::Result<()> {
    match copied {
        Ok(()) => writeln!(out, "{what} copied to clipboard."),
        Err(err) => writeln!(out, "Clipboard unavailable: {err}"),
    }
}

fn spawn_interrupt(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received; cancelling turn");
            cancel.cancel();
        }
    })
}

fn shell_command(command: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}
