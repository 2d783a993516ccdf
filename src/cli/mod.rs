//! Command-line interface parsing and handling
//!
//! Parses the arguments, loads the configuration, starts the tool providers
//! and hands over to the interactive loop in [`repl`].

pub mod commands;
pub mod model_list;
pub mod provider_list;
pub mod repl;

use std::error::Error;
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::model_list::{list_models, pick_model};
use crate::cli::provider_list::list_providers;
use crate::cli::repl::Session;
use crate::core::chat_stream::OllamaChatModel;
use crate::core::config::data::{path_display, ProviderConfig, BUILTIN_FS_PROVIDER_ID};
use crate::core::config::Config;
use crate::core::conversation::Conversation;
use crate::core::history::{load_chat, resolve_path};
use crate::engine::{TurnEngine, TurnOptions};
use crate::mcp::fs_server::{self, FsTools};
use crate::mcp::ProviderRegistry;
use crate::utils::url::normalize_base_url;

#[derive(Parser, Debug)]
#[command(name = "toolchat")]
#[command(about = "A terminal chat client for Ollama models with tool-providing MCP servers")]
#[command(
    long_about = "toolchat streams answers from a local Ollama model and lets the model call \
tools offered by MCP servers configured as [[providers]] in the config file.\n\n\
Type your prompt over as many lines as you like and finish it with the EOF marker \
(default: EOF). Type /? at the prompt for the list of commands.\n\n\
Environment Variables:\n\
  TOOLCHAT_LOG      Log filter (falls back to RUST_LOG, default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Model to chat with
    #[arg(short = 'm', long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Resume a saved chat file
    #[arg(short = 'l', long, value_name = "CHAT")]
    pub load: Option<PathBuf>,

    /// Start a configured provider even if it is disabled (repeatable)
    #[arg(long = "enable", value_name = "ID")]
    pub enable: Vec<String>,

    /// Root of the built-in file-system provider; implies --enable fs
    #[arg(long, value_name = "DIR")]
    pub fs_root: Option<PathBuf>,

    /// Do not start any tool provider
    #[arg(long)]
    pub no_tools: bool,

    /// List the models installed on the Ollama server and exit
    #[arg(long)]
    pub list_models: bool,

    /// List the configured tool providers and exit
    #[arg(long)]
    pub list_providers: bool,

    /// Ollama server URL
    #[arg(long, value_name = "URL")]
    pub ollama_url: Option<String>,

    /// Per tool-call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub tool_timeout: Option<u64>,

    /// Stop a turn after this many model rounds
    #[arg(long, value_name = "N")]
    pub max_rounds: Option<usize>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the built-in file-system tools over stdio, rooted at DIR
    FsServer {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

impl Args {
    /// Provider ids to start regardless of their `enabled` flag.
    fn forced_providers(&self) -> Vec<String> {
        let mut forced = self.enable.clone();
        if self.fs_root.is_some()
            && !forced
                .iter()
                .any(|id| id.eq_ignore_ascii_case(BUILTIN_FS_PROVIDER_ID))
        {
            forced.push(BUILTIN_FS_PROVIDER_ID.to_string());
        }
        forced
    }

    /// Command-line values take precedence over the config file.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.ollama_url {
            config.ollama_url = Some(url.clone());
        }
        if let Some(secs) = self.tool_timeout {
            config.tool_timeout_secs = Some(secs);
        }
        if let Some(rounds) = self.max_rounds {
            config.max_tool_rounds = Some(rounds);
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    if let Some(Command::FsServer { dir }) = &args.command {
        return run_fs_server(dir).await;
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load_from_path(&config_path)?;
    args.apply_overrides(&mut config);

    // The built-in entry is never written back to the config file.
    let provider_config = with_builtin_providers(&config, args.fs_root.as_deref());

    if args.list_providers {
        list_providers(&provider_config);
        return Ok(());
    }

    let client = reqwest::Client::new();
    let base_url = normalize_base_url(config.ollama_url());
    if args.list_models {
        return list_models(&client, &base_url).await;
    }

    let mut conversation = Conversation::new();
    let mut saved_model = None;
    let mut saved_as = None;
    if let Some(path) = &args.load {
        println!("File to load:    {}", path_display(path));
        let saved = load_chat(path)?;
        saved_model = saved.model;
        conversation = Conversation::from_messages(saved.history);
        saved_as = Some(path.display().to_string());
    }

    let model = match args
        .model
        .clone()
        .or(saved_model)
        .or_else(|| config.default_model.clone())
    {
        Some(model) => model,
        None => pick_model(&client, &base_url).await?,
    };
    println!("Model selected:  {model}");

    let registry = start_providers(&args, &provider_config).await;
    let options = TurnOptions {
        tool_timeout: config.tool_timeout(),
        max_rounds: config.max_tool_rounds(),
    };
    let engine = TurnEngine::new(Arc::new(OllamaChatModel::new(client, base_url)), options);

    let stdout = std::io::stdout();
    let styled = stdout.is_terminal();
    let mut session = Session::new(
        config.clone(),
        config_path,
        model,
        engine,
        registry.providers(),
        stdout,
    )
    .with_conversation(conversation, saved_as)
    .styled(styled)
    .interrupt_on_ctrl_c(true);

    println!(
        "Type /? for help. End your prompt with {} to send it.",
        config.eof_string()
    );
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    session.run(stdin).await?;
    Ok(())
}

async fn start_providers(args: &Args, config: &Config) -> ProviderRegistry {
    if args.no_tools {
        return ProviderRegistry::new();
    }
    let forced = args.forced_providers();
    for id in &forced {
        if config.get_provider(id).is_none() {
            eprintln!("⚠️  No provider '{id}' in the config; ignoring --enable {id}");
        }
    }

    let active = config.active_providers(&forced);
    if active.is_empty() {
        return ProviderRegistry::new();
    }
    let registry = ProviderRegistry::connect_all(&active).await;
    for provider in registry.live() {
        println!("Tools enabled:   {}", provider.display_name());
    }
    for failure in registry.failures() {
        let name = config
            .get_provider(&failure.id)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| failure.id.clone());
        eprintln!("❌ {name} provider failed: {}", failure.message);
    }
    info!(
        live = registry.live().len(),
        failed = registry.failures().len(),
        "Tool providers started"
    );
    registry
}

fn with_builtin_providers(config: &Config, fs_root: Option<&Path>) -> Config {
    let mut config = config.clone();
    match std::env::current_exe() {
        Ok(exe) => {
            let root = resolve_path(fs_root.unwrap_or(Path::new(".")));
            let builtin = ProviderConfig::builtin_fs(exe.display().to_string(), &root);
            config.add_builtin_provider(builtin);
        }
        Err(err) => warn!(error = %err, "Built-in file-system provider unavailable"),
    }
    config
}

async fn run_fs_server(dir: &Path) -> Result<(), Box<dyn Error>> {
    let tools = FsTools::new(dir)
        .map_err(|err| format!("Cannot serve {}: {err}", path_display(dir)))?;
    info!(root = %tools.root().display(), "Serving file-system tools");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    fs_server::serve(&tools, stdin, tokio::io::stdout()).await?;
    Ok(())
}

/// Logs go to stderr, or to `log_file`, so stdout stays reserved for the
/// chat itself.
fn init_logging(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_env("TOOLCHAT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
