//! toolchat is a terminal chat client for local Ollama models that can call
//! tools offered by MCP servers running as child processes.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`engine`] drives a single turn: it streams the model answer, executes
//!   the tool calls the model asks for and loops until the model is done.
//! - [`mcp`] starts the configured tool providers and speaks MCP to them over
//!   stdio.
//! - [`core`] holds the conversation log, the Ollama streaming client,
//!   configuration, chat history files and response extraction.
//! - [`api`] defines the Ollama wire payloads.
//! - [`cli`] parses arguments and runs the interactive loop.
//!
//! The binary (`src/main.rs`) only calls [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod engine;
pub mod mcp;
pub mod utils;
