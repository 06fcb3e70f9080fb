//! Rust SDK for driving the Claude Code CLI over its line-delimited JSON protocol.
//!
//! The core is the [`transport::subprocess_cli::SubprocessCliTransport`], which owns the
//! CLI child process, and the control router in [`internal::query::Query`], which
//! correlates control requests and dispatches permission, hook and MCP callbacks.

pub mod client;
pub mod config;
pub mod control;
pub mod env;
pub mod error;
pub mod hooks;
pub mod internal;
pub mod mcp;
pub mod message;
pub mod permission;
pub mod query;
pub mod transport;

pub use client::{ClaudeSdkClient, ClientPrompt};
pub use config::ClaudeAgentOptions;
pub use error::SdkError;
pub use internal::client::{MessageStream, PromptInput};
pub use message::Message;
pub use query::query;
