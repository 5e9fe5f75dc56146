//! MCP Protocol Layer
//!
//! This module implements the Model Context Protocol server using rmcp 0.9.
//! It exposes command execution in the focused tmux pane as MCP tools.

pub mod server;

pub use server::ShellBridgeServer;
