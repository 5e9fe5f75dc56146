//! # shellbridge-control
//!
//! Control channel to the terminal application for shellbridge.
//!
//! This crate provides:
//!
//! - The [`TerminalControl`] interface used by everything above it
//! - A tmux control-mode backend ([`TmuxControl`])
//! - The shell-integration prompt record format
//! - An in-process fake terminal for tests ([`testing`])
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - depends on shellbridge-core.
//!
//! ## Shell integration
//!
//! Precise output capture needs the shell to report where each command's
//! output starts and ends. Source `integration/shellbridge.zsh` or
//! `integration/shellbridge.bash` from the shell running inside tmux.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod integration;
pub mod protocol;
pub mod testing;
pub mod tmux;

// Re-export commonly used types
pub use control::{
    FocusChain, PromptEvent, PromptSubscription, ScreenInfo, TerminalConnector, TerminalControl,
};
pub use integration::PROMPT_OPTION;
pub use tmux::{TmuxConnector, TmuxControl};
