//! # shellbridge-core
//!
//! Core types for shellbridge.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other shellbridge crates. It provides:
//!
//! - Session types (TerminalSession, PromptBoundary, RowRange)
//! - Capture method classification
//! - Server configuration
//! - Error types and the caller-facing error taxonomy
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other shellbridge crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod session;

// Re-export commonly used types
pub use config::{
    CaptureSettings, ConnectionSettings, DispatchSettings, SecuritySettings, ServerConfig,
    ServerSettings,
};
pub use error::{Error, ErrorKind, Result};
pub use session::{CaptureMethod, PromptBoundary, RowRange, TerminalSession};
