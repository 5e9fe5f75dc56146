//! # shellbridge-session
//!
//! Command execution for shellbridge.
//!
//! This crate provides:
//! - Destructive-command gating and script staging
//! - Output capture through shell integration or marker lines
//! - Control connection lifecycle and focus resolution
//! - Uniform response envelopes
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on shellbridge-core
//! and shellbridge-control and knows nothing about MCP.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod collector;
pub mod connection;
pub mod dispatch;
pub mod interaction;
pub mod probe;
pub mod response;
pub mod runner;

// Re-export commonly used types
pub use backoff::{Backoff, Settle};
pub use collector::{slice_between_markers, CapturedOutput, Collector};
pub use connection::{AcquiredSession, ConnectionStatus, SessionConnection};
pub use dispatch::{
    sweep_stale_scripts, CommandDispatcher, DispatchRequest, DispatchedCommand, Sentinels,
};
pub use interaction::{ScreenOutput, SessionDetails, TextSent};
pub use probe::{IntegrationProbe, IntegrationVerdict};
pub use response::{ActionRequired, ResponseBuilder, ResponseEnvelope, ResponseMetadata};
pub use runner::{CommandRunner, RunCommandRequest};
