//! Testing utilities for shellbridge.
//!
//! Provides an in-process terminal and connector so the capture pipeline can
//! be exercised without a running terminal application.

pub mod fake;

pub use fake::{FakeConnector, FakeIntegration, FakeTerminal, FakeTerminalBuilder};
