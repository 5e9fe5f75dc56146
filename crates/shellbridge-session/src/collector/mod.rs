//! Output collection strategies.
//!
//! A [`Collector`] delivers a staged command exactly once and extracts the
//! output that belongs to it:
//!
//! - [`Collector::Precise`] reads the row range reported by shell integration
//! - [`Collector::Marker`] scans the screen for the begin/end marker lines
//!   printed by an isolated script

pub mod marker;
pub mod precise;

use std::time::Duration;

use serde::Serialize;

use shellbridge_control::TerminalControl;
use shellbridge_core::{CaptureMethod, CaptureSettings, Error, Result};

use crate::dispatch::DispatchedCommand;

pub use marker::slice_between_markers;

/// Warning text for a command still running when `timeout` ran out.
pub(crate) fn timeout_warning(timeout: Duration) -> String {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    Error::CaptureTimeout(millis).to_string()
}

/// Everything a collector needs for one call.
pub struct CaptureContext<'a> {
    /// Control channel
    pub control: &'a dyn TerminalControl,
    /// Session the command runs in
    pub session_id: &'a str,
    /// How long to wait for the command to finish
    pub timeout: Duration,
    /// Ceiling on the returned text, in characters
    pub max_chars: usize,
    /// Polling and row limits
    pub settings: &'a CaptureSettings,
}

/// Output extracted for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    /// Extracted text, possibly truncated
    pub text: String,
    /// Whether `text` was cut at the ceiling
    pub truncated: bool,
    /// Length in characters before truncation
    pub original_length: usize,
    /// Terminal rows examined
    pub lines_processed: usize,
    /// Strategy that produced the text
    pub method: CaptureMethod,
    /// Non-fatal problems met while collecting
    pub warnings: Vec<String>,
    /// Whether the command was seen to finish
    pub completed: bool,
}

impl CapturedOutput {
    /// Build from extracted lines, applying the character ceiling.
    pub fn from_lines(
        lines: &[String],
        lines_processed: usize,
        method: CaptureMethod,
        max_chars: usize,
    ) -> Self {
        let (text, truncated, original_length) = truncate_chars(&lines.join("\n"), max_chars);
        Self {
            text,
            truncated,
            original_length,
            lines_processed,
            method,
            warnings: Vec::new(),
            completed: true,
        }
    }

    /// Attach warnings.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Mark whether the command was seen to finish.
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}

/// Cut `text` to at most `max` characters.
///
/// Returns the text, whether it was cut, and the original character count.
pub fn truncate_chars(text: &str, max: usize) -> (String, bool, usize) {
    let length = text.chars().count();
    if length <= max {
        return (text.to_string(), false, length);
    }
    (text.chars().take(max).collect(), true, length)
}

/// Drop blank rows from the end.
pub fn trim_trailing_blank(rows: &mut Vec<String>) {
    while rows.last().is_some_and(|row| row.trim().is_empty()) {
        rows.pop();
    }
}

/// Read the visible screen of `session_id` without trailing blank rows,
/// keeping only the last `max_lines` when given.
pub async fn read_screen(
    control: &dyn TerminalControl,
    session_id: &str,
    max_lines: Option<usize>,
) -> Result<Vec<String>> {
    let info = control.screen_info(session_id).await?;
    let mut rows = control
        .read_rows(session_id, info.history_rows, info.visible_rows)
        .await?;

    trim_trailing_blank(&mut rows);
    if let Some(max) = max_lines {
        if rows.len() > max {
            rows.drain(..rows.len() - max);
        }
    }
    Ok(rows)
}

/// Output collection strategy, chosen once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collector {
    /// Shell-integration row ranges
    Precise,
    /// Begin/end marker lines
    Marker,
}

impl Collector {
    /// Pick the strategy for a session.
    pub fn select(integration_available: bool) -> Self {
        if integration_available {
            Collector::Precise
        } else {
            Collector::Marker
        }
    }

    /// Capture method reported for this strategy.
    pub fn method(&self) -> CaptureMethod {
        match self {
            Collector::Precise => CaptureMethod::Precise,
            Collector::Marker => CaptureMethod::Marker,
        }
    }

    /// Deliver `dispatched` and collect its output.
    ///
    /// `Error::IntegrationUnavailable` from the precise strategy means the
    /// caller should fall back; check `dispatched.is_delivered()` to see
    /// whether the command has already been sent.
    pub async fn collect(
        &self,
        dispatched: &mut DispatchedCommand,
        ctx: &CaptureContext<'_>,
    ) -> Result<CapturedOutput> {
        match self {
            Collector::Precise => precise::collect(dispatched, ctx).await,
            Collector::Marker => marker::collect(dispatched, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellbridge_control::testing::FakeTerminal;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), ("hello".to_string(), false, 5));
        assert_eq!(truncate_chars("hello", 3), ("hel".to_string(), true, 5));
        // Counts characters, not bytes
        assert_eq!(truncate_chars("héllo", 2), ("hé".to_string(), true, 5));
    }

    #[test]
    fn test_captured_output_from_lines() {
        let lines = vec!["a".to_string(), "b".to_string()];
        let output = CapturedOutput::from_lines(&lines, 7, CaptureMethod::Marker, 100);
        assert_eq!(output.text, "a\nb");
        assert!(!output.truncated);
        assert_eq!(output.original_length, 3);
        assert_eq!(output.lines_processed, 7);
        assert!(output.completed);
    }

    #[test]
    fn test_trim_trailing_blank() {
        let mut rows: Vec<String> = ["a", "", "b", "  ", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        trim_trailing_blank(&mut rows);
        assert_eq!(rows, vec!["a", "", "b"]);
    }

    #[test]
    fn test_select() {
        assert_eq!(Collector::select(true), Collector::Precise);
        assert_eq!(Collector::select(false), Collector::Marker);
        assert_eq!(Collector::Marker.method(), CaptureMethod::Marker);
    }

    #[tokio::test]
    async fn test_read_screen_tail() {
        let terminal = FakeTerminal::builder()
            .visible_rows(5)
            .rows(["old", "one", "two"])
            .build();

        let rows = read_screen(&terminal, "%0", None).await.unwrap();
        assert_eq!(rows, vec!["old", "one", "two", "$ "]);

        let rows = read_screen(&terminal, "%0", Some(2)).await.unwrap();
        assert_eq!(rows, vec!["two", "$ "]);
    }
}
