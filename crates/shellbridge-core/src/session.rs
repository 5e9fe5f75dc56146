//! Session and prompt-boundary types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The window/tab/session triple currently in focus.
///
/// With tmux these are the session (`$n`), window (`@n`) and pane (`%n`)
/// ids. Values are resolved fresh for every logical operation because focus
/// can change between calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TerminalSession {
    /// Top-level window identifier
    pub window_id: String,
    /// Tab identifier within the window
    pub tab_id: String,
    /// Session (pane) identifier that receives input
    pub session_id: String,
}

impl TerminalSession {
    /// Create a new session triple.
    pub fn new(
        window_id: impl Into<String>,
        tab_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            window_id: window_id.into(),
            tab_id: tab_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.window_id, self.tab_id, self.session_id)
    }
}

/// Half-open range of absolute terminal rows, `[start, end)`.
///
/// Row 0 is the oldest row retained in scrollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RowRange {
    /// First row (inclusive)
    pub start: usize,
    /// Last row (exclusive)
    pub end: usize,
}

impl RowRange {
    /// Create a range. An inverted range is clamped to empty.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Number of rows in the range.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range covers no rows.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A completed command cycle reported by shell integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PromptBoundary {
    /// Unique id of this boundary; changes with every command
    pub id: String,
    /// Command line recorded by the shell
    pub command: String,
    /// Rows the command's output occupied
    pub output_rows: RowRange,
}

/// How a command's output was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    /// Row range reported by shell integration
    Precise,
    /// Text between begin/end marker lines
    Marker,
    /// Unfiltered read of the visible screen
    Screen,
}

impl CaptureMethod {
    /// Name used in responses and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMethod::Precise => "precise",
            CaptureMethod::Marker => "marker",
            CaptureMethod::Screen => "screen",
        }
    }
}

impl std::fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_session_display() {
        let session = TerminalSession::new("$0", "@1", "%2");
        assert_eq!(session.to_string(), "$0/@1/%2");
    }

    #[test]
    fn test_row_range() {
        let range = RowRange::new(10, 14);
        assert_eq!(range.len(), 4);
        assert!(!range.is_empty());

        let empty = RowRange::new(7, 7);
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn test_inverted_row_range_is_empty() {
        let range = RowRange::new(9, 3);
        assert!(range.is_empty());
        assert_eq!(range.start, 9);
    }

    #[test]
    fn test_capture_method_serialization() {
        let json = serde_json::to_string(&CaptureMethod::Precise).unwrap();
        assert_eq!(json, "\"precise\"");
        assert_eq!(CaptureMethod::Marker.to_string(), "marker");
    }

    #[test]
    fn test_prompt_boundary_serialization() {
        let boundary = PromptBoundary {
            id: "17".to_string(),
            command: "ls".to_string(),
            output_rows: RowRange::new(3, 5),
        };

        let json = serde_json::to_string(&boundary).unwrap();
        let back: PromptBoundary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, boundary);
    }
}
