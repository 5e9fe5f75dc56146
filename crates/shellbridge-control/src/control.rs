//! The terminal control interface.
//!
//! Everything above this crate talks to the terminal through
//! [`TerminalControl`]. The tmux implementation lives in [`crate::tmux`];
//! tests use [`crate::testing::FakeTerminal`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use shellbridge_core::{Error, PromptBoundary, Result};

/// Ids of the focused window, tab and session.
///
/// Any link may be missing, e.g. when no client is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusChain {
    /// Focused window
    pub window: Option<String>,
    /// Focused tab within the window
    pub tab: Option<String>,
    /// Focused session within the tab
    pub session: Option<String>,
}

/// Geometry of a session's scrollback and visible screen.
///
/// Rows are addressed absolutely: row 0 is the oldest retained scrollback
/// row and the visible screen starts at `history_rows`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenInfo {
    /// Rows in scrollback above the visible screen
    pub history_rows: usize,
    /// Height of the visible screen
    pub visible_rows: usize,
    /// Cursor row relative to the top of the visible screen
    pub cursor_row: usize,
}

impl ScreenInfo {
    /// Total addressable rows.
    pub fn total_rows(&self) -> usize {
        self.history_rows + self.visible_rows
    }

    /// Absolute row of the cursor.
    pub fn cursor_absolute(&self) -> usize {
        self.history_rows + self.cursor_row
    }
}

/// A prompt boundary reported for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEvent {
    /// Session the boundary belongs to
    pub session_id: String,
    /// The new boundary
    pub boundary: PromptBoundary,
}

/// Stream of prompt boundaries for a single session.
#[derive(Debug)]
pub struct PromptSubscription {
    session_id: String,
    receiver: broadcast::Receiver<PromptEvent>,
}

impl PromptSubscription {
    /// Subscribe to `session_id`'s boundaries on a shared event channel.
    pub fn new(session_id: impl Into<String>, receiver: broadcast::Receiver<PromptEvent>) -> Self {
        Self {
            session_id: session_id.into(),
            receiver,
        }
    }

    /// Wait for the next boundary of this session.
    ///
    /// Returns `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<PromptBoundary> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.session_id == self.session_id => return Some(event.boundary),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Prompt subscription lagged by {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Operations on a live terminal application.
///
/// Implementations must be safe to share between concurrent tool calls.
#[async_trait]
pub trait TerminalControl: Send + Sync {
    /// Short backend name for logs and status reports.
    fn backend(&self) -> &'static str;

    /// Whether the control channel is still usable.
    async fn is_alive(&self) -> bool;

    /// Close the control channel. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Resolve the currently focused window, tab and session.
    async fn focus(&self) -> Result<FocusChain>;

    /// Type text into a session as if entered on the keyboard.
    async fn send_text(&self, session_id: &str, text: &str) -> Result<()>;

    /// Current scrollback and screen geometry of a session.
    async fn screen_info(&self, session_id: &str) -> Result<ScreenInfo>;

    /// Read `count` rows starting at absolute row `start`.
    ///
    /// Rows past the end of the screen are not returned, so the result may
    /// be shorter than requested.
    async fn read_rows(&self, session_id: &str, start: usize, count: usize) -> Result<Vec<String>>;

    /// Most recent prompt boundary, if shell integration has reported one.
    async fn last_prompt(&self, _session_id: &str) -> Result<Option<PromptBoundary>> {
        Ok(None)
    }

    /// Subscribe to prompt boundaries of a session.
    async fn subscribe_prompts(&self, _session_id: &str) -> Result<PromptSubscription> {
        Err(Error::Unsupported(format!(
            "{} does not report prompt boundaries",
            self.backend()
        )))
    }
}

/// Opens control channels.
#[async_trait]
pub trait TerminalConnector: Send + Sync {
    /// Open a new control channel.
    async fn connect(&self) -> Result<Arc<dyn TerminalControl>>;
}
