//! Direct session interaction beyond `run_command`.

use serde::Serialize;
use tracing::{debug, info, instrument};

use shellbridge_core::{CaptureMethod, Result};

use crate::collector::{read_screen, truncate_chars, Collector};
use crate::connection::ConnectionStatus;
use crate::runner::CommandRunner;

/// Form feed; shells treat it as Ctrl+L.
const CLEAR_SCREEN: &str = "\x0c";

/// Result of sending raw text.
#[derive(Debug, Clone, Serialize)]
pub struct TextSent {
    /// Session that received the text
    pub session_id: String,
    /// Characters sent
    pub characters_sent: usize,
    /// Summary
    pub message: String,
}

/// Visible screen contents.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenOutput {
    /// Session that was read
    pub session_id: String,
    /// Screen text, trailing blank rows removed
    pub output: String,
    /// Length of `output` in characters
    pub output_length: usize,
    /// Rows returned
    pub lines: usize,
    /// Whether `output` was cut at the ceiling
    pub output_truncated: bool,
    /// Length before truncation, when truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_length: Option<usize>,
}

/// The focused session and how commands would be captured in it.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    /// Focused window
    pub window_id: String,
    /// Focused tab
    pub tab_id: String,
    /// Focused session
    pub session_id: String,
    /// Terminal backend in use
    pub backend: String,
    /// Whether shell integration is available
    pub shell_integration: bool,
    /// Strategy `run_command` would use
    pub capture_method: CaptureMethod,
}

impl CommandRunner {
    /// Type `text` into the focused session without adding a newline.
    #[instrument(skip(self, text))]
    pub async fn send_text(&self, text: &str) -> Result<TextSent> {
        let acquired = self.connection.acquire().await?;
        let session_id = acquired.session.session_id.clone();

        let lock = self.session_lock(&session_id);
        let _serialized = lock.lock().await;
        acquired.control.send_text(&session_id, text).await?;

        let characters_sent = text.chars().count();
        debug!("Sent {} characters to {}", characters_sent, session_id);
        Ok(TextSent {
            session_id,
            characters_sent,
            message: "Text sent".to_string(),
        })
    }

    /// Read the visible screen of the focused session.
    ///
    /// With `max_lines`, only the last rows are returned.
    #[instrument(skip(self))]
    pub async fn read_output(&self, max_lines: Option<usize>) -> Result<ScreenOutput> {
        let acquired = self.connection.acquire().await?;
        let session_id = acquired.session.session_id.clone();

        let rows = read_screen(acquired.control.as_ref(), &session_id, max_lines).await?;
        let (output, truncated, length) =
            truncate_chars(&rows.join("\n"), self.responses.max_output_chars());

        Ok(ScreenOutput {
            session_id,
            output_length: output.chars().count(),
            output,
            lines: rows.len(),
            output_truncated: truncated,
            original_length: truncated.then_some(length),
        })
    }

    /// Clear the focused session's screen.
    #[instrument(skip(self))]
    pub async fn clear_screen(&self) -> Result<TextSent> {
        let mut sent = self.send_text(CLEAR_SCREEN).await?;
        sent.message = "Screen cleared".to_string();
        Ok(sent)
    }

    /// Describe the focused session.
    #[instrument(skip(self))]
    pub async fn session_info(&self) -> Result<SessionDetails> {
        let acquired = self.connection.acquire().await?;
        let shell_integration = self
            .connection
            .probe()
            .check(acquired.control.as_ref(), &acquired.session)
            .await;

        Ok(SessionDetails {
            window_id: acquired.session.window_id,
            tab_id: acquired.session.tab_id,
            session_id: acquired.session.session_id,
            backend: acquired.control.backend().to_string(),
            shell_integration,
            capture_method: Collector::select(shell_integration).method(),
        })
    }

    /// State of the control connection.
    pub async fn connection_status(&self) -> ConnectionStatus {
        self.connection.status().await
    }

    /// Drop the control connection; the next call reconnects.
    pub async fn reset_connection(&self) -> ConnectionStatus {
        self.connection.invalidate().await;
        info!("Connection reset on request");
        self.connection.status().await
    }
}
