//! MCP Tool Types
//!
//! Parameter types for every tool exposed by the server. Responses are the
//! serializable result types of `shellbridge-session`.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use shellbridge_session::RunCommandRequest;

fn default_true() -> bool {
    true
}

// =============================================================================
// Command Execution
// =============================================================================

/// Parameters for terminal_run_command
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCommandParams {
    /// Shell command to run in the focused pane; may span several lines
    pub command: String,

    /// Wait for the command and return its output. When false the call
    /// returns right after the command is sent
    #[serde(default = "default_true")]
    pub wait_for_output: bool,

    /// Seconds to wait for the command to finish (server default when unset)
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    /// Refuse commands matching a destructive pattern. Set to false to
    /// confirm a command that was blocked
    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    /// Directory to run the command in; `~` is expanded
    #[serde(default)]
    pub working_directory: Option<String>,

    /// Maximum characters of output to return
    #[serde(default)]
    pub max_output_chars: Option<usize>,
}

impl RunCommandParams {
    /// Convert into a runner request, filling in the default timeout.
    ///
    /// Fails on an empty command or a timeout that is negative or not finite.
    pub fn into_request(self, default_timeout: Duration) -> Result<RunCommandRequest, String> {
        if self.command.trim().is_empty() {
            return Err("command cannot be empty".to_string());
        }

        let timeout = match self.timeout_seconds {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| format!("timeout_seconds must be a non-negative number, got {secs}"))?,
            None => default_timeout,
        };

        Ok(RunCommandRequest {
            command: self.command,
            wait_for_output: self.wait_for_output,
            timeout,
            require_confirmation: self.require_confirmation,
            working_directory: self.working_directory,
            max_output_chars: self.max_output_chars,
        })
    }
}

// =============================================================================
// Session Interaction
// =============================================================================

/// Parameters for terminal_send_text
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendTextParams {
    /// Text to type; no newline is added
    pub text: String,
}

/// Parameters for terminal_read_output
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReadOutputParams {
    /// Only return the last N non-blank rows of the screen
    #[serde(default)]
    pub max_lines: Option<usize>,
}

/// Parameters for terminal_clear_screen
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClearScreenParams {}

/// Parameters for terminal_session_info
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfoParams {}

// =============================================================================
// Connection Management
// =============================================================================

/// Parameters for terminal_connection_status
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionStatusParams {}

/// Parameters for terminal_reset_connection
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResetConnectionParams {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_defaults() {
        let params: RunCommandParams = serde_json::from_str(r#"{"command": "ls"}"#).unwrap();
        assert!(params.wait_for_output);
        assert!(params.require_confirmation);
        assert!(params.timeout_seconds.is_none());

        let request = params.into_request(Duration::from_secs(10)).unwrap();
        assert_eq!(request.timeout, Duration::from_secs(10));
        assert_eq!(request.command, "ls");
    }

    #[test]
    fn test_fractional_timeout() {
        let params: RunCommandParams =
            serde_json::from_str(r#"{"command": "ls", "timeout_seconds": 0.5}"#).unwrap();
        let request = params.into_request(Duration::from_secs(10)).unwrap();
        assert_eq!(request.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_bad_input() {
        let empty: RunCommandParams = serde_json::from_str(r#"{"command": "  "}"#).unwrap();
        assert!(empty.into_request(Duration::from_secs(1)).is_err());

        let negative: RunCommandParams =
            serde_json::from_str(r#"{"command": "ls", "timeout_seconds": -1}"#).unwrap();
        assert!(negative.into_request(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_empty_params_accept_empty_object() {
        let _: ClearScreenParams = serde_json::from_str("{}").unwrap();
        let _: ResetConnectionParams = serde_json::from_str("{}").unwrap();
        let read: ReadOutputParams = serde_json::from_str("{}").unwrap();
        assert!(read.max_lines.is_none());
    }

    #[test]
    fn test_schema_lists_command_as_required() {
        let schema = serde_json::to_value(schemars::schema_for!(RunCommandParams)).unwrap();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required, &vec![serde_json::json!("command")]);
    }
}
