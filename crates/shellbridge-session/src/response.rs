//! Uniform result envelopes.

use serde::{Deserialize, Serialize};

use shellbridge_core::{CaptureMethod, Error, ErrorKind, Result};

use crate::collector::{truncate_chars, CapturedOutput};

/// What the caller must do before a blocked command can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequired {
    /// Machine-readable action name
    pub action: String,
    /// Destructive pattern the command matched
    pub matched_pattern: String,
    /// Parameter to change when re-issuing the call
    pub parameter: String,
    /// Value to set it to
    pub value: bool,
    /// Human-readable instructions
    pub instructions: String,
}

impl ActionRequired {
    /// Confirmation needed for a destructive command.
    pub fn confirm_destructive(pattern: &str) -> Self {
        Self {
            action: "confirm_destructive_command".to_string(),
            matched_pattern: pattern.to_string(),
            parameter: "require_confirmation".to_string(),
            value: false,
            instructions: format!(
                "The command matches the destructive pattern '{pattern}'. \
                 Re-issue the same call with require_confirmation set to false to run it."
            ),
        }
    }
}

/// Result of one `run_command` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Whether the command ran and output was collected
    pub success: bool,
    /// Command as submitted
    pub command: String,
    /// Session the command was sent to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Captured output
    pub output: String,
    /// Length of `output` in characters
    pub output_length: usize,
    /// Whether shell integration was available
    pub shell_integration: bool,
    /// How the output was captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_method: Option<CaptureMethod>,
    /// Whether `output` was cut at a ceiling
    pub output_truncated: bool,
    /// Length before truncation, when truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_length: Option<usize>,
    /// Terminal rows examined
    pub lines_processed: usize,
    /// Non-fatal problems
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Error description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// What the caller must do to proceed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_required: Option<ActionRequired>,
    /// Summary
    pub message: String,
}

impl ResponseEnvelope {
    /// Cut `output` to `max` characters.
    ///
    /// Re-applying with the same ceiling changes nothing, and the first
    /// recorded original length is kept.
    pub fn apply_ceiling(&mut self, max: usize) {
        let (text, truncated, length) = truncate_chars(&self.output, max);
        if truncated {
            self.output = text;
            self.output_truncated = true;
            self.original_length.get_or_insert(length);
        }
        self.output_length = self.output.chars().count();
    }
}

/// Per-call facts that do not come from the collector.
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    /// Command as submitted
    pub command: String,
    /// Session the command was sent to
    pub session_id: Option<String>,
    /// Whether shell integration was available
    pub shell_integration: bool,
    /// Overrides the default summary
    pub message: Option<String>,
}

/// Shapes collector results and errors into envelopes.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    max_output_chars: usize,
    compact_threshold_bytes: usize,
}

impl ResponseBuilder {
    /// Create a builder with a global output ceiling.
    pub fn new(max_output_chars: usize, compact_threshold_bytes: usize) -> Self {
        Self {
            max_output_chars,
            compact_threshold_bytes,
        }
    }

    /// Global output ceiling.
    pub fn max_output_chars(&self) -> usize {
        self.max_output_chars
    }

    /// Envelope for collected output.
    pub fn build(&self, captured: CapturedOutput, metadata: ResponseMetadata) -> ResponseEnvelope {
        let message = metadata.message.unwrap_or_else(|| {
            if !captured.completed {
                "Command sent; it had not finished when capture stopped".to_string()
            } else if captured.warnings.is_empty() {
                "Command executed".to_string()
            } else {
                "Command executed with warnings".to_string()
            }
        });

        let mut envelope = ResponseEnvelope {
            success: true,
            command: metadata.command,
            session_id: metadata.session_id,
            output_length: captured.text.chars().count(),
            output: captured.text,
            shell_integration: metadata.shell_integration,
            capture_method: Some(captured.method),
            output_truncated: captured.truncated,
            original_length: captured.truncated.then_some(captured.original_length),
            lines_processed: captured.lines_processed,
            warnings: captured.warnings,
            error: None,
            error_kind: None,
            action_required: None,
            message,
        };
        envelope.apply_ceiling(self.max_output_chars);
        envelope
    }

    /// Envelope for a failed call.
    pub fn failure(&self, error: &Error, metadata: ResponseMetadata) -> ResponseEnvelope {
        let action_required = match error {
            Error::DestructiveCommandBlocked { pattern, .. } => {
                Some(ActionRequired::confirm_destructive(pattern))
            }
            _ => None,
        };
        let message = metadata.message.unwrap_or_else(|| match error.kind() {
            ErrorKind::DestructiveCommandBlocked => {
                "Command was not run; confirmation required".to_string()
            }
            ErrorKind::ConnectionError => {
                "Could not reach the terminal; the next call will reconnect".to_string()
            }
            _ => "Command failed".to_string(),
        });

        ResponseEnvelope {
            success: false,
            command: metadata.command,
            session_id: metadata.session_id,
            output: String::new(),
            output_length: 0,
            shell_integration: metadata.shell_integration,
            capture_method: None,
            output_truncated: false,
            original_length: None,
            lines_processed: 0,
            warnings: Vec::new(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            action_required,
            message,
        }
    }

    /// Serialize any response, compactly once the pretty form gets large.
    pub fn render<T: Serialize>(&self, value: &T) -> Result<String> {
        let pretty = serde_json::to_string_pretty(value)?;
        if pretty.len() > self.compact_threshold_bytes {
            Ok(serde_json::to_string(value)?)
        } else {
            Ok(pretty)
        }
    }

    /// Serialize an envelope.
    pub fn to_json(&self, envelope: &ResponseEnvelope) -> Result<String> {
        self.render(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(text: &str) -> CapturedOutput {
        CapturedOutput::from_lines(&[text.to_string()], 1, CaptureMethod::Marker, usize::MAX)
    }

    fn metadata() -> ResponseMetadata {
        ResponseMetadata {
            command: "echo hi".to_string(),
            session_id: Some("%0".to_string()),
            shell_integration: false,
            message: None,
        }
    }

    #[test]
    fn test_build_success() {
        let builder = ResponseBuilder::new(100, 4096);
        let envelope = builder.build(captured("hi"), metadata());

        assert!(envelope.success);
        assert_eq!(envelope.output, "hi");
        assert_eq!(envelope.output_length, 2);
        assert_eq!(envelope.capture_method, Some(CaptureMethod::Marker));
        assert!(!envelope.output_truncated);
        assert_eq!(envelope.original_length, None);
        assert_eq!(envelope.message, "Command executed");
    }

    #[test]
    fn test_build_applies_global_ceiling() {
        let builder = ResponseBuilder::new(5, 4096);
        let envelope = builder.build(captured("0123456789"), metadata());

        assert_eq!(envelope.output, "01234");
        assert!(envelope.output_truncated);
        assert_eq!(envelope.original_length, Some(10));
        assert_eq!(envelope.output_length, 5);
    }

    #[test]
    fn test_collector_truncation_keeps_original_length() {
        let builder = ResponseBuilder::new(100, 4096);
        let lines = vec!["0123456789".to_string()];
        let captured = CapturedOutput::from_lines(&lines, 1, CaptureMethod::Precise, 4);

        let envelope = builder.build(captured, metadata());
        assert_eq!(envelope.output, "0123");
        assert!(envelope.output_truncated);
        assert_eq!(envelope.original_length, Some(10));
    }

    #[test]
    fn test_apply_ceiling_is_idempotent() {
        let builder = ResponseBuilder::new(4, 4096);
        let mut envelope = builder.build(captured("abcdefgh"), metadata());
        let once = envelope.clone();

        envelope.apply_ceiling(4);
        assert_eq!(envelope, once);

        // A looser ceiling never restores text
        envelope.apply_ceiling(100);
        assert_eq!(envelope, once);
    }

    #[test]
    fn test_failure_for_destructive_command() {
        let builder = ResponseBuilder::new(100, 4096);
        let error = Error::DestructiveCommandBlocked {
            pattern: "rm ".to_string(),
            command: "rm -rf x".to_string(),
        };
        let envelope = builder.failure(&error, metadata());

        assert!(!envelope.success);
        assert_eq!(envelope.error_kind, Some(ErrorKind::DestructiveCommandBlocked));
        let action = envelope.action_required.unwrap();
        assert_eq!(action.parameter, "require_confirmation");
        assert!(!action.value);
        assert_eq!(action.matched_pattern, "rm ");
    }

    #[test]
    fn test_failure_without_action() {
        let builder = ResponseBuilder::new(100, 4096);
        let envelope = builder.failure(&Error::Connection("down".to_string()), metadata());
        assert_eq!(envelope.error_kind, Some(ErrorKind::ConnectionError));
        assert!(envelope.action_required.is_none());
    }

    #[test]
    fn test_to_json_compact_when_large() {
        let small = ResponseBuilder::new(10_000, 4096);
        let json = small.to_json(&small.build(captured("hi"), metadata())).unwrap();
        assert!(json.contains('\n'));

        let tiny_threshold = ResponseBuilder::new(10_000, 10);
        let envelope = tiny_threshold.build(captured("hi"), metadata());
        let json = tiny_threshold.to_json(&envelope).unwrap();
        assert!(!json.contains('\n'));

        // Same logical shape either way
        let a: serde_json::Value = serde_json::from_str(&json).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(&serde_json::to_string_pretty(&envelope).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_warnings_are_omitted() {
        let builder = ResponseBuilder::new(100, 4096);
        let json = builder.to_json(&builder.build(captured("hi"), metadata())).unwrap();
        assert!(!json.contains("warnings"));
        assert!(!json.contains("error"));
    }
}
