//! shellbridge MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! It routes MCP tool calls to the command runner.

use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use shellbridge_control::TmuxConnector;
use shellbridge_core::{Error, ServerConfig};
use shellbridge_session::{CommandRunner, SessionConnection};

use crate::tools::*;

/// shellbridge MCP Server
///
/// Runs commands in the focused tmux pane and exposes them via MCP tools.
#[derive(Clone)]
pub struct ShellBridgeServer {
    /// Shared command runner
    runner: Arc<CommandRunner>,
    /// Timeout used when a call does not give one
    default_timeout: Duration,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

fn invalid_params(message: String) -> McpError {
    McpError::new(ErrorCode(-32602), message, None)
}

fn tool_failure(action: &str, e: &Error) -> McpError {
    error!("Failed to {}: {}", action, e);
    let code = match e {
        Error::InvalidInput(_) => ErrorCode(-32602),
        _ => ErrorCode(-32603),
    };
    McpError::new(
        code,
        format!("Failed to {action}: {e}"),
        Some(serde_json::json!({ "error_kind": e.kind() })),
    )
}

#[tool_router]
impl ShellBridgeServer {
    /// Create a server driving tmux as described by `config`.
    pub fn new(config: &ServerConfig) -> Self {
        let connector = Arc::new(TmuxConnector::new(config.connection.clone()));
        let connection = Arc::new(SessionConnection::new(
            connector,
            config.connection.idle_timeout(),
        ));
        let runner = Arc::new(CommandRunner::new(connection, config));
        Self::with_runner(
            runner,
            Duration::from_secs(config.capture.default_timeout_secs),
        )
    }

    /// Create a server over an existing runner.
    pub fn with_runner(runner: Arc<CommandRunner>, default_timeout: Duration) -> Self {
        Self {
            runner,
            default_timeout,
            tool_router: Self::tool_router(),
        }
    }

    /// Close the control connection.
    pub async fn shutdown(&self) {
        self.runner.connection().invalidate().await;
    }

    fn respond<T: Serialize>(&self, value: &T) -> Result<CallToolResult, McpError> {
        let text = self.runner.responses().render(value).map_err(|e| {
            error!("Failed to serialize response: {}", e);
            McpError::new(
                ErrorCode(-32603),
                format!("Failed to serialize response: {e}"),
                None,
            )
        })?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    /// Run a command in the focused pane and return its output
    #[tool(
        description = "Run a shell command in the focused tmux pane and return its output. \
                       Commands matching a destructive pattern are refused until re-issued \
                       with require_confirmation=false. The result is always a JSON envelope; \
                       check its success field."
    )]
    #[instrument(skip_all)]
    pub async fn terminal_run_command(
        &self,
        Parameters(params): Parameters<RunCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params
            .into_request(self.default_timeout)
            .map_err(invalid_params)?;
        info!(
            "Running command: wait={}, timeout={:?}, confirm={}, cwd={:?}",
            request.wait_for_output,
            request.timeout,
            request.require_confirmation,
            request.working_directory
        );

        let envelope = self.runner.run_command(request).await;
        if !envelope.success {
            warn!(
                "Command not completed: {:?}: {}",
                envelope.error_kind, envelope.message
            );
        }
        self.respond(&envelope)
    }

    /// Type text into the focused pane
    #[tool(description = "Type literal text into the focused tmux pane without pressing Enter")]
    #[instrument(skip_all)]
    pub async fn terminal_send_text(
        &self,
        Parameters(params): Parameters<SendTextParams>,
    ) -> Result<CallToolResult, McpError> {
        let sent = self
            .runner
            .send_text(&params.text)
            .await
            .map_err(|e| tool_failure("send text", &e))?;
        self.respond(&sent)
    }

    /// Read the visible screen
    #[tool(description = "Read the visible contents of the focused tmux pane")]
    #[instrument(skip_all)]
    pub async fn terminal_read_output(
        &self,
        Parameters(params): Parameters<ReadOutputParams>,
    ) -> Result<CallToolResult, McpError> {
        let output = self
            .runner
            .read_output(params.max_lines)
            .await
            .map_err(|e| tool_failure("read output", &e))?;
        self.respond(&output)
    }

    /// Clear the screen
    #[tool(description = "Clear the screen of the focused tmux pane (Ctrl+L)")]
    #[instrument(skip_all)]
    pub async fn terminal_clear_screen(
        &self,
        Parameters(_params): Parameters<ClearScreenParams>,
    ) -> Result<CallToolResult, McpError> {
        let cleared = self
            .runner
            .clear_screen()
            .await
            .map_err(|e| tool_failure("clear screen", &e))?;
        self.respond(&cleared)
    }

    /// Describe the focused session
    #[tool(
        description = "Show the focused tmux session, window and pane ids and whether \
                       shell integration is available"
    )]
    #[instrument(skip_all)]
    pub async fn terminal_session_info(
        &self,
        Parameters(_params): Parameters<SessionInfoParams>,
    ) -> Result<CallToolResult, McpError> {
        let details = self
            .runner
            .session_info()
            .await
            .map_err(|e| tool_failure("get session info", &e))?;
        self.respond(&details)
    }

    /// Report connection state
    #[tool(description = "Show the state of the tmux control connection")]
    #[instrument(skip_all)]
    pub async fn terminal_connection_status(
        &self,
        Parameters(_params): Parameters<ConnectionStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let status = self.runner.connection_status().await;
        self.respond(&status)
    }

    /// Drop the connection
    #[tool(
        description = "Close the tmux control connection and forget cached shell-integration \
                       state; the next call reconnects"
    )]
    #[instrument(skip_all)]
    pub async fn terminal_reset_connection(
        &self,
        Parameters(_params): Parameters<ResetConnectionParams>,
    ) -> Result<CallToolResult, McpError> {
        let status = self.runner.reset_connection().await;
        self.respond(&status)
    }
}

// Implement the ServerHandler trait to define server capabilities
#[tool_handler]
impl rmcp::ServerHandler for ShellBridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "shellbridge - Run commands in the user's live tmux shell. \
                 Use terminal_run_command to execute a command and get its output, \
                 terminal_send_text to answer interactive prompts, \
                 and terminal_read_output to look at the screen."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
