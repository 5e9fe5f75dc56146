//! Integration tests for the shellbridge MCP tool layer.

use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::ServerHandler;
use serde_json::Value;

use shellbridge::*;
use shellbridge_control::testing::{FakeConnector, FakeTerminal};
use shellbridge_control::TerminalConnector;
use shellbridge_core::ServerConfig;
use shellbridge_session::{CommandRunner, SessionConnection};

fn server(scripts: &std::path::Path) -> (ShellBridgeServer, Arc<FakeConnector>) {
    let mut config = ServerConfig::default();
    config.dispatch.script_dir = Some(scripts.to_path_buf());
    config.dispatch.interpreter = "/bin/sh".to_string();

    let connector = Arc::new(FakeConnector::new(FakeTerminal::builder()));
    let shared: Arc<dyn TerminalConnector> = connector.clone();
    let connection = Arc::new(SessionConnection::new(
        shared,
        config.connection.idle_timeout(),
    ));
    let runner = Arc::new(CommandRunner::new(connection, &config));
    (
        ShellBridgeServer::with_runner(runner, Duration::from_secs(5)),
        connector,
    )
}

/// Parse the JSON text carried by a tool result.
fn payload(result: CallToolResult) -> Value {
    let raw = serde_json::to_value(&result).unwrap();
    assert_ne!(raw["isError"], Value::Bool(true), "{raw}");
    let text = raw["content"][0]["text"].as_str().unwrap().to_string();
    serde_json::from_str(&text).unwrap()
}

fn run(command: &str) -> Parameters<RunCommandParams> {
    Parameters(serde_json::from_value(serde_json::json!({ "command": command })).unwrap())
}

#[tokio::test]
async fn test_run_command_returns_envelope() {
    let scripts = tempfile::tempdir().unwrap();
    let (server, _) = server(scripts.path());

    let result = server
        .terminal_run_command(run("echo 'hello world'"))
        .await
        .unwrap();
    let envelope = payload(result);

    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["output"], "hello world");
    assert_eq!(envelope["capture_method"], "marker");
    assert_eq!(envelope["shell_integration"], false);
    assert!(envelope.get("error").is_none());
}

#[tokio::test]
async fn test_blocked_command_is_a_successful_tool_call() {
    let scripts = tempfile::tempdir().unwrap();
    let (server, connector) = server(scripts.path());

    let result = server
        .terminal_run_command(run("rm -rf ./build"))
        .await
        .unwrap();
    let envelope = payload(result);

    assert_eq!(envelope["success"], false);
    assert_eq!(envelope["error_kind"], "DestructiveCommandBlocked");
    assert_eq!(envelope["action_required"]["parameter"], "require_confirmation");
    assert_eq!(envelope["action_required"]["value"], false);
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn test_invalid_params_are_rejected() {
    let scripts = tempfile::tempdir().unwrap();
    let (server, _) = server(scripts.path());

    let params: RunCommandParams = serde_json::from_value(serde_json::json!({
        "command": "ls",
        "timeout_seconds": -5.0
    }))
    .unwrap();
    let err = server
        .terminal_run_command(Parameters(params))
        .await
        .unwrap_err();
    assert_eq!(err.code.0, -32602);

    let err = server.terminal_run_command(run("")).await.unwrap_err();
    assert_eq!(err.code.0, -32602);
}

#[tokio::test]
async fn test_interaction_tools() {
    let scripts = tempfile::tempdir().unwrap();
    let (server, connector) = server(scripts.path());

    let sent = payload(
        server
            .terminal_send_text(Parameters(SendTextParams {
                text: "abc".to_string(),
            }))
            .await
            .unwrap(),
    );
    assert_eq!(sent["characters_sent"], 3);

    let cleared = payload(
        server
            .terminal_clear_screen(Parameters(ClearScreenParams {}))
            .await
            .unwrap(),
    );
    assert_eq!(cleared["message"], "Screen cleared");
    assert_eq!(connector.last_terminal().unwrap().clear_count(), 1);

    let screen = payload(
        server
            .terminal_read_output(Parameters(ReadOutputParams { max_lines: Some(1) }))
            .await
            .unwrap(),
    );
    assert_eq!(screen["session_id"], "%0");
    assert_eq!(screen["lines"], 1);

    let info = payload(
        server
            .terminal_session_info(Parameters(SessionInfoParams {}))
            .await
            .unwrap(),
    );
    assert_eq!(info["backend"], "fake");
    assert_eq!(info["capture_method"], "marker");
}

#[tokio::test]
async fn test_connection_tools() {
    let scripts = tempfile::tempdir().unwrap();
    let (server, connector) = server(scripts.path());

    let status = payload(
        server
            .terminal_connection_status(Parameters(ConnectionStatusParams {}))
            .await
            .unwrap(),
    );
    assert_eq!(status["connected"], false);

    server
        .terminal_session_info(Parameters(SessionInfoParams {}))
        .await
        .unwrap();
    let status = payload(
        server
            .terminal_connection_status(Parameters(ConnectionStatusParams {}))
            .await
            .unwrap(),
    );
    assert_eq!(status["connected"], true);
    assert!(status["created_at"].is_string());

    let reset = payload(
        server
            .terminal_reset_connection(Parameters(ResetConnectionParams {}))
            .await
            .unwrap(),
    );
    assert_eq!(reset["connected"], false);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_tool_failure_maps_to_internal_error() {
    let scripts = tempfile::tempdir().unwrap();
    let (server, connector) = server(scripts.path());
    connector.set_failing(true);

    let err = server
        .terminal_read_output(Parameters(ReadOutputParams::default()))
        .await
        .unwrap_err();
    assert_eq!(err.code.0, -32603);
    assert_eq!(err.data.unwrap()["error_kind"], "ConnectionError");
}

#[test]
fn test_server_info_enables_tools() {
    let scripts = tempfile::tempdir().unwrap();
    let (server, _) = server(scripts.path());

    let info = server.get_info();
    assert!(info.capabilities.tools.is_some());
    assert!(info.instructions.unwrap().contains("terminal_run_command"));
}
