//! End-to-end command execution.
//!
//! [`CommandRunner::run_command`] ties the pieces together: policy gate,
//! connection, integration probe, script staging, output collection and
//! response shaping. It never fails; every outcome becomes an envelope.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use shellbridge_core::{CaptureMethod, CaptureSettings, Error, ServerConfig};

use crate::collector::{read_screen, CaptureContext, CapturedOutput, Collector};
use crate::connection::{AcquiredSession, SessionConnection};
use crate::dispatch::{CommandDispatcher, DispatchRequest};
use crate::response::{ResponseBuilder, ResponseEnvelope, ResponseMetadata};

/// Parameters of one `run_command` call.
#[derive(Debug, Clone)]
pub struct RunCommandRequest {
    /// Command text, possibly multi-line
    pub command: String,
    /// Collect output, or return right after sending
    pub wait_for_output: bool,
    /// How long to wait for the command to finish
    pub timeout: Duration,
    /// Apply the destructive-command gate
    pub require_confirmation: bool,
    /// Directory to run in
    pub working_directory: Option<String>,
    /// Ceiling on the returned output; the global ceiling still applies
    pub max_output_chars: Option<usize>,
}

impl RunCommandRequest {
    /// Request with default options.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            wait_for_output: true,
            timeout: Duration::from_secs(10),
            require_confirmation: true,
            working_directory: None,
            max_output_chars: None,
        }
    }
}

/// An error plus whether the command had already been sent.
struct RunFailure {
    error: Error,
    delivered: bool,
}

impl From<Error> for RunFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            delivered: false,
        }
    }
}

/// Runs commands in the focused terminal session.
pub struct CommandRunner {
    pub(crate) connection: Arc<SessionConnection>,
    pub(crate) dispatcher: CommandDispatcher,
    pub(crate) responses: ResponseBuilder,
    pub(crate) capture: CaptureSettings,
    session_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CommandRunner {
    /// Create a runner over a shared connection.
    pub fn new(connection: Arc<SessionConnection>, config: &ServerConfig) -> Self {
        Self {
            connection,
            dispatcher: CommandDispatcher::new(config.security.clone(), config.dispatch.clone()),
            responses: ResponseBuilder::new(
                config.capture.max_output_chars,
                config.capture.compact_threshold_bytes,
            ),
            capture: config.capture.clone(),
            session_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// The shared connection manager.
    pub fn connection(&self) -> &Arc<SessionConnection> {
        &self.connection
    }

    /// The response builder, for serializing results.
    pub fn responses(&self) -> &ResponseBuilder {
        &self.responses
    }

    /// Lock serializing commands sent to one session.
    ///
    /// Locks nobody holds are dropped whenever a new session shows up, so
    /// the map stays as large as the set of sessions in use.
    pub(crate) fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(session_id) {
            return Arc::clone(lock);
        }

        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(session_id.to_string(), Arc::clone(&lock));
        lock
    }

    /// Run a command and collect its output.
    #[instrument(skip(self, request), fields(command = %request.command))]
    pub async fn run_command(&self, request: RunCommandRequest) -> ResponseEnvelope {
        let mut metadata = ResponseMetadata {
            command: request.command.clone(),
            ..Default::default()
        };

        // Blocked commands have no side effects, not even a connection
        if let Err(e) = self
            .dispatcher
            .check_policy(&request.command, request.require_confirmation)
        {
            return self.responses.failure(&e, metadata);
        }

        let acquired = match self.connection.acquire().await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("Cannot reach terminal: {}", e);
                return self.responses.failure(&e, metadata);
            }
        };
        let session_id = acquired.session.session_id.clone();
        metadata.session_id = Some(session_id.clone());

        let lock = self.session_lock(&session_id);
        let _serialized = lock.lock().await;

        let integration = self
            .connection
            .probe()
            .check(acquired.control.as_ref(), &acquired.session)
            .await;
        metadata.shell_integration = integration;

        let outcome = if request.wait_for_output {
            self.collect_output(&request, &acquired, integration).await
        } else {
            metadata.message = Some("Command sent; output not collected".to_string());
            self.send_only(&request, &acquired, integration).await
        };

        match outcome {
            Ok(captured) => {
                info!(
                    "Command finished on {} via {} ({} chars)",
                    session_id, captured.method, captured.original_length
                );
                self.responses.build(captured, metadata)
            }
            Err(failure) => {
                warn!("Command failed on {}: {}", session_id, failure.error);
                metadata.message = failure
                    .delivered
                    .then(|| "Command was sent but its output could not be collected".to_string());
                self.responses.failure(&failure.error, metadata)
            }
        }
    }

    fn dispatch_request(request: &RunCommandRequest, isolate: bool) -> DispatchRequest {
        DispatchRequest {
            command: request.command.clone(),
            working_directory: request.working_directory.clone(),
            require_confirmation: request.require_confirmation,
            isolate,
        }
    }

    fn max_chars(&self, request: &RunCommandRequest) -> usize {
        request
            .max_output_chars
            .unwrap_or_else(|| self.responses.max_output_chars())
    }

    async fn send_only(
        &self,
        request: &RunCommandRequest,
        acquired: &AcquiredSession,
        integration: bool,
    ) -> std::result::Result<CapturedOutput, RunFailure> {
        let collector = Collector::select(integration);
        let mut dispatched = self
            .dispatcher
            .prepare(&Self::dispatch_request(request, !integration))?;
        dispatched
            .deliver(acquired.control.as_ref(), &acquired.session.session_id)
            .await?;

        Ok(
            CapturedOutput::from_lines(&[], 0, collector.method(), self.max_chars(request))
                .with_completed(false),
        )
    }

    async fn collect_output(
        &self,
        request: &RunCommandRequest,
        acquired: &AcquiredSession,
        integration: bool,
    ) -> std::result::Result<CapturedOutput, RunFailure> {
        let control = acquired.control.as_ref();
        let session_id = acquired.session.session_id.as_str();
        let ctx = CaptureContext {
            control,
            session_id,
            timeout: request.timeout,
            max_chars: self.max_chars(request),
            settings: &self.capture,
        };

        let collector = Collector::select(integration);
        let mut dispatched = self
            .dispatcher
            .prepare(&Self::dispatch_request(request, !integration))?;

        let reason = match collector.collect(&mut dispatched, &ctx).await {
            Ok(captured) => return Ok(captured),
            Err(Error::IntegrationUnavailable(reason)) => reason,
            Err(error) => {
                return Err(RunFailure {
                    error,
                    delivered: dispatched.is_delivered(),
                })
            }
        };

        if !dispatched.is_delivered() {
            debug!("Falling back to marker capture: {}", reason);
            drop(dispatched);

            let mut isolated = self
                .dispatcher
                .prepare(&Self::dispatch_request(request, true))?;
            return match Collector::Marker.collect(&mut isolated, &ctx).await {
                Ok(captured) => Ok(captured.with_warnings(vec![format!(
                    "Shell integration unusable ({reason}); used marker capture"
                )])),
                Err(error) => Err(RunFailure {
                    error,
                    delivered: isolated.is_delivered(),
                }),
            };
        }

        // Already sent; never send twice
        warn!("Shell integration gave no result after sending: {}", reason);
        let delivered = |error| RunFailure {
            error,
            delivered: true,
        };
        let rows = read_screen(control, session_id, None)
            .await
            .map_err(delivered)?;

        Ok(CapturedOutput::from_lines(
            &rows,
            rows.len(),
            CaptureMethod::Screen,
            ctx.max_chars,
        )
        .with_warnings(vec![
            format!("Shell integration gave no result ({reason})"),
            "Returned the visible screen; output may include unrelated content".to_string(),
        ])
        .with_completed(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellbridge_control::testing::{FakeConnector, FakeTerminal};
    use shellbridge_core::ErrorKind;

    fn runner(connector: Arc<FakeConnector>) -> CommandRunner {
        let dir = std::env::temp_dir();
        let mut config = ServerConfig::default();
        config.dispatch.script_dir = Some(dir);
        config.dispatch.interpreter = "/bin/sh".to_string();
        let connection = Arc::new(SessionConnection::new(
            connector,
            config.connection.idle_timeout(),
        ));
        CommandRunner::new(connection, &config)
    }

    #[tokio::test]
    async fn test_blocked_command_does_not_connect() {
        let connector = Arc::new(FakeConnector::new(FakeTerminal::builder()));
        let runner = runner(Arc::clone(&connector));

        let envelope = runner.run_command(RunCommandRequest::new("rm -rf /tmp/x")).await;
        assert!(!envelope.success);
        assert_eq!(envelope.error_kind, Some(ErrorKind::DestructiveCommandBlocked));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_envelope() {
        let connector = Arc::new(FakeConnector::new(FakeTerminal::builder()));
        connector.set_failing(true);
        let runner = runner(connector);

        let envelope = runner.run_command(RunCommandRequest::new("ls")).await;
        assert!(!envelope.success);
        assert_eq!(envelope.error_kind, Some(ErrorKind::ConnectionError));
        assert!(envelope.session_id.is_none());
    }

    #[tokio::test]
    async fn test_session_locks_are_shared_per_session() {
        let connector = Arc::new(FakeConnector::new(FakeTerminal::builder()));
        let runner = runner(connector);

        let a = runner.session_lock("%0");
        let b = runner.session_lock("%0");
        let c = runner.session_lock("%1");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _held = a.lock().await;
        assert!(b.try_lock().is_err());
        assert!(c.try_lock().is_ok());
    }

    #[test]
    fn test_idle_session_locks_are_pruned() {
        let connector = Arc::new(FakeConnector::new(FakeTerminal::builder()));
        let runner = runner(connector);

        let held = runner.session_lock("%0");
        drop(runner.session_lock("%1"));
        drop(runner.session_lock("%2"));

        let locks = runner.session_locks.lock().unwrap();
        let mut ids: Vec<_> = locks.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["%0", "%2"]);
        drop(locks);

        assert!(Arc::ptr_eq(&held, &runner.session_lock("%0")));
    }

    #[tokio::test]
    async fn test_send_only_returns_empty_output() {
        let connector = Arc::new(FakeConnector::new(FakeTerminal::builder()));
        let runner = runner(Arc::clone(&connector));

        let mut request = RunCommandRequest::new("echo later");
        request.wait_for_output = false;
        let envelope = runner.run_command(request).await;

        assert!(envelope.success);
        assert_eq!(envelope.output, "");
        assert_eq!(envelope.message, "Command sent; output not collected");
        assert_eq!(connector.last_terminal().unwrap().sent_text().len(), 1);
    }
}
