//! tmux backend speaking control mode (`tmux -C`).
//!
//! One `tmux -C attach-session` child is kept per connection. Commands are
//! written to its stdin one per line; a reader task pairs the `%begin` /
//! `%end` blocks on stdout with waiting requests in FIFO order and forwards
//! prompt-record subscription changes to subscribers.
//!
//! Mapping onto the window/tab/session model: a tmux session is the window,
//! a tmux window is the tab and a pane is the session receiving input.

use std::collections::{HashSet, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use shellbridge_core::{ConnectionSettings, Error, PromptBoundary, Result};

use crate::control::{
    FocusChain, PromptEvent, PromptSubscription, ScreenInfo, TerminalConnector, TerminalControl,
};
use crate::integration::{self, PROMPT_OPTION};
use crate::protocol::{hex_keys, quote_arg, ControlLine, SubscriptionChange};

/// Bytes per `send-keys -H` command.
const SEND_CHUNK_BYTES: usize = 256;

/// Capacity of the prompt event channel.
const EVENT_CAPACITY: usize = 64;

/// Prefix of the subscription names this client registers.
const SUBSCRIPTION_PREFIX: &str = "shellbridge_";

type Reply = Result<Vec<String>>;

struct Pending {
    reply: oneshot::Sender<Reply>,
    /// When set, only a block containing this exact line completes the request
    token: Option<String>,
}

/// State shared with the reader task.
struct Shared {
    pending: StdMutex<VecDeque<Pending>>,
    alive: AtomicBool,
    events: broadcast::Sender<PromptEvent>,
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the channel dead and fail every waiting request.
    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.lock_pending().clear();
    }

    fn complete(&self, reply: Reply) {
        let mut pending = self.lock_pending();
        let Some(head) = pending.pop_front() else {
            trace!("Discarding unsolicited tmux reply");
            return;
        };

        if let Some(token) = &head.token {
            let matched = matches!(&reply, Ok(lines) if lines.iter().any(|l| l == token));
            if !matched {
                // Output of a command we did not send (e.g. the attach itself)
                pending.push_front(head);
                return;
            }
        }

        // The requester may have timed out already
        let _ = head.reply.send(reply);
    }

    fn publish(&self, change: SubscriptionChange) {
        if !change.name.starts_with(SUBSCRIPTION_PREFIX) {
            return;
        }
        let Some(pane) = change.pane_id else {
            return;
        };

        if let Some(boundary) = integration::parse_record(&change.value) {
            trace!("Prompt boundary {} on {}", boundary.id, pane);
            // No receivers is fine
            let _ = self.events.send(PromptEvent {
                session_id: pane,
                boundary,
            });
        }
    }
}

async fn read_loop(stdout: ChildStdout, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut block: Option<(u64, Vec<String>)> = None;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("tmux control channel reached EOF");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read from tmux: {}", e);
                break;
            }
        }

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        let parsed = ControlLine::parse(line);

        if let Some((number, mut body)) = block.take() {
            match parsed {
                ControlLine::End { number: n } if n == number => shared.complete(Ok(body)),
                ControlLine::Error { number: n } if n == number => {
                    shared.complete(Err(Error::Protocol(body.join("\n"))))
                }
                _ => {
                    body.push(line.to_string());
                    block = Some((number, body));
                }
            }
            continue;
        }

        match parsed {
            ControlLine::Begin { number } => block = Some((number, Vec::new())),
            ControlLine::Exit(reason) => {
                debug!("tmux control client exited: {:?}", reason);
                break;
            }
            ControlLine::SubscriptionChanged(change) => shared.publish(change),
            _ => {}
        }
    }

    shared.mark_dead();
}

/// A live tmux control-mode connection.
pub struct TmuxControl {
    shared: Arc<Shared>,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    reader: JoinHandle<()>,
    subscribed: StdMutex<HashSet<String>>,
    request_timeout: Duration,
}

impl TmuxControl {
    /// Start `tmux -C attach-session` and wait until it answers commands.
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        let mut cmd = Command::new(&settings.tmux_binary);
        if let Some(socket) = &settings.socket_name {
            cmd.arg("-L").arg(socket);
        }
        cmd.arg("-C").arg("attach-session");
        if let Some(target) = &settings.target_session {
            cmd.arg("-t").arg(target);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::Connection(format!("Failed to start '{}': {e}", settings.tmux_binary))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("tmux stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("tmux stdout is not piped".to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            pending: StdMutex::new(VecDeque::new()),
            alive: AtomicBool::new(true),
            events,
        });
        let reader = tokio::spawn(read_loop(stdout, Arc::clone(&shared)));

        let control = Self {
            shared,
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            reader,
            subscribed: StdMutex::new(HashSet::new()),
            request_timeout: settings.request_timeout(),
        };

        let token = format!("shellbridge-sync-{}", Uuid::new_v4().simple());
        let sync = format!("display-message -p {}", quote_arg(&token));
        if let Err(e) = control.send_command(&sync, Some(token)).await {
            let stderr = control.stderr_output().await;
            return Err(Error::Connection(if stderr.is_empty() {
                format!("tmux control mode did not start: {e}")
            } else {
                format!("tmux control mode did not start: {stderr}")
            }));
        }

        // Pane output notifications are noise here; tmux < 3.2 rejects the flag
        if let Err(e) = control.request("refresh-client -f no-output").await {
            debug!("Could not disable output notifications: {}", e);
        }

        debug!("Connected to tmux control mode");
        Ok(control)
    }

    /// Run a tmux command and return its output lines.
    pub async fn request(&self, command: &str) -> Result<Vec<String>> {
        self.send_command(command, None).await
    }

    async fn send_command(&self, command: &str, token: Option<String>) -> Result<Vec<String>> {
        if !self.shared.alive.load(Ordering::SeqCst) {
            return Err(Error::Connection(
                "tmux control channel is closed".to_string(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        {
            // Queue order must match write order
            let mut stdin = self.stdin.lock().await;
            self.shared.lock_pending().push_back(Pending { reply: tx, token });

            let line = format!("{command}\n");
            let written: std::io::Result<()> = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;

            if let Err(e) = written {
                self.shared.mark_dead();
                return Err(Error::Connection(format!("Failed to write to tmux: {e}")));
            }
        }
        trace!("tmux <- {}", command);

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::Connection(
                "tmux control channel closed".to_string(),
            )),
            Err(_) => {
                // A late reply would pair with the wrong request from now on
                self.shared.mark_dead();
                Err(Error::Connection(format!(
                    "tmux did not answer within {}ms",
                    self.request_timeout.as_millis()
                )))
            }
        }
    }

    /// Whatever tmux wrote to stderr, for connection diagnostics.
    async fn stderr_output(&self) -> String {
        let mut child = self.child.lock().await;
        let Some(mut stderr) = child.stderr.take() else {
            return String::new();
        };

        let mut output = String::new();
        let _ = tokio::time::timeout(
            Duration::from_millis(200),
            stderr.read_to_string(&mut output),
        )
        .await;
        output.trim().to_string()
    }

    async fn display(&self, target: Option<&str>, format: &str) -> Result<String> {
        let command = match target {
            Some(pane) => format!(
                "display-message -p -t {} {}",
                quote_arg(pane),
                quote_arg(format)
            ),
            None => format!("display-message -p {}", quote_arg(format)),
        };
        let lines = self.request(&command).await?;
        Ok(lines.into_iter().next().unwrap_or_default())
    }
}

impl Drop for TmuxControl {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// `capture-pane` over lines `first..=last`, with wrapped rows joined so a
/// long line (or a marker in a narrow pane) comes back as one row.
fn capture_command(session_id: &str, first: i64, last: i64) -> String {
    format!(
        "capture-pane -p -J -t {} -S {} -E {}",
        quote_arg(session_id),
        first,
        last
    )
}

fn parse_number(field: Option<&str>, name: &str) -> Result<usize> {
    field
        .and_then(|f| f.trim().parse().ok())
        .ok_or_else(|| Error::Protocol(format!("tmux returned no valid {name}")))
}

#[async_trait]
impl TerminalControl for TmuxControl {
    fn backend(&self) -> &'static str {
        "tmux"
    }

    async fn is_alive(&self) -> bool {
        if !self.shared.alive.load(Ordering::SeqCst) {
            return false;
        }
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    async fn close(&self) -> Result<()> {
        self.shared.mark_dead();
        let mut child = self.child.lock().await;
        if let Ok(None) = child.try_wait() {
            child.start_kill()?;
        }
        debug!("Closed tmux control channel");
        Ok(())
    }

    async fn focus(&self) -> Result<FocusChain> {
        let line = self
            .display(None, "#{session_id} #{window_id} #{pane_id}")
            .await?;

        let mut fields = line
            .split(' ')
            .map(|f| Some(f.trim()).filter(|f| !f.is_empty()).map(str::to_string));

        Ok(FocusChain {
            window: fields.next().flatten(),
            tab: fields.next().flatten(),
            session: fields.next().flatten(),
        })
    }

    async fn send_text(&self, session_id: &str, text: &str) -> Result<()> {
        let keys = hex_keys(text);
        trace!("Sending {} bytes to {}", keys.len(), session_id);

        for chunk in keys.chunks(SEND_CHUNK_BYTES) {
            self.request(&format!(
                "send-keys -t {} -H {}",
                quote_arg(session_id),
                chunk.join(" ")
            ))
            .await?;
        }
        Ok(())
    }

    async fn screen_info(&self, session_id: &str) -> Result<ScreenInfo> {
        let line = self
            .display(
                Some(session_id),
                "#{history_size} #{pane_height} #{cursor_y}",
            )
            .await?;

        let mut fields = line.split_whitespace();
        Ok(ScreenInfo {
            history_rows: parse_number(fields.next(), "history size")?,
            visible_rows: parse_number(fields.next(), "pane height")?,
            cursor_row: parse_number(fields.next(), "cursor row")?,
        })
    }

    async fn read_rows(&self, session_id: &str, start: usize, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let info = self.screen_info(session_id).await?;
        let end = start.saturating_add(count).min(info.total_rows());
        if start >= end {
            return Ok(Vec::new());
        }

        // capture-pane counts visible rows from 0 and scrollback negatively
        let history = info.history_rows as i64;
        let first = start as i64 - history;
        let last = end as i64 - 1 - history;

        let mut rows = self
            .request(&capture_command(session_id, first, last))
            .await?;
        // -J may return fewer rows than requested, never more
        rows.truncate(end - start);
        Ok(rows)
    }

    async fn last_prompt(&self, session_id: &str) -> Result<Option<PromptBoundary>> {
        let value = self
            .display(Some(session_id), &format!("#{{{PROMPT_OPTION}}}"))
            .await?;
        Ok(integration::parse_record(&value))
    }

    async fn subscribe_prompts(&self, session_id: &str) -> Result<PromptSubscription> {
        // Receiver first so no change is missed
        let receiver = self.shared.events.subscribe();

        let is_new = self
            .subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string());

        if is_new {
            let name = format!(
                "{SUBSCRIPTION_PREFIX}{}",
                session_id.trim_start_matches('%')
            );
            let spec = format!("{name}:{session_id}:#{{{PROMPT_OPTION}}}");
            if let Err(e) = self
                .request(&format!("refresh-client -B {}", quote_arg(&spec)))
                .await
            {
                self.subscribed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(session_id);
                return Err(match e {
                    Error::Protocol(msg) => Error::Unsupported(format!(
                        "tmux rejected format subscription: {msg}"
                    )),
                    other => other,
                });
            }
            debug!("Subscribed to prompt records of {}", session_id);
        }

        Ok(PromptSubscription::new(session_id, receiver))
    }
}

/// Opens [`TmuxControl`] connections.
#[derive(Debug, Clone, Default)]
pub struct TmuxConnector {
    settings: ConnectionSettings,
}

impl TmuxConnector {
    /// Create a connector with the given settings.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TerminalConnector for TmuxConnector {
    async fn connect(&self) -> Result<Arc<dyn TerminalControl>> {
        let control = TmuxControl::connect(&self.settings).await?;
        Ok(Arc::new(control))
    }
}
