//! In-process terminal that runs submitted lines with `sh -c`.
//!
//! The fake keeps a flat list of rows (scrollback followed by the visible
//! screen) and behaves like a shell at a prompt: when a line is submitted it
//! is echoed onto the prompt row, executed, its output appended and a fresh
//! prompt row added. With shell integration enabled it also records a
//! [`PromptBoundary`] over the output rows and publishes it.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{broadcast, Mutex};

use shellbridge_core::{Error, PromptBoundary, Result, RowRange};

use crate::control::{
    FocusChain, PromptEvent, PromptSubscription, ScreenInfo, TerminalConnector, TerminalControl,
};

/// How shell integration behaves in a [`FakeTerminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FakeIntegration {
    /// No boundaries are ever reported
    #[default]
    Disabled,
    /// A boundary is recorded and published after every command
    Enabled,
    /// An initial boundary exists but is never updated
    Frozen,
    /// An initial boundary exists but prompt changes cannot be watched,
    /// as with tmux older than 3.2
    Unwatchable,
}

/// Builder for [`FakeTerminal`].
#[derive(Debug, Clone)]
pub struct FakeTerminalBuilder {
    visible_rows: usize,
    prompt: String,
    integration: FakeIntegration,
    send_text_supported: bool,
    focus: FocusChain,
    rows: Vec<String>,
}

impl Default for FakeTerminalBuilder {
    fn default() -> Self {
        Self {
            visible_rows: 24,
            prompt: "$ ".to_string(),
            integration: FakeIntegration::Disabled,
            send_text_supported: true,
            focus: FocusChain {
                window: Some("$0".to_string()),
                tab: Some("@0".to_string()),
                session: Some("%0".to_string()),
            },
            rows: Vec::new(),
        }
    }
}

impl FakeTerminalBuilder {
    /// Height of the visible screen.
    pub fn visible_rows(mut self, rows: usize) -> Self {
        self.visible_rows = rows.max(1);
        self
    }

    /// Shell integration mode.
    pub fn integration(mut self, integration: FakeIntegration) -> Self {
        self.integration = integration;
        self
    }

    /// Whether `send_text` is available.
    pub fn send_text_supported(mut self, supported: bool) -> Self {
        self.send_text_supported = supported;
        self
    }

    /// Focus chain reported by `focus()`.
    pub fn focus(mut self, focus: FocusChain) -> Self {
        self.focus = focus;
        self
    }

    /// Rows already on screen above the first prompt.
    pub fn rows<I, S>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows = rows.into_iter().map(Into::into).collect();
        self
    }

    /// Build the terminal.
    pub fn build(self) -> FakeTerminal {
        let mut rows = self.rows;
        rows.push(self.prompt.clone());

        let boundary = match self.integration {
            FakeIntegration::Disabled => None,
            FakeIntegration::Enabled
            | FakeIntegration::Frozen
            | FakeIntegration::Unwatchable => {
                let row = rows.len() - 1;
                Some(PromptBoundary {
                    id: "fake-0".to_string(),
                    command: String::new(),
                    output_rows: RowRange::new(row, row),
                })
            }
        };

        let (events, _) = broadcast::channel(16);
        FakeTerminal {
            inner: Arc::new(FakeInner {
                state: StdMutex::new(FakeState {
                    rows,
                    input: String::new(),
                    sent: Vec::new(),
                    boundary,
                    seq: 0,
                    focus: self.focus,
                    clears: 0,
                }),
                exec: Mutex::new(()),
                events,
                alive: AtomicBool::new(true),
                visible_rows: self.visible_rows,
                prompt: self.prompt,
                integration: self.integration,
                send_text_supported: self.send_text_supported,
            }),
        }
    }
}

struct FakeState {
    rows: Vec<String>,
    input: String,
    sent: Vec<String>,
    boundary: Option<PromptBoundary>,
    seq: u64,
    focus: FocusChain,
    clears: usize,
}

struct FakeInner {
    state: StdMutex<FakeState>,
    /// Serializes execution of submitted lines
    exec: Mutex<()>,
    events: broadcast::Sender<PromptEvent>,
    alive: AtomicBool,
    visible_rows: usize,
    prompt: String,
    integration: FakeIntegration,
    send_text_supported: bool,
}

impl FakeInner {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_id(&self) -> String {
        self.state().focus.session.clone().unwrap_or_default()
    }

    async fn execute(&self, line: String) {
        let _running = self.exec.lock().await;

        {
            let mut state = self.state();
            let prompt_row = format!("{}{}", self.prompt, line);
            match state.rows.last_mut() {
                Some(last) => *last = prompt_row,
                None => state.rows.push(prompt_row),
            }
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .output()
            .await;

        let mut text = String::new();
        match output {
            Ok(output) => {
                text.push_str(&String::from_utf8_lossy(&output.stdout));
                text.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            Err(e) => text.push_str(&format!("sh: {e}\n")),
        }

        let event = {
            let mut state = self.state();
            let start = state.rows.len();
            state.rows.extend(text.lines().map(str::to_string));
            let end = state.rows.len();
            state.rows.push(self.prompt.clone());

            if self.integration == FakeIntegration::Enabled {
                state.seq += 1;
                let boundary = PromptBoundary {
                    id: format!("fake-{}", state.seq),
                    command: line,
                    output_rows: RowRange::new(start, end),
                };
                state.boundary = Some(boundary.clone());
                state.focus.session.clone().map(|session_id| PromptEvent {
                    session_id,
                    boundary,
                })
            } else {
                None
            }
        };

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}

/// Scripted terminal for tests.
#[derive(Clone)]
pub struct FakeTerminal {
    inner: Arc<FakeInner>,
}

impl FakeTerminal {
    /// Start building a fake terminal.
    pub fn builder() -> FakeTerminalBuilder {
        FakeTerminalBuilder::default()
    }

    /// Every piece of text passed to `send_text`, in order.
    pub fn sent_text(&self) -> Vec<String> {
        self.inner.state().sent.clone()
    }

    /// All rows, scrollback first.
    pub fn rows(&self) -> Vec<String> {
        self.inner.state().rows.clone()
    }

    /// Number of form feeds received.
    pub fn clear_count(&self) -> usize {
        self.inner.state().clears
    }

    /// Insert rows above the current prompt row.
    pub fn push_rows<I, S>(&self, rows: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.inner.state();
        let prompt = state.rows.pop();
        state.rows.extend(rows.into_iter().map(Into::into));
        state.rows.extend(prompt);
    }

    /// Change the focused window/tab/session.
    pub fn set_focus(&self, focus: FocusChain) {
        self.inner.state().focus = focus;
    }

    /// Simulate the terminal application going away.
    pub fn kill(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
    }

    fn check(&self, session_id: &str) -> Result<()> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return Err(Error::Connection("fake terminal is closed".to_string()));
        }
        if self.inner.session_id() != session_id {
            return Err(Error::Protocol(format!("can't find session: {session_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TerminalControl for FakeTerminal {
    fn backend(&self) -> &'static str {
        "fake"
    }

    async fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.kill();
        Ok(())
    }

    async fn focus(&self) -> Result<FocusChain> {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return Err(Error::Connection("fake terminal is closed".to_string()));
        }
        Ok(self.inner.state().focus.clone())
    }

    async fn send_text(&self, session_id: &str, text: &str) -> Result<()> {
        self.check(session_id)?;
        if !self.inner.send_text_supported {
            return Err(Error::Unsupported("send_text".to_string()));
        }

        let mut lines = Vec::new();
        {
            let mut state = self.inner.state();
            state.sent.push(text.to_string());
            for c in text.chars() {
                match c {
                    '\n' | '\r' => lines.push(std::mem::take(&mut state.input)),
                    '\x0c' => state.clears += 1,
                    c => state.input.push(c),
                }
            }
        }

        for line in lines {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.execute(line).await });
        }
        Ok(())
    }

    async fn screen_info(&self, session_id: &str) -> Result<ScreenInfo> {
        self.check(session_id)?;
        let state = self.inner.state();
        let visible = self.inner.visible_rows;
        let history = state.rows.len().saturating_sub(visible);

        Ok(ScreenInfo {
            history_rows: history,
            visible_rows: visible,
            cursor_row: state.rows.len().saturating_sub(1) - history,
        })
    }

    async fn read_rows(&self, session_id: &str, start: usize, count: usize) -> Result<Vec<String>> {
        let info = self.screen_info(session_id).await?;
        let end = start.saturating_add(count).min(info.total_rows());
        let state = self.inner.state();

        Ok((start..end)
            .map(|i| state.rows.get(i).cloned().unwrap_or_default())
            .collect())
    }

    async fn last_prompt(&self, session_id: &str) -> Result<Option<PromptBoundary>> {
        self.check(session_id)?;
        Ok(self.inner.state().boundary.clone())
    }

    async fn subscribe_prompts(&self, session_id: &str) -> Result<PromptSubscription> {
        self.check(session_id)?;
        match self.inner.integration {
            FakeIntegration::Disabled => {
                return Err(Error::Unsupported(
                    "fake terminal has no shell integration".to_string(),
                ))
            }
            FakeIntegration::Unwatchable => {
                return Err(Error::Unsupported(
                    "fake terminal cannot watch prompts".to_string(),
                ))
            }
            FakeIntegration::Enabled | FakeIntegration::Frozen => {}
        }
        Ok(PromptSubscription::new(
            session_id,
            self.inner.events.subscribe(),
        ))
    }
}

/// Connector handing out fresh [`FakeTerminal`]s.
pub struct FakeConnector {
    builder: FakeTerminalBuilder,
    connects: AtomicUsize,
    failing: AtomicBool,
    last: StdMutex<Option<FakeTerminal>>,
}

impl FakeConnector {
    /// Each `connect()` builds a new terminal from `builder`.
    pub fn new(builder: FakeTerminalBuilder) -> Self {
        Self {
            builder,
            connects: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            last: StdMutex::new(None),
        }
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make subsequent connects fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The terminal handed out by the latest connect.
    pub fn last_terminal(&self) -> Option<FakeTerminal> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TerminalConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn TerminalControl>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Connection("fake terminal refused connection".to_string()));
        }

        let terminal = self.builder.clone().build();
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(terminal.clone());
        Ok(Arc::new(terminal))
    }
}
