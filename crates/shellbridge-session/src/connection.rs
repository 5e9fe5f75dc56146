//! Connection lifecycle for the terminal control channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use shellbridge_control::{FocusChain, TerminalConnector, TerminalControl};
use shellbridge_core::{Error, Result, TerminalSession};

use crate::probe::IntegrationProbe;

/// A live control channel and its bookkeeping.
struct Connection {
    control: Arc<dyn TerminalControl>,
    generation: u64,
    created_at: Instant,
    created_wall: DateTime<Utc>,
    last_used: Instant,
    last_used_wall: DateTime<Utc>,
}

impl Connection {
    fn new(control: Arc<dyn TerminalControl>, generation: u64) -> Self {
        let now = Instant::now();
        let wall = Utc::now();
        Self {
            control,
            generation,
            created_at: now,
            created_wall: wall,
            last_used: now,
            last_used_wall: wall,
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
        self.last_used_wall = Utc::now();
    }
}

/// Control handle plus the session focused at acquire time.
#[derive(Clone)]
pub struct AcquiredSession {
    /// Control channel to use for this operation
    pub control: Arc<dyn TerminalControl>,
    /// Focused window/tab/session
    pub session: TerminalSession,
}

/// Snapshot of the connection state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Whether a connection currently exists
    pub connected: bool,
    /// Number of connections opened so far; identifies the current one
    pub generation: u64,
    /// When the current connection was opened (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// When the current connection was last used (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
    /// Seconds since the connection was opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
    /// Seconds since the connection was last used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_secs: Option<u64>,
    /// Idle time after which the connection is recycled
    pub idle_timeout_secs: u64,
}

/// Owns the single control channel and hands it out per operation.
///
/// The channel is opened lazily and recycled when it dies or sits idle for
/// longer than the idle timeout. Recycling clears the [`IntegrationProbe`].
pub struct SessionConnection {
    connector: Arc<dyn TerminalConnector>,
    idle_timeout: Duration,
    current: Mutex<Option<Connection>>,
    generation: AtomicU64,
    probe: IntegrationProbe,
}

impl SessionConnection {
    /// Create a manager that opens channels through `connector`.
    pub fn new(connector: Arc<dyn TerminalConnector>, idle_timeout: Duration) -> Self {
        Self {
            connector,
            idle_timeout,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
            probe: IntegrationProbe::new(),
        }
    }

    /// The integration probe tied to this connection.
    pub fn probe(&self) -> &IntegrationProbe {
        &self.probe
    }

    /// Ensure a live channel and resolve the focused session.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<AcquiredSession> {
        let mut current = self.current.lock().await;

        let reusable = match current.as_ref() {
            Some(conn) => {
                if !conn.control.is_alive().await {
                    debug!("Connection {} is dead", conn.generation);
                    false
                } else if conn.last_used.elapsed() > self.idle_timeout {
                    debug!(
                        "Connection {} idle for {:?}",
                        conn.generation,
                        conn.last_used.elapsed()
                    );
                    false
                } else {
                    true
                }
            }
            None => false,
        };

        if !reusable {
            if let Some(old) = current.take() {
                if let Err(e) = old.control.close().await {
                    debug!("Ignoring error while closing connection: {}", e);
                }
            }
            self.probe.reset();

            let control = self.connector.connect().await?;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                "Opened {} connection (generation {})",
                control.backend(),
                generation
            );
            *current = Some(Connection::new(control, generation));
        }

        let Some(conn) = current.as_mut() else {
            return Err(Error::Connection("no connection available".to_string()));
        };

        let focus = match conn.control.focus().await {
            Ok(focus) => focus,
            Err(e) => {
                if !conn.control.is_alive().await {
                    debug!("Dropping connection {} after failed focus query", conn.generation);
                    *current = None;
                }
                return Err(e);
            }
        };

        let session = resolve_focus(focus)?;
        conn.touch();

        Ok(AcquiredSession {
            control: Arc::clone(&conn.control),
            session,
        })
    }

    /// Close the current connection and forget the probe verdict.
    pub async fn invalidate(&self) {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            if let Err(e) = old.control.close().await {
                debug!("Ignoring error while closing connection: {}", e);
            }
            info!("Closed connection (generation {})", old.generation);
        }
        self.probe.reset();
    }

    /// Current connection state.
    pub async fn status(&self) -> ConnectionStatus {
        let current = self.current.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        let idle_timeout_secs = self.idle_timeout.as_secs();

        match current.as_ref() {
            Some(conn) => ConnectionStatus {
                connected: true,
                generation: conn.generation,
                created_at: Some(conn.created_wall.to_rfc3339()),
                last_used_at: Some(conn.last_used_wall.to_rfc3339()),
                age_secs: Some(conn.created_at.elapsed().as_secs()),
                idle_secs: Some(conn.last_used.elapsed().as_secs()),
                idle_timeout_secs,
            },
            None => ConnectionStatus {
                connected: false,
                generation,
                created_at: None,
                last_used_at: None,
                age_secs: None,
                idle_secs: None,
                idle_timeout_secs,
            },
        }
    }
}

fn resolve_focus(focus: FocusChain) -> Result<TerminalSession> {
    let window = focus
        .window
        .ok_or_else(|| Error::NoActiveSession("no focused window".to_string()))?;
    let tab = focus
        .tab
        .ok_or_else(|| Error::NoActiveSession(format!("no focused tab in window {window}")))?;
    let session = focus
        .session
        .ok_or_else(|| Error::NoActiveSession(format!("no focused session in tab {tab}")))?;

    Ok(TerminalSession::new(window, tab, session))
}
