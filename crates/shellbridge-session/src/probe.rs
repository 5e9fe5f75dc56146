//! Shell-integration detection.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use shellbridge_control::TerminalControl;
use shellbridge_core::TerminalSession;

/// Cached answer to "does this session report prompt boundaries?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationVerdict {
    /// Session the verdict was computed for
    pub session_id: String,
    /// Whether shell integration is usable
    pub available: bool,
}

/// Detects shell integration once per session.
///
/// Only the latest verdict is kept; a verdict for another session is never
/// reused. The cache is reset whenever the connection is recreated.
#[derive(Debug, Default)]
pub struct IntegrationProbe {
    verdict: Mutex<Option<IntegrationVerdict>>,
}

impl IntegrationProbe {
    /// Create a probe with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<IntegrationVerdict>> {
        self.verdict.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached verdict for `session_id`, if any.
    pub fn cached(&self, session_id: &str) -> Option<bool> {
        self.lock()
            .as_ref()
            .filter(|v| v.session_id == session_id)
            .map(|v| v.available)
    }

    /// Whether `session` reports prompt boundaries.
    ///
    /// Any existing boundary counts, even one from an earlier command.
    /// Query failures count as unavailable.
    pub async fn check(&self, control: &dyn TerminalControl, session: &TerminalSession) -> bool {
        if let Some(available) = self.cached(&session.session_id) {
            return available;
        }

        let available = match control.last_prompt(&session.session_id).await {
            Ok(boundary) => boundary.is_some(),
            Err(e) => {
                debug!(
                    "Prompt query failed for {}, assuming no integration: {}",
                    session.session_id, e
                );
                false
            }
        };

        debug!(
            "Shell integration for {}: {}",
            session.session_id,
            if available { "available" } else { "unavailable" }
        );
        *self.lock() = Some(IntegrationVerdict {
            session_id: session.session_id.clone(),
            available,
        });
        available
    }

    /// Forget the cached verdict.
    pub fn reset(&self) {
        *self.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellbridge_control::testing::{FakeIntegration, FakeTerminal};
    use shellbridge_control::FocusChain;

    fn session(id: &str) -> TerminalSession {
        TerminalSession::new("$0", "@0", id)
    }

    #[tokio::test]
    async fn test_no_boundary_means_unavailable() {
        let terminal = FakeTerminal::builder().build();
        let probe = IntegrationProbe::new();

        assert!(!probe.check(&terminal, &session("%0")).await);
        assert_eq!(probe.cached("%0"), Some(false));
    }

    #[tokio::test]
    async fn test_existing_boundary_means_available() {
        let terminal = FakeTerminal::builder()
            .integration(FakeIntegration::Frozen)
            .build();
        let probe = IntegrationProbe::new();

        assert!(probe.check(&terminal, &session("%0")).await);
    }

    #[tokio::test]
    async fn test_query_error_means_unavailable() {
        let terminal = FakeTerminal::builder()
            .integration(FakeIntegration::Enabled)
            .build();
        let probe = IntegrationProbe::new();

        // The fake rejects unknown sessions
        assert!(!probe.check(&terminal, &session("%7")).await);
    }

    #[tokio::test]
    async fn test_verdict_is_per_session() {
        let terminal = FakeTerminal::builder()
            .integration(FakeIntegration::Enabled)
            .build();
        let probe = IntegrationProbe::new();

        assert!(probe.check(&terminal, &session("%0")).await);
        assert_eq!(probe.cached("%1"), None);

        terminal.set_focus(FocusChain {
            window: Some("$0".to_string()),
            tab: Some("@0".to_string()),
            session: Some("%1".to_string()),
        });
        assert!(probe.check(&terminal, &session("%1")).await);
        assert_eq!(probe.cached("%0"), None);
    }

    #[tokio::test]
    async fn test_cache_hit_and_reset() {
        let terminal = FakeTerminal::builder()
            .integration(FakeIntegration::Enabled)
            .build();
        let probe = IntegrationProbe::new();
        assert!(probe.check(&terminal, &session("%0")).await);

        // A dead terminal would fail the query, so a hit proves no I/O
        terminal.kill();
        assert!(probe.check(&terminal, &session("%0")).await);

        probe.reset();
        assert_eq!(probe.cached("%0"), None);
        assert!(!probe.check(&terminal, &session("%0")).await);
    }
}
