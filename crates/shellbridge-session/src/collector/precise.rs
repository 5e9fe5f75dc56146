//! Capture through shell-integration prompt boundaries.

use tracing::debug;

use shellbridge_core::{CaptureMethod, Error, PromptBoundary, Result};

use super::{timeout_warning, CaptureContext, CapturedOutput};
use crate::dispatch::DispatchedCommand;

pub(crate) async fn collect(
    dispatched: &mut DispatchedCommand,
    ctx: &CaptureContext<'_>,
) -> Result<CapturedOutput> {
    let session = ctx.session_id;

    let before = ctx
        .control
        .last_prompt(session)
        .await
        .map_err(|e| Error::IntegrationUnavailable(format!("prompt query failed: {e}")))?
        .ok_or_else(|| {
            Error::IntegrationUnavailable("no prompt boundary recorded".to_string())
        })?;

    // Subscribe first so the completion cannot slip past
    let mut subscription = ctx
        .control
        .subscribe_prompts(session)
        .await
        .map_err(|e| Error::IntegrationUnavailable(format!("cannot watch prompts: {e}")))?;

    dispatched.deliver(ctx.control, session).await?;

    let mut warnings = Vec::new();
    let waited = tokio::time::timeout(ctx.timeout, async {
        while let Some(boundary) = subscription.next().await {
            if boundary.id != before.id {
                return Some(boundary);
            }
        }
        None
    })
    .await;

    let reported = match waited {
        Ok(Some(boundary)) => Some(boundary),
        Ok(None) => {
            debug!("Prompt subscription closed for {}", session);
            None
        }
        Err(_) => {
            warnings.push(timeout_warning(ctx.timeout));
            None
        }
    };

    let after = match reported {
        Some(boundary) => Some(boundary),
        None => ctx.control.last_prompt(session).await.ok().flatten(),
    };
    let after = match after {
        Some(boundary) if boundary.id != before.id => boundary,
        _ => {
            return Err(Error::IntegrationUnavailable(
                "no new prompt boundary after the command".to_string(),
            ))
        }
    };

    read_boundary(&after, ctx, warnings).await
}

async fn read_boundary(
    boundary: &PromptBoundary,
    ctx: &CaptureContext<'_>,
    mut warnings: Vec<String>,
) -> Result<CapturedOutput> {
    let range = boundary.output_rows;
    if range.is_empty() {
        return Ok(CapturedOutput::from_lines(&[], 0, CaptureMethod::Precise, ctx.max_chars)
            .with_warnings(warnings));
    }

    let rows = ctx
        .control
        .read_rows(ctx.session_id, range.start, range.len())
        .await?;
    if rows.len() < range.len() {
        warnings.push(format!(
            "Expected {} output rows but read {}",
            range.len(),
            rows.len()
        ));
    }

    debug!(
        "Read rows {}..{} for boundary {}",
        range.start, range.end, boundary.id
    );
    Ok(
        CapturedOutput::from_lines(&rows, rows.len(), CaptureMethod::Precise, ctx.max_chars)
            .with_warnings(warnings),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use shellbridge_control::testing::{FakeIntegration, FakeTerminal};
    use shellbridge_control::TerminalControl;
    use shellbridge_core::{CaptureSettings, DispatchSettings, SecuritySettings};

    use crate::dispatch::{CommandDispatcher, DispatchRequest};

    fn stage(dir: &std::path::Path, command: &str) -> DispatchedCommand {
        CommandDispatcher::new(
            SecuritySettings::default(),
            DispatchSettings {
                script_dir: Some(dir.to_path_buf()),
                interpreter: "/bin/sh".to_string(),
                ..Default::default()
            },
        )
        .prepare(&DispatchRequest {
            command: command.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn context<'a>(
        control: &'a dyn TerminalControl,
        settings: &'a CaptureSettings,
        timeout: Duration,
    ) -> CaptureContext<'a> {
        CaptureContext {
            control,
            session_id: "%0",
            timeout,
            max_chars: 10_000,
            settings,
        }
    }

    #[tokio::test]
    async fn test_reads_reported_rows() {
        let dir = tempfile::tempdir().unwrap();
        let terminal = FakeTerminal::builder()
            .integration(FakeIntegration::Enabled)
            .build();
        let settings = CaptureSettings::default();
        let ctx = context(&terminal, &settings, Duration::from_secs(5));

        let mut dispatched = stage(dir.path(), "echo one\necho two");
        let output = collect(&mut dispatched, &ctx).await.unwrap();

        assert_eq!(output.text, "one\ntwo");
        assert_eq!(output.method, CaptureMethod::Precise);
        assert_eq!(output.lines_processed, 2);
        assert!(output.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let terminal = FakeTerminal::builder()
            .integration(FakeIntegration::Enabled)
            .build();
        let settings = CaptureSettings::default();
        let ctx = context(&terminal, &settings, Duration::from_secs(5));

        let mut dispatched = stage(dir.path(), "true");
        let output = collect(&mut dispatched, &ctx).await.unwrap();
        assert_eq!(output.text, "");
        assert_eq!(output.lines_processed, 0);
    }

    #[tokio::test]
    async fn test_no_boundary_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let terminal = FakeTerminal::builder().build();
        let settings = CaptureSettings::default();
        let ctx = context(&terminal, &settings, Duration::from_secs(1));

        let mut dispatched = stage(dir.path(), "echo hi");
        let err = collect(&mut dispatched, &ctx).await.unwrap_err();

        assert!(matches!(err, Error::IntegrationUnavailable(_)));
        assert!(!dispatched.is_delivered());
        assert!(terminal.sent_text().is_empty());
    }

    #[tokio::test]
    async fn test_stale_boundary_fails_after_sending() {
        let dir = tempfile::tempdir().unwrap();
        let terminal = FakeTerminal::builder()
            .integration(FakeIntegration::Frozen)
            .build();
        let settings = CaptureSettings::default();
        let ctx = context(&terminal, &settings, Duration::from_millis(200));

        let mut dispatched = stage(dir.path(), "echo hi");
        let err = collect(&mut dispatched, &ctx).await.unwrap_err();

        assert!(matches!(err, Error::IntegrationUnavailable(_)));
        assert!(dispatched.is_delivered());
        assert_eq!(terminal.sent_text().len(), 1);
    }
}
