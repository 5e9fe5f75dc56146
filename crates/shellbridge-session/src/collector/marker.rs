//! Capture by scanning for begin/end marker lines.

use std::time::{Duration, Instant};

use tracing::debug;

use shellbridge_core::{CaptureMethod, Error, Result};

use super::{timeout_warning, trim_trailing_blank, CaptureContext, CapturedOutput};
use crate::backoff::{Backoff, Settle};
use crate::dispatch::{DispatchedCommand, Sentinels};

/// Lines found between the markers, plus a warning when the markers were
/// not both present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSlice {
    /// Extracted lines
    pub lines: Vec<String>,
    /// Set when one or both markers were missing
    pub warning: Option<String>,
}

/// Extract the rows a command printed between its markers.
///
/// The last end marker wins, paired with the last begin marker above it.
/// Text printed before the end marker on the same row (output without a
/// trailing newline) is kept.
pub fn slice_between_markers(rows: &[String], sentinels: &Sentinels) -> MarkerSlice {
    let end = rows.iter().rposition(|row| row.contains(&sentinels.end));
    let begin_scope = end.unwrap_or(rows.len());
    let begin = rows[..begin_scope]
        .iter()
        .rposition(|row| row.contains(&sentinels.begin));

    match (begin, end) {
        (Some(b), Some(e)) => MarkerSlice {
            lines: with_end_prefix(&rows[b + 1..e], &rows[e], &sentinels.end),
            warning: None,
        },
        (Some(b), None) => {
            let mut lines = rows[b + 1..].to_vec();
            trim_trailing_blank(&mut lines);
            MarkerSlice {
                lines,
                warning: Some("End marker not found; output may be incomplete".to_string()),
            }
        }
        (None, Some(e)) => MarkerSlice {
            lines: with_end_prefix(&rows[..e], &rows[e], &sentinels.end),
            warning: Some(
                "Begin marker not found in captured rows; output may include earlier content"
                    .to_string(),
            ),
        },
        (None, None) => {
            let mut lines = rows.to_vec();
            trim_trailing_blank(&mut lines);
            MarkerSlice {
                lines,
                warning: Some("Markers not found; returning raw screen contents".to_string()),
            }
        }
    }
}

fn with_end_prefix(body: &[String], end_row: &str, end: &str) -> Vec<String> {
    let mut lines = body.to_vec();
    if let Some(pos) = end_row.find(end) {
        let prefix = &end_row[..pos];
        if !prefix.trim().is_empty() {
            lines.push(prefix.to_string());
        }
    }
    lines
}

/// Look for `needle` in the rows just above and on the cursor row.
///
/// Blank screen rows below the cursor are skipped, so the window follows the
/// output even in a tall pane that has not scrolled yet.
async fn tail_contains(ctx: &CaptureContext<'_>, needle: &str) -> Result<bool> {
    let info = ctx.control.screen_info(ctx.session_id).await?;
    let end = info.cursor_absolute() + 1;
    let start = end.saturating_sub(ctx.settings.sentinel_scan_rows);
    let rows = ctx
        .control
        .read_rows(ctx.session_id, start, end - start)
        .await?;
    Ok(rows.iter().any(|row| row.contains(needle)))
}

async fn wait_for_end(ctx: &CaptureContext<'_>, end: &str) -> Result<bool> {
    let started = Instant::now();
    let mut backoff = Backoff::new(
        Duration::from_millis(ctx.settings.backoff_initial_ms),
        Duration::from_millis(ctx.settings.backoff_max_ms),
        ctx.timeout,
    );

    loop {
        if tail_contains(ctx, end).await? {
            return Ok(true);
        }
        match backoff.next_delay(started.elapsed()) {
            Some(delay) => tokio::time::sleep(delay).await,
            None => return Ok(false),
        }
    }
}

/// Wait until the cursor stops moving, bounded by the settle timeout.
async fn settle(ctx: &CaptureContext<'_>) -> Result<()> {
    let started = Instant::now();
    let limit = Duration::from_millis(ctx.settings.settle_timeout_ms);
    let interval = Duration::from_millis(ctx.settings.settle_interval_ms);
    let mut cursor = Settle::new();

    loop {
        let info = ctx.control.screen_info(ctx.session_id).await?;
        if cursor.observe(info.cursor_absolute()) {
            return Ok(());
        }
        if started.elapsed() >= limit {
            debug!("Cursor still moving after {:?}", limit);
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

pub(crate) async fn collect(
    dispatched: &mut DispatchedCommand,
    ctx: &CaptureContext<'_>,
) -> Result<CapturedOutput> {
    let sentinels = dispatched.sentinels().cloned().ok_or_else(|| {
        Error::InvalidInput("marker capture requires an isolated command".to_string())
    })?;

    dispatched.deliver(ctx.control, ctx.session_id).await?;

    let mut warnings = Vec::new();
    let found_end = wait_for_end(ctx, &sentinels.end).await?;
    if found_end {
        settle(ctx).await?;
    } else {
        warnings.push(timeout_warning(ctx.timeout));
    }

    let info = ctx.control.screen_info(ctx.session_id).await?;
    let total = info.total_rows();
    let start = total.saturating_sub(ctx.settings.max_scrollback_rows);
    let rows = ctx
        .control
        .read_rows(ctx.session_id, start, total - start)
        .await?;

    let slice = slice_between_markers(&rows, &sentinels);
    warnings.extend(slice.warning);
    debug!(
        "Marker capture for {}: {} of {} rows",
        dispatched.id(),
        slice.lines.len(),
        rows.len()
    );

    Ok(
        CapturedOutput::from_lines(&slice.lines, rows.len(), CaptureMethod::Marker, ctx.max_chars)
            .with_warnings(warnings)
            .with_completed(found_end),
    )
}
