//! Property-based tests for command gating and output shaping.
//!
//! Uses proptest to generate random inputs and verify extraction invariants.

use proptest::prelude::*;

use shellbridge_core::{CaptureMethod, DispatchSettings, SecuritySettings};
use shellbridge_session::collector::truncate_chars;
use shellbridge_session::{
    slice_between_markers, CapturedOutput, CommandDispatcher, DispatchRequest, ResponseBuilder,
    ResponseMetadata, Sentinels,
};

/// Commands built from words without `d`, `m` or `r`, so no default
/// destructive pattern can appear.
fn harmless_command() -> impl Strategy<Value = String> {
    prop::collection::vec("[abcefghijklnopqstuvwxyz./-]{1,8}", 1..6)
        .prop_map(|words| words.join(" "))
}

/// Screen rows without marker text.
fn output_rows() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[ -~]{0,40}", 0..30).prop_map(|rows| {
        rows.into_iter()
            .filter(|r| !r.contains("SHELLBRIDGE"))
            .collect()
    })
}

proptest! {
    /// Commands free of destructive patterns always pass the gate.
    #[test]
    fn harmless_commands_are_never_blocked(command in harmless_command()) {
        let dispatcher = CommandDispatcher::new(
            SecuritySettings::default(),
            DispatchSettings::default(),
        );
        prop_assert!(dispatcher.check_policy(&command, true).is_ok());
    }

    /// Any command passes once confirmation is waived.
    #[test]
    fn confirmation_waiver_always_passes(command in "[ -~]{0,60}") {
        let dispatcher = CommandDispatcher::new(
            SecuritySettings::default(),
            DispatchSettings::default(),
        );
        prop_assert!(dispatcher.check_policy(&command, false).is_ok());
    }

    /// Blocked commands never leave a script behind.
    #[test]
    fn blocked_commands_stage_nothing(suffix in "[a-z/ ]{0,20}") {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = CommandDispatcher::new(
            SecuritySettings::default(),
            DispatchSettings {
                script_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            },
        );
        let request = DispatchRequest {
            command: format!("rm {suffix}"),
            require_confirmation: true,
            ..Default::default()
        };

        prop_assert!(dispatcher.prepare(&request).is_err());
        prop_assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Truncation is a char-boundary prefix and idempotent.
    #[test]
    fn truncation_is_idempotent(text in "\\PC{0,200}", max in 0usize..150) {
        let (once, truncated, length) = truncate_chars(&text, max);
        prop_assert_eq!(length, text.chars().count());
        prop_assert_eq!(truncated, length > max);
        prop_assert!(text.starts_with(&once));
        prop_assert!(once.chars().count() <= max);

        let (twice, again, _) = truncate_chars(&once, max);
        prop_assert_eq!(&twice, &once);
        prop_assert!(!again);
    }

    /// The envelope ceiling holds no matter what the collector returned.
    #[test]
    fn envelope_respects_global_ceiling(rows in output_rows(), max in 1usize..200) {
        let builder = ResponseBuilder::new(max, 4096);
        let captured = CapturedOutput::from_lines(&rows, rows.len(), CaptureMethod::Marker, usize::MAX);
        let mut envelope = builder.build(captured, ResponseMetadata::default());

        prop_assert!(envelope.output.chars().count() <= max);
        prop_assert_eq!(envelope.output_length, envelope.output.chars().count());

        let before = envelope.clone();
        envelope.apply_ceiling(max);
        prop_assert_eq!(envelope, before);
    }

    /// Output bracketed by markers is recovered exactly, whatever surrounds it.
    #[test]
    fn markers_bracket_output_exactly(
        before in output_rows(),
        body in output_rows(),
        after in output_rows(),
    ) {
        let sentinels = Sentinels::for_id("prop");
        let mut screen = before;
        screen.push(sentinels.begin.clone());
        screen.extend(body.iter().cloned());
        screen.push(sentinels.end.clone());
        screen.extend(after);

        let slice = slice_between_markers(&screen, &sentinels);
        prop_assert_eq!(slice.lines, body);
        prop_assert!(slice.warning.is_none());
    }
}
