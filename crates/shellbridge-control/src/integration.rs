//! Shell-integration record format.
//!
//! The shell hooks in `integration/` store one record per completed command
//! in the pane user option [`PROMPT_OPTION`]:
//!
//! ```text
//! <id>;<start-row>;<end-row>;<command>
//! ```
//!
//! Rows are absolute (`history_size + cursor_y` at the time they were
//! sampled). The command comes last so it may contain `;`.

use shellbridge_core::{PromptBoundary, RowRange};

/// Pane user option holding the latest prompt record.
pub const PROMPT_OPTION: &str = "@shellbridge_prompt";

/// Parse a prompt record. Empty or malformed values yield `None`.
pub fn parse_record(value: &str) -> Option<PromptBoundary> {
    let value = value.trim_end_matches(['\r', '\n']);
    let mut parts = value.splitn(4, ';');

    let id = parts.next()?.trim();
    if id.is_empty() {
        return None;
    }
    let start = parts.next()?.trim().parse::<usize>().ok()?;
    let end = parts.next()?.trim().parse::<usize>().ok()?;
    let command = parts.next().unwrap_or_default();

    Some(PromptBoundary {
        id: id.to_string(),
        command: command.to_string(),
        output_rows: RowRange::new(start, end),
    })
}

/// Format a boundary as a prompt record.
pub fn format_record(boundary: &PromptBoundary) -> String {
    format!(
        "{};{};{};{}",
        boundary.id,
        boundary.output_rows.start,
        boundary.output_rows.end,
        boundary.command.replace('\n', " ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let boundary = parse_record("4242-1;100;103;make test").unwrap();
        assert_eq!(boundary.id, "4242-1");
        assert_eq!(boundary.command, "make test");
        assert_eq!(boundary.output_rows, RowRange::new(100, 103));
    }

    #[test]
    fn test_parse_record_command_with_semicolons() {
        let boundary = parse_record("1;0;2;cd x; ls; pwd").unwrap();
        assert_eq!(boundary.command, "cd x; ls; pwd");
    }

    #[test]
    fn test_parse_record_without_command() {
        let boundary = parse_record("7;5;5").unwrap();
        assert_eq!(boundary.command, "");
        assert!(boundary.output_rows.is_empty());
    }

    #[test]
    fn test_parse_record_rejects_garbage() {
        assert!(parse_record("").is_none());
        assert!(parse_record("\n").is_none());
        assert!(parse_record(";1;2;ls").is_none());
        assert!(parse_record("id;x;2;ls").is_none());
        assert!(parse_record("id;1").is_none());
    }

    #[test]
    fn test_format_record_flattens_newlines() {
        let boundary = PromptBoundary {
            id: "9".to_string(),
            command: "echo a\necho b".to_string(),
            output_rows: RowRange::new(1, 3),
        };
        let record = format_record(&boundary);
        assert_eq!(record, "9;1;3;echo a echo b");
        assert_eq!(parse_record(&record).unwrap().output_rows, boundary.output_rows);
    }
}
