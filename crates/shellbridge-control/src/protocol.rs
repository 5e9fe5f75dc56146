//! tmux control-mode line protocol.
//!
//! A control client writes one command per line. tmux answers every command
//! with a block
//!
//! ```text
//! %begin <time> <number> <flags>
//! ...output lines...
//! %end <time> <number> <flags>      (or %error on failure)
//! ```
//!
//! and interleaves asynchronous notifications (`%output`, `%exit`,
//! `%subscription-changed`, ...) between blocks.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref GUARD_RE: Regex =
        Regex::new(r"^%(begin|end|error) (\d+) (\d+) (\d+)$").unwrap();
}

/// One parsed line of control-mode output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    /// Start of a command response block
    Begin {
        /// Command number, matched by the closing guard
        number: u64,
    },
    /// Successful end of a response block
    End {
        /// Command number
        number: u64,
    },
    /// Failed end of a response block
    Error {
        /// Command number
        number: u64,
    },
    /// The control client is exiting
    Exit(Option<String>),
    /// A format subscription changed value
    SubscriptionChanged(SubscriptionChange),
    /// Any other `%` notification
    Notification(String),
    /// Plain text (only meaningful inside a block)
    Text(String),
}

/// Payload of a `%subscription-changed` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// Subscription name given to `refresh-client -B`
    pub name: String,
    /// Pane id (`%n`) the value belongs to, when pane-scoped
    pub pane_id: Option<String>,
    /// New value of the subscribed format
    pub value: String,
}

impl ControlLine {
    /// Parse a single line (without its trailing newline).
    pub fn parse(line: &str) -> Self {
        if let Some(caps) = GUARD_RE.captures(line) {
            let number = caps[3].parse().unwrap_or_default();
            return match &caps[1] {
                "begin" => ControlLine::Begin { number },
                "end" => ControlLine::End { number },
                _ => ControlLine::Error { number },
            };
        }

        if line == "%exit" {
            return ControlLine::Exit(None);
        }
        if let Some(reason) = line.strip_prefix("%exit ") {
            return ControlLine::Exit(Some(reason.to_string()));
        }

        if let Some(rest) = line.strip_prefix("%subscription-changed ") {
            if let Some(change) = Self::parse_subscription(rest) {
                return ControlLine::SubscriptionChanged(change);
            }
        }

        if line.starts_with('%') {
            return ControlLine::Notification(line.to_string());
        }

        ControlLine::Text(line.to_string())
    }

    /// `<name> <session> <window> <index> <pane> ... : <value>`
    fn parse_subscription(rest: &str) -> Option<SubscriptionChange> {
        let (head, value) = rest.split_once(" : ")?;
        let mut fields = head.split_whitespace();
        let name = fields.next()?.to_string();
        let pane_id = fields.find(|f| f.starts_with('%')).map(str::to_string);

        Some(SubscriptionChange {
            name,
            pane_id,
            value: value.to_string(),
        })
    }
}

/// Quote an argument for the tmux command parser.
///
/// Single-quoted strings are taken literally by tmux; embedded single
/// quotes are written as `'\''`.
pub fn quote_arg(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Encode text as `send-keys -H` arguments, one hex byte each.
///
/// Line feeds become carriage returns, which is what the Enter key sends.
pub fn hex_keys(text: &str) -> Vec<String> {
    text.bytes()
        .map(|b| if b == b'\n' { b'\r' } else { b })
        .map(|b| format!("{b:02x}"))
        .collect()
}
