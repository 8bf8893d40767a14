//! Operator command parsing
//!
//! Commands arrive as plain text. The command word is matched
//! case-insensitively, with an optional leading `/` and `_` accepted in place
//! of `-`, so `/set_start 80`, `SET-START 80` and `setstart 80` are the same.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::progress::MessageId;

/// A parsed operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    SetInterval(u64),
    SetStart(MessageId),
    /// Start id taken from a message link.
    SetStartFromLink(MessageId),
    Status,
    Help,
}

impl Command {
    /// Stable name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start-loop",
            Command::Stop => "stop-loop",
            Command::SetInterval(_) => "set-interval",
            Command::SetStart(_) => "set-start",
            Command::SetStartFromLink(_) => "set-start-from-link",
            Command::Status => "status",
            Command::Help => "help",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unrecognized command: {0}")]
    Unrecognized(String),

    #[error("{command} expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("{command}: '{argument}' is not a non-negative integer")]
    MalformedArgument {
        command: &'static str,
        argument: String,
    },

    #[error("cannot find a message id in link '{0}'")]
    UnparseableLink(String),
}

/// Help text listing every command.
pub const HELP: &str = "\
start-loop - start forwarding
stop-loop - stop after the current message
set-interval <minutes> - delay between forwards
set-start <id> - begin the next run at message <id>
set-start-from-link <url> - begin the next run at the linked message
status - show current settings and progress";

static LINK_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^?#]*/(\d+)/?(?:[?#].*)?$").expect("valid message link regex")
});

/// Parse one line of operator input.
pub fn parse(input: &str) -> Result<Command, ParseError> {
    let input = input.trim();
    let (word, rest) = match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    };
    if word.is_empty() {
        return Err(ParseError::Empty);
    }

    let normalized = word
        .trim_start_matches('/')
        .to_lowercase()
        .replace('_', "-");

    match normalized.as_str() {
        "start-loop" | "start" => Ok(Command::Start),
        "stop-loop" | "stop" => Ok(Command::Stop),
        "status" => Ok(Command::Status),
        "help" => Ok(Command::Help),
        "set-interval" | "setting" | "interval" => {
            parse_number::<u64>("set-interval", "<minutes>", rest).map(Command::SetInterval)
        }
        "set-start" | "setstart" => {
            parse_number::<MessageId>("set-start", "<id>", rest).map(Command::SetStart)
        }
        "set-start-from-link" | "setlink" | "set-link" => {
            if rest.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "set-start-from-link",
                    expected: "<url>",
                });
            }
            link_message_id(rest)
                .map(Command::SetStartFromLink)
                .ok_or_else(|| ParseError::UnparseableLink(rest.to_string()))
        }
        _ => Err(ParseError::Unrecognized(word.to_string())),
    }
}

fn parse_number<T: std::str::FromStr>(
    command: &'static str,
    expected: &'static str,
    argument: &str,
) -> Result<T, ParseError> {
    if argument.is_empty() {
        return Err(ParseError::MissingArgument { command, expected });
    }
    // Leading '+' and '-' are rejected along with everything non-numeric.
    if !argument.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::MalformedArgument {
            command,
            argument: argument.to_string(),
        });
    }
    argument
        .parse::<T>()
        .map_err(|_| ParseError::MalformedArgument {
            command,
            argument: argument.to_string(),
        })
}

/// Extract the message id from a link such as `https://t.me/c/123/456`.
///
/// The id is the trailing numeric path segment; query and fragment are
/// ignored.
pub fn link_message_id(link: &str) -> Option<MessageId> {
    let link = link.trim();
    if link.contains(char::is_whitespace) {
        return None;
    }
    let captures = LINK_ID.captures(link)?;
    captures.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands_case_insensitively() {
        assert_eq!(parse("start-loop"), Ok(Command::Start));
        assert_eq!(parse("  /START  "), Ok(Command::Start));
        assert_eq!(parse("Stop_Loop"), Ok(Command::Stop));
        assert_eq!(parse("/stop"), Ok(Command::Stop));
        assert_eq!(parse("STATUS"), Ok(Command::Status));
        assert_eq!(parse("/help"), Ok(Command::Help));
    }

    #[test]
    fn parses_interval() {
        assert_eq!(parse("set-interval 5"), Ok(Command::SetInterval(5)));
        assert_eq!(parse("/setting 0"), Ok(Command::SetInterval(0)));
        assert_eq!(parse("SET_INTERVAL   15 "), Ok(Command::SetInterval(15)));
    }

    #[test]
    fn rejects_malformed_interval() {
        for bad in ["set-interval -1", "set-interval ten", "set-interval 1.5", "set-interval +3"] {
            assert!(
                matches!(parse(bad), Err(ParseError::MalformedArgument { command: "set-interval", .. })),
                "{}",
                bad
            );
        }
        assert_eq!(
            parse("set-interval"),
            Err(ParseError::MissingArgument {
                command: "set-interval",
                expected: "<minutes>"
            })
        );
    }

    #[test]
    fn parses_start_id_within_message_id_range() {
        assert_eq!(parse("set-start 80"), Ok(Command::SetStart(80)));
        assert_eq!(parse("/setstart 0"), Ok(Command::SetStart(0)));
        assert_eq!(
            parse("set-start 2147483647"),
            Ok(Command::SetStart(MessageId::MAX))
        );
        assert!(matches!(
            parse("set-start 2147483648"),
            Err(ParseError::MalformedArgument { .. })
        ));
        assert!(matches!(
            parse("set-start -4"),
            Err(ParseError::MalformedArgument { .. })
        ));
    }

    #[test]
    fn parses_links() {
        assert_eq!(
            parse("set-start-from-link https://t.me/c/1234567890/456"),
            Ok(Command::SetStartFromLink(456))
        );
        assert_eq!(
            parse("/setlink https://t.me/some_channel/789?single"),
            Ok(Command::SetStartFromLink(789))
        );
        assert_eq!(
            parse("setlink t.me/some_channel/12/"),
            Ok(Command::SetStartFromLink(12))
        );
    }

    #[test]
    fn rejects_links_without_trailing_id() {
        for bad in [
            "setlink https://t.me/some_channel",
            "setlink https://t.me/some_channel/abc",
            "setlink https://t.me/c/123/45x",
            "setlink not a link",
        ] {
            assert!(
                matches!(parse(bad), Err(ParseError::UnparseableLink(_))),
                "{}",
                bad
            );
        }
        assert!(matches!(
            parse("set-start-from-link"),
            Err(ParseError::MissingArgument { .. })
        ));
    }

    #[test]
    fn unknown_and_empty_input() {
        assert_eq!(
            parse("launch"),
            Err(ParseError::Unrecognized("launch".into()))
        );
        assert_eq!(parse("   "), Err(ParseError::Empty));
    }

    #[test]
    fn link_id_ignores_fragment() {
        assert_eq!(link_message_id("https://t.me/c/1/2#comment"), Some(2));
        assert_eq!(link_message_id("https://t.me/c/1/99999999999"), None);
    }

    #[test]
    fn command_names_are_canonical() {
        assert_eq!(Command::SetStartFromLink(1).name(), "set-start-from-link");
        assert_eq!(Command::SetInterval(1).name(), "set-interval");
    }
}
