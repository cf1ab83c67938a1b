//! Text messages and the `VERB [ARGUMENT]` command grammar.

use std::fmt;

/// Verb that asks the receiving side to shut down.
pub const QUIT_VERB: &str = "quit";

/// Verb injected by the periodic ticker of a command loop.
pub const PERIODIC_VERB: &str = "periodic";

/// One complete line, always terminated by exactly one `\n`.
///
/// Messages are only produced by the framed queue (or by [`Message::line`]),
/// so a consumer never observes a partial line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message(String);

impl Message {
    /// Builds a message from a single line of text, appending the terminator
    /// when it is missing.
    ///
    /// Returns `None` when `text` contains a newline anywhere but at its end.
    #[must_use]
    pub fn line(text: impl Into<String>) -> Option<Self> {
        let mut text = text.into();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let body = text.strip_suffix('\n').unwrap_or(&text);
        if body.contains('\n') {
            return None;
        }
        Some(Self(text))
    }

    /// Wraps a line already known to be complete.
    pub(crate) fn from_complete(text: String) -> Self {
        debug_assert!(text.ends_with('\n'));
        Self(text)
    }

    /// Full text including the trailing newline.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Text without the trailing line terminator.
    #[must_use]
    pub fn text(&self) -> &str {
        self.0.trim_end_matches(['\n', '\r'])
    }

    /// Wire bytes of the message.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parses the message into a command. `None` for blank lines.
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        Command::parse(&self.0)
    }

    /// True when the verb of this message is `quit` (any case).
    #[must_use]
    pub fn is_quit(&self) -> bool {
        self.command().is_some_and(|command| command.is(QUIT_VERB))
    }

    /// Consumes the message and returns its text, terminator included.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.text())
    }
}

/// A parsed `VERB [ARGUMENT]` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    argument: Option<String>,
}

impl Command {
    /// Splits a line into a lowercase verb and the optional remainder.
    ///
    /// Surrounding whitespace (line terminators included) is ignored and the
    /// argument keeps its inner spacing. Blank input yields `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let (verb, argument) = match trimmed.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, Some(rest.trim_start().to_owned())),
            None => (trimmed, None),
        };
        Some(Self {
            verb: verb.to_ascii_lowercase(),
            argument,
        })
    }

    /// Case-folded verb.
    #[must_use]
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Raw argument text, if any.
    #[must_use]
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Compares the verb case-insensitively.
    #[must_use]
    pub fn is(&self, verb: &str) -> bool {
        self.verb.eq_ignore_ascii_case(verb)
    }
}
