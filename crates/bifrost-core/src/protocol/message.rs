//! BAPS3 messages: a command word followed by zero or more arguments.
//!
//! The tokeniser only knows about words; this module gives the first word of a
//! line its meaning (the command, such as `OHAI`, `STATE` or `TIME`) and packs
//! messages back into wire text so they can be sent to the server or shown to
//! WebSocket clients.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::protocol::tokeniser::{is_separator, Line};

/// Errors that can occur when interpreting a line as a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The line had no words, so there is no command word.
    #[error("line has no command word")]
    Empty,
}

/// A single BAPS3 protocol message.
///
/// # Examples
///
/// ```rust
/// use bifrost_core::protocol::Message;
///
/// let msg = Message::new("LOAD").with_arg("0").with_arg("My Song.mp3");
/// assert_eq!(msg.to_string(), "LOAD 0 'My Song.mp3'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    word: String,
    args: Vec<String>,
}

impl Message {
    /// Creates a message with no arguments.
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument, builder style.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Interprets a tokenised line: the first word is the command.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Empty`] if `line` has no words.
    pub fn from_line(line: Line) -> Result<Self, MessageError> {
        let mut words = line.into_iter();
        let word = words.next().ok_or(MessageError::Empty)?;
        Ok(Self {
            word,
            args: words.collect(),
        })
    }

    /// The command word.
    pub fn word(&self) -> &str {
        &self.word
    }

    /// All arguments after the command word.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Packs the message into one wire line, newline included.
    pub fn to_wire(&self) -> String {
        format!("{self}\n")
    }

    /// Turns the message back into its words.
    pub fn into_line(self) -> Line {
        let mut line = Vec::with_capacity(self.args.len() + 1);
        line.push(self.word);
        line.extend(self.args);
        line
    }
}

impl TryFrom<Line> for Message {
    type Error = MessageError;

    fn try_from(line: Line) -> Result<Self, Self::Error> {
        Self::from_line(line)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pack_word(&self.word))?;
        for arg in &self.args {
            f.write_str(" ")?;
            f.write_str(&pack_word(arg))?;
        }
        Ok(())
    }
}

/// Quotes `word` if the tokeniser would otherwise split or alter it.
///
/// Single quotes are used because nothing inside them is special; an embedded
/// `'` closes the quote, emits an escaped quote and reopens it (`'\''`).
fn pack_word(word: &str) -> Cow<'_, str> {
    if !word.is_empty() && !word.bytes().any(needs_quoting) {
        return Cow::Borrowed(word);
    }
    let mut packed = String::with_capacity(word.len() + 2);
    packed.push('\'');
    for c in word.chars() {
        if c == '\'' {
            packed.push_str("'\\''");
        } else {
            packed.push(c);
        }
    }
    packed.push('\'');
    Cow::Owned(packed)
}

fn needs_quoting(byte: u8) -> bool {
    matches!(byte, b'\'' | b'"' | b'\\' | b'\n') || is_separator(byte)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
