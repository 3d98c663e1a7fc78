//! Streaming tokeniser for the BAPS3 wire protocol.
//!
//! BAPS3 is a line-oriented text protocol: every message is one line of
//! whitespace-separated words terminated by `\n`.  TCP gives no guarantee that
//! one `read()` returns exactly one line, so [`Tokeniser`] is a small state
//! machine that is fed raw bytes as they arrive and hands back every line that
//! became complete, keeping the unfinished tail for the next call.
//!
//! # Grammar
//!
//! ```text
//! FOO bar\n                 -> ["FOO", "bar"]
//! FOO "bar baz" qux\n       -> ["FOO", "bar baz", "qux"]
//! FOO 'it'\''s'\n           -> ["FOO", "it's"]
//! FOO "say \"hi\""\n        -> ["FOO", "say \"hi\""]
//! FOO a\ b\n                -> ["FOO", "a b"]
//! ```
//!
//! - Words are separated by runs of unquoted whitespace (space, tab, `\r`,
//!   vertical tab, form feed).  A line with no words produces nothing.
//! - `'...'` is fully literal: no escapes, may span whitespace and newlines.
//! - `"..."` may span whitespace; inside it `\` escapes the next byte.
//! - Outside quotes `\` escapes the next byte, including `\n`.
//! - Quoted and unquoted segments that touch form a single word, and an empty
//!   quoted segment (`''` or `""`) is an empty word.
//!
//! # Error handling
//!
//! Errors are reported per line so one bad line never costs the caller the
//! good lines around it: see [`TokeniseError`].

use std::mem;

use thiserror::Error;

/// One decoded protocol line: its words, in order.
pub type Line = Vec<String>;

/// Default upper bound on the bytes of a single line, newline included.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Reasons a single line could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokeniseError {
    /// The bytes of the word at index `word` are not valid UTF-8.
    #[error("word {word} of the line is not valid UTF-8")]
    InvalidUtf8 { word: usize },

    /// The line grew past the configured limit and was discarded.
    #[error("line exceeds the {limit}-byte limit")]
    LineTooLong { limit: usize },
}

/// Which kind of quoted segment the tokeniser is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Quote {
    #[default]
    None,
    Single,
    Double,
}

/// Incremental BAPS3 line tokeniser.
///
/// # Examples
///
/// ```rust
/// use bifrost_core::protocol::Tokeniser;
///
/// let mut tok = Tokeniser::new();
/// assert!(tok.decode(b"FOO B").is_empty());
/// let lines = tok.decode(b"AR\n");
/// assert_eq!(lines, vec![Ok(vec!["FOO".to_string(), "BAR".to_string()])]);
/// ```
#[derive(Debug, Clone)]
pub struct Tokeniser {
    quote: Quote,
    escaping: bool,
    /// Set once the current word has started, even if it is still empty
    /// (needed so `''` yields an empty word).
    in_word: bool,
    word: Vec<u8>,
    words: Vec<Vec<u8>>,
    /// Bytes of the current line seen so far, newline included.
    line_len: usize,
    /// The current line blew the limit; its bytes are being thrown away.
    overflowed: bool,
    max_line_len: usize,
}

impl Tokeniser {
    /// Creates a tokeniser with the [`DEFAULT_MAX_LINE_LEN`] limit.
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    /// Creates a tokeniser that rejects lines longer than `max_line_len` bytes.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            quote: Quote::None,
            escaping: false,
            in_word: false,
            word: Vec::new(),
            words: Vec::new(),
            line_len: 0,
            overflowed: false,
            max_line_len,
        }
    }

    /// Feeds `bytes` into the tokeniser and returns every line they completed.
    ///
    /// Bytes after the last line terminator are kept and resumed by the next
    /// call.  Empty input returns an empty vector and leaves that partial line
    /// untouched.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Result<Line, TokeniseError>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if let Some(line) = self.push_byte(byte) {
                lines.push(line);
            }
        }
        lines
    }

    /// Returns `true` if bytes of an unfinished line are buffered.
    pub fn has_partial(&self) -> bool {
        self.line_len > 0
    }

    /// Flushes the buffered partial line at end of stream.
    ///
    /// An open quote is treated as closed and a dangling escape is dropped.
    /// Returns `None` if the partial line holds no words.
    pub fn finish(&mut self) -> Option<Result<Line, TokeniseError>> {
        self.quote = Quote::None;
        self.escaping = false;
        self.end_line()
    }

    fn push_byte(&mut self, byte: u8) -> Option<Result<Line, TokeniseError>> {
        self.line_len += 1;
        if self.line_len > self.max_line_len && !self.overflowed {
            self.overflowed = true;
            self.word.clear();
            self.words.clear();
        }

        if self.escaping {
            self.escaping = false;
            self.put(byte);
            return None;
        }

        match self.quote {
            Quote::Single => match byte {
                b'\'' => self.quote = Quote::None,
                _ => self.put(byte),
            },
            Quote::Double => match byte {
                b'"' => self.quote = Quote::None,
                b'\\' => self.escaping = true,
                _ => self.put(byte),
            },
            Quote::None => match byte {
                b'\n' => return self.end_line(),
                b'\'' => {
                    self.in_word = true;
                    self.quote = Quote::Single;
                }
                b'"' => {
                    self.in_word = true;
                    self.quote = Quote::Double;
                }
                b'\\' => self.escaping = true,
                b if is_separator(b) => self.end_word(),
                _ => self.put(byte),
            },
        }
        None
    }

    fn put(&mut self, byte: u8) {
        self.in_word = true;
        if !self.overflowed {
            self.word.push(byte);
        }
    }

    fn end_word(&mut self) {
        if !self.in_word {
            return;
        }
        self.in_word = false;
        let word = mem::take(&mut self.word);
        if !self.overflowed {
            self.words.push(word);
        }
    }

    fn end_line(&mut self) -> Option<Result<Line, TokeniseError>> {
        self.end_word();
        self.line_len = 0;
        let words = mem::take(&mut self.words);

        if mem::replace(&mut self.overflowed, false) {
            return Some(Err(TokeniseError::LineTooLong {
                limit: self.max_line_len,
            }));
        }
        if words.is_empty() {
            return None;
        }
        Some(
            words
                .into_iter()
                .enumerate()
                .map(|(index, word)| {
                    String::from_utf8(word).map_err(|_| TokeniseError::InvalidUtf8 { word: index })
                })
                .collect(),
        )
    }
}

impl Default for Tokeniser {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `true` for the bytes that separate words on a line.
pub(crate) fn is_separator(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | 0x0b | 0x0c)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Line {
        items.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_plain_words_split_on_whitespace() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"  FOO\tbar   baz \r\n");
        assert_eq!(lines, vec![Ok(words(&["FOO", "bar", "baz"]))]);
    }

    #[test]
    fn test_double_quotes_keep_whitespace() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"FOO \"bar baz\" qux\n");
        assert_eq!(lines, vec![Ok(words(&["FOO", "bar baz", "qux"]))]);
    }

    #[test]
    fn test_double_quotes_honour_backslash_escapes() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"SAY \"a \\\"quoted\\\" \\\\ word\"\n");
        assert_eq!(lines, vec![Ok(words(&["SAY", "a \"quoted\" \\ word"]))]);
    }

    #[test]
    fn test_single_quotes_are_literal() {
        // Arrange: backslash and double quote have no special meaning inside '...'
        let mut tok = Tokeniser::new();

        // Act
        let lines = tok.decode(b"LOAD 'C:\\music\\a \"b\".mp3'\n");

        // Assert
        assert_eq!(lines, vec![Ok(words(&["LOAD", "C:\\music\\a \"b\".mp3"]))]);
    }

    #[test]
    fn test_single_quote_embedded_via_concatenation() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"TITLE 'it'\\''s'\n");
        assert_eq!(lines, vec![Ok(words(&["TITLE", "it's"]))]);
    }

    #[test]
    fn test_backslash_outside_quotes_escapes_separator_and_newline() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"A b\\ c d\\\ne\n");
        assert_eq!(lines, vec![Ok(words(&["A", "b c", "d\ne"]))]);
    }

    #[test]
    fn test_empty_quoted_segments_are_empty_words() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"X '' \"\"\n");
        assert_eq!(lines, vec![Ok(words(&["X", "", ""]))]);
    }

    #[test]
    fn test_adjacent_segments_join_into_one_word() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"a\"b c\"d'e f'\n");
        assert_eq!(lines, vec![Ok(words(&["ab cde f"]))]);
    }

    #[test]
    fn test_blank_lines_produce_nothing() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"\n   \n\t\r\nOK\n");
        assert_eq!(lines, vec![Ok(words(&["OK"]))]);
    }

    #[test]
    fn test_newline_inside_quotes_does_not_end_line() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"NOTE 'two\nlines'\n");
        assert_eq!(lines, vec![Ok(words(&["NOTE", "two\nlines"]))]);
    }

    #[test]
    fn test_many_lines_in_one_call() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"OHAI 'bifrost'\nSTATE Playing\nTIME 1000\n");
        assert_eq!(
            lines,
            vec![
                Ok(words(&["OHAI", "bifrost"])),
                Ok(words(&["STATE", "Playing"])),
                Ok(words(&["TIME", "1000"])),
            ]
        );
    }

    #[test]
    fn test_partial_line_is_resumed_on_next_call() {
        // Arrange
        let mut tok = Tokeniser::new();

        // Act: first fragment completes nothing
        let first = tok.decode(b"FOO B");

        // Assert
        assert!(first.is_empty());
        assert!(tok.has_partial());
        assert_eq!(tok.decode(b"AR\n"), vec![Ok(words(&["FOO", "BAR"]))]);
        assert!(!tok.has_partial());
    }

    #[test]
    fn test_empty_input_keeps_partial_line() {
        let mut tok = Tokeniser::new();
        tok.decode(b"STATE \"Pla");

        assert!(tok.decode(b"").is_empty());
        assert!(tok.has_partial());
        assert_eq!(
            tok.decode(b"ying now\"\n"),
            vec![Ok(words(&["STATE", "Playing now"]))]
        );
    }

    #[test]
    fn test_unterminated_quote_stays_buffered() {
        let mut tok = Tokeniser::new();
        assert!(tok.decode(b"X 'open\n").is_empty());
        assert!(tok.decode(b"more\n").is_empty());
        assert!(tok.has_partial());
    }

    #[test]
    fn test_finish_flushes_partial_line_and_closes_quote() {
        let mut tok = Tokeniser::new();
        tok.decode(b"END 'unterminated");

        assert_eq!(tok.finish(), Some(Ok(words(&["END", "unterminated"]))));
        assert!(!tok.has_partial());
        assert_eq!(tok.finish(), None);
    }

    #[test]
    fn test_finish_drops_dangling_escape() {
        let mut tok = Tokeniser::new();
        tok.decode(b"A b\\");
        assert_eq!(tok.finish(), Some(Ok(words(&["A", "b"]))));
    }

    #[test]
    fn test_finish_on_whitespace_only_tail_returns_none() {
        let mut tok = Tokeniser::new();
        tok.decode(b"   ");
        assert_eq!(tok.finish(), None);
    }

    #[test]
    fn test_invalid_utf8_rejects_only_that_line() {
        let mut tok = Tokeniser::new();
        let lines = tok.decode(b"OK 1\nBAD \xff\xfe\nOK 2\n");
        assert_eq!(
            lines,
            vec![
                Ok(words(&["OK", "1"])),
                Err(TokeniseError::InvalidUtf8 { word: 1 }),
                Ok(words(&["OK", "2"])),
            ]
        );
    }

    #[test]
    fn test_overlong_line_is_rejected_and_decoding_resynchronises() {
        // Arrange: a 16-byte limit
        let mut tok = Tokeniser::with_max_line_len(16);

        // Act: the first line is 31 bytes, spread over two reads
        let mut lines = tok.decode(b"LONG aaaaaaaaaaaa");
        lines.extend(tok.decode(b"aaaaaaaaaaaaa\nOK\n"));

        // Assert
        assert_eq!(
            lines,
            vec![
                Err(TokeniseError::LineTooLong { limit: 16 }),
                Ok(words(&["OK"])),
            ]
        );
    }

    #[test]
    fn test_line_exactly_at_limit_is_accepted() {
        let mut tok = Tokeniser::with_max_line_len(4);
        assert_eq!(tok.decode(b"A B\n"), vec![Ok(words(&["A", "B"]))]);
    }

    #[test]
    fn test_default_matches_new() {
        let tok = Tokeniser::default();
        assert_eq!(tok.max_line_len, DEFAULT_MAX_LINE_LEN);
        assert!(!tok.has_partial());
    }
}
