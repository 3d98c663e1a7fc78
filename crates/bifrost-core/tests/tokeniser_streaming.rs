//! Integration tests for the bifrost-core tokeniser and message types.
//!
//! These tests drive the public API the way the bridge's backend connector
//! does: bytes arrive in arbitrary fragments, and every complete line must be
//! decoded exactly once, in order, no matter where TCP split the stream.

use bifrost_core::{Line, Message, TokeniseError, Tokeniser};

/// Decodes `bytes` in one call and unwraps every line.
fn decode_whole(bytes: &[u8]) -> Vec<Line> {
    let mut tok = Tokeniser::new();
    tok.decode(bytes)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("fixture lines must be valid")
}

/// Decodes `bytes` split at `offset` into two calls.
fn decode_split(bytes: &[u8], offset: usize) -> Vec<Result<Line, TokeniseError>> {
    let mut tok = Tokeniser::new();
    let mut lines = tok.decode(&bytes[..offset]);
    lines.extend(tok.decode(&bytes[offset..]));
    lines
}

fn words(items: &[&str]) -> Line {
    items.iter().map(|w| w.to_string()).collect()
}

#[test]
fn test_quoted_word_keeps_internal_whitespace() {
    let lines = decode_whole(b"FOO \"bar baz\" qux\n");
    assert_eq!(lines, vec![words(&["FOO", "bar baz", "qux"])]);
}

#[test]
fn test_line_split_mid_word_matches_whole_line() {
    // Arrange
    let mut tok = Tokeniser::new();

    // Act
    let first = tok.decode(b"FOO B");
    let second = tok.decode(b"AR\n");

    // Assert
    assert!(first.is_empty());
    assert_eq!(second, vec![Ok(words(&["FOO", "BAR"]))]);
    assert_eq!(decode_whole(b"FOO BAR\n"), vec![words(&["FOO", "BAR"])]);
}

#[test]
fn test_every_split_offset_decodes_identically() {
    // Arrange: a stream exercising quotes, escapes and several lines
    let stream: &[u8] =
        b"OHAI 'playd 0.2.0'\nFLOAD \"C:\\\\Music\\\\a \\\"b\\\".mp3\"\nTITLE 'it'\\''s'\nTIME 1000\n";
    let expected: Vec<Result<Line, TokeniseError>> =
        decode_whole(stream).into_iter().map(Ok).collect();
    assert_eq!(expected.len(), 4);

    // Act + Assert: every split point, including inside quotes and escapes
    for offset in 0..=stream.len() {
        assert_eq!(
            decode_split(stream, offset),
            expected,
            "split at byte {offset} changed the result"
        );
    }
}

#[test]
fn test_byte_at_a_time_feed_decodes_identically() {
    let stream = b"STATE Playing\nNOTE \"two words\" 'and three words'\n";
    let mut tok = Tokeniser::new();
    let mut lines = Vec::new();
    for byte in stream.iter() {
        lines.extend(tok.decode(std::slice::from_ref(byte)));
    }
    assert_eq!(
        lines,
        vec![
            Ok(words(&["STATE", "Playing"])),
            Ok(words(&["NOTE", "two words", "and three words"])),
        ]
    );
}

#[test]
fn test_decoded_lines_become_messages() {
    let lines = decode_whole(b"OHAI 'playd 0.2.0'\nSTATE Stopped\n");
    let messages: Vec<Message> = lines
        .into_iter()
        .map(|line| Message::from_line(line).unwrap())
        .collect();

    assert_eq!(messages[0].word(), "OHAI");
    assert_eq!(messages[0].arg(0), Some("playd 0.2.0"));
    assert_eq!(messages[1], Message::new("STATE").with_arg("Stopped"));
    assert_eq!(messages[0].to_string(), "OHAI 'playd 0.2.0'");
}
