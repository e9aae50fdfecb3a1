//! Smol utilities for logging

use std::ascii;

/// Make an Ascii-safe string
pub fn ascii_escape(s: &[u8]) -> String {
    s.iter().flat_map(|&b| ascii::escape_default(b)).map(char::from).collect()
}

/// Like `ascii_escape`, but cut to at most `max` input bytes so a hostile
/// request line can't flood the log.
pub fn ascii_escape_prefix(s: &[u8], max: usize) -> String {
    if s.len() <= max {
        return ascii_escape(s);
    }

    let mut escaped = ascii_escape(&s[.. max]);
    escaped.push_str("...");
    escaped
}

#[test]
fn escapes_control_bytes() {
    assert_eq!(ascii_escape(b"GET /\r\n"), "GET /\\r\\n");
    assert_eq!(ascii_escape(b"\xff"), "\\xff");
}

#[test]
fn prefix_is_cut() {
    assert_eq!(ascii_escape_prefix(b"abcdef", 3), "abc...");
    assert_eq!(ascii_escape_prefix(b"abc", 3), "abc");
}
