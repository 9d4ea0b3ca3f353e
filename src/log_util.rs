//! Smol utilities for logging

use std::ascii;

/// Make an Ascii-safe string out of bytes a handler or client gave us
pub fn ascii_escape(s: &[u8]) -> String {
    s.iter()
        .flat_map(|&b| ascii::escape_default(b))
        .map(char::from)
        .collect()
}

#[test]
fn escapes_control_and_high_bytes() {
    assert_eq!(ascii_escape(b"ok"), "ok");
    assert_eq!(ascii_escape(b"a\r\nb"), "a\\r\\nb");
    assert_eq!(ascii_escape(b"\xff"), "\\xff");
}
