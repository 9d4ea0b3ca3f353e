//! Helpers for turning request paths into filesystem paths

use crate::errors::{Error, Result};

/// Splits a request path into decoded segments.
///
/// Runs of `'/'` are collapsed, `"."` segments are dropped and
/// percent-encoded bytes are decoded. The path must lead with a `'/'`.
/// Bogus percent-encoding, like `b"%bo"`, a `".."` segment or a decoded
/// `'/'` or NUL inside a segment are errors, so a segment always names a
/// single directory entry.
pub fn path_segments(path: &[u8]) -> Result<Vec<Vec<u8>>> {
    if path.first() != Some(&b'/') {
        return Err(Error::PathNotInOriginForm);
    }

    let mut segments = Vec::new();
    for raw in path.split(|&b| b == b'/') {
        if raw.is_empty() || raw == b"." {
            continue;
        }

        let segment = percent_decode(raw)?;
        if segment == b".." ||
            segment.iter().any(|&b| b == b'/' || b == 0) {
            return Err(Error::PermissionDenied);
        }
        segments.push(segment);
    }

    Ok(segments)
}

fn percent_decode(raw: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        match raw[i] {
            b'%' => {
                if raw.len() < i + 3 {
                    return Err(Error::IllegalPercentEncoding);
                }

                let high_nybble = raw[i + 1];
                let low_nybble = raw[i + 2];

                if !is_hexit(high_nybble) || !is_hexit(low_nybble) {
                    return Err(Error::IllegalPercentEncoding);
                }

                buffer.push(from_hexit(high_nybble) << 4 |
                            from_hexit(low_nybble));

                i += 3;
            },
            b => {
                buffer.push(b);
                i += 1;
            }
        }
    }

    Ok(buffer)
}

/// Returns `true` iff the byte is a hexadecimal digit according to ASCII
fn is_hexit(x: u8) -> bool {
    x.is_ascii_hexdigit()
}

/// Converts from a hexadecimal digit to its value
fn from_hexit(x: u8) -> u8 {
    match x {
        b'0'..=b'9' => x - b'0',
        b'A'..=b'F' => x - b'A' + 10,
        b'a'..=b'f' => x - b'a' + 10,
        _ => panic!("Contract violation: from_hexit expected a hexit, got 0x{:X}", x)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn segs(path: &[u8]) -> Vec<Vec<u8>> {
        path_segments(path).unwrap()
    }

    #[test]
    fn collapses_slash_runs() {
        assert_eq!(segs(b"//cgi-bin///echo.py/"),
                   vec![b"cgi-bin".to_vec(), b"echo.py".to_vec()]);
    }

    #[test]
    fn decodes_percents_per_segment() {
        assert_eq!(segs(b"/foo%20bar/trail%20"),
                   vec![b"foo bar".to_vec(), b"trail ".to_vec()]);
    }

    #[test]
    fn drops_dot_segments() {
        assert_eq!(segs(b"/./a/."), vec![b"a".to_vec()]);
    }

    #[test]
    fn rejects_parent_segments_even_encoded() {
        assert!(path_segments(b"/a/../etc").is_err());
        assert!(path_segments(b"/a/%2e%2e/etc").is_err());
        assert!(path_segments(b"/a%2fb").is_err());
    }

    #[test]
    fn errors_on_bogus_percent() {
        assert!(path_segments(b"/bog%us").is_err());
        assert!(path_segments(b"/trailing%2").is_err());
    }

    #[test]
    fn errors_without_leading_slash() {
        assert!(path_segments(b"bogus").is_err());
    }

    #[test]
    fn from_hexit_works() {
        use std::char;

        for x in 0x0 .. 0x10 {
            assert_eq!(from_hexit(char::from_digit(x, 16).unwrap() as u8), x as u8);
        }
    }
}
