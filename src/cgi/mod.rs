//! Process CGI/1.1 response messages
//!
//! A handler writes a header block, a blank line and a body to its standard
//! output. The header block may carry a `Status` pseudo-header; everything
//! else is forwarded to the client.

pub mod parser;

pub use self::parser::{Body, ResponseParser};

use crate::http::{canonical_reason, Headers};

/// A status line
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Status {
    pub code: u16,
    pub reason_phrase: String
}

impl Status {
    pub fn new(code: u16) -> Status {
        Status {
            code,
            reason_phrase: String::from(canonical_reason(code))
        }
    }
}

/// The header portion of a handler's output
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ResponseHead {
    pub status: Status,
    /// Whether `status` came from a `Status` header rather than a default
    pub status_header: bool,
    /// Forwardable headers, in the order the handler wrote them
    pub headers: Headers,
    /// `false` when the output had no blank line and was taken as all body
    pub delimited: bool
}

/// A handler's output, split and normalized
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParsedResponse {
    pub status: Status,
    pub status_header: bool,
    pub headers: Headers,
    pub body: Vec<u8>
}

impl ResponseHead {
    pub fn with_body(self, body: Vec<u8>) -> ParsedResponse {
        ParsedResponse {
            status: self.status,
            status_header: self.status_header,
            headers: self.headers,
            body
        }
    }
}
