//! Error handling for the gateway

use std::error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// A Result for internal operations.
pub type Result<T> = ::std::result::Result<T, Error>;

/// All errors which might arise within the application
#[derive(Debug)]
pub enum Error {
    Parse(httparse::Error),
    Io(io::Error),
    /// The request body ended before the declared `Content-Length`
    ShortBody { declared: u64, received: u64 },
    /// The handler ran past its deadline and was killed
    HandlerTimeout(Duration),
    /// The handler process could not be launched
    HandlerStart { program: PathBuf, cause: io::Error },
    /// The handler wrote more than the configured output limit
    OutputTooLarge(usize),
    RequestLineTooLong,
    PathNotInOriginForm,
    IllegalPercentEncoding,
    LengthRequired,
    PermissionDenied,
    RequestIncomplete
}

impl Error {
    /// The HTTP status this error degrades to when it ends a request
    pub fn status_code(&self) -> u16 {
        match *self {
            Error::ShortBody { .. } => 400,
            Error::HandlerTimeout(_) => 504,
            Error::Parse(_) |
            Error::PathNotInOriginForm |
            Error::IllegalPercentEncoding |
            Error::RequestIncomplete => 400,
            Error::RequestLineTooLong => 414,
            Error::LengthRequired => 411,
            Error::PermissionDenied => 403,
            Error::Io(_) |
            Error::HandlerStart { .. } |
            Error::OutputTooLarge(_) => 500
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Parse(ref e) => write!(f, "malformed request: {}", e),
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
            Error::ShortBody { declared, received } =>
                write!(f, "request body ended after {} of {} declared bytes",
                       received, declared),
            Error::HandlerTimeout(limit) =>
                write!(f, "handler did not finish within {:?}", limit),
            Error::HandlerStart { ref program, ref cause } =>
                write!(f, "could not start handler {}: {}",
                       program.display(), cause),
            Error::OutputTooLarge(limit) =>
                write!(f, "handler output exceeded {} bytes", limit),
            Error::RequestLineTooLong => f.write_str("request head too long"),
            Error::PathNotInOriginForm =>
                f.write_str("request target is not in origin form"),
            Error::IllegalPercentEncoding =>
                f.write_str("illegal percent-encoding in request path"),
            Error::LengthRequired =>
                f.write_str("request body without Content-Length"),
            Error::PermissionDenied => f.write_str("permission denied"),
            Error::RequestIncomplete => f.write_str("request incomplete")
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Parse(ref e) => Some(e),
            Error::Io(ref e) => Some(e),
            Error::HandlerStart { ref cause, .. } => Some(cause),
            _ => None
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Error {
        Error::Parse(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

#[test]
fn gateway_errors_map_to_their_statuses() {
    let short = Error::ShortBody { declared: 11, received: 9 };
    assert_eq!(short.status_code(), 400);
    assert_eq!(Error::HandlerTimeout(Duration::from_secs(1)).status_code(), 504);

    let start = Error::HandlerStart {
        program: PathBuf::from("/nope"),
        cause: io::Error::new(io::ErrorKind::NotFound, "gone")
    };
    assert_eq!(start.status_code(), 500);
    assert_eq!(Error::OutputTooLarge(10).status_code(), 500);
}

#[test]
fn short_body_message_names_both_lengths() {
    let message = Error::ShortBody { declared: 11, received: 9 }.to_string();
    assert!(message.contains("9 of 11"));
}
