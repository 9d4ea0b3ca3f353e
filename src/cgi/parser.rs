//! Parsers for CGI/1.1 responses

use crate::cgi::{ParsedResponse, ResponseHead, Status};
use crate::errors::{Error, Result};
use crate::http::Headers;
use crate::log_util::ascii_escape;

use log::{debug, warn};
use nom::bytes::complete::{tag, take_while1, take_while_m_n};
use nom::character::complete::{space0, space1};
use nom::character::is_digit;
use nom::combinator::{all_consuming, map_res, opt, rest, verify};
use nom::sequence::{preceded, tuple};
use nom::IResult;

use std::io::{self, Read};
use std::str;

const READ_CHUNK: usize = 4096;

/// Splits handler output into a head and a body
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    max_header_bytes: usize,
    max_output_bytes: usize
}

impl ResponseParser {
    /// `max_header_bytes` bounds the search for the blank line;
    /// `max_output_bytes` bounds everything read from the handler.
    pub fn new(max_header_bytes: usize, max_output_bytes: usize)
               -> ResponseParser
    {
        ResponseParser {
            max_header_bytes: max_header_bytes.min(max_output_bytes),
            max_output_bytes
        }
    }

    /// Reads until the header block is complete and parses it.
    ///
    /// The returned `Body` yields the bytes after the blank line, starting
    /// with whatever was already read past it. If no blank line turns up
    /// within `max_header_bytes` or before the end of the output, everything
    /// is body and the head is synthesized.
    pub fn parse_head<R: Read>(&self, mut source: R)
                               -> Result<(ResponseHead, Body<R>)>
    {
        let mut buffer = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        let mut scanned = 0;

        loop {
            match find_delimiter(&buffer, scanned) {
                Some((header_end, body_start))
                    if header_end <= self.max_header_bytes => {
                        let head = head_from_block(&buffer[.. header_end]);
                        let body = Body::new(buffer, body_start, source,
                                             self.max_output_bytes);
                        return Ok((head, body));
                    },
                Some(_) => {
                    warn!("Handler headers run past {} bytes; serving the \
                           output as body", self.max_header_bytes);
                    break;
                },
                None => ()
            }
            scanned = buffer.len().saturating_sub(2);

            if buffer.len() > self.max_header_bytes {
                warn!("No end of headers in the first {} bytes of handler \
                       output; serving it all as body",
                      self.max_header_bytes);
                break;
            }

            let read = match source.read(&mut chunk) {
                Ok(read) => read,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from(e))
            };
            if read == 0 {
                debug!("Handler output ended without a blank line; \
                        serving it all as body");
                break;
            }
            buffer.extend_from_slice(&chunk[.. read]);
        }

        let body = Body::new(buffer, 0, source, self.max_output_bytes);
        Ok((undelimited_head(), body))
    }

    /// Parses a complete response, collecting the body into memory
    pub fn parse<R: Read>(&self, source: R) -> Result<ParsedResponse> {
        let (head, body) = self.parse_head(source)?;
        Ok(head.with_body(body.collect()?))
    }
}

/// The rest of a handler's output after the header block
///
/// Reading counts every byte the handler wrote, header block included,
/// against the output limit.
pub struct Body<R> {
    buffered: Vec<u8>,
    position: usize,
    source: R,
    remaining: usize,
    limit: usize
}

impl<R: Read> Body<R> {
    fn new(buffered: Vec<u8>, position: usize, source: R, limit: usize)
           -> Body<R>
    {
        let remaining = limit.saturating_sub(buffered.len());
        Body { buffered, position, source, remaining, limit }
    }

    /// Reads the whole body.
    ///
    /// Fails with `OutputTooLarge` once the handler's output passes the
    /// limit.
    pub fn collect(mut self) -> Result<Vec<u8>> {
        let mut body = self.buffered.split_off(self.position);
        if self.buffered.len() + body.len() > self.limit {
            return Err(Error::OutputTooLarge(self.limit));
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = match self.source.read(&mut chunk) {
                Ok(read) => read,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::from(e))
            };
            if read == 0 {
                return Ok(body);
            }
            if read > self.remaining {
                return Err(Error::OutputTooLarge(self.limit));
            }
            self.remaining -= read;
            body.extend_from_slice(&chunk[.. read]);
        }
    }
}

impl<R: Read> Read for Body<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position < self.buffered.len() {
            let pending = &self.buffered[self.position ..];
            let count = pending.len().min(buf.len());
            buf[.. count].copy_from_slice(&pending[.. count]);
            self.position += count;
            return Ok(count);
        }

        let read = self.source.read(buf)?;
        if read > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("handler output exceeded {} bytes", self.limit)));
        }
        self.remaining -= read;
        Ok(read)
    }
}

/// Finds the first blank line in `buffer`, looking at line ends from
/// `from` on.
///
/// A blank line is a line terminator (`"\n"` or `"\r\n"`) directly followed
/// by another one. Returns the end of the header block and the start of the
/// body. Output that starts with a line terminator has an empty header block.
pub fn find_delimiter(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    if from == 0 {
        if buffer.starts_with(b"\n") {
            return Some((0, 1));
        }
        if buffer.starts_with(b"\r\n") {
            return Some((0, 2));
        }
    }

    let mut i = from;
    while i < buffer.len() {
        if buffer[i] == b'\n' {
            let after = &buffer[i + 1 ..];
            if after.starts_with(b"\n") {
                return Some((i, i + 2));
            }
            if after.starts_with(b"\r\n") {
                return Some((i, i + 3));
            }
        }
        i += 1;
    }

    None
}

fn undelimited_head() -> ResponseHead {
    let mut headers = Headers::new();
    headers.append("Content-Type", mime::TEXT_HTML.to_string().into_bytes());

    ResponseHead {
        status: Status::new(200),
        status_header: false,
        headers,
        delimited: false
    }
}

/// Parses a header block, dropping lines that are not `Name: Value`
fn head_from_block(block: &[u8]) -> ResponseHead {
    let mut headers = Headers::new();
    let mut status = None;

    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.contains(&b'\r') {
            warn!("Dropping header line with a stray CR from handler: \"{}\"",
                  ascii_escape(line));
            continue;
        }

        let (name, value) = match header(line) {
            Ok((_, pair)) => pair,
            Err(_) => {
                warn!("Dropping malformed header line from handler: \"{}\"",
                      ascii_escape(line));
                continue;
            }
        };

        // Token characters are ASCII
        let name = match str::from_utf8(name) {
            Ok(name) => name,
            Err(_) => continue
        };

        if name.eq_ignore_ascii_case("Status") {
            if status.is_some() {
                warn!("Ignoring repeated Status header from handler");
                continue;
            }
            match status_value(value) {
                Ok((_, parsed)) => status = Some(parsed),
                Err(_) => warn!("Dropping malformed Status header: \"{}\"",
                                ascii_escape(value))
            }
        }
        else {
            headers.append(name, Vec::from(value));
        }
    }

    let status_header = status.is_some();
    let status = match status {
        Some(status) => status,
        None if headers.contains("Location") => Status::new(302),
        None => Status::new(200)
    };

    if !headers.contains("Content-Type") {
        headers.append("Content-Type", mime::TEXT_HTML.to_string().into_bytes());
    }

    ResponseHead { status, status_header, headers, delimited: true }
}

fn is_token(x: u8) -> bool {
    x.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&x)
}

fn trim_end(value: &[u8]) -> &[u8] {
    let end = value.iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |i| i + 1);
    &value[.. end]
}

/// A `Name: Value` line, without its line terminator
fn header(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    all_consuming(tuple((
        take_while1(is_token),
        tag(":"),
        space0,
        rest
    )))(input)
        .map(|(input, (name, _, _, value))| (input, (name, trim_end(value))))
}

fn code(input: &[u8]) -> IResult<&[u8], u16> {
    verify(
        map_res(
            map_res(take_while_m_n(3, 3, is_digit), str::from_utf8),
            |digits: &str| digits.parse::<u16>()),
        |code: &u16| (100 .. 600).contains(code)
    )(input)
}

/// The value of a `Status` header: a code, optionally followed by text
fn status_value(input: &[u8]) -> IResult<&[u8], Status> {
    all_consuming(tuple((
        code,
        opt(preceded(space1, rest))
    )))(input)
        .map(|(input, (code, phrase))| {
            let status = match phrase {
                Some(phrase) if !phrase.is_empty() => Status {
                    code,
                    reason_phrase: String::from_utf8_lossy(phrase).into_owned()
                },
                _ => Status::new(code)
            };
            (input, status)
        })
}
