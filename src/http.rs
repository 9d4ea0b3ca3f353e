//! HTTP vocabulary shared by the gateway and the front end

use std::fmt;
use std::io::{self, Write};
use std::slice;
use std::vec;

/// A request method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Trace,
    Connect,
    Extension(String)
}

impl Method {
    pub fn as_str(&self) -> &str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Extension(ref name) => name
        }
    }

    /// Whether a request body is forwarded to handlers for this method.
    ///
    /// GET, HEAD and DELETE never forward one, whatever the connection holds.
    pub fn carries_body(&self) -> bool {
        match *self {
            Method::Get | Method::Head | Method::Delete => false,
            _ => true
        }
    }
}

impl<'a> From<&'a str> for Method {
    fn from(s: &'a str) -> Method {
        match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            other => Method::Extension(String::from(other))
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered map of HTTP headers
///
/// Keys are case-normalized on input: the first word, and any words after a
/// hyphen, are capitalized, with all other letters lowercased. Entries keep
/// the order in which their names were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>
}

pub fn normalize_header_name(name: &str) -> String {
    let lowercased = name.to_ascii_lowercase();
    let mut lower_chars = lowercased.chars();

    let mut normalized = String::with_capacity(lowercased.len());
    if let Some(ch) = lower_chars.next() {
        normalized.push(ch.to_ascii_uppercase());
    }
    else {
        return normalized;
    }

    let mut after_hyphen = false;
    for ch in lower_chars {
        if ch == '-' {
            after_hyphen = true;
            normalized.push(ch);
        }
        else if after_hyphen {
            normalized.push(ch.to_ascii_uppercase());
            after_hyphen = false;
        }
        else {
            normalized.push(ch);
        }
    }

    normalized
}

#[test]
fn normalize_content_type() {
    let expected = "Content-Type";
    assert_eq!(expected, &normalize_header_name("Content-Type"));
    assert_eq!(expected, &normalize_header_name("content-type"));
    assert_eq!(expected, &normalize_header_name("CONTENT-TYPE"));
    assert_eq!(expected, &normalize_header_name("cOnTeNt-TyPe"));
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    /// Adds a header, joining the value onto an existing one with `,`
    pub fn insert(&mut self, key: &str, mut value: Vec<u8>) {
        let key = normalize_header_name(key);
        match self.entries.iter().position(|(name, _)| *name == key) {
            Some(i) => {
                let entry = &mut self.entries[i].1;
                entry.reserve(value.len() + 1);
                entry.push(b',');
                entry.append(&mut value);
            },
            None => self.entries.push((key, value))
        }
    }

    /// Adds a header as its own entry, even if the name is already present.
    ///
    /// Used for response fields such as `Set-Cookie` that cannot be joined.
    pub fn append(&mut self, key: &str, value: Vec<u8>) {
        self.entries.push((normalize_header_name(key), value));
    }

    /// Replaces every entry for `key` with a single value
    pub fn set(&mut self, key: &str, value: Vec<u8>) {
        let key = normalize_header_name(key);
        self.entries.retain(|(name, _)| *name != key);
        self.entries.push((key, value));
    }

    /// The first value for `key`
    pub fn get(&self, key: &str) -> Option<&Vec<u8>> {
        let key = normalize_header_name(key);
        self.entries.iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }

    /// The first value for `key`, if it is valid UTF-8
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| ::std::str::from_utf8(v).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes every entry for `key`, returning the first removed value
    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        let key = normalize_header_name(key);
        let mut removed = None;
        let mut kept = Vec::with_capacity(self.entries.len());
        for (name, value) in self.entries.drain(..) {
            if name == key {
                if removed.is_none() {
                    removed = Some(value);
                }
            }
            else {
                kept.push((name, value));
            }
        }
        self.entries = kept;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, (String, Vec<u8>)> {
        self.entries.iter()
    }
}

impl IntoIterator for Headers {
    type Item = (String, Vec<u8>);
    type IntoIter = vec::IntoIter<(String, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a (String, Vec<u8>);
    type IntoIter = slice::Iter<'a, (String, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// The canonical reason phrase for a status code
pub fn canonical_reason(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown"
    }
}

/// A complete response, ready to be written to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>
}

impl HttpResponse {
    pub fn new(code: u16) -> HttpResponse {
        HttpResponse {
            code,
            reason: String::from(canonical_reason(code)),
            headers: Headers::new(),
            body: Vec::new()
        }
    }

    /// A plain-text response, used for errors the gateway synthesizes itself
    pub fn plain_text(code: u16, message: &str) -> HttpResponse {
        let mut response = HttpResponse::new(code);
        response.headers.set("Content-Type",
                             mime::TEXT_PLAIN_UTF_8.to_string().into_bytes());
        response.body = format!("{} {}\n{}\n", code, response.reason, message)
            .into_bytes();
        response
    }

    /// Serializes the response as HTTP/1.1.
    ///
    /// `Content-Length` is computed from `body`. Only a response with an
    /// empty body (an answer to HEAD) keeps a `Content-Length` from
    /// `headers`.
    pub fn write_to<W: Write>(&self, mut sink: W) -> io::Result<()> {
        write!(sink, "HTTP/1.1 {} {}\r\n", self.code, self.reason)?;

        for (header, content) in &self.headers {
            if header == "Content-Length" {
                continue;
            }
            write!(sink, "{}: ", header)?;
            sink.write_all(content)?;
            sink.write_all(b"\r\n")?;
        }

        if !self.headers.contains("Content-Length") || !self.body.is_empty() {
            write!(sink, "Content-Length: {}\r\n", self.body.len())?;
        }
        else if let Some(length) = self.headers.get("Content-Length") {
            // A body-less response to HEAD keeps the length the handler
            // announced.
            sink.write_all(b"Content-Length: ")?;
            sink.write_all(length)?;
            sink.write_all(b"\r\n")?;
        }

        sink.write_all(b"\r\n")?;
        sink.write_all(&self.body)?;
        sink.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_joins_duplicates_in_first_seen_order() {
        let mut headers = Headers::new();
        headers.insert("accept", Vec::from(&b"text/html"[..]));
        headers.insert("Host", Vec::from(&b"example.org"[..]));
        headers.insert("ACCEPT", Vec::from(&b"text/plain"[..]));

        let names: Vec<_> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Accept", "Host"]);
        assert_eq!(headers.get("Accept").unwrap(), b"text/html,text/plain");
    }

    #[test]
    fn append_keeps_separate_entries() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", Vec::from(&b"a=1"[..]));
        headers.append("set-cookie", Vec::from(&b"b=2"[..]));

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.remove("Set-Cookie").unwrap(), b"a=1");
        assert!(headers.is_empty());
    }

    #[test]
    fn methods_without_bodies() {
        assert!(!Method::from("GET").carries_body());
        assert!(!Method::from("HEAD").carries_body());
        assert!(!Method::from("DELETE").carries_body());
        assert!(Method::from("POST").carries_body());
        assert!(Method::from("PUT").carries_body());
        assert_eq!(Method::from("PROPFIND").as_str(), "PROPFIND");
    }

    #[test]
    fn response_serializes_with_computed_length() {
        let mut response = HttpResponse::new(201);
        response.headers.set("Content-Type", Vec::from(&b"text/html"[..]));
        response.headers.set("Content-Length", Vec::from(&b"999"[..]));
        response.body = Vec::from(&b"BODY"[..]);

        let mut wire = Vec::new();
        response.write_to(&mut wire).unwrap();

        assert_eq!(&wire[..],
                   &b"HTTP/1.1 201 Created\r\nContent-Type: text/html\r\nContent-Length: 4\r\n\r\nBODY"[..]);
    }

    #[test]
    fn plain_text_error_bodies() {
        let response = HttpResponse::plain_text(504, "too slow");
        assert_eq!(response.reason, "Gateway Timeout");
        assert_eq!(response.headers.get_str("content-type"),
                   Some("text/plain; charset=utf-8"));
        assert_eq!(&response.body[..], &b"504 Gateway Timeout\ntoo slow\n"[..]);
    }
}
