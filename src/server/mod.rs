//! A minimal HTTP/1.1 front end for the gateway
//!
//! One thread per connection, one request per connection. Requests under
//! the configured prefix are handed to the gateway; everything else is 404.

mod router;

pub use self::router::{Route, Router};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::gateway::{GatewayBridge, RequestContext};
use crate::http::{Headers, HttpResponse, Method};
use crate::log_util::ascii_escape;

use log::{error, info, warn};

use std::fs::canonicalize;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// length is the suggested minimum from RFC 7230
const MAX_REQUEST_HEAD: usize = 8000;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

pub const SOFTWARE: &str = concat!("cgi-gateway/", env!("CARGO_PKG_VERSION"));

/// Shared, read-only state for connection threads
struct Site {
    router: Router,
    config: Config
}

/// Binds the configured port and serves scripts until the listener fails.
pub fn serve(mut config: Config) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    config.cgi.root = canonicalize(&config.cgi.root)?;

    let router = Router::new(&config.cgi.public_prefix, config.cgi.root.clone(),
                             config.cgi.interpreters.clone());
    let site = Arc::new(Site { router, config });

    info!("Serving {} from {}", site.config.cgi.public_prefix,
          site.config.cgi.root.display());

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let site = Arc::clone(&site);
                let spawned = thread::Builder::new()
                    .name(String::from("connection"))
                    .spawn(move || {
                        if let Err(e) = handle_client(stream, &site) {
                            warn!("Error serving a request: {}", e);
                        }
                    });
                if let Err(e) = spawned {
                    error!("Could not start a connection thread: {}", e);
                }
            },
            Err(e) => {
                warn!("Failed connection: {}", e);
            }
        };
    }

    Ok(())
}

/// The parts of a request head the gateway cares about
#[derive(Debug)]
struct RequestHead {
    method: Method,
    target: String,
    version: u8,
    headers: Headers
}

fn handle_client(stream: TcpStream, site: &Site) -> Result<()> {
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

    let peer = stream.peer_addr()?;
    let local_port = stream.local_addr()?.port();
    let mut reader = stream.try_clone()?;
    let mut writer = BufWriter::new(stream);

    let (head, leftover) = match read_head(&mut reader) {
        Ok(parsed) => parsed,
        Err(Error::Io(e)) => return Err(Error::Io(e)),
        Err(e) => {
            respond(&mut writer, HttpResponse::plain_text(
                e.status_code(), "The request could not be understood."))?;
            return Err(e);
        }
    };

    let response = match dispatch(head, leftover, reader, peer, local_port,
                                  site, &mut writer) {
        Ok(response) => response,
        Err(e) => HttpResponse::plain_text(e.status_code(), &e.to_string())
    };

    respond(&mut writer, response)
}

fn dispatch<W: Write>(head: RequestHead, leftover: Vec<u8>, reader: TcpStream,
                      peer: SocketAddr, local_port: u16, site: &Site,
                      writer: &mut W) -> Result<HttpResponse>
{
    let (path, query) = match head.target.find('?') {
        Some(i) => (&head.target[.. i], &head.target[i + 1 ..]),
        None => (&head.target[..], "")
    };

    let route = match site.router.resolve(path)? {
        Some(route) => route,
        None => return Ok(HttpResponse::plain_text(404, "No script here."))
    };

    if head.headers.contains("Transfer-Encoding") {
        return Err(Error::LengthRequired);
    }
    let body_length = match head.headers.get_str("Content-Length") {
        Some(length) => length.trim().parse::<u64>()
            .map_err(|_| Error::RequestIncomplete)?,
        None => 0
    };

    let expects_continue = head.headers.get_str("Expect")
        .map_or(false, |e| e.eq_ignore_ascii_case("100-continue"));
    if expects_continue && body_length > 0 && head.method.carries_body() {
        writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
        writer.flush()?;
    }

    let request = RequestContext {
        method: head.method,
        script_name: route.script_name,
        path_info: route.path_info,
        query_string: String::from(query),
        protocol: format!("HTTP/1.{}", head.version),
        headers: head.headers,
        server_name: site.config.server_name.clone(),
        server_port: local_port,
        remote_addr: peer.ip().to_string(),
        body_length,
        body: Box::new(Cursor::new(leftover).chain(reader))
    };

    let bridge = GatewayBridge::new(route.script, site.config.cgi.limits(),
                                    SOFTWARE)
        .document_root(site.router.root());

    Ok(bridge.serve(request))
}

fn respond<W: Write>(writer: W, mut response: HttpResponse) -> Result<()> {
    response.headers.set("Connection", Vec::from(&b"close"[..]));
    response.headers.set("Server", Vec::from(SOFTWARE.as_bytes()));
    response.write_to(writer)?;
    Ok(())
}

/// Reads a request head, returning it with any body bytes read past it
fn read_head<R: Read>(mut source: R) -> Result<(RequestHead, Vec<u8>)> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let read = match source.read(&mut chunk) {
            Ok(read) => read,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from(e))
        };
        if read == 0 {
            return Err(Error::RequestIncomplete);
        }
        buffer.extend_from_slice(&chunk[.. read]);

        let mut headers = [httparse::EMPTY_HEADER; 100];
        let mut req = httparse::Request::new(&mut headers);
        if let httparse::Status::Complete(consumed) = req.parse(&buffer)? {
            let mut parsed = Headers::new();
            for header in req.headers.iter() {
                parsed.insert(header.name, Vec::from(header.value));
            }

            let head = RequestHead {
                method: Method::from(req.method.unwrap_or("GET")),
                target: String::from(req.path.unwrap_or("/")),
                version: req.version.unwrap_or(1),
                headers: parsed
            };
            if !head.target.starts_with('/') {
                warn!("Refusing request target \"{}\"",
                      ascii_escape(head.target.as_bytes()));
                return Err(Error::PathNotInOriginForm);
            }

            return Ok((head, buffer.split_off(consumed)));
        }

        if buffer.len() >= MAX_REQUEST_HEAD {
            return Err(Error::RequestLineTooLong);
        }
    }
}

#[test]
fn parse_request_basic() {
    let request: &[u8] = b"GET / HTTP/1.1\r\nHost: google.com\r\nUser-Agent: curl/7.47.1\r\nAccept: */*\r\n\r\n";

    let (head, rest) = read_head(request).unwrap();

    assert_eq!(head.method, Method::Get);
    assert_eq!(head.target, "/");
    assert_eq!(head.headers.get_str("host"), Some("google.com"));
    assert!(rest.is_empty());
}

#[test]
fn parse_request_keeps_body_bytes() {
    let request: &[u8] = b"POST /cgi-bin/form.py HTTP/1.1\r\nContent-Length: 10\r\n\r\ninput=test";

    let (head, rest) = read_head(request).unwrap();

    assert_eq!(head.method, Method::Post);
    assert_eq!(rest, b"input=test");
}

#[test]
fn parse_request_does_not_percent_decode() {
    let request: &[u8] = b"GET /%20?input=hello+world HTTP/1.1\r\n\r\n";

    let (head, _) = read_head(request).unwrap();

    assert_eq!(head.target, "/%20?input=hello+world");
}

#[test]
fn parse_request_fails_on_bad_bytes() {
    let request: &[u8] = b"GET /bogon\xff HTTP/1.1\r\n";

    assert!(read_head(request).is_err());
}

#[test]
fn parse_request_fails_when_cut_short() {
    let request: &[u8] = b"GET / HTTP/1.1\r\nHost: a";

    match read_head(request) {
        Err(Error::RequestIncomplete) => (),
        other => panic!("{:?}", other)
    }
}

#[test]
fn parse_request_refuses_absolute_form() {
    let request: &[u8] = b"GET http://example.org/ HTTP/1.1\r\n\r\n";

    assert!(read_head(request).is_err());
}
