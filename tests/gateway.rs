//! Runs real scripts through the gateway with `/bin/sh`

use cgi_gateway::http::Headers;
use cgi_gateway::{GatewayBridge, HttpResponse, Limits, Method, RequestContext, Script};

use std::fs;
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn bridge(script: &str, timeout_ms: u64) -> (TempDir, GatewayBridge) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.sh");
    fs::write(&path, script).unwrap();

    let limits = Limits {
        timeout: Some(Duration::from_millis(timeout_ms)),
        ..Limits::default()
    };
    let bridge = GatewayBridge::new(Script::new(path).interpreted_by("/bin/sh"),
                                    limits, "cgi-gateway/test")
        .document_root(dir.path());
    (dir, bridge)
}

fn get(bridge: &GatewayBridge) -> HttpResponse {
    bridge.serve(RequestContext::new(Method::Get, "/cgi-bin/script.sh"))
}

fn header<'a>(response: &'a HttpResponse, name: &str) -> Option<&'a str> {
    response.headers.get_str(name)
}

#[test]
fn status_header_sets_the_status_line() {
    let (_dir, bridge) = bridge(
        "printf 'Status: 201 Created\\nContent-Type: text/plain\\n\\ndone'", 5000);
    let response = get(&bridge);

    assert_eq!(response.code, 201);
    assert_eq!(response.reason, "Created");
    assert_eq!(header(&response, "Content-Type"), Some("text/plain"));
    assert!(!response.headers.contains("Status"));
    assert_eq!(response.body, b"done");
}

#[test]
fn crlf_and_lf_delimiters_agree() {
    let (_a, lf) = bridge("printf 'X-Test: yes\\n\\nbody'", 5000);
    let (_b, crlf) = bridge("printf 'X-Test: yes\\r\\n\\r\\nbody'", 5000);

    let lf = get(&lf);
    let crlf = get(&crlf);

    assert_eq!(lf.code, 200);
    assert_eq!(crlf.code, 200);
    assert_eq!(header(&lf, "X-Test"), Some("yes"));
    assert_eq!(header(&crlf, "X-Test"), Some("yes"));
    assert_eq!(lf.body, crlf.body);
}

#[test]
fn query_string_is_passed_verbatim() {
    let (_dir, bridge) = bridge("printf '\\n%s' \"$QUERY_STRING\"", 5000);
    let mut request = RequestContext::new(Method::Get, "/cgi-bin/script.sh");
    request.query_string = String::from("input=hello+world&x=%41");

    let response = bridge.serve(request);
    assert_eq!(response.body, b"input=hello+world&x=%41");
}

#[test]
fn request_headers_become_variables() {
    let (_dir, bridge) = bridge(
        "printf '\\n%s|%s|%s' \"$HTTP_USER_AGENT\" \"$REQUEST_METHOD\" \"$SCRIPT_NAME\"",
        5000);
    let mut request = RequestContext::new(Method::Get, "/cgi-bin/script.sh");
    request.headers.insert("User-Agent", Vec::from(&b"curl/8.0"[..]));

    let response = bridge.serve(request);
    assert_eq!(response.body, b"curl/8.0|GET|/cgi-bin/script.sh");
}

#[test]
fn post_body_is_echoed() {
    let (_dir, bridge) = bridge(
        "printf 'Content-Type: text/plain\\n\\n%s:' \"$CONTENT_LENGTH\"; cat", 5000);
    let mut headers = Headers::new();
    headers.insert("Content-Type",
                   Vec::from(&b"application/x-www-form-urlencoded"[..]));
    let mut request = RequestContext::new(Method::Post, "/cgi-bin/script.sh")
        .with_body(10, Box::new(&b"input=test"[..]));
    request.headers = headers;

    let response = bridge.serve(request);
    assert_eq!(response.code, 200);
    assert_eq!(response.body, b"10:input=test");
}

#[test]
fn short_body_is_a_bad_request() {
    let (_dir, bridge) = bridge("printf '\\n'; cat", 5000);
    let request = RequestContext::new(Method::Post, "/cgi-bin/script.sh")
        .with_body(11, Box::new(&b"input=tes"[..]));

    let response = bridge.serve(request);
    assert_eq!(response.code, 400);
}

/// A client that sends part of its body and then goes quiet until the
/// socket read timeout fires
struct Stall(&'static [u8]);

impl Read for Stall {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.0.is_empty() {
            thread::sleep(Duration::from_secs(4));
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
        }
        let count = self.0.len().min(buf.len());
        buf[.. count].copy_from_slice(&self.0[.. count]);
        self.0 = &self.0[count ..];
        Ok(count)
    }
}

#[test]
fn stalled_body_is_a_bad_request_within_the_deadline() {
    let (_dir, bridge) = bridge("printf '\\nok'", 300);
    let request = RequestContext::new(Method::Post, "/cgi-bin/script.sh")
        .with_body(11, Box::new(Stall(b"input=tes")));

    let started = Instant::now();
    let response = bridge.serve(request);

    assert_eq!(response.code, 400);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn heavy_stderr_without_newlines_does_not_stall_the_response() {
    let (_dir, bridge) = bridge(
        "head -c 20000000 /dev/zero >&2; printf 'Content-Type: text/plain\\n\\nok'",
        20000);
    let response = get(&bridge);

    assert_eq!(response.code, 200);
    assert_eq!(response.body, b"ok");
}

#[test]
fn slow_handler_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let script = format!("echo $$ > '{}'; sleep 30", pid_file.display());
    let (_script_dir, bridge) = bridge(&script, 300);

    let started = Instant::now();
    let response = get(&bridge);

    assert_eq!(response.code, 504);
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid: libc::pid_t = fs::read_to_string(&pid_file).unwrap()
        .trim().parse().unwrap();
    assert_eq!(unsafe { libc::kill(pid, 0) }, -1);
}

#[test]
fn failed_handler_with_status_keeps_it() {
    let (_dir, bridge) = bridge(
        "printf 'Status: 422 Unprocessable Entity\\n\\nbad input'; exit 1", 5000);
    let response = get(&bridge);

    assert_eq!(response.code, 422);
    assert_eq!(response.body, b"bad input");
}

#[test]
fn failed_handler_without_status_is_500() {
    let (_dir, bridge) = bridge("printf '\\npartial'; exit 2", 5000);
    let response = get(&bridge);

    assert_eq!(response.code, 500);
    assert_eq!(response.body, b"partial");
}

#[test]
fn undelimited_output_is_html_body() {
    let (_dir, bridge) = bridge("printf 'just some text'", 5000);
    let response = get(&bridge);

    assert_eq!(response.code, 200);
    assert_eq!(header(&response, "Content-Type"), Some("text/html"));
    assert_eq!(response.body, b"just some text");
}

#[test]
fn location_without_status_redirects() {
    let (_dir, bridge) = bridge("printf 'Location: /elsewhere\\n\\n'", 5000);
    let response = get(&bridge);

    assert_eq!(response.code, 302);
    assert_eq!(header(&response, "Location"), Some("/elsewhere"));
}

#[test]
fn head_requests_get_no_body() {
    let (_dir, bridge) = bridge("printf 'Content-Type: text/plain\\n\\nhello'", 5000);
    let response = bridge.serve(RequestContext::new(Method::Head,
                                                    "/cgi-bin/script.sh"));

    assert_eq!(response.code, 200);
    assert!(response.body.is_empty());
    assert_eq!(header(&response, "Content-Length"), Some("5"));

    let mut written = Vec::new();
    response.write_to(&mut written).unwrap();
    assert!(written.ends_with(b"Content-Length: 5\r\n\r\n"));
}

#[test]
fn missing_interpreter_is_500() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.py");
    fs::write(&path, "print()").unwrap();
    let bridge = GatewayBridge::new(
        Script::new(path).interpreted_by("/nonexistent/python"),
        Limits::default(), "cgi-gateway/test");

    assert_eq!(get(&bridge).code, 500);
}

#[test]
fn concurrent_requests_are_isolated() {
    let (_dir, bridge) = bridge("printf '\\n%s' \"$QUERY_STRING\"", 5000);
    let bridge = Arc::new(bridge);

    let handles: Vec<_> = (0 .. 8).map(|i| {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            let mut request = RequestContext::new(Method::Get,
                                                  "/cgi-bin/script.sh");
            request.query_string = format!("n={}", i);
            (i, bridge.serve(request))
        })
    }).collect();

    for handle in handles {
        let (i, response) = handle.join().unwrap();
        assert_eq!(response.code, 200);
        assert_eq!(response.body, format!("n={}", i).into_bytes());
    }
}
