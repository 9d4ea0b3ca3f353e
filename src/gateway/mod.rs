//! The CGI gateway: one request in, one handler run, one response out

pub mod environment;
pub mod input;
pub mod invoker;

pub use self::environment::{CgiEnvironment, EnvironmentBuilder};
pub use self::input::InputChannel;
pub use self::invoker::{Completion, Invocation, Limits, Script};

use crate::cgi::ParsedResponse;
use crate::errors::{Error, Result};
use crate::http::{Headers, HttpResponse, Method};

use log::{info, warn};

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::time::Instant;

/// Response headers a handler may not pass through to the client
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Transfer-Encoding",
    "Content-Length"
];

/// Everything the gateway needs to know about an inbound request
pub struct RequestContext {
    pub method: Method,
    /// URL path of the script itself
    pub script_name: String,
    /// URL path following the script name, possibly empty
    pub path_info: String,
    /// Everything after the `?`, exactly as the client sent it
    pub query_string: String,
    pub protocol: String,
    pub headers: Headers,
    pub server_name: String,
    pub server_port: u16,
    pub remote_addr: String,
    /// Declared body length; 0 when unknown
    pub body_length: u64,
    pub body: Box<dyn Read + Send>
}

impl RequestContext {
    pub fn new(method: Method, script_name: &str) -> RequestContext {
        RequestContext {
            method,
            script_name: String::from(script_name),
            path_info: String::new(),
            query_string: String::new(),
            protocol: String::from("HTTP/1.1"),
            headers: Headers::new(),
            server_name: String::from("localhost"),
            server_port: 80,
            remote_addr: String::new(),
            body_length: 0,
            body: Box::new(io::empty())
        }
    }

    pub fn with_body(mut self, length: u64, body: Box<dyn Read + Send>)
                     -> RequestContext
    {
        self.body_length = length;
        self.body = body;
        self
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("script_name", &self.script_name)
            .field("path_info", &self.path_info)
            .field("query_string", &self.query_string)
            .field("headers", &self.headers)
            .field("remote_addr", &self.remote_addr)
            .field("body_length", &self.body_length)
            .finish()
    }
}

/// Serves requests by running one script
///
/// Holds no per-request state, so one bridge can serve any number of
/// requests from any number of threads.
#[derive(Debug, Clone)]
pub struct GatewayBridge {
    script: Script,
    limits: Limits,
    environment: EnvironmentBuilder
}

impl GatewayBridge {
    pub fn new(script: Script, limits: Limits, software: &str) -> GatewayBridge {
        let environment = EnvironmentBuilder::new(software)
            .script_filename(&script.path);

        GatewayBridge { script, limits, environment }
    }

    /// Sets DOCUMENT_ROOT for the script's environment
    pub fn document_root(mut self, root: &Path) -> GatewayBridge {
        self.environment = self.environment.document_root(root);
        self
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Runs the script for one request.
    ///
    /// Never fails: every error becomes a response with the matching status.
    pub fn serve(&self, request: RequestContext) -> HttpResponse {
        let started = Instant::now();
        let method = request.method.clone();
        let script_name = request.script_name.clone();

        let response = match self.run(request) {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {}: {}", method, script_name, e);
                error_response(&e)
            }
        };

        info!("{} {} {} {:?}", method, script_name, response.code,
              started.elapsed());
        response
    }

    fn run(&self, request: RequestContext) -> Result<HttpResponse> {
        let env = self.environment.build(&request);
        let head_only = request.method == Method::Head;
        let input = InputChannel::for_request(&request.method,
                                              request.body_length,
                                              request.body);

        let mut invocation = invoker::invoke(&self.script, &env, input,
                                             &self.limits)?;
        let parsed = invocation.read_response(&self.limits.parser())?;
        let completion = invocation.finish()?;

        if !completion.success() {
            warn!("Handler {} exited unsuccessfully ({})",
                  self.script.path.display(), completion.status);
        }

        Ok(into_http(parsed, completion.success(), head_only))
    }
}

/// Turns parsed handler output into the response for the client
fn into_http(parsed: ParsedResponse, success: bool, head_only: bool)
             -> HttpResponse
{
    let mut response = if success || parsed.status_header {
        let mut response = HttpResponse::new(parsed.status.code);
        response.reason = parsed.status.reason_phrase;
        response
    }
    else {
        HttpResponse::new(500)
    };

    for (name, value) in parsed.headers {
        if HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(&name)) {
            continue;
        }
        response.headers.append(&name, value);
    }

    if head_only {
        response.headers.set("Content-Length",
                             parsed.body.len().to_string().into_bytes());
    }
    else {
        response.body = parsed.body;
    }

    response
}

/// The response for a request that could not be completed
pub fn error_response(error: &Error) -> HttpResponse {
    let message = match *error {
        Error::ShortBody { .. } =>
            "The request body was shorter than its Content-Length.",
        Error::HandlerTimeout(_) =>
            "The script did not respond in time.",
        _ => "The script could not be run."
    };

    HttpResponse::plain_text(error.status_code(), message)
}
