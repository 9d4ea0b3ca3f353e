//! Building the CGI/1.1 meta-variables for one request

use super::RequestContext;

use std::path::Path;
use std::slice;

/// Variables every environment carries, even when their value is empty
pub const REQUIRED_VARIABLES: &[&str] = &[
    "GATEWAY_INTERFACE",
    "REQUEST_METHOD",
    "SCRIPT_NAME",
    "PATH_INFO",
    "PATH_TRANSLATED",
    "QUERY_STRING",
    "REQUEST_URI",
    "SERVER_NAME",
    "SERVER_PORT",
    "SERVER_PROTOCOL",
    "SERVER_SOFTWARE",
    "CONTENT_LENGTH",
    "CONTENT_TYPE",
    "REMOTE_ADDR",
    "REMOTE_HOST",
    "SCRIPT_FILENAME",
    "DOCUMENT_ROOT"
];

/// Request headers that never become `HTTP_*` variables.
///
/// The content headers already have their own variables, and `HTTP_PROXY`
/// would be taken by handler HTTP clients as a proxy setting.
const WITHHELD_HEADERS: &[&str] = &["Content-Type", "Content-Length", "Proxy"];

/// The meta-variables handed to a handler, in a fixed order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiEnvironment {
    vars: Vec<(String, String)>
}

impl CgiEnvironment {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, (String, String)> {
        self.vars.iter()
    }

    fn push(&mut self, name: String, value: String) -> bool {
        if self.get(&name).is_some() {
            return false;
        }
        self.vars.push((name, value));
        true
    }
}

impl<'a> IntoIterator for &'a CgiEnvironment {
    type Item = &'a (String, String);
    type IntoIter = slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

/// Maps request metadata onto CGI variables.
///
/// Holds the values that belong to the deployment rather than to a request;
/// `build` itself depends only on its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentBuilder {
    software: String,
    script_filename: String,
    document_root: String
}

impl EnvironmentBuilder {
    pub fn new(software: &str) -> EnvironmentBuilder {
        EnvironmentBuilder {
            software: String::from(software),
            script_filename: String::new(),
            document_root: String::new()
        }
    }

    pub fn script_filename(mut self, path: &Path) -> EnvironmentBuilder {
        self.script_filename = path.to_string_lossy().into_owned();
        self
    }

    pub fn document_root(mut self, path: &Path) -> EnvironmentBuilder {
        self.document_root = path.to_string_lossy().into_owned();
        self
    }

    pub fn build(&self, request: &RequestContext) -> CgiEnvironment {
        let mut env = CgiEnvironment { vars: Vec::with_capacity(32) };

        let content_length = if request.method.carries_body() {
            request.body_length.to_string()
        }
        else {
            String::new()
        };
        let content_type = request.headers.get("Content-Type")
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();

        let path_translated = if request.path_info.is_empty() {
            String::new()
        }
        else {
            format!("{}{}", self.document_root.trim_end_matches('/'),
                    request.path_info)
        };

        let mut request_uri = format!("{}{}", request.script_name,
                                      request.path_info);
        if !request.query_string.is_empty() {
            request_uri.push('?');
            request_uri.push_str(&request.query_string);
        }

        let fixed = [
            ("GATEWAY_INTERFACE", String::from("CGI/1.1")),
            ("REQUEST_METHOD", String::from(request.method.as_str())),
            ("SCRIPT_NAME", request.script_name.clone()),
            ("PATH_INFO", request.path_info.clone()),
            ("PATH_TRANSLATED", path_translated),
            ("QUERY_STRING", request.query_string.clone()),
            ("REQUEST_URI", request_uri),
            ("SERVER_NAME", request.server_name.clone()),
            ("SERVER_PORT", request.server_port.to_string()),
            ("SERVER_PROTOCOL", request.protocol.clone()),
            ("SERVER_SOFTWARE", self.software.clone()),
            ("CONTENT_LENGTH", content_length),
            ("CONTENT_TYPE", content_type),
            ("REMOTE_ADDR", request.remote_addr.clone()),
            ("REMOTE_HOST", request.remote_addr.clone()),
            ("SCRIPT_FILENAME", self.script_filename.clone()),
            ("DOCUMENT_ROOT", self.document_root.clone())
        ];
        for (name, value) in fixed.iter() {
            env.push(String::from(*name), value.clone());
        }

        for (name, value) in &request.headers {
            if WITHHELD_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                continue;
            }
            // First header wins when two names collapse onto one variable
            env.push(variable_name(name),
                     String::from_utf8_lossy(value).into_owned());
        }

        env
    }
}

/// `HTTP_` followed by the header name in upper snake case
pub fn variable_name(header: &str) -> String {
    let mut name = String::with_capacity(header.len() + 5);
    name.push_str("HTTP_");
    name.extend(header.bytes().map(|b| {
        if b.is_ascii_alphanumeric() { char::from(b.to_ascii_uppercase()) } else { '_' }
    }));
    name
}
