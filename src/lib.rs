//! Runs external programs as HTTP request handlers under CGI/1.1.
//!
//! The core is [`GatewayBridge`]: given a [`Script`] and a
//! [`RequestContext`], it builds the handler's environment, streams the
//! request body to its stdin, parses the CGI response from its stdout and
//! turns it into an [`HttpResponse`]. Handlers are killed along with their
//! process group once [`Limits::timeout`] runs out.
//!
//! [`server`] is a small HTTP/1.1 front end that maps a URL prefix onto a
//! directory of scripts.

pub mod cgi;
pub mod config;
pub mod errors;
pub mod filesystem;
pub mod gateway;
pub mod http;
pub mod log_util;
pub mod server;

pub use crate::errors::{Error, Result};
pub use crate::gateway::{GatewayBridge, Limits, RequestContext, Script};
pub use crate::http::{HttpResponse, Method};
