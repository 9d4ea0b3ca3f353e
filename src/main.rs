//! A CGI/1.1 gateway server.
//!
//! Call it like this:
//!
//!     cgi-gateway -f config.toml
//!
//! The config file is in the [TOML format][toml]. Here is an example:
//!
//! ```toml
//! [listen]
//! port = 8000
//!
//! [server]
//! name = "localhost"
//!
//! [cgi]
//! root = "/srv/cgi-bin"
//! public_prefix = "/cgi-bin"
//! timeout_secs = 30
//! max_output_bytes = 16777216
//!
//! [cgi.interpreters]
//! py = "/usr/bin/python3"
//! sh = "/bin/sh"
//! ```
//!
//! This example also serves as the defaults if no config file is provided,
//! or any given key is not present. If a key is of the wrong type, the server
//! will bail, so don’t do that.
//!
//! Scripts with an extension listed under `[cgi.interpreters]` are run by that
//! interpreter; any other executable file under the root is run directly.
//!
//! [toml]: https://github.com/toml-lang/toml

use cgi_gateway::config::parser::{self, parse_file};
use cgi_gateway::config::Config;
use cgi_gateway::server::serve;

use clap::{App, Arg};
use log::{error, info, LevelFilter};

use std::env;
use std::ffi::OsStr;
use std::io::{stderr, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::exit;

const DEFAULT_CONFIG: &[u8] = b"/etc/cgi-gateway/config.toml";

fn main() {
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter(None, LevelFilter::Info);

    if let Ok(var) = env::var("CGI_GATEWAY_LOG") {
        log_builder.parse_filters(&var);
    }

    if let Err(e) = log_builder.try_init() {
        let _ = writeln!(stderr(),
                         "cgi-gateway: Error when initializing logging: {}", e);
        exit(1);
    }

    let matches = App::new("cgi-gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Alex Hill <alexander.d.hill.89@gmail.com>")
        .arg(Arg::with_name("config_file")
             .short("f")
             .value_name("FILE")
             .help("The TOML file with server configuration")
             .takes_value(true))
        .get_matches();

    let explicit = matches.value_of_os("config_file");
    let config_file = explicit.unwrap_or(OsStr::from_bytes(DEFAULT_CONFIG));

    let config = if explicit.is_none() && !Path::new(config_file).exists() {
        info!("No config file at {:?}, using defaults", config_file);
        Config::default()
    }
    else {
        match parse_file(config_file) {
            Ok(c) => c,
            Err(parser::Error::Io(e)) => {
                error!("Error opening config file {:?}: {}", config_file, e);
                exit(1);
            },
            Err(parser::Error::Parse(e)) => {
                error!("Config file {:?} error at line {} column {}: {}",
                       config_file, e.line, e.column, e.desc);
                exit(1);
            },
            Err(parser::Error::Validation(message)) => {
                error!("Error in config file: {}", message);
                exit(1);
            }
        }
    };

    info!("Starting server on port {}", config.port);
    if let Err(e) = serve(config) {
        error!("Server stopped: {}", e);
        exit(1);
    }
}
