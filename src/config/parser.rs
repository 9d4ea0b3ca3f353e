use super::*;
use toml::Value;

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub fn parse_file<P: AsRef<Path>>(conf: P) -> Result<Config, Error> {
    let mut toml = String::new();
    {
        let mut f = File::open(conf)?;
        f.read_to_string(&mut toml)?;
    }

    parse_str(&toml)
}

pub fn parse_str(toml: &str) -> Result<Config, Error> {
    match toml.parse::<Value>() {
        Ok(table) => config_from_table(&table),
        Err(e) => Err(Error::Parse(message_from_error(&e)))
    }
}

fn lookup<'a>(table: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(table, |value, key| value.get(key))
}

fn validation(key: &str, expected: &str, got: &Value) -> Error {
    Error::Validation(format!("Expected {} to be {}, got a {}",
                              key, expected, got.type_str()))
}

fn port(table: &Value, key: &str, default: u16) -> Result<u16, Error> {
    match lookup(table, key) {
        Some(&Value::Integer(p))
            if p <= i64::from(u16::MAX) &&
            p > 0 => Ok(p as u16),
        Some(&Value::Integer(p)) => Err(Error::Validation(
            format!("The port {} given for {} is out of range", p, key)
        )),
        Some(val) => Err(validation(key, "an integer", val)),
        None => Ok(default)
    }
}

fn string<'a>(table: &'a Value, key: &str) -> Result<Option<&'a str>, Error> {
    match lookup(table, key) {
        Some(&Value::String(ref s)) => Ok(Some(s)),
        Some(val) => Err(validation(key, "a string", val)),
        None => Ok(None)
    }
}

fn config_from_table(table: &Value) -> Result<Config, Error> {
    let mut config: Config = Default::default();

    config.port = port(table, "listen.port", config.port)?;

    if let Some(name) = string(table, "server.name")? {
        config.server_name = String::from(name);
    }

    if let Some(root) = string(table, "cgi.root")? {
        config.cgi.root = PathBuf::from(root);
    }

    if let Some(prefix) = string(table, "cgi.public_prefix")? {
        if !prefix.starts_with('/') {
            return Err(Error::Validation(
                format!("cgi.public_prefix must start with '/', got {:?}",
                        prefix)));
        }
        config.cgi.public_prefix = String::from(prefix.trim_end_matches('/'));
    }

    match lookup(table, "cgi.timeout_secs") {
        Some(&Value::Integer(0)) => config.cgi.timeout = None,
        Some(&Value::Integer(secs)) if secs > 0 =>
            config.cgi.timeout = Some(Duration::from_secs(secs as u64)),
        Some(&Value::Integer(secs)) => return Err(Error::Validation(
            format!("cgi.timeout_secs cannot be negative, got {}", secs)
        )),
        Some(val) => return Err(validation("cgi.timeout_secs", "an integer", val)),
        None => ()
    }

    match lookup(table, "cgi.max_output_bytes") {
        Some(&Value::Integer(bytes)) if bytes > 0 =>
            config.cgi.max_output_bytes = bytes as usize,
        Some(&Value::Integer(bytes)) => return Err(Error::Validation(
            format!("cgi.max_output_bytes must be positive, got {}", bytes)
        )),
        Some(val) => return Err(validation("cgi.max_output_bytes", "an integer", val)),
        None => ()
    }

    match lookup(table, "cgi.interpreters") {
        Some(&Value::Table(ref interpreters)) => {
            for (extension, program) in interpreters {
                let key = format!("cgi.interpreters.{}", extension);
                match *program {
                    Value::String(ref program) => {
                        config.cgi.interpreters.insert(
                            extension.clone(), PathBuf::from(program));
                    },
                    ref val => return Err(validation(&key, "a string", val))
                }
            }
        },
        Some(val) => return Err(validation("cgi.interpreters", "a table", val)),
        None => ()
    }

    Ok(config)
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(ErrorMessage),
    Validation(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "{}", e),
            Error::Parse(ref m) =>
                write!(f, "line {} column {}: {}", m.line, m.column, m.desc),
            Error::Validation(ref message) => f.write_str(message)
        }
    }
}

/// An owned, rendered version of a TOML syntax error
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub desc: String,
    pub line: usize,
    pub column: usize
}

fn message_from_error(error: &toml::de::Error) -> ErrorMessage {
    let (line, column) = error.line_col().unwrap_or((0, 0));

    ErrorMessage {
        desc: error.to_string(),
        line: line + 1,
        column: column + 1
    }
}
