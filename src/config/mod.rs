pub mod parser;

use crate::gateway::Limits;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A holder for app configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port number to listen on
    pub port: u16,
    /// Reported to handlers as SERVER_NAME
    pub server_name: String,
    pub cgi: CgiConfig
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 8000,
            server_name: String::from("localhost"),
            cgi: Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CgiConfig {
    /// Where the scripts are located on disk
    pub root: PathBuf,
    /// Public URI prefix that gets mapped onto `root`
    pub public_prefix: String,
    /// Wall-clock limit per invocation; `None` waits forever
    pub timeout: Option<Duration>,
    pub max_output_bytes: usize,
    /// File extension (without the dot) to interpreter program
    pub interpreters: HashMap<String, PathBuf>
}

impl Default for CgiConfig {
    fn default() -> CgiConfig {
        let mut interpreters = HashMap::new();
        interpreters.insert(String::from("py"), PathBuf::from("/usr/bin/python3"));
        interpreters.insert(String::from("sh"), PathBuf::from("/bin/sh"));

        CgiConfig {
            root: PathBuf::from("/srv/cgi-bin"),
            public_prefix: String::from("/cgi-bin"),
            timeout: Some(Duration::from_secs(30)),
            max_output_bytes: 16 * 1024 * 1024,
            interpreters
        }
    }
}

impl CgiConfig {
    /// The limits every invocation runs under
    pub fn limits(&self) -> Limits {
        Limits {
            timeout: self.timeout,
            max_output_bytes: self.max_output_bytes,
            ..Limits::default()
        }
    }
}
