//! Maps request paths onto scripts
//!
//! Paths under the public prefix name files below the script root. The
//! segments are walked from the left until one names a regular file: that
//! file is the script and whatever follows is PATH_INFO.

use crate::errors::{Error, Result};
use crate::filesystem::path_segments;
use crate::gateway::Script;

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

pub struct Router {
    prefix: String,
    root: PathBuf,
    interpreters: HashMap<String, PathBuf>
}

/// A script found for a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub script: Script,
    /// URL path of the script, as the client wrote it
    pub script_name: String,
    /// Decoded remainder of the path after the script
    pub path_info: String
}

impl Router {
    /// `root` should already be canonical
    pub fn new(prefix: &str, root: PathBuf, interpreters: HashMap<String, PathBuf>)
               -> Router
    {
        Router {
            prefix: String::from(prefix.trim_end_matches('/')),
            root,
            interpreters
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Finds the script for a request path (without query string).
    ///
    /// `Ok(None)` means there is no script there.
    pub fn resolve(&self, path: &str) -> Result<Option<Route>> {
        let rest = match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) if rest.starts_with('/') => rest,
            _ => return Ok(None)
        };

        let decoded = path_segments(rest.as_bytes())?;
        let raw: Vec<&str> = rest.split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();

        let mut candidate = self.root.clone();
        for (i, segment) in decoded.iter().enumerate() {
            candidate.push(OsStr::from_bytes(segment));

            let meta = match fs::metadata(&candidate) {
                Ok(meta) => meta,
                Err(_) => return Ok(None)
            };
            if meta.is_dir() {
                continue;
            }
            if !meta.is_file() {
                return Ok(None);
            }

            // Symlinks may point anywhere
            let canonical = fs::canonicalize(&candidate)?;
            if !canonical.starts_with(&self.root) {
                return Err(Error::PermissionDenied);
            }

            let script = self.script_for(canonical, meta.permissions().mode())?;

            let mut script_name = self.prefix.clone();
            for segment in &raw[..= i] {
                script_name.push('/');
                script_name.push_str(segment);
            }

            let mut path_info = String::new();
            for segment in &decoded[i + 1 ..] {
                path_info.push('/');
                path_info.push_str(&String::from_utf8_lossy(segment));
            }

            return Ok(Some(Route { script, script_name, path_info }));
        }

        // Ran out of segments on a directory
        Ok(None)
    }

    fn script_for(&self, path: PathBuf, mode: u32) -> Result<Script> {
        let interpreter = path.extension()
            .and_then(OsStr::to_str)
            .and_then(|ext| self.interpreters.get(ext));

        match interpreter {
            Some(interpreter) => Ok(Script::new(path).interpreted_by(interpreter)),
            None if mode & 0o111 != 0 => Ok(Script::new(path)),
            None => Err(Error::PermissionDenied)
        }
    }
}
