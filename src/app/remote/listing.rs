//! Directory listing cache and filename glob matching
//!
//! Resolving a remote glob lists the parent directory once and matches the
//! filename pattern against the entries. Consecutive files of a dataset tend
//! to share a directory, so each connection keeps the last listing and only
//! lists again when the directory changes.

use glob::Pattern;
use tracing::{debug, warn};

use super::GlobMatch;
use crate::errors::{RemoteError, RemoteResult};

/// Last directory listed on one connection
#[derive(Debug, Default, Clone)]
pub struct ListingCache {
    last_directory: Option<String>,
    entries: Vec<String>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entries if `directory` was the last one listed
    pub fn get(&self, directory: &str) -> Option<&[String]> {
        match &self.last_directory {
            Some(last) if last == directory => Some(&self.entries),
            _ => None,
        }
    }

    /// Replace the cached listing
    pub fn store(&mut self, directory: &str, entries: Vec<String>) {
        self.last_directory = Some(directory.to_string());
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.last_directory = None;
        self.entries.clear();
    }
}

/// Split a remote path into its directory and filename pattern
pub fn split_remote(remote: &str) -> (&str, &str) {
    match remote.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", remote),
    }
}

/// Reduce a listing entry to its basename; some servers return full paths
pub fn entry_name(entry: &str) -> &str {
    let trimmed = entry.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Match `pattern` against directory entries. Exactly one match is found,
/// none is missing and several are a configuration error.
pub fn select_match(directory: &str, pattern: &str, entries: &[String]) -> RemoteResult<GlobMatch> {
    let remote = join_remote(directory, pattern);
    if entries.is_empty() {
        debug!("Directory {} does not exist or is empty", directory);
        return Ok(GlobMatch::NotFound);
    }

    let matches: Vec<String> = match Pattern::new(pattern) {
        Ok(glob) => entries
            .iter()
            .filter(|entry| glob.matches(entry))
            .cloned()
            .collect(),
        Err(e) => {
            debug!("Pattern {} is not a valid glob ({}), matching literally", pattern, e);
            entries.iter().filter(|e| *e == pattern).cloned().collect()
        }
    };

    match matches.len() {
        0 => {
            debug!("No file in {} matches {}", directory, pattern);
            Ok(GlobMatch::NotFound)
        }
        1 => Ok(GlobMatch::Found(join_remote(directory, &matches[0]))),
        n => {
            warn!("Pattern {} matched {} files", remote, n);
            Err(RemoteError::AmbiguousMatch {
                pattern: remote,
                matches,
            })
        }
    }
}

fn join_remote(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{directory}/{name}")
    }
}
