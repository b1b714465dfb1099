//! Aligned resolution of several templates
//!
//! Remote, local and pipeline templates of a record are resolved against the
//! same selector and zipped by index. Templates whose resolutions differ in
//! length cannot be paired and are reported as a configuration error.

use std::fmt;
use std::path::PathBuf;

use crate::app::dates::{parse_date, DateSelector};
use crate::app::template::PathTemplate;
use crate::constants::dates::ALIGNMENT_CHECK_DATES;
use crate::errors::{ConfigError, Result};

/// One remote file and the local path it is stored at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPair {
    pub remote: String,
    pub local: PathBuf,
}

impl PathPair {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self {
            remote: remote.into(),
            local: local.into(),
        }
    }
}

impl fmt::Display for PathPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.remote, self.local.display())
    }
}

/// Resolve `selector` against every template and return rows of aligned
/// paths: row `i` holds the `i`-th resolution of each template.
pub fn make_pairs(selector: &DateSelector, templates: &[&PathTemplate]) -> Result<Vec<Vec<String>>> {
    let resolved = templates
        .iter()
        .map(|t| t.resolve(selector))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    ensure_same_length(templates, &resolved)?;

    let rows = resolved.first().map_or(0, Vec::len);
    let mut columns: Vec<_> = resolved.into_iter().map(Vec::into_iter).collect();
    let pairs = (0..rows)
        .map(|_| columns.iter_mut().filter_map(Iterator::next).collect())
        .collect();
    Ok(pairs)
}

/// Two-template form used for remote/local pairing
pub fn make_remote_local_pairs(
    selector: &DateSelector,
    remote: &PathTemplate,
    local: &PathTemplate,
) -> Result<Vec<PathPair>> {
    let rows = make_pairs(selector, &[remote, local])?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let mut row = row.into_iter();
            Some(PathPair::new(row.next()?, row.next()?))
        })
        .collect())
}

/// Check templates resolve to the same number of paths over a fixed set of
/// sample dates spanning month and year boundaries
pub fn check_template_alignment(templates: &[&PathTemplate]) -> Result<()> {
    let dates = ALIGNMENT_CHECK_DATES
        .iter()
        .map(|d| parse_date(d))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    make_pairs(&DateSelector::Set(dates), templates).map(|_| ())
}

fn ensure_same_length(templates: &[&PathTemplate], resolved: &[Vec<String>]) -> Result<()> {
    let lengths: Vec<usize> = resolved.iter().map(Vec::len).collect();
    if lengths.windows(2).all(|w| w[0] == w[1]) {
        return Ok(());
    }
    Err(ConfigError::MismatchedPaths {
        templates: templates.iter().map(|t| t.as_str().to_string()).collect(),
        lengths,
    }
    .into())
}
