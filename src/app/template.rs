//! Date-templated paths
//!
//! A [`PathTemplate`] is a path or URL with `{name}` substitution fields.
//! The reserved field `t` carries a strftime format (`{t:%Y%m%d}`) and is
//! filled from the resolution date; every other field is filled from
//! catalog variables with [`PathTemplate::fill`]. Literal braces are written
//! `{{` and `}}`.
//!
//! Templates are validated once at construction: unbalanced braces, invalid
//! strftime specs and calendar tokens written outside a `{t:...}` field are
//! all rejected before any date is resolved.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDateTime;

use crate::app::dates::{self, DateSelector};
use crate::errors::{Result, TemplateError, TemplateResult};

/// Name of the reserved date field
pub const DATE_FIELD: &str = "t";

/// Format used for a bare `{t}` field
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Calendar tokens that must not appear outside a date field
const BARE_DATE_TOKENS: &[char] = &['Y', 'y', 'm', 'd', 'H', 'M', 'S', 'j'];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Date(String),
    Field(String),
}

/// A path template resolved against dates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse and validate a template
    pub fn new(raw: impl Into<String>) -> TemplateResult<Self> {
        let raw = raw.into();
        let segments = parse_segments(&raw)?;
        Ok(Self { raw, segments })
    }

    /// Template text as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether any `{t:...}` field is present
    pub fn has_date_field(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Date(_)))
    }

    /// Names of plain fields still waiting for a value
    pub fn unfilled_fields(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Substitute plain fields that have a value in `values`. Fields without
    /// a value are kept.
    pub fn fill(&self, values: &HashMap<String, String>) -> Self {
        let segments: Vec<Segment> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Field(name) => values
                    .get(name)
                    .map(|v| Segment::Literal(v.clone()))
                    .unwrap_or_else(|| segment.clone()),
                other => other.clone(),
            })
            .collect();
        let raw = render_raw(&segments);
        Self { raw, segments }
    }

    /// Resolve for a single date
    pub fn resolve_one(&self, date: NaiveDateTime) -> TemplateResult<String> {
        let mut out = String::with_capacity(self.raw.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Date(format) => {
                    let items = StrftimeItems::new(format);
                    write!(out, "{}", date.format_with_items(items)).map_err(|_| {
                        TemplateError::InvalidDateFormat {
                            template: self.raw.clone(),
                            format: format.clone(),
                        }
                    })?;
                }
                Segment::Field(name) => {
                    return Err(TemplateError::UnresolvedField {
                        template: self.raw.clone(),
                        field: name.clone(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Resolve for every date of the selector, dropping duplicates while
    /// keeping first-seen order. Without a date field, entries that still
    /// hold a glob are repeated once per date so they stay aligned with
    /// date-bearing templates.
    pub fn resolve(&self, selector: &DateSelector) -> TemplateResult<Vec<String>> {
        let dates = selector.dates();
        let keep_glob_repeats = !self.has_date_field();
        let mut seen = HashSet::with_capacity(dates.len());
        let mut paths = Vec::with_capacity(dates.len());

        for date in dates {
            let path = self.resolve_one(date)?;
            if keep_glob_repeats && has_glob_chars(&path) {
                paths.push(path);
            } else if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Resolve for the current local date
    pub fn today(&self) -> TemplateResult<String> {
        self.resolve_one(dates::today())
    }

    /// Resolve for every day of a calendar year
    pub fn year(&self, year: i32) -> Result<Vec<String>> {
        let selector = DateSelector::year(year)?;
        Ok(self.resolve(&selector)?)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for PathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Whether a path still holds shell glob metacharacters
pub fn has_glob_chars(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Replace a leading `~` with the home directory, escaping any braces in it
pub fn expand_home(raw: &str) -> String {
    let rest = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return raw.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => {
            let home = home.to_string_lossy().replace('{', "{{").replace('}', "}}");
            format!("{home}{rest}")
        }
        None => raw.to_string(),
    }
}

fn parse_segments(raw: &str) -> TemplateResult<Vec<Segment>> {
    let unbalanced = |position| TemplateError::UnbalancedBraces {
        template: raw.to_string(),
        position,
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(unbalanced(pos)),
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for (inner_pos, inner) in chars.by_ref() {
                    match inner {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(unbalanced(inner_pos)),
                        other => body.push(other),
                    }
                }
                if !closed {
                    return Err(unbalanced(pos));
                }
                if !literal.is_empty() {
                    check_bare_tokens(raw, &literal)?;
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(parse_field(raw, &body)?);
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        check_bare_tokens(raw, &literal)?;
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_field(raw: &str, body: &str) -> TemplateResult<Segment> {
    let (name, spec) = match body.split_once(':') {
        Some((name, spec)) => (name.trim(), Some(spec)),
        None => (body.trim(), None),
    };
    if name.is_empty() {
        return Err(TemplateError::UnnamedField {
            template: raw.to_string(),
        });
    }

    if name != DATE_FIELD {
        return match spec {
            Some(_) => Err(TemplateError::FormatOnPlainField {
                template: raw.to_string(),
                field: name.to_string(),
            }),
            None => Ok(Segment::Field(name.to_string())),
        };
    }

    let format = spec.unwrap_or(DEFAULT_DATE_FORMAT);
    let invalid = StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
    if format.is_empty() || invalid {
        return Err(TemplateError::InvalidDateFormat {
            template: raw.to_string(),
            format: format.to_string(),
        });
    }
    Ok(Segment::Date(format.to_string()))
}

/// Reject `%Y`-style tokens in literal text. Percent-escapes such as `%d2`
/// are left alone.
fn check_bare_tokens(raw: &str, literal: &str) -> TemplateResult<()> {
    let bytes = literal.as_bytes();
    for (i, _) in literal.match_indices('%') {
        let Some(&token) = bytes.get(i + 1) else {
            continue;
        };
        let token = token as char;
        if !BARE_DATE_TOKENS.contains(&token) {
            continue;
        }
        let escape = token.is_ascii_hexdigit()
            && bytes.get(i + 2).is_some_and(|b| b.is_ascii_hexdigit());
        if !escape {
            return Err(TemplateError::BareDateTokens {
                template: raw.to_string(),
            });
        }
    }
    Ok(())
}

fn render_raw(segments: &[Segment]) -> String {
    let mut raw = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => raw.push_str(&text.replace('{', "{{").replace('}', "}}")),
            Segment::Date(format) => {
                let _ = write!(raw, "{{{DATE_FIELD}:{format}}}");
            }
            Segment::Field(name) => {
                let _ = write!(raw, "{{{name}}}");
            }
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    #[test]
    fn test_resolve_single_date() {
        let t = PathTemplate::new("/data/{t:%Y}/file_{t:%Y%m%d}.nc").unwrap();
        assert_eq!(
            t.resolve_one(day(2020, 1, 2)).unwrap(),
            "/data/2020/file_20200102.nc"
        );
        assert_eq!(
            t.resolve(&DateSelector::Single(day(2020, 1, 2))).unwrap(),
            vec!["/data/2020/file_20200102.nc"]
        );
    }

    #[test]
    fn test_resolve_range_deduplicates_in_order() {
        let t = PathTemplate::new("/data/{t:%Y}/month_{t:%m}.nc").unwrap();
        let sel = DateSelector::parse("2020-01-30:2020-02-02").unwrap();
        assert_eq!(
            t.resolve(&sel).unwrap(),
            vec!["/data/2020/month_01.nc", "/data/2020/month_02.nc"]
        );
    }

    #[test]
    fn test_glob_without_date_repeats() {
        let t = PathTemplate::new("ftp://host/pub/latest_*.nc").unwrap();
        let sel = DateSelector::parse("2020-01-01:2020-01-03").unwrap();
        assert_eq!(t.resolve(&sel).unwrap().len(), 3);

        let t = PathTemplate::new("ftp://host/pub/static.nc").unwrap();
        assert_eq!(t.resolve(&sel).unwrap(), vec!["ftp://host/pub/static.nc"]);
    }

    #[test]
    fn test_glob_with_date_is_deduplicated() {
        let t = PathTemplate::new("ftp://host/{t:%Y%m}_*.nc").unwrap();
        let sel = DateSelector::parse("2020-01-01:2020-01-03").unwrap();
        assert_eq!(t.resolve(&sel).unwrap(), vec!["ftp://host/202001_*.nc"]);
    }

    #[test]
    fn test_bare_tokens_rejected() {
        assert!(matches!(
            PathTemplate::new("/data/%Y/%m/file.nc"),
            Err(TemplateError::BareDateTokens { .. })
        ));
        assert!(matches!(
            PathTemplate::new("/data/{t:%Y}/%d.nc"),
            Err(TemplateError::BareDateTokens { .. })
        ));
        // percent-escapes are not calendar tokens
        assert!(PathTemplate::new("https://host/a%20b/%d2x/{t:%Y}.nc").is_ok());
    }

    #[test]
    fn test_invalid_fields_rejected() {
        assert!(matches!(
            PathTemplate::new("/data/{t:%Q}.nc"),
            Err(TemplateError::InvalidDateFormat { .. })
        ));
        assert!(matches!(
            PathTemplate::new("/data/{t:%Y.nc"),
            Err(TemplateError::UnbalancedBraces { .. })
        ));
        assert!(matches!(
            PathTemplate::new("/data/t}.nc"),
            Err(TemplateError::UnbalancedBraces { .. })
        ));
        assert!(matches!(
            PathTemplate::new("/data/{}.nc"),
            Err(TemplateError::UnnamedField { .. })
        ));
        assert!(matches!(
            PathTemplate::new("/data/{root:x}.nc"),
            Err(TemplateError::FormatOnPlainField { .. })
        ));
    }

    #[test]
    fn test_fill_plain_fields() {
        let t = PathTemplate::new("{ROOT}/{NAME}_{t:%Y}.nc").unwrap();
        assert_eq!(t.unfilled_fields(), vec!["ROOT", "NAME"]);
        assert!(matches!(
            t.resolve_one(day(2020, 1, 1)),
            Err(TemplateError::UnresolvedField { field, .. }) if field == "ROOT"
        ));

        let mut vars = HashMap::new();
        vars.insert("ROOT".to_string(), "/srv/{x}".to_string());
        vars.insert("NAME".to_string(), "sst".to_string());
        let filled = t.fill(&vars);
        assert!(filled.unfilled_fields().is_empty());
        assert_eq!(filled.as_str(), "/srv/{{x}}/sst_{t:%Y}.nc");
        assert_eq!(filled.resolve_one(day(2021, 5, 5)).unwrap(), "/srv/{x}/sst_2021.nc");
    }

    #[test]
    fn test_escaped_braces() {
        let t = PathTemplate::new("/a/{{literal}}/{t:%Y}").unwrap();
        assert_eq!(t.resolve_one(day(2001, 1, 1)).unwrap(), "/a/{literal}/2001");
    }

    #[test]
    fn test_year_helper() {
        let t = PathTemplate::new("/d/{t:%Y%m}.nc").unwrap();
        assert_eq!(t.year(2019).unwrap().len(), 12);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        assert_eq!(expand_home("~user/x"), "~user/x");
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy().into_owned();
            if !home.contains(['{', '}']) {
                assert_eq!(expand_home("~/data/{t:%Y}"), format!("{home}/data/{{t:%Y}}"));
            }
        }
    }
}
