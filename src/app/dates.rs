//! Date selectors and frequencies
//!
//! A [`DateSelector`] names the dates a path template is resolved for: a
//! single timestamp, an inclusive range walked with a [`Frequency`] step, or
//! an explicit set. Selectors are plain values, rebuilt per call.
//!
//! Month and year frequencies are anchored: a range using them starts at the
//! first anchor on or after the requested start, so `2020-01-15` walked
//! monthly (`1M`) yields `2020-01-31, 2020-02-29, ...`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Local, Months, NaiveDate, NaiveDateTime, NaiveTime};

use crate::constants::dates::DEFAULT_STEP;
use crate::errors::{SelectorError, SelectorResult};

/// Selector shapes accepted from text, used in error messages
const ACCEPTED_SELECTORS: &str =
    "YYYY-MM-DD, YYYY-MM-DDTHH:MM[:SS], START:STOP[:STEP], D1,D2,..., today";

/// Unit of a [`Frequency`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyUnit {
    Hour,
    Day,
    Week,
    /// Last day of the month
    MonthEnd,
    /// First day of the month
    MonthStart,
    /// December 31st
    YearEnd,
    /// January 1st
    YearStart,
}

impl FrequencyUnit {
    fn parse(code: &str) -> Option<Self> {
        let unit = match code {
            "h" | "H" => Self::Hour,
            "D" => Self::Day,
            "W" => Self::Week,
            "M" => Self::MonthEnd,
            "MS" => Self::MonthStart,
            "A" | "Y" => Self::YearEnd,
            "AS" | "YS" => Self::YearStart,
            _ => return None,
        };
        Some(unit)
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Hour => "h",
            Self::Day => "D",
            Self::Week => "W",
            Self::MonthEnd => "M",
            Self::MonthStart => "MS",
            Self::YearEnd => "A",
            Self::YearStart => "AS",
        }
    }
}

/// Step of a date range, e.g. `3D`, `6h`, `1M`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequency {
    pub count: u32,
    pub unit: FrequencyUnit,
}

impl Frequency {
    pub const DAILY: Frequency = Frequency {
        count: 1,
        unit: FrequencyUnit::Day,
    };

    /// First timestamp on or after `start` that lies on this frequency's anchor
    pub fn first_on_or_after(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        let date = start.date();
        let anchored = match self.unit {
            FrequencyUnit::Hour | FrequencyUnit::Day | FrequencyUnit::Week => return Some(start),
            FrequencyUnit::MonthEnd => month_end(date.year(), date.month())?,
            FrequencyUnit::MonthStart if date.day() == 1 => date,
            FrequencyUnit::MonthStart => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?
                    .checked_add_months(Months::new(1))?
            }
            FrequencyUnit::YearEnd => NaiveDate::from_ymd_opt(date.year(), 12, 31)?,
            FrequencyUnit::YearStart if date.ordinal() == 1 => date,
            FrequencyUnit::YearStart => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?,
        };
        Some(anchored.and_time(start.time()))
    }

    /// Next timestamp after `current`, which must already lie on an anchor
    pub fn advance(&self, current: NaiveDateTime) -> Option<NaiveDateTime> {
        let n = self.count;
        let date = current.date();
        let next = match self.unit {
            FrequencyUnit::Hour => {
                return current.checked_add_signed(chrono::Duration::hours(i64::from(n)))
            }
            FrequencyUnit::Day => {
                return current.checked_add_signed(chrono::Duration::days(i64::from(n)))
            }
            FrequencyUnit::Week => {
                return current.checked_add_signed(chrono::Duration::weeks(i64::from(n)))
            }
            FrequencyUnit::MonthEnd => {
                let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?
                    .checked_add_months(Months::new(n))?;
                month_end(first.year(), first.month())?
            }
            FrequencyUnit::MonthStart => date.checked_add_months(Months::new(n))?,
            FrequencyUnit::YearEnd => {
                NaiveDate::from_ymd_opt(date.year().checked_add(n as i32)?, 12, 31)?
            }
            FrequencyUnit::YearStart => {
                NaiveDate::from_ymd_opt(date.year().checked_add(n as i32)?, 1, 1)?
            }
        };
        Some(next.and_time(current.time()))
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::DAILY
    }
}

impl FromStr for Frequency {
    type Err = SelectorError;

    /// Parses an optional 1-3 digit count followed by a unit code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SelectorError::InvalidFrequency {
            step: s.to_string(),
        };

        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (digits, code) = s.split_at(split);
        if digits.len() > 3 {
            return Err(invalid());
        }

        let unit = FrequencyUnit::parse(code).ok_or_else(invalid)?;
        let count = if digits.is_empty() {
            1
        } else {
            digits.parse::<u32>().map_err(|_| invalid())?
        };
        if count == 0 {
            return Err(SelectorError::ZeroFrequency {
                step: s.to_string(),
            });
        }

        Ok(Self { count, unit })
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.code())
    }
}

/// Raw `start:stop:step` parts as given by a user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateSlice {
    pub start: Option<String>,
    pub stop: Option<String>,
    pub step: Option<String>,
}

impl DateSlice {
    pub fn new(start: Option<&str>, stop: Option<&str>, step: Option<&str>) -> Self {
        let owned = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            start: owned(start),
            stop: owned(stop),
            step: owned(step),
        }
    }
}

/// The dates a template is resolved for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSelector {
    Single(NaiveDateTime),
    /// Inclusive of both ends
    Range {
        start: NaiveDateTime,
        end: NaiveDateTime,
        step: Frequency,
    },
    Set(Vec<NaiveDateTime>),
}

impl DateSelector {
    /// Today's local date at midnight
    pub fn today() -> Self {
        Self::Single(today())
    }

    /// Every day of a calendar year
    pub fn year(year: i32) -> SelectorResult<Self> {
        let bound = |month, day| {
            NaiveDate::from_ymd_opt(year, month, day)
                .map(|d| d.and_time(NaiveTime::MIN))
                .ok_or_else(|| SelectorError::InvalidDate {
                    value: year.to_string(),
                })
        };
        Ok(Self::Range {
            start: bound(1, 1)?,
            end: bound(12, 31)?,
            step: Frequency::DAILY,
        })
    }

    /// Build a range from slice parts: start is required, stop defaults to
    /// today and step to one day
    pub fn from_slice(slice: &DateSlice) -> SelectorResult<Self> {
        let start = slice
            .start
            .as_deref()
            .ok_or(SelectorError::MissingStart)
            .and_then(parse_date)?;
        let end = match slice.stop.as_deref() {
            Some(stop) => parse_date(stop)?,
            None => today(),
        };
        let step = slice.step.as_deref().unwrap_or(DEFAULT_STEP).parse()?;
        Ok(Self::Range { start, end, step })
    }

    /// Parse selector text: a date, `START:STOP[:STEP]`, a comma separated
    /// set, or `today`
    pub fn parse(text: &str) -> SelectorResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(unsupported(text));
        }
        if text.eq_ignore_ascii_case("today") {
            return Ok(Self::today());
        }
        if text.contains(',') {
            let dates = text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_date)
                .collect::<SelectorResult<Vec<_>>>()?;
            return Ok(Self::Set(dates));
        }

        let parts = split_slice(text);
        match parts.as_slice() {
            [single] => parse_date(single).map(Self::Single),
            [start, stop] => Self::from_slice(&DateSlice::new(
                Some(start.as_str()),
                Some(stop.as_str()),
                None,
            )),
            [start, stop, step] => Self::from_slice(&DateSlice::new(
                Some(start.as_str()),
                Some(stop.as_str()),
                Some(step.as_str()),
            )),
            _ => Err(unsupported(text)),
        }
    }

    /// All dates of the selector in order
    pub fn dates(&self) -> Vec<NaiveDateTime> {
        match self {
            Self::Single(date) => vec![*date],
            Self::Set(dates) => dates.clone(),
            Self::Range { start, end, step } => {
                let mut dates = Vec::new();
                let mut current = step.first_on_or_after(*start);
                while let Some(date) = current {
                    if date > *end {
                        break;
                    }
                    dates.push(date);
                    current = step.advance(date);
                }
                dates
            }
        }
    }

    /// Whether the selector names exactly one date
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

impl From<NaiveDateTime> for DateSelector {
    fn from(date: NaiveDateTime) -> Self {
        Self::Single(date)
    }
}

impl From<NaiveDate> for DateSelector {
    fn from(date: NaiveDate) -> Self {
        Self::Single(date.and_time(NaiveTime::MIN))
    }
}

impl FromStr for DateSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(date) => f.write_str(&format_date(date)),
            Self::Range { start, end, step } => {
                write!(f, "{}:{}:{}", format_date(start), format_date(end), step)
            }
            Self::Set(dates) => {
                let joined: Vec<String> = dates.iter().map(format_date).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// Parse an ISO date or timestamp
pub fn parse_date(value: &str) -> SelectorResult<NaiveDateTime> {
    let value = value.trim();
    const TIMESTAMP_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| SelectorError::InvalidDate {
            value: value.to_string(),
        })
}

/// Local date at midnight
pub fn today() -> NaiveDateTime {
    Local::now().date_naive().and_time(NaiveTime::MIN)
}

fn format_date(date: &NaiveDateTime) -> String {
    if date.time() == NaiveTime::MIN {
        date.format("%Y-%m-%d").to_string()
    } else {
        date.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

fn unsupported(given: &str) -> SelectorError {
    SelectorError::Unsupported {
        given: given.to_string(),
        accepted: ACCEPTED_SELECTORS.to_string(),
    }
}

/// Split slice text on `:` while keeping the colons of `THH:MM[:SS]`
/// timestamps inside their part
fn split_slice(text: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for piece in text.split(':') {
        if let Some(last) = parts.last_mut() {
            let time_colons = last
                .split_once('T')
                .map(|(_, time)| time.matches(':').count());
            let is_time_field = piece.len() == 2 && piece.chars().all(|c| c.is_ascii_digit());
            if matches!(time_colons, Some(0 | 1)) && is_time_field {
                last.push(':');
                last.push_str(piece);
                continue;
            }
        }
        parts.push(piece.to_string());
    }
    parts
}
