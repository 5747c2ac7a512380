use chrono::{Duration, NaiveDate};

use crate::error::{Error, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` date, returning `None` for anything else.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Like [`parse_date`] but reports the offending input.
pub fn parse_date_strict(s: &str) -> Result<NaiveDate> {
    parse_date(s).ok_or_else(|| Error::InvalidDate(s.to_string()))
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// The last complete day relative to `today`.
pub fn yesterday_of(today: NaiveDate) -> NaiveDate {
    today - Duration::days(1)
}

/// Every calendar day in `[start, end]`, ascending. Empty when `start > end`.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}
