use std::sync::LazyLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::date_util::{self, format_date, parse_date, today, yesterday_of, DATE_FORMAT};
use crate::error::{Error, Result};

static RE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})\s*\.\.\s*(\d{4}-\d{2}-\d{2})$").unwrap());
static RE_DAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Number of windows produced by [`generate_default_periods`].
pub const DEFAULT_PERIOD_COUNT: usize = 4;
/// Length in days of each default window.
pub const DEFAULT_PERIOD_DAYS: i64 = 3;
/// A period set never shrinks below this many entries.
pub const MIN_PERIODS: usize = 2;
/// A period set never grows beyond this many entries.
pub const MAX_PERIODS: usize = 5;

/// A named, closed date interval selected for comparison.
///
/// Dates are kept as the raw `YYYY-MM-DD` strings the user typed, so a set
/// being edited can hold unparsable input until it is validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub id: u32,
    pub name: String,
    pub date_from: String,
    pub date_to: String,
}

impl Period {
    pub fn new(id: u32, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            id,
            name: period_name(id),
            date_from: format_date(date_from),
            date_to: format_date(date_to),
        }
    }

    /// Parse `YYYY-MM-DD..YYYY-MM-DD`, or a single `YYYY-MM-DD` for a one-day period.
    ///
    /// Only the shape and calendar validity are checked here; ordering of the
    /// bounds is left to [`check_periods`]. A bound that is not a calendar
    /// date yields [`Error::InvalidDate`].
    pub fn parse_range(id: u32, s: &str) -> Result<Self> {
        let s = s.trim();
        let (from, to) = if let Some(caps) = RE_RANGE.captures(s) {
            (caps[1].to_string(), caps[2].to_string())
        } else if RE_DAY.is_match(s) {
            (s.to_string(), s.to_string())
        } else {
            return Err(Error::InvalidPeriod(format!(
                "expected {DATE_FORMAT}..{DATE_FORMAT}, got: {s}"
            )));
        };

        for part in [&from, &to] {
            date_util::parse_date_strict(part)?;
        }

        Ok(Self {
            id,
            name: period_name(id),
            date_from: from,
            date_to: to,
        })
    }

    /// Parsed `(date_from, date_to)`, or `None` if either bound is unparsable.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((parse_date(&self.date_from)?, parse_date(&self.date_to)?))
    }

    /// Parsed bounds when they are well-formed and ordered.
    pub fn ordered_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.bounds().filter(|(from, to)| from <= to)
    }

    pub fn is_well_formed(&self) -> bool {
        self.ordered_bounds().is_some()
    }

    /// Closed-interval overlap on parsed bounds. `None` if either period is malformed.
    pub fn overlaps(&self, other: &Period) -> Option<bool> {
        let (a_from, a_to) = self.ordered_bounds()?;
        let (b_from, b_to) = other.ordered_bounds()?;
        Some(a_to >= b_from && a_from <= b_to)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}..{})", self.name, self.date_from, self.date_to)
    }
}

pub fn period_name(id: u32) -> String {
    format!("период №{id}")
}

/// Default comparison windows ending yesterday (relative to the local clock).
pub fn generate_default_periods() -> Vec<Period> {
    default_periods_as_of(today())
}

/// Four back-to-back 3-day windows ending the day before `today`, oldest first,
/// numbered `1..=4` in that order.
pub fn default_periods_as_of(today: NaiveDate) -> Vec<Period> {
    let yesterday = yesterday_of(today);
    let mut windows: Vec<(NaiveDate, NaiveDate)> = (0..DEFAULT_PERIOD_COUNT as i64)
        .map(|i| {
            let end = yesterday - Duration::days(i * DEFAULT_PERIOD_DAYS);
            (end - Duration::days(DEFAULT_PERIOD_DAYS - 1), end)
        })
        .collect();
    windows.reverse();

    windows
        .into_iter()
        .enumerate()
        .map(|(i, (from, to))| Period::new(i as u32 + 1, from, to))
        .collect()
}

/// Outcome of validating a period set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeriodCheck {
    /// Positions whose bounds are unparsable or reversed.
    pub malformed: Vec<usize>,
    /// Position pairs `(i, j)`, `i < j`, whose closed intervals share a day.
    pub overlaps: Vec<(usize, usize)>,
}

impl PeriodCheck {
    pub fn is_valid(&self) -> bool {
        self.malformed.is_empty() && self.overlaps.is_empty()
    }

    /// Human-readable list of problems, 1-based like period numbers.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self
            .malformed
            .iter()
            .map(|i| format!("period {} has invalid dates", i + 1))
            .collect();
        for (a, b) in &self.overlaps {
            parts.push(format!("periods {} and {} overlap", a + 1, b + 1));
        }
        parts.join("; ")
    }
}

/// Validate a period set, reporting which entries are at fault.
///
/// Sets of zero or one period are always valid, even if that single period
/// is malformed.
pub fn check_periods(periods: &[Period]) -> PeriodCheck {
    let mut check = PeriodCheck::default();
    if periods.len() < 2 {
        return check;
    }

    check.malformed = periods
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_well_formed())
        .map(|(i, _)| i)
        .collect();

    for i in 0..periods.len() {
        for j in (i + 1)..periods.len() {
            if periods[i].overlaps(&periods[j]) == Some(true) {
                check.overlaps.push((i, j));
            }
        }
    }
    check
}

pub fn validate_periods(periods: &[Period]) -> bool {
    check_periods(periods).is_valid()
}

/// Earliest start and latest end across well-formed periods.
pub fn covering_range(periods: &[Period]) -> Option<(NaiveDate, NaiveDate)> {
    let bounds: Vec<(NaiveDate, NaiveDate)> =
        periods.iter().filter_map(Period::ordered_bounds).collect();
    let from = bounds.iter().map(|(from, _)| *from).min()?;
    let to = bounds.iter().map(|(_, to)| *to).max()?;
    Some((from, to))
}

/// The user's working set of comparison periods, bounded to
/// [`MIN_PERIODS`]..=[`MAX_PERIODS`] entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodSet {
    periods: Vec<Period>,
}

impl PeriodSet {
    pub fn defaults(today: NaiveDate) -> Self {
        Self {
            periods: default_periods_as_of(today),
        }
    }

    /// Wrap an arbitrary list, renumbering it positionally.
    pub fn from_periods(periods: Vec<Period>) -> Self {
        let mut set = Self { periods };
        set.renumber();
        set
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn check(&self) -> PeriodCheck {
        check_periods(&self.periods)
    }

    pub fn is_valid(&self) -> bool {
        self.check().is_valid()
    }

    /// Prepend a 3-day window ending the day before the oldest parseable
    /// start. Returns `false` (and changes nothing) at the ceiling.
    pub fn add(&mut self) -> bool {
        if self.periods.len() >= MAX_PERIODS {
            log::debug!("period set already holds {MAX_PERIODS} periods, ignoring add");
            return false;
        }

        let oldest_start = self
            .periods
            .iter()
            .filter_map(|p| parse_date(&p.date_from))
            .min()
            .unwrap_or_else(today);
        let end = oldest_start - Duration::days(1);
        let start = end - Duration::days(DEFAULT_PERIOD_DAYS - 1);

        self.periods.insert(0, Period::new(0, start, end));
        self.renumber();
        true
    }

    /// Remove the period at `index`. Returns `false` at the floor or when
    /// `index` is out of range.
    pub fn remove(&mut self, index: usize) -> bool {
        if self.periods.len() <= MIN_PERIODS || index >= self.periods.len() {
            log::debug!(
                "ignoring remove of period {index} from a set of {}",
                self.periods.len()
            );
            return false;
        }
        self.periods.remove(index);
        self.renumber();
        true
    }

    /// Replace the raw bounds of the period at `index`.
    pub fn update(&mut self, index: usize, date_from: &str, date_to: &str) -> bool {
        match self.periods.get_mut(index) {
            Some(p) => {
                p.date_from = date_from.to_string();
                p.date_to = date_to.to_string();
                true
            }
            None => false,
        }
    }

    /// Reassign every id and name from position.
    fn renumber(&mut self) {
        for (i, p) in self.periods.iter_mut().enumerate() {
            p.id = i as u32 + 1;
            p.name = period_name(p.id);
        }
    }
}

impl IntoIterator for PeriodSet {
    type Item = Period;
    type IntoIter = std::vec::IntoIter<Period>;

    fn into_iter(self) -> Self::IntoIter {
        self.periods.into_iter()
    }
}
