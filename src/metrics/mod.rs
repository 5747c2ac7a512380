//! Rollups of daily marketplace metrics into period values and
//! period-over-period deltas.
//!
//! Everything here is a pure function of its inputs and is cheap enough to
//! recompute on every call. `None` means "cannot determine" throughout: a
//! missing day, an empty period, or a zero denominator never turns into `0`.

pub mod types;

pub use types::*;

use chrono::NaiveDate;
use serde::Serialize;

use crate::date_util::days_in_range;
use crate::period::Period;

/// Absolute difference below which two values count as unchanged.
pub const ABSOLUTE_EPSILON: f64 = 0.001;
/// Relative change (in percent) below which two values count as unchanged.
pub const PERCENT_EPSILON: f64 = 0.01;

/// Value of `key` on `date`, or `None` if that day or that field was not reported.
pub fn value_for_date(
    records: &[DailyMetricRecord],
    key: MetricKey,
    date: NaiveDate,
) -> Option<f64> {
    records.iter().find(|r| r.date == date)?.get(key)
}

/// Roll `key` up over `dates`, skipping days without a value.
///
/// Sum-kind metrics are summed and average-kind metrics are averaged over the
/// days that have data. If no day has data the result is `None`, not zero.
pub fn total_for_period(
    records: &[DailyMetricRecord],
    dates: &[NaiveDate],
    key: MetricKey,
) -> Option<f64> {
    let values: Vec<f64> = dates
        .iter()
        .filter_map(|d| value_for_date(records, key, *d))
        .collect();
    if values.is_empty() {
        return None;
    }

    let sum: f64 = values.iter().sum();
    match key.aggregation() {
        AggregationKind::Sum => Some(sum),
        AggregationKind::Average => Some(sum / values.len() as f64),
    }
}

/// Sum the raw counters of every record in `[start, end]` and derive ratios.
/// Returns `None` when no record falls inside the range.
pub fn aggregate_period(
    records: &[DailyMetricRecord],
    start: NaiveDate,
    end: NaiveDate,
) -> Option<PeriodSummary> {
    let mut totals = RawTotals::default();
    let mut count = 0usize;
    for r in records.iter().filter(|r| r.date >= start && r.date <= end) {
        totals += RawTotals::from_record(r);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(PeriodSummary::from_totals(totals, count))
}

/// Merge summaries of several entities for the same period.
///
/// Raw counters are re-summed and ratios derived again from the combined
/// sums; per-entity ratios are never averaged.
pub fn combine_summaries(summaries: &[PeriodSummary]) -> Option<PeriodSummary> {
    if summaries.is_empty() {
        return None;
    }
    let mut totals = RawTotals::default();
    let mut count = 0usize;
    for s in summaries {
        totals += s.totals;
        count += s.record_count;
    }
    Some(PeriodSummary::from_totals(totals, count))
}

/// Summary of a group of entities over `[start, end]`. Entities with no
/// records in range are skipped.
pub fn combined_summary(
    entities: &[EntityRecords],
    start: NaiveDate,
    end: NaiveDate,
) -> Option<PeriodSummary> {
    let summaries: Vec<PeriodSummary> = entities
        .iter()
        .filter_map(|e| aggregate_period(&e.records, start, end))
        .collect();
    combine_summaries(&summaries)
}

/// Relative change from `v1` to `v2` in percent, with noise suppression.
///
/// Returns `None` when either side is unknown, when `v1` is zero, or when the
/// change is too small to show: an absolute difference under
/// [`ABSOLUTE_EPSILON`] or a relative change under [`PERCENT_EPSILON`] percent.
///
/// With `round_to`, both values are first rounded to that many decimals. A
/// base that only becomes zero through that rounding also yields `None`
/// instead of an infinite change, and a result that is not finite is never
/// returned.
pub fn percent_difference(v1: Option<f64>, v2: Option<f64>, round_to: Option<u32>) -> Option<f64> {
    let (v1, v2) = (v1?, v2?);
    if v1 == 0.0 {
        return None;
    }

    let (v1, v2) = match round_to {
        Some(decimals) => (round_decimals(v1, decimals), round_decimals(v2, decimals)),
        None => (v1, v2),
    };
    if v1 == 0.0 {
        return None;
    }

    if (v2 - v1).abs() < ABSOLUTE_EPSILON {
        return None;
    }

    let pct = (v2 - v1) / v1 * 100.0;
    if !pct.is_finite() || pct.abs() < PERCENT_EPSILON {
        return None;
    }
    Some(pct)
}

/// Beyond this many decimals rounding cannot change an `f64`, and the scale
/// factor would overflow.
const MAX_ROUND_DECIMALS: u32 = 15;

fn round_decimals(v: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(MAX_ROUND_DECIMALS) as i32);
    let scaled = v * factor;
    if !scaled.is_finite() {
        return v;
    }
    scaled.round() / factor
}

/// Decimals to round to before comparing values of `key`.
pub fn comparison_rounding(key: MetricKey) -> Option<u32> {
    match key.descriptor().format {
        FormatKind::Currency => Some(2),
        FormatKind::Count | FormatKind::Percent => None,
    }
}

/// One row of a period comparison for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodValue {
    pub period_id: u32,
    pub period_name: String,
    pub value: Option<f64>,
    /// Change against the previous period in the list.
    pub delta: Option<f64>,
}

/// Roll `key` up over every period and compare each to the one before it.
/// Malformed periods yield `None` values.
pub fn compare_metric(
    records: &[DailyMetricRecord],
    periods: &[Period],
    key: MetricKey,
) -> Vec<PeriodValue> {
    let rounding = comparison_rounding(key);
    let mut rows: Vec<PeriodValue> = Vec::with_capacity(periods.len());
    let mut previous: Option<f64> = None;

    for (i, period) in periods.iter().enumerate() {
        let value = period
            .ordered_bounds()
            .and_then(|(from, to)| total_for_period(records, &days_in_range(from, to), key));
        let delta = if i == 0 {
            None
        } else {
            percent_difference(previous, value, rounding)
        };
        rows.push(PeriodValue {
            period_id: period.id,
            period_name: period.name.clone(),
            value,
            delta,
        });
        previous = value;
    }
    rows
}

/// Summary for one period, plus deltas against the previous period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummaryRow {
    pub period_id: u32,
    pub period_name: String,
    pub summary: Option<PeriodSummary>,
    pub deltas: Vec<MetricDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricDelta {
    pub key: MetricKey,
    pub delta: Option<f64>,
}

/// Deltas for every summary key between two summaries.
pub fn summary_deltas(
    previous: Option<&PeriodSummary>,
    current: Option<&PeriodSummary>,
) -> Vec<MetricDelta> {
    PeriodSummary::keys()
        .iter()
        .map(|&key| MetricDelta {
            key,
            delta: percent_difference(
                previous.and_then(|s| s.get(key)),
                current.and_then(|s| s.get(key)),
                comparison_rounding(key),
            ),
        })
        .collect()
}

/// Build summary rows for `periods` with a caller-supplied aggregator, so a
/// single entity and a group of entities share the delta logic.
pub fn summarize_periods_with<F>(periods: &[Period], mut aggregate: F) -> Vec<PeriodSummaryRow>
where
    F: FnMut(NaiveDate, NaiveDate) -> Option<PeriodSummary>,
{
    let mut rows: Vec<PeriodSummaryRow> = Vec::with_capacity(periods.len());
    for period in periods {
        let summary = period
            .ordered_bounds()
            .and_then(|(from, to)| aggregate(from, to));
        let deltas = match rows.last() {
            Some(prev) => summary_deltas(prev.summary.as_ref(), summary.as_ref()),
            None => Vec::new(),
        };
        rows.push(PeriodSummaryRow {
            period_id: period.id,
            period_name: period.name.clone(),
            summary,
            deltas,
        });
    }
    rows
}

pub fn summarize_periods(
    records: &[DailyMetricRecord],
    periods: &[Period],
) -> Vec<PeriodSummaryRow> {
    summarize_periods_with(periods, |from, to| aggregate_period(records, from, to))
}

pub fn summarize_periods_combined(
    entities: &[EntityRecords],
    periods: &[Period],
) -> Vec<PeriodSummaryRow> {
    summarize_periods_with(periods, |from, to| combined_summary(entities, from, to))
}

/// Render a value for display; unknown values become an em dash.
pub fn format_value(value: Option<f64>, format: FormatKind) -> String {
    let Some(v) = value else {
        return "—".to_string();
    };
    match format {
        FormatKind::Count => group_thousands(v.round() as i64),
        FormatKind::Currency => format!("{v:.2}"),
        FormatKind::Percent => format!("{v:.2}%"),
    }
}

/// Render a delta as `+x.xx%` / `-x.xx%`, or an empty string when unchanged.
pub fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(d) => format!("{d:+.2}%"),
        None => String::new(),
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}
