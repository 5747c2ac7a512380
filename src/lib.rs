pub mod date_util;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod period;

pub use error::{Error, Result};
pub use fetch::{
    Entity, EntityKind, FetchOptions, FetchProgress, FetchQueue, FetchReport, FetchStatus,
    JsonDirSource, MetricsSource, NoopProgress, TaskHandle,
};
pub use metrics::{
    aggregate_period, combine_summaries, percent_difference, total_for_period, value_for_date,
    DailyMetricRecord, EntityRecords, MetricKey, PeriodSummary, PeriodSummaryRow, PeriodValue,
};
pub use period::{
    check_periods, generate_default_periods, validate_periods, Period, PeriodCheck, PeriodSet,
};

use std::sync::Arc;

use serde::Serialize;

/// One entity's values for a single metric across the compared periods.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityComparison {
    pub entity_id: String,
    pub rows: Vec<PeriodValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricComparison {
    pub metric: MetricKey,
    pub periods: Vec<Period>,
    pub entities: Vec<EntityComparison>,
    pub fetch: FetchReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub entity_id: String,
    pub rows: Vec<PeriodSummaryRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub periods: Vec<Period>,
    pub entities: Vec<EntitySummary>,
    /// All loaded entities combined, ratios derived from summed counters.
    pub combined: Vec<PeriodSummaryRow>,
    pub fetch: FetchReport,
}

/// Main entry point: a metrics source behind a paced fetch queue.
pub struct SellerAnalytics<S: MetricsSource> {
    source: Arc<S>,
    queue: FetchQueue,
}

impl<S: MetricsSource> SellerAnalytics<S> {
    pub fn new(source: S, options: FetchOptions) -> Self {
        Self {
            source: Arc::new(source),
            queue: options.queue(),
        }
    }

    pub async fn entities(&self) -> Result<Vec<Entity>> {
        self.source.list_entities().await
    }

    /// Drop fetches that have not started yet. Returns how many were dropped.
    pub fn cancel_pending(&self) -> usize {
        self.queue.clear()
    }

    /// The given ids, or every entity the source knows when none are given.
    pub async fn resolve_ids(&self, entity_ids: &[String]) -> Result<Vec<String>> {
        if !entity_ids.is_empty() {
            return Ok(entity_ids.to_vec());
        }
        let ids: Vec<String> = self.entities().await?.into_iter().map(|e| e.id).collect();
        if ids.is_empty() {
            return Err(Error::NotFound("no entities in source".into()));
        }
        Ok(ids)
    }

    /// Fetch daily records covering every period for each entity.
    ///
    /// The period set must be valid; nothing is fetched otherwise.
    pub async fn load(
        &self,
        entity_ids: &[String],
        periods: &[Period],
        progress: &dyn FetchProgress,
    ) -> Result<FetchReport> {
        let check = check_periods(periods);
        if !check.is_valid() {
            return Err(Error::InvalidPeriod(check.describe()));
        }
        let (from, to) = period::covering_range(periods)
            .ok_or_else(|| Error::InvalidPeriod("no usable period".into()))?;

        let ids = self.resolve_ids(entity_ids).await?;
        log::info!(
            "loading {} entities for {}..{}",
            ids.len(),
            date_util::format_date(from),
            date_util::format_date(to)
        );
        Ok(fetch::fetch_entities(&self.queue, &self.source, &ids, from, to, progress).await)
    }

    /// Per-entity values of `metric` in each period, with deltas.
    pub async fn compare(
        &self,
        entity_ids: &[String],
        periods: &[Period],
        metric: MetricKey,
        progress: &dyn FetchProgress,
    ) -> Result<MetricComparison> {
        let report = self.load(entity_ids, periods, progress).await?;
        let entities = report
            .loaded
            .iter()
            .map(|e| EntityComparison {
                entity_id: e.entity_id.clone(),
                rows: metrics::compare_metric(&e.records, periods, metric),
            })
            .collect();
        Ok(MetricComparison {
            metric,
            periods: periods.to_vec(),
            entities,
            fetch: report,
        })
    }

    /// Period summaries per entity and for all loaded entities together.
    pub async fn summarize(
        &self,
        entity_ids: &[String],
        periods: &[Period],
        progress: &dyn FetchProgress,
    ) -> Result<SummaryReport> {
        let report = self.load(entity_ids, periods, progress).await?;
        let entities = report
            .loaded
            .iter()
            .map(|e| EntitySummary {
                entity_id: e.entity_id.clone(),
                rows: metrics::summarize_periods(&e.records, periods),
            })
            .collect();
        let combined = metrics::summarize_periods_combined(&report.loaded, periods);
        Ok(SummaryReport {
            periods: periods.to_vec(),
            entities,
            combined,
            fetch: report,
        })
    }
}
