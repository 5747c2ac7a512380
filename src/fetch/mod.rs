pub mod queue;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Error;
use crate::metrics::EntityRecords;

pub use queue::{FetchQueue, TaskHandle};
pub use source::{Entity, EntityKind, JsonDirSource, MetricsSource};

/// Options controlling how detail fetches are paced.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub max_concurrent: usize,
    /// Wait after each fetch settles before its slot is reused.
    pub delay_between_starts: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: FetchQueue::DEFAULT_MAX_CONCURRENT,
            delay_between_starts: FetchQueue::DEFAULT_DELAY,
        }
    }
}

impl FetchOptions {
    pub fn queue(&self) -> FetchQueue {
        FetchQueue::new(self.max_concurrent, self.delay_between_starts)
    }
}

/// Callbacks for reporting fetch progress. All methods default to no-ops.
pub trait FetchProgress: Send + Sync {
    fn on_entity_queued(&self, _entity_id: &str, _index: usize, _total: usize) {}
    fn on_entity_loaded(&self, _entity_id: &str, _records: usize) {}
    fn on_entity_failed(&self, _entity_id: &str, _error: &Error) {}
}

pub struct NoopProgress;

impl FetchProgress for NoopProgress {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFailure {
    pub entity_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetchStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Outcome of loading several entities. `loaded` keeps submission order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchReport {
    pub loaded: Vec<EntityRecords>,
    pub failures: Vec<FetchFailure>,
    pub status: FetchStatus,
}

impl FetchReport {
    /// Build a report with the status derived from counts.
    pub fn from_parts(loaded: Vec<EntityRecords>, failures: Vec<FetchFailure>) -> Self {
        let status = if failures.is_empty() {
            FetchStatus::Success
        } else if !loaded.is_empty() {
            FetchStatus::PartialFailure
        } else {
            FetchStatus::Failed
        };
        Self {
            loaded,
            failures,
            status,
        }
    }
}

/// Fetch daily records for every entity through `queue`.
///
/// One queue task is scheduled per entity; a failing entity is recorded in
/// the report and does not affect the others.
pub async fn fetch_entities<S: MetricsSource>(
    queue: &FetchQueue,
    source: &Arc<S>,
    entity_ids: &[String],
    from: NaiveDate,
    to: NaiveDate,
    progress: &dyn FetchProgress,
) -> FetchReport {
    let total = entity_ids.len();
    let handles: Vec<(String, TaskHandle<EntityRecords>)> = entity_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            progress.on_entity_queued(id, i, total);
            let source = Arc::clone(source);
            let entity_id = id.clone();
            let handle = queue.add(move || async move {
                let records = source.fetch_daily(&entity_id, from, to).await?;
                Ok::<_, Error>(EntityRecords { entity_id, records })
            });
            (id.clone(), handle)
        })
        .collect();

    let mut loaded = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (entity_id, handle) in handles {
        match handle.await {
            Ok(entity) => {
                log::info!("loaded {} records for {entity_id}", entity.records.len());
                progress.on_entity_loaded(&entity_id, entity.records.len());
                loaded.push(entity);
            }
            Err(e) => {
                log::warn!("failed to load {entity_id}: {e}");
                progress.on_entity_failed(&entity_id, &e);
                failures.push(FetchFailure {
                    entity_id,
                    error: e.to_string(),
                });
            }
        }
    }

    FetchReport::from_parts(loaded, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::metrics::{DailyMetricRecord, MetricKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// In-memory source that fails for ids starting with "x" and takes
    /// longer for lower ids, so completions arrive out of order.
    #[derive(Default)]
    struct FakeSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MetricsSource for FakeSource {
        async fn list_entities(&self) -> Result<Vec<Entity>> {
            Ok(Vec::new())
        }

        async fn fetch_daily(
            &self,
            entity_id: &str,
            from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<DailyMetricRecord>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let n: u64 = entity_id.trim_start_matches('x').parse().unwrap_or(1);
            tokio::time::sleep(Duration::from_millis(30 / n.max(1))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if entity_id.starts_with('x') {
                return Err(Error::Source {
                    entity_id: entity_id.to_string(),
                    message: "503".into(),
                });
            }
            Ok(vec![DailyMetricRecord::new(from).with(MetricKey::Orders, n as f64)])
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl FetchProgress for Recorder {
        fn on_entity_queued(&self, entity_id: &str, index: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("queued {entity_id} {}/{total}", index + 1));
        }

        fn on_entity_failed(&self, entity_id: &str, _error: &Error) {
            let event = format!("failed {entity_id}");
            self.events.lock().unwrap().push(event);
        }
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn options() -> FetchOptions {
        FetchOptions {
            max_concurrent: 2,
            delay_between_starts: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_fetch_entities_success_keeps_order() {
        let source = Arc::new(FakeSource::default());
        let queue = options().queue();
        let report = fetch_entities(
            &queue,
            &source,
            &ids(&["1", "2", "3", "4", "5"]),
            d(2025, 1, 1),
            d(2025, 1, 3),
            &NoopProgress,
        )
        .await;

        assert_eq!(report.status, FetchStatus::Success);
        let loaded: Vec<&str> = report
            .loaded
            .iter()
            .map(|e| e.entity_id.as_str())
            .collect();
        assert_eq!(loaded, vec!["1", "2", "3", "4", "5"]);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_fetch_entities_partial_failure() {
        let source = Arc::new(FakeSource::default());
        let queue = options().queue();
        let progress = Recorder::default();
        let report = fetch_entities(
            &queue,
            &source,
            &ids(&["x1", "2", "3"]),
            d(2025, 1, 1),
            d(2025, 1, 3),
            &progress,
        )
        .await;

        assert_eq!(report.status, FetchStatus::PartialFailure);
        assert_eq!(report.loaded.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity_id, "x1");

        let events = progress.events.lock().unwrap();
        assert_eq!(events[0], "queued x1 1/3");
        assert!(events.contains(&"failed x1".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_entities_all_failed() {
        let source = Arc::new(FakeSource::default());
        let queue = options().queue();
        let report = fetch_entities(
            &queue,
            &source,
            &ids(&["x1", "x2"]),
            d(2025, 1, 1),
            d(2025, 1, 3),
            &NoopProgress,
        )
        .await;
        assert_eq!(report.status, FetchStatus::Failed);
        assert!(report.loaded.is_empty());
    }

    #[test]
    fn test_report_status_from_parts() {
        let empty = FetchReport::from_parts(vec![], vec![]);
        assert_eq!(empty.status, FetchStatus::Success);
    }

    #[test]
    fn test_default_options() {
        let opts = FetchOptions::default();
        assert_eq!(opts.max_concurrent, 2);
        assert_eq!(opts.delay_between_starts, Duration::from_millis(200));
    }
}
