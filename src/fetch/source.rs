use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::DailyMetricRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Product,
    Campaign,
}

/// A product card or advertising campaign that has daily metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: EntityKind,
}

/// Where daily metrics come from. Implementations wrap the marketplace API
/// (or a local export of it); the fetch engine only schedules calls.
pub trait MetricsSource: Send + Sync + 'static {
    fn list_entities(&self) -> impl Future<Output = Result<Vec<Entity>>> + Send;

    /// Daily records for `entity_id` whose date falls in `[from, to]`.
    fn fetch_daily(
        &self,
        entity_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Future<Output = Result<Vec<DailyMetricRecord>>> + Send;
}

/// Reads a directory export:
///
/// ```text
/// <dir>/entities.json   [{"id": "1001", "name": "...", "kind": "product"}, ...]
/// <dir>/<id>.json       [{"date": "2025-01-01", "orders": 3, ...}, ...]
/// ```
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub const ENTITIES_FILE: &'static str = "entities.json";

    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Default location: `~/.mpanalytics/data`.
    pub fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(home.join(".mpanalytics").join("data"))
    }

    fn records_path(&self, entity_id: &str) -> Result<PathBuf> {
        let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
        if entity_id.is_empty() || !entity_id.chars().all(allowed) {
            return Err(source_error(entity_id, "entity id must be alphanumeric"));
        }
        Ok(self.dir.join(format!("{entity_id}.json")))
    }
}

fn source_error(entity_id: &str, message: impl ToString) -> Error {
    Error::Source {
        entity_id: entity_id.to_string(),
        message: message.to_string(),
    }
}

impl MetricsSource for JsonDirSource {
    async fn list_entities(&self) -> Result<Vec<Entity>> {
        let path = self.dir.join(Self::ENTITIES_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn fetch_daily(
        &self,
        entity_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyMetricRecord>> {
        let path = self.records_path(entity_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("metrics for entity {entity_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        let records: Vec<DailyMetricRecord> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => return Err(source_error(entity_id, e)),
        };
        log::debug!("read {} daily records for {entity_id}", records.len());

        let mut in_range: Vec<DailyMetricRecord> = records
            .into_iter()
            .filter(|r| r.date >= from && r.date <= to)
            .collect();
        in_range.sort_by_key(|r| r.date);
        Ok(in_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn test_list_entities() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "entities.json",
            r#"[{"id": "1001", "name": "Mug", "kind": "product"},
                {"id": "77", "kind": "campaign"}]"#,
        );
        let source = JsonDirSource::new(tmp.path());
        let entities = source.list_entities().await.unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name.as_deref(), Some("Mug"));
        assert_eq!(entities[1].kind, EntityKind::Campaign);
        assert_eq!(entities[1].name, None);
    }

    #[tokio::test]
    async fn test_list_entities_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let source = JsonDirSource::new(tmp.path());
        assert!(matches!(source.list_entities().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_daily_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "1001.json",
            r#"[{"date": "2025-01-03", "orders": 3},
                {"date": "2025-01-01", "orders": 1},
                {"date": "2025-01-09", "orders": 9}]"#,
        );
        let source = JsonDirSource::new(tmp.path());
        let records = source
            .fetch_daily("1001", d(2025, 1, 1), d(2025, 1, 5))
            .await
            .unwrap();
        let dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(2025, 1, 1), d(2025, 1, 3)]);
    }

    #[tokio::test]
    async fn test_fetch_daily_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "bad.json", "{not json");
        let source = JsonDirSource::new(tmp.path());

        let (from, to) = (d(2025, 1, 1), d(2025, 1, 2));

        let missing = source.fetch_daily("404", from, to).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        let malformed = source.fetch_daily("bad", from, to).await;
        assert!(matches!(malformed, Err(Error::Source { .. })));

        let escape = source.fetch_daily("../etc", from, to).await;
        assert!(matches!(escape, Err(Error::Source { .. })));
    }
}
