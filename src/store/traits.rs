//! Store traits and record types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorResult;
use crate::parameters::{ParameterSet, WorkParameter};
use crate::snapshot::Snapshot;

/// A persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Store-assigned, unique within one store.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub snapshot: Snapshot,
}

/// Mean and extremes of one numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldSummary {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| FieldSummary {
            avg: sum / count as f64,
            min,
            max,
        })
    }
}

/// Aggregates over a time window. Summaries are `None` when the window is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStatistics {
    pub count: usize,
    pub temperature: Option<FieldSummary>,
    pub pressure: Option<FieldSummary>,
}

impl HistoryStatistics {
    pub fn from_records(records: &[HistoryRecord]) -> Self {
        Self {
            count: records.len(),
            temperature: FieldSummary::from_values(
                records.iter().map(|r| r.snapshot.furnace.temperature),
            ),
            pressure: FieldSummary::from_values(
                records.iter().map(|r| r.snapshot.furnace.pressure),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Time series of snapshots, indexed by timestamp.
///
/// Records are immutable once inserted; the only removal is
/// [`delete_before`](HistoryStore::delete_before).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one snapshot and return the new record's id.
    async fn insert(&self, snapshot: &Snapshot) -> MonitorResult<u64>;

    /// Append several snapshots in order.
    async fn insert_many(&self, snapshots: &[Snapshot]) -> MonitorResult<Vec<u64>> {
        let mut ids = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            ids.push(self.insert(snapshot).await?);
        }
        Ok(ids)
    }

    /// The `limit` most recent records, newest first.
    async fn latest(&self, limit: usize) -> MonitorResult<Vec<HistoryRecord>>;

    /// Records with `start <= timestamp <= end`, oldest first.
    async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MonitorResult<Vec<HistoryRecord>>;

    /// Remove records strictly older than `cutoff`; returns how many were removed.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> MonitorResult<usize>;

    async fn count(&self) -> MonitorResult<usize>;

    /// Temperature and pressure statistics over `[start, end]`.
    async fn statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MonitorResult<HistoryStatistics> {
        let records = self.range(start, end).await?;
        Ok(HistoryStatistics::from_records(&records))
    }
}

/// Imported work parameter sets.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Store a set, assigning ids to it and to every parameter without one.
    async fn save_parameter_set(&self, set: ParameterSet) -> MonitorResult<ParameterSet>;

    /// All sets, most recently imported first.
    async fn parameter_sets(&self) -> MonitorResult<Vec<ParameterSet>>;

    async fn latest_parameter_set(&self) -> MonitorResult<Option<ParameterSet>> {
        Ok(self.parameter_sets().await?.into_iter().next())
    }

    /// Replace parameters of set `set_id` by id; parameters without a known id
    /// are appended with a fresh one. Returns the number written.
    async fn upsert_parameters(
        &self,
        set_id: u64,
        parameters: &[WorkParameter],
    ) -> MonitorResult<usize>;

    /// Remove one parameter from whichever set holds it.
    async fn delete_parameter(&self, parameter_id: u64) -> MonitorResult<bool>;
}
