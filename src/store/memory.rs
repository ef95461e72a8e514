//! In-memory store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{MonitorError, MonitorResult};
use crate::parameters::{ParameterSet, WorkParameter};
use crate::snapshot::Snapshot;

use super::traits::{HistoryRecord, HistoryStore, ParameterStore};

/// Records ordered by `(timestamp, id)`; the timestamp index of both backends.
#[derive(Debug, Default)]
pub(crate) struct HistoryIndex {
    records: BTreeMap<(DateTime<Utc>, u64), HistoryRecord>,
    last_id: u64,
}

impl HistoryIndex {
    /// Build the record `snapshot` would become, without inserting it.
    pub(crate) fn prepare(&self, snapshot: &Snapshot) -> HistoryRecord {
        HistoryRecord {
            id: self.last_id + 1,
            timestamp: snapshot.timestamp,
            snapshot: snapshot.clone(),
        }
    }

    pub(crate) fn insert(&mut self, record: HistoryRecord) {
        self.last_id = self.last_id.max(record.id);
        self.records.insert((record.timestamp, record.id), record);
    }

    pub(crate) fn latest(&self, limit: usize) -> Vec<HistoryRecord> {
        self.records.values().rev().take(limit).cloned().collect()
    }

    pub(crate) fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<HistoryRecord> {
        if start > end {
            return Vec::new();
        }
        self.records
            .range((start, 0)..=(end, u64::MAX))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Number of records `delete_before(cutoff)` would remove.
    pub(crate) fn count_before(&self, cutoff: DateTime<Utc>) -> usize {
        self.records.range(..(cutoff, 0)).count()
    }

    pub(crate) fn delete_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let kept = self.records.split_off(&(cutoff, 0));
        let removed = std::mem::replace(&mut self.records, kept);
        removed.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Highest id ever handed out, including pruned records.
    pub(crate) fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Never hand out ids at or below `last_id`.
    pub(crate) fn reserve_ids(&mut self, last_id: u64) {
        self.last_id = self.last_id.max(last_id);
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.values()
    }
}

/// Parameter sets with id allocation.
#[derive(Debug, Default)]
pub(crate) struct ParameterBook {
    sets: Vec<ParameterSet>,
    last_set_id: u64,
    last_parameter_id: u64,
}

impl ParameterBook {
    pub(crate) fn from_sets(sets: Vec<ParameterSet>) -> Self {
        let last_set_id = sets.iter().filter_map(|s| s.id).max().unwrap_or(0);
        let last_parameter_id = sets
            .iter()
            .flat_map(|s| s.parameters.iter().filter_map(|p| p.id))
            .max()
            .unwrap_or(0);
        Self {
            sets,
            last_set_id,
            last_parameter_id,
        }
    }

    pub(crate) fn sets(&self) -> &[ParameterSet] {
        &self.sets
    }

    fn next_parameter_id(&mut self) -> u64 {
        self.last_parameter_id += 1;
        self.last_parameter_id
    }

    pub(crate) fn save(&mut self, mut set: ParameterSet) -> ParameterSet {
        self.last_set_id += 1;
        set.id = Some(self.last_set_id);
        for parameter in &mut set.parameters {
            match parameter.id {
                Some(id) => self.last_parameter_id = self.last_parameter_id.max(id),
                None => parameter.id = Some(self.next_parameter_id()),
            }
        }
        self.sets.push(set.clone());
        set
    }

    /// Newest import first; ties broken by id.
    pub(crate) fn ordered(&self) -> Vec<ParameterSet> {
        let mut sets = self.sets.clone();
        sets.sort_by(|a, b| b.imported_at.cmp(&a.imported_at).then(b.id.cmp(&a.id)));
        sets
    }

    pub(crate) fn upsert(
        &mut self,
        set_id: u64,
        parameters: &[WorkParameter],
    ) -> MonitorResult<usize> {
        let index = self
            .sets
            .iter()
            .position(|s| s.id == Some(set_id))
            .ok_or_else(|| MonitorError::storage(format!("parameter set {} not found", set_id)))?;

        for parameter in parameters {
            let existing = parameter.id.and_then(|id| {
                self.sets[index]
                    .parameters
                    .iter()
                    .position(|p| p.id == Some(id))
            });
            match existing {
                Some(pos) => self.sets[index].parameters[pos] = parameter.clone(),
                None => {
                    let mut parameter = parameter.clone();
                    parameter.id = Some(self.next_parameter_id());
                    self.sets[index].parameters.push(parameter);
                }
            }
        }
        Ok(parameters.len())
    }

    pub(crate) fn delete(&mut self, parameter_id: u64) -> bool {
        for set in &mut self.sets {
            if let Some(pos) = set.parameters.iter().position(|p| p.id == Some(parameter_id)) {
                set.parameters.remove(pos);
                return true;
            }
        }
        false
    }
}

/// Volatile store; everything is lost when it is dropped.
///
/// # Example
///
/// ```rust
/// use furnace_monitor::store::MemoryStore;
///
/// let store = MemoryStore::new();
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    history: RwLock<HistoryIndex>,
    parameters: RwLock<ParameterBook>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn insert(&self, snapshot: &Snapshot) -> MonitorResult<u64> {
        let mut history = self.history.write();
        let record = history.prepare(snapshot);
        let id = record.id;
        history.insert(record);
        Ok(id)
    }

    async fn latest(&self, limit: usize) -> MonitorResult<Vec<HistoryRecord>> {
        Ok(self.history.read().latest(limit))
    }

    async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MonitorResult<Vec<HistoryRecord>> {
        Ok(self.history.read().range(start, end))
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> MonitorResult<usize> {
        Ok(self.history.write().delete_before(cutoff))
    }

    async fn count(&self) -> MonitorResult<usize> {
        Ok(self.history.read().len())
    }
}

#[async_trait]
impl ParameterStore for MemoryStore {
    async fn save_parameter_set(&self, set: ParameterSet) -> MonitorResult<ParameterSet> {
        Ok(self.parameters.write().save(set))
    }

    async fn parameter_sets(&self) -> MonitorResult<Vec<ParameterSet>> {
        Ok(self.parameters.read().ordered())
    }

    async fn upsert_parameters(
        &self,
        set_id: u64,
        parameters: &[WorkParameter],
    ) -> MonitorResult<usize> {
        self.parameters.write().upsert(set_id, parameters)
    }

    async fn delete_parameter(&self, parameter_id: u64) -> MonitorResult<bool> {
        Ok(self.parameters.write().delete(parameter_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot(secs: i64, temperature: f64) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.timestamp = at(secs);
        snapshot.furnace.temperature = temperature;
        snapshot.furnace.pressure = temperature / 10.0;
        snapshot
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.insert(&snapshot(0, 1.0)).await.unwrap();
        let b = store.insert(&snapshot(0, 2.0)).await.unwrap();
        assert!(b > a);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_latest_orders_newest_first() {
        let store = MemoryStore::new();
        let snapshots: Vec<_> = [3, 1, 2].iter().map(|s| snapshot(*s, 0.0)).collect();
        store.insert_many(&snapshots).await.unwrap();

        let latest = store.latest(2).await.unwrap();
        let times: Vec<_> = latest.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(3), at(2)]);

        assert_eq!(store.latest(10).await.unwrap().len(), 3);
        assert!(store.latest(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_ascending() {
        let store = MemoryStore::new();
        for s in 0..10 {
            store.insert(&snapshot(s, 0.0)).await.unwrap();
        }

        let records = store.range(at(2), at(5)).await.unwrap();
        let times: Vec<_> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(2), at(3), at(4), at(5)]);

        assert!(store.range(at(5), at(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_before_is_strict() {
        let store = MemoryStore::new();
        for s in 0..5 {
            store.insert(&snapshot(s, 0.0)).await.unwrap();
        }

        assert_eq!(store.delete_before(at(3)).await.unwrap(), 3);
        assert_eq!(store.delete_before(at(3)).await.unwrap(), 0);
        let left: Vec<_> = store
            .range(at(0), at(10))
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(left, vec![at(3), at(4)]);
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = MemoryStore::new();
        for (i, t) in [10.0, 20.0, 30.0].iter().enumerate() {
            store.insert(&snapshot(i as i64, *t)).await.unwrap();
        }

        let stats = store.statistics(at(0), at(2)).await.unwrap();
        assert_eq!(stats.count, 3);
        let temperature = stats.temperature.unwrap();
        assert_eq!(temperature.avg, 20.0);
        assert_eq!(temperature.min, 10.0);
        assert_eq!(temperature.max, 30.0);
        assert_eq!(stats.pressure.unwrap().max, 3.0);

        let empty = store
            .statistics(at(100), at(100) + Duration::seconds(5))
            .await
            .unwrap();
        assert!(empty.is_empty());
        assert!(empty.temperature.is_none());
        assert!(empty.pressure.is_none());
    }

    #[tokio::test]
    async fn test_parameter_sets() {
        let store = MemoryStore::new();
        let first = ParameterSet::new(
            "recipe-a.xlsx",
            vec![
                WorkParameter::new(1, "heat", 850.0),
                WorkParameter::new(2, "hold", 30.0).with_description("minutes"),
            ],
        );
        let saved = store.save_parameter_set(first).await.unwrap();
        let set_id = saved.id.unwrap();
        assert!(saved.parameters.iter().all(|p| p.id.is_some()));

        let mut second = ParameterSet::new("recipe-b.xlsx", vec![]);
        second.imported_at = saved.imported_at + Duration::seconds(1);
        store.save_parameter_set(second).await.unwrap();
        let latest = store.latest_parameter_set().await.unwrap().unwrap();
        assert_eq!(latest.file_name, "recipe-b.xlsx");

        let mut changed = saved.parameters[0].clone();
        changed.value = 900.0;
        let added = WorkParameter::new(3, "cool", 20.0);
        assert_eq!(store.upsert_parameters(set_id, &[changed, added]).await.unwrap(), 2);

        let sets = store.parameter_sets().await.unwrap();
        let updated = sets.iter().find(|s| s.id == Some(set_id)).unwrap();
        assert_eq!(updated.parameters.len(), 3);
        assert_eq!(updated.parameters[0].value, 900.0);

        let hold_id = updated.parameters[1].id.unwrap();
        assert!(store.delete_parameter(hold_id).await.unwrap());
        assert!(!store.delete_parameter(hold_id).await.unwrap());
        assert_eq!(store.parameter_sets().await.unwrap().len(), 2);

        assert!(store.upsert_parameters(999, &[]).await.is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_queries_match_naive_filter(
            offsets in proptest::collection::vec(0i64..100, 0..40),
            start in 0i64..100,
            len in 0i64..50,
            limit in 0usize..50,
        ) {
            tokio_test::block_on(async {
                let store = MemoryStore::new();
                for offset in &offsets {
                    store.insert(&snapshot(*offset, 0.0)).await.unwrap();
                }

                let mut sorted = offsets.clone();
                sorted.sort();

                let end = start + len;
                let expected: Vec<_> = sorted
                    .iter()
                    .filter(|o| **o >= start && **o <= end)
                    .map(|o| at(*o))
                    .collect();
                let got: Vec<_> = store
                    .range(at(start), at(end))
                    .await
                    .unwrap()
                    .iter()
                    .map(|r| r.timestamp)
                    .collect();
                prop_assert_eq!(got, expected);

                let expected_latest: Vec<_> =
                    sorted.iter().rev().take(limit).map(|o| at(*o)).collect();
                let got_latest: Vec<_> = store
                    .latest(limit)
                    .await
                    .unwrap()
                    .iter()
                    .map(|r| r.timestamp)
                    .collect();
                prop_assert_eq!(got_latest, expected_latest);

                let older = sorted.iter().filter(|o| **o < start).count();
                prop_assert_eq!(store.delete_before(at(start)).await.unwrap(), older);
                prop_assert_eq!(store.count().await.unwrap(), offsets.len() - older);
                Ok(())
            })?;
        }
    }
}
