//! In-process backing store
//!
//! Each session owns a `BTreeMap` keyed by `(timestamp, sequence)`, so
//! appends are O(log n) and range scans come out ordered no matter which
//! order points arrived in. Sessions live behind their own lock; the outer
//! map lock is only held long enough to find or create a session entry.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::TelemetryStore;
use crate::storage::types::{DataPoint, SessionRecord, SessionScan, TimeRange};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

/// Points for one session
#[derive(Debug, Default)]
struct SessionSeries {
    next_sequence: u64,
    points: BTreeMap<(i64, u64), DataPoint>,
}

/// Ordered in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<String, Arc<RwLock<SessionSeries>>>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

fn lock_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Lock(format!("Failed to acquire memory store lock: {}", e))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self, session_id: &str) -> StorageResult<Option<Arc<RwLock<SessionSeries>>>> {
        let series = self.series.read().map_err(lock_err)?;
        Ok(series.get(session_id).cloned())
    }

    fn series_or_create(&self, session_id: &str) -> StorageResult<Arc<RwLock<SessionSeries>>> {
        if let Some(existing) = self.series(session_id)? {
            return Ok(existing);
        }

        let mut series = self.series.write().map_err(lock_err)?;
        Ok(Arc::clone(series.entry(session_id.to_string()).or_default()))
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, mut point: DataPoint) -> StorageResult<DataPoint> {
        let series = self.series_or_create(&point.session_id)?;
        let mut series = series.write().map_err(lock_err)?;

        point.sequence = series.next_sequence;
        series.next_sequence += 1;
        series.points.insert(point.key(), point.clone());

        Ok(point)
    }

    async fn range(
        &self,
        session_id: &str,
        range: TimeRange,
        limit: usize,
    ) -> StorageResult<Vec<DataPoint>> {
        if range.start >= range.end {
            return Ok(Vec::new());
        }
        let Some(series) = self.series(session_id)? else {
            return Ok(Vec::new());
        };
        let series = series.read().map_err(lock_err)?;

        Ok(series
            .points
            .range((range.start, 0)..(range.end, 0))
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn recent(
        &self,
        session_id: &str,
        offset: usize,
        count: usize,
    ) -> StorageResult<Vec<DataPoint>> {
        let Some(series) = self.series(session_id)? else {
            return Ok(Vec::new());
        };
        let series = series.read().map_err(lock_err)?;

        let mut points: Vec<DataPoint> = series
            .points
            .values()
            .rev()
            .skip(offset)
            .take(count)
            .cloned()
            .collect();
        points.reverse();
        Ok(points)
    }

    async fn scan(&self, session_id: &str) -> StorageResult<SessionScan> {
        let Some(series) = self.series(session_id)? else {
            return Ok(SessionScan::default());
        };
        let series = series.read().map_err(lock_err)?;

        Ok(SessionScan {
            count: series.points.len() as u64,
            first_timestamp: series.points.keys().next().map(|(ts, _)| *ts),
            last_timestamp: series.points.keys().next_back().map(|(ts, _)| *ts),
        })
    }

    async fn put_session(&self, record: &SessionRecord) -> StorageResult<()> {
        let mut sessions = self.sessions.write().map_err(lock_err)?;
        sessions.insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        let sessions = self.sessions.read().map_err(lock_err)?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn session_ids(&self) -> StorageResult<Vec<String>> {
        let mut ids: BTreeSet<String> = self
            .sessions
            .read()
            .map_err(lock_err)?
            .keys()
            .cloned()
            .collect();
        ids.extend(self.series.read().map_err(lock_err)?.keys().cloned());
        Ok(ids.into_iter().collect())
    }

    async fn delete_session(&self, session_id: &str) -> StorageResult<u64> {
        self.sessions.write().map_err(lock_err)?.remove(session_id);

        let removed = self.series.write().map_err(lock_err)?.remove(session_id);
        match removed {
            Some(series) => Ok(series.read().map_err(lock_err)?.points.len() as u64),
            None => Ok(0),
        }
    }

    async fn ping(&self) -> StorageResult<()> {
        // A poisoned lock is the only way this store can be unhealthy
        drop(self.series.read().map_err(lock_err)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with(points: &[(i64, f64)]) -> MemoryStore {
        let store = MemoryStore::new();
        for &(ts, rpm) in points {
            store
                .append(DataPoint::new("S1", ts).param("rpm", rpm))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_append_assigns_sequence() {
        let store = MemoryStore::new();
        let a = store.append(DataPoint::new("S1", 1000)).await.unwrap();
        let b = store.append(DataPoint::new("S1", 1000)).await.unwrap();
        let c = store.append(DataPoint::new("S2", 1000)).await.unwrap();

        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(c.sequence, 0);
    }

    #[tokio::test]
    async fn test_range_sorts_out_of_order_writes() {
        let store = store_with(&[(3000, 3.0), (1000, 1.0), (2000, 2.0)]).await;

        let points = store.range("S1", TimeRange::all(), usize::MAX).await.unwrap();
        let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![1000, 2000, 3000]);
    }

    #[tokio::test]
    async fn test_range_is_half_open_and_limited() {
        let store = store_with(&[(1000, 1.0), (1500, 1.5), (2000, 2.0)]).await;

        let points = store
            .range("S1", TimeRange { start: 1000, end: 2000 }, 10)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 1000);
        assert_eq!(points[1].timestamp, 1500);

        let points = store.range("S1", TimeRange::all(), 1).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 1000);
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_keep_insertion_order() {
        let store = store_with(&[(1000, 1.0), (1000, 2.0), (1000, 3.0)]).await;

        let points = store.range("S1", TimeRange::all(), usize::MAX).await.unwrap();
        let values: Vec<f64> = points.iter().filter_map(|p| p.get("rpm")).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_recent_with_offset() {
        let store = store_with(&[(1000, 1.0), (2000, 2.0), (3000, 3.0), (4000, 4.0)]).await;

        let points = store.recent("S1", 1, 2).await.unwrap();
        let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![2000, 3000]);

        assert!(store.recent("S1", 10, 2).await.unwrap().is_empty());
        assert!(store.recent("missing", 0, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_and_delete() {
        let store = store_with(&[(2000, 1.0), (1000, 2.0)]).await;
        store.put_session(&SessionRecord::new("S1", 0)).await.unwrap();

        let scan = store.scan("S1").await.unwrap();
        assert_eq!(scan.count, 2);
        assert_eq!(scan.first_timestamp, Some(1000));
        assert_eq!(scan.last_timestamp, Some(2000));

        assert_eq!(store.session_ids().await.unwrap(), vec!["S1".to_string()]);
        assert_eq!(store.delete_session("S1").await.unwrap(), 2);
        assert!(store.session_ids().await.unwrap().is_empty());
        assert_eq!(store.scan("S1").await.unwrap(), SessionScan::default());
    }

    #[tokio::test]
    async fn test_ping_releases_lock() {
        let store = store_with(&[(1000, 1.0)]).await;

        store.ping().await.unwrap();
        // a write right after ping must not find the lock still held
        store.append(DataPoint::new("S1", 2000)).await.unwrap();
        store.ping().await.unwrap();
        assert_eq!(store.scan("S1").await.unwrap().count, 2);
    }
}
