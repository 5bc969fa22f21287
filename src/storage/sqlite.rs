//! SQLite-backed durable store
//!
//! Persisted layout:
//!
//! ```text
//! datapoints(seq PK AUTOINCREMENT, session_id, timestamp, parameters JSON)
//!     index (session_id, timestamp, seq)  -> ordered collection per session
//! sessions(session_id PK, opened_at, start_time, last_timestamp,
//!          end_time, data_point_count, late_arrivals)
//!     -> metadata record per session, doubles as the session index
//! ```
//!
//! `seq` is the global rowid, so it is monotonic inside every session and
//! serves as the insertion-order tiebreak for equal timestamps.
//!
//! rusqlite is blocking; every call runs on the blocking pool with the
//! connection behind a `std::sync::Mutex`.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::TelemetryStore;
use crate::storage::types::{DataPoint, SessionRecord, SessionScan, TimeRange};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS datapoints (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        parameters TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_session_time ON datapoints(session_id, timestamp, seq);
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        opened_at INTEGER NOT NULL,
        start_time INTEGER,
        last_timestamp INTEGER,
        end_time INTEGER,
        data_point_count INTEGER NOT NULL,
        late_arrivals INTEGER NOT NULL DEFAULT 0
    );
";

/// Durable store on a single SQLite database file
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open `telemetry.db` inside `data_dir`
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("telemetry.db");

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(path = ?path, "Opened SQLite telemetry store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Non-persistent database, mostly for tests
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| {
                StorageError::Lock(format!("Failed to acquire connection lock: {}", e))
            })?;
            f(&mut guard)
        })
        .await?
    }
}

fn clamp_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Row layout: session_id, timestamp, seq, parameters
fn point_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_point(raw: (String, i64, i64, String)) -> StorageResult<DataPoint> {
    let (session_id, timestamp, seq, parameters) = raw;
    let parameters: BTreeMap<String, f64> = serde_json::from_str(&parameters)?;
    Ok(DataPoint {
        session_id,
        timestamp,
        sequence: seq as u64,
        parameters,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        session_id: row.get(0)?,
        opened_at: row.get(1)?,
        start_time: row.get(2)?,
        last_timestamp: row.get(3)?,
        end_time: row.get(4)?,
        data_point_count: row.get::<_, i64>(5)? as u64,
        late_arrivals: row.get::<_, i64>(6)? as u64,
    })
}

#[async_trait]
impl TelemetryStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn append(&self, mut point: DataPoint) -> StorageResult<DataPoint> {
        let parameters = serde_json::to_string(&point.parameters)?;
        let session_id = point.session_id.clone();
        let timestamp = point.timestamp;

        let seq = self
            .with_conn(move |conn| {
                conn.prepare_cached(
                    "INSERT INTO datapoints (session_id, timestamp, parameters) VALUES (?1, ?2, ?3)",
                )?
                .execute(params![session_id, timestamp, parameters])?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        point.sequence = seq as u64;
        Ok(point)
    }

    async fn range(
        &self,
        session_id: &str,
        range: TimeRange,
        limit: usize,
    ) -> StorageResult<Vec<DataPoint>> {
        let session_id = session_id.to_string();
        let limit = clamp_i64(limit);

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT session_id, timestamp, seq, parameters FROM datapoints
                     WHERE session_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                     ORDER BY timestamp ASC, seq ASC
                     LIMIT ?4",
                )?;
                let rows = stmt
                    .query_map(params![session_id, range.start, range.end, limit], point_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(decode_point).collect()
    }

    async fn recent(
        &self,
        session_id: &str,
        offset: usize,
        count: usize,
    ) -> StorageResult<Vec<DataPoint>> {
        let session_id = session_id.to_string();
        let (offset, count) = (clamp_i64(offset), clamp_i64(count));

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT session_id, timestamp, seq, parameters FROM datapoints
                     WHERE session_id = ?1
                     ORDER BY timestamp DESC, seq DESC
                     LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt
                    .query_map(params![session_id, count, offset], point_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut points = rows
            .into_iter()
            .map(decode_point)
            .collect::<StorageResult<Vec<_>>>()?;
        points.reverse();
        Ok(points)
    }

    async fn scan(&self, session_id: &str) -> StorageResult<SessionScan> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let scan = conn.query_row(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM datapoints
                 WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionScan {
                        count: row.get::<_, i64>(0)? as u64,
                        first_timestamp: row.get(1)?,
                        last_timestamp: row.get(2)?,
                    })
                },
            )?;
            Ok(scan)
        })
        .await
    }

    async fn put_session(&self, record: &SessionRecord) -> StorageResult<()> {
        let record = record.clone();

        self.with_conn(move |conn| {
            conn.prepare_cached(
                "INSERT OR REPLACE INTO sessions
                 (session_id, opened_at, start_time, last_timestamp, end_time,
                  data_point_count, late_arrivals)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                record.session_id,
                record.opened_at,
                record.start_time,
                record.last_timestamp,
                record.end_time,
                record.data_point_count as i64,
                record.late_arrivals as i64,
            ])?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT session_id, opened_at, start_time, last_timestamp, end_time,
                            data_point_count, late_arrivals
                     FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn session_ids(&self) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT session_id FROM sessions
                 UNION
                 SELECT DISTINCT session_id FROM datapoints
                 ORDER BY 1",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn delete_session(&self, session_id: &str) -> StorageResult<u64> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM datapoints WHERE session_id = ?1",
                params![session_id],
            )?;
            tx.execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                params![session_id],
            )?;
            tx.commit()?;
            Ok(removed as u64)
        })
        .await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
