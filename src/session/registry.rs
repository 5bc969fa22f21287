//! Session Registry
//!
//! Keyed table of per-session summary counters. Each session gets its own
//! slot holding:
//!
//! - a `tokio::sync::Mutex` that serializes writers for that session only
//! - a `watch` channel carrying the last committed snapshot, so readers
//!   never wait on an in-flight write
//!
//! The outer map lock is held only to look up or insert a slot. Records are
//! a cache over the store: a slot missing from memory is rebuilt from the
//! stored record or, failing that, from a scan of the stored points.

use crate::error::{TelemetryError, TelemetryResult};
use crate::storage::{bounded, now_millis, SessionRecord, TelemetryStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};

struct SessionSlot {
    writer: Arc<Mutex<SessionRecord>>,
    snapshot: Arc<watch::Sender<SessionRecord>>,
    /// Set once the session was purged; queued writers must look up again
    retired: AtomicBool,
}

impl SessionSlot {
    fn new(record: SessionRecord) -> Self {
        let (snapshot, _) = watch::channel(record.clone());
        Self {
            writer: Arc::new(Mutex::new(record)),
            snapshot: Arc::new(snapshot),
            retired: AtomicBool::new(false),
        }
    }
}

/// Exclusive write access to one session's record
///
/// Changes become visible to readers only after [`SessionWriter::commit`].
pub struct SessionWriter {
    record: OwnedMutexGuard<SessionRecord>,
    slot: Arc<SessionSlot>,
}

impl SessionWriter {
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut SessionRecord {
        &mut self.record
    }

    /// Publish the current record as the readable snapshot
    pub fn commit(&self) {
        self.slot.snapshot.send_replace(self.record.clone());
    }
}

/// Per-session counters with per-key write serialization
pub struct SessionRegistry {
    store: Arc<dyn TelemetryStore>,
    store_timeout: Duration,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn TelemetryStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild a record from the store: the saved record if any, otherwise
    /// a scan of the session's points
    async fn load(&self, session_id: &str) -> TelemetryResult<Option<SessionRecord>> {
        let store = &self.store;
        if let Some(record) =
            bounded("get_session", self.store_timeout, store.get_session(session_id)).await?
        {
            return Ok(Some(record));
        }

        let scan = bounded("scan", self.store_timeout, store.scan(session_id)).await?;
        if scan.count == 0 {
            return Ok(None);
        }

        tracing::info!(
            session_id = %session_id,
            points = scan.count,
            "Reconstructed session record from stored points"
        );
        let mut record = SessionRecord::new(session_id, scan.first_timestamp.unwrap_or_default());
        record.apply_scan(&scan);
        Ok(Some(record))
    }

    async fn slot(&self, session_id: &str, create: bool) -> TelemetryResult<Option<Arc<SessionSlot>>> {
        if let Some(slot) = self.sessions.read().await.get(session_id) {
            return Ok(Some(Arc::clone(slot)));
        }

        let record = match self.load(session_id).await? {
            Some(record) => record,
            None if create => SessionRecord::new(session_id, now_millis()),
            None => return Ok(None),
        };

        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new(record)));
        Ok(Some(Arc::clone(slot)))
    }

    /// Acquire the writer for a session, creating the record if `create`
    ///
    /// Writers for the same session queue up behind each other; writers for
    /// different sessions never contend.
    /// A writer that queued behind a purge starts over on a fresh record.
    pub async fn writer(&self, session_id: &str, create: bool) -> TelemetryResult<Option<SessionWriter>> {
        loop {
            let Some(slot) = self.slot(session_id, create).await? else {
                return Ok(None);
            };

            let record = Arc::clone(&slot.writer).lock_owned().await;
            if slot.retired.load(Ordering::Acquire) {
                continue;
            }
            return Ok(Some(SessionWriter { record, slot }));
        }
    }

    /// Last committed record, without waiting for in-flight writers
    pub async fn snapshot(&self, session_id: &str) -> TelemetryResult<Option<SessionRecord>> {
        Ok(self
            .slot(session_id, false)
            .await?
            .map(|slot| slot.snapshot.borrow().clone()))
    }

    /// Like [`snapshot`](Self::snapshot) but absence is an error
    pub async fn require(&self, session_id: &str) -> TelemetryResult<SessionRecord> {
        self.snapshot(session_id)
            .await?
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))
    }

    /// Write the writer's record to the store
    pub async fn persist(&self, writer: &SessionWriter) -> TelemetryResult<()> {
        bounded(
            "put_session",
            self.store_timeout,
            self.store.put_session(writer.record()),
        )
        .await?;
        Ok(())
    }

    /// Explicit `Unknown → Active`; a known session is returned unchanged
    pub async fn open(&self, session_id: &str) -> TelemetryResult<SessionRecord> {
        let writer = self
            .writer(session_id, true)
            .await?
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))?;

        self.persist(&writer).await?;
        writer.commit();
        tracing::info!(session_id = %session_id, state = %writer.record().state(), "Session opened");
        Ok(writer.record().clone())
    }

    /// `Active → Closed`. Closing again keeps the first end time.
    pub async fn close(&self, session_id: &str, end_time: i64) -> TelemetryResult<SessionRecord> {
        let mut writer = self
            .writer(session_id, false)
            .await?
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))?;

        if writer.record().is_closed() {
            tracing::debug!(session_id = %session_id, "Session already closed");
            return Ok(writer.record().clone());
        }

        writer.record_mut().end_time = Some(end_time);
        self.persist(&writer).await?;
        writer.commit();

        tracing::info!(
            session_id = %session_id,
            end_time,
            points = writer.record().data_point_count,
            "Session closed"
        );
        Ok(writer.record().clone())
    }

    /// All session ids known to the store or the cache, sorted
    pub async fn list(&self) -> TelemetryResult<Vec<String>> {
        let stored = bounded("session_ids", self.store_timeout, self.store.session_ids()).await?;

        let mut ids: BTreeSet<String> = stored.into_iter().collect();
        ids.extend(self.sessions.read().await.keys().cloned());
        Ok(ids.into_iter().collect())
    }

    /// Recompute point-derived counters of every session from the store
    ///
    /// Returns the number of sessions rebuilt.
    pub async fn rebuild(&self) -> TelemetryResult<usize> {
        let ids = self.list().await?;

        for session_id in &ids {
            let scan = bounded("scan", self.store_timeout, self.store.scan(session_id)).await?;
            if let Some(mut writer) = self.writer(session_id, true).await? {
                writer.record_mut().apply_scan(&scan);
                self.persist(&writer).await?;
                writer.commit();
            }
        }

        tracing::info!(sessions = ids.len(), "Rebuilt session registry from store");
        Ok(ids.len())
    }

    /// Drop a purged session from the cache, then release its writer
    ///
    /// Writers queued on the old slot wake up, see it retired and load the
    /// session again from the store.
    pub async fn retire(&self, writer: SessionWriter) {
        let session_id = writer.record().session_id.clone();
        {
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(&session_id)
                .is_some_and(|slot| Arc::ptr_eq(slot, &writer.slot))
            {
                sessions.remove(&session_id);
            }
        }
        writer.slot.retired.store(true, Ordering::Release);
        drop(writer);
    }

    /// Snapshots of every cached session
    pub async fn cached(&self) -> Vec<SessionRecord> {
        self.sessions
            .read()
            .await
            .values()
            .map(|slot| slot.snapshot.borrow().clone())
            .collect()
    }
}
