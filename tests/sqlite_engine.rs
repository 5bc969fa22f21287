//! Engine over the durable SQLite store

use diagstream::config::{Config, StoreBackend};
use diagstream::{PointInput, SessionState, SqliteStore, TelemetryEngine, TelemetryStore};
use std::path::Path;
use tempfile::tempdir;

fn sqlite_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.store.backend = StoreBackend::Sqlite;
    config.store.data_dir = dir.to_string_lossy().to_string();
    config.retention.session_ttl_secs = Some(60);
    config
}

#[tokio::test]
async fn sessions_survive_restart() {
    let dir = tempdir().unwrap();

    {
        let engine = TelemetryEngine::from_config(&sqlite_config(dir.path())).unwrap();
        assert_eq!(engine.store_name(), "sqlite");

        engine
            .ingest("S1", PointInput::new().at(2000).param("rpm", 1200.0))
            .await
            .unwrap();
        engine
            .ingest("S1", PointInput::new().at(1000).param("rpm", 800.0))
            .await
            .unwrap();
        engine.close_session_at("S1", 3000).await.unwrap();
    }

    let engine = TelemetryEngine::from_config(&sqlite_config(dir.path())).unwrap();

    let stats = engine.stats("S1").await.unwrap();
    assert_eq!(stats.data_point_count, 2);
    assert_eq!(stats.start_time, 1000);
    assert_eq!(stats.state, SessionState::Closed);
    assert_eq!(stats.duration_ms, 2000);

    let points = engine.recent("S1", 0, 10).await.unwrap();
    let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![1000, 2000]);

    let buckets = engine.aggregate("S1", "minute", 1).await.unwrap();
    assert_eq!(buckets[0].parameters["rpm"].avg, 1000.0);
}

#[tokio::test]
async fn registry_is_rebuilt_from_points() {
    let dir = tempdir().unwrap();

    // points written straight to the store, no session records
    {
        let store = SqliteStore::open(dir.path()).unwrap();
        for ts in [1000, 3000, 2000] {
            store
                .append(diagstream::DataPoint::new("orphan", ts).param("rpm", 900.0))
                .await
                .unwrap();
        }
    }

    let engine = TelemetryEngine::from_config(&sqlite_config(dir.path())).unwrap();
    assert_eq!(engine.list_sessions().await.unwrap(), vec!["orphan".to_string()]);

    let stats = engine.stats("orphan").await.unwrap();
    assert_eq!(stats.data_point_count, 3);
    assert_eq!(stats.start_time, 1000);
    assert_eq!(stats.last_timestamp, Some(3000));

    assert_eq!(engine.rebuild_registry().await.unwrap(), 1);
    assert_eq!(engine.stats("orphan").await.unwrap().data_point_count, 3);
}

#[tokio::test]
async fn purge_removes_expired_sessions() {
    let dir = tempdir().unwrap();
    let engine = TelemetryEngine::from_config(&sqlite_config(dir.path())).unwrap();

    for session in ["old", "current"] {
        engine.ingest(session, PointInput::new().at(1000)).await.unwrap();
        engine.ingest(session, PointInput::new().at(2000)).await.unwrap();
    }
    engine.close_session_at("old", 2000).await.unwrap();

    let expired = engine.expired_sessions(2000 + 60_000).await.unwrap();
    assert_eq!(expired, vec!["old".to_string()]);

    assert_eq!(engine.purge_session("old").await.unwrap(), 2);
    assert!(engine.stats("old").await.is_err());
    assert_eq!(engine.list_sessions().await.unwrap(), vec!["current".to_string()]);
}
