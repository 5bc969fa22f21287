//! End-to-end scenarios against the in-memory engine

use diagstream::{ErrorKind, PointInput, SessionState, TelemetryEngine};

async fn ingest_s1(engine: &TelemetryEngine) {
    engine
        .ingest("S1", PointInput::new().at(1000).param("rpm", 800.0))
        .await
        .unwrap();
    engine
        .ingest("S1", PointInput::new().at(2000).param("rpm", 1200.0))
        .await
        .unwrap();
}

#[tokio::test]
async fn recent_returns_both_points_ascending() {
    let engine = TelemetryEngine::in_memory();
    ingest_s1(&engine).await;

    let points = engine.recent("S1", 0, 10).await.unwrap();
    let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![1000, 2000]);
    assert_eq!(points[0].get("rpm"), Some(800.0));
    assert_eq!(points[1].get("rpm"), Some(1200.0));

    let stats = engine.stats("S1").await.unwrap();
    assert_eq!(stats.data_point_count, 2);
    assert_eq!(stats.start_time, 1000);
    assert_eq!(stats.state, SessionState::Active);
}

#[tokio::test]
async fn minute_bucket_over_two_points() {
    let engine = TelemetryEngine::in_memory();
    ingest_s1(&engine).await;

    let buckets = engine.aggregate("S1", "minute", 1).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].bucket_start, 0);
    assert_eq!(buckets[0].count, 2);

    let rpm = buckets[0].parameters["rpm"];
    assert_eq!(rpm.avg, 1000.0);
    assert_eq!(rpm.min, 800.0);
    assert_eq!(rpm.max, 1200.0);
    assert_eq!(rpm.count, 2);
}

#[tokio::test]
async fn half_open_range_query() {
    let engine = TelemetryEngine::in_memory();
    ingest_s1(&engine).await;

    let points = engine.range_query("S1", 500, 1500, 10).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].timestamp, 1000);

    // end is exclusive, start inclusive
    let points = engine.range_query("S1", 1000, 2000, 10).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].timestamp, 1000);
}

#[tokio::test]
async fn recent_with_offset_skips_newest() {
    let engine = TelemetryEngine::in_memory();
    for ts in [1000, 2000, 3000, 4000] {
        engine.ingest("S1", PointInput::new().at(ts)).await.unwrap();
    }

    let points = engine.recent("S1", 1, 2).await.unwrap();
    let timestamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![2000, 3000]);
}

#[tokio::test]
async fn late_arrival_is_accepted_and_flagged() {
    let engine = TelemetryEngine::in_memory();
    ingest_s1(&engine).await;
    engine.close_session_at("S1", 2500).await.unwrap();

    let accepted = engine
        .ingest("S1", PointInput::new().at(2400).param("rpm", 700.0))
        .await
        .unwrap();
    assert!(accepted.late_arrival);

    let stats = engine.stats("S1").await.unwrap();
    assert_eq!(stats.state, SessionState::Closed);
    assert_eq!(stats.data_point_count, 3);
    assert_eq!(stats.late_arrivals, 1);
    assert_eq!(stats.end_time, Some(2500));
    assert_eq!(stats.duration_ms, 1500);

    // closing again keeps the first end time
    let record = engine.close_session_at("S1", 9000).await.unwrap();
    assert_eq!(record.end_time, Some(2500));
}

#[tokio::test]
async fn summary_covers_every_signal() {
    let engine = TelemetryEngine::in_memory();
    engine
        .ingest(
            "S1",
            PointInput::new().at(1000).param("rpm", 800.0).param("speed", 0.0),
        )
        .await
        .unwrap();
    engine
        .ingest(
            "S1",
            PointInput::new().at(61_000).param("rpm", 2400.0).param("engineTemp", 90.0),
        )
        .await
        .unwrap();

    let summary = engine.summary("S1").await.unwrap();
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.duration_ms, 60_000);
    assert_eq!(summary.signals, vec!["engineTemp", "rpm", "speed"]);
    assert_eq!(summary.parameters["rpm"].avg, 1600.0);
    assert_eq!(summary.parameters["speed"].count, 1);
}

#[tokio::test]
async fn batch_ingest_reports_per_point_results() {
    let engine = TelemetryEngine::in_memory();

    let outcome = engine
        .ingest_batch(
            "S1",
            vec![
                PointInput::new().at(1000).param("rpm", 800.0),
                PointInput::new().at(-1),
                PointInput::new().at(3000).param("rpm", 900.0),
            ],
        )
        .await
        .unwrap();

    assert!(!outcome.is_complete());
    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.errors[0].index, 1);
    assert_eq!(outcome.errors[0].kind, ErrorKind::InvalidInput);
    assert_eq!(engine.stats("S1").await.unwrap().data_point_count, 2);
}

#[tokio::test]
async fn invalid_input_is_not_retryable() {
    let engine = TelemetryEngine::in_memory();

    let err = engine.ingest("", PointInput::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!err.kind().is_retryable());

    let err = engine.aggregate("S1", "fortnight", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
