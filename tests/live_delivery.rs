//! Live delivery while a subscriber callback is stuck

use diagstream::{EngineConfig, MemoryStore, PointInput, TelemetryEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

fn engine_with_buffer(subscriber_buffer: usize) -> TelemetryEngine {
    let config = EngineConfig {
        subscriber_buffer,
        ..EngineConfig::default()
    };
    TelemetryEngine::new(Arc::new(MemoryStore::new()), config)
}

#[tokio::test]
async fn ingest_keeps_going_while_subscriber_is_hung() {
    let engine = engine_with_buffer(4);

    let (started_tx, started_rx) = mpsc::channel::<i64>();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let gate_rx = Mutex::new(gate_rx);
    let delivered = Arc::new(AtomicUsize::new(0));

    let handle = {
        let delivered = Arc::clone(&delivered);
        engine
            .subscribe("S1", move |point| {
                let _ = started_tx.lock().unwrap().send(point.timestamp);
                // blocks until the gate sender is dropped
                let _ = gate_rx.lock().unwrap().recv();
                delivered.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };

    engine.ingest("S1", PointInput::new().at(0)).await.unwrap();
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 0);

    // the callback is now parked on the gate
    let burst = async {
        for ts in 1..=11 {
            engine.ingest("S1", PointInput::new().at(ts)).await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(2), burst)
        .await
        .expect("ingest stalled behind a hung subscriber");
    assert_eq!(engine.stats("S1").await.unwrap().data_point_count, 12);

    drop(gate_tx);

    // point 0 plus the four newest survive the buffer of four
    let deadline = Instant::now() + Duration::from_secs(2);
    while delivered.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    assert_eq!(engine.dropped_points(&handle), Some(7));

    let mut seen = Vec::new();
    while let Ok(ts) = started_rx.try_recv() {
        seen.push(ts);
    }
    assert_eq!(seen, vec![8, 9, 10, 11]);

    assert!(engine.unsubscribe(&handle));
    assert_eq!(engine.dropped_points(&handle), None);
}

#[tokio::test]
async fn hung_subscriber_does_not_starve_other_sessions() {
    let engine = engine_with_buffer(16);

    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    let _stuck = engine
        .subscribe("S1", move |_| {
            let _ = gate_rx.lock().unwrap().recv();
        })
        .unwrap();

    let (live_tx, live_rx) = mpsc::channel::<i64>();
    let live_tx = Mutex::new(live_tx);
    let _live = engine
        .subscribe("S2", move |point| {
            let _ = live_tx.lock().unwrap().send(point.timestamp);
        })
        .unwrap();

    let traffic = async {
        for ts in 0..20 {
            engine.ingest("S1", PointInput::new().at(ts)).await.unwrap();
            engine.ingest("S2", PointInput::new().at(ts)).await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(2), traffic)
        .await
        .expect("ingest stalled behind a hung subscriber");

    let received: Vec<i64> = (0..20)
        .map(|_| live_rx.recv_timeout(Duration::from_secs(1)).unwrap())
        .collect();
    assert_eq!(received, (0..20).collect::<Vec<_>>());

    drop(gate_tx);
}
