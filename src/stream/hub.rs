//! Session Broadcast Hub
//!
//! Fans accepted points out to live subscribers of the same session.
//! Every subscriber owns a bounded tokio broadcast channel and a dedicated
//! delivery thread that drains it with `blocking_recv`. Callbacks never run
//! on the async workers, so a callback that blocks only stalls its own
//! thread.
//!
//! A receiver that falls `subscriber_buffer` points behind skips the oldest
//! ones (`RecvError::Lagged`), so a slow subscriber loses its oldest
//! undelivered points and never holds back `publish`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::storage::DataPoint;

/// Configuration for the broadcast hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Undelivered points kept per subscriber before the oldest is dropped
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

/// Handle returned by [`Broadcaster::subscribe`], used to cancel delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    session_id: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Sending side of one subscriber's buffer
struct Outlet {
    id: u64,
    sender: broadcast::Sender<DataPoint>,
}

struct Subscription {
    session_id: String,
    cancelled: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

/// Per-session pub/sub fan-out
pub struct Broadcaster {
    /// Session id → outlets of that session's subscribers
    topics: RwLock<HashMap<String, Vec<Outlet>>>,
    /// Subscription id → delivery state
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
    config: HubConfig,
}

impl Broadcaster {
    pub fn new(config: HubConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Register `on_point` for every point published to `session_id` from
    /// now on.
    ///
    /// Points are delivered in publish order on a dedicated thread. A panic in
    /// the callback is logged and the subscription keeps running. Fails only
    /// if the delivery thread cannot be started.
    pub fn subscribe<F>(&self, session_id: &str, on_point: F) -> std::io::Result<SubscriptionHandle>
    where
        F: Fn(&DataPoint) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = broadcast::channel(self.config.subscriber_buffer.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        {
            let cancelled = Arc::clone(&cancelled);
            let dropped = Arc::clone(&dropped);
            let session_id = session_id.to_string();

            std::thread::Builder::new()
                .name(format!("diagstream-sub-{}", id))
                .spawn(move || loop {
                    match receiver.blocking_recv() {
                        Ok(point) => {
                            if cancelled.load(Ordering::Acquire) {
                                break;
                            }
                            let delivered =
                                std::panic::catch_unwind(AssertUnwindSafe(|| on_point(&point)));
                            if delivered.is_err() {
                                tracing::warn!(
                                    session_id = %session_id,
                                    subscription = id,
                                    "Subscriber callback panicked, point skipped"
                                );
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            dropped.fetch_add(missed, Ordering::Relaxed);
                            tracing::warn!(
                                session_id = %session_id,
                                subscription = id,
                                missed,
                                "Slow subscriber, dropped oldest points"
                            );
                        }
                        Err(RecvError::Closed) => break,
                    }
                })?;
        }

        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                Subscription {
                    session_id: session_id.to_string(),
                    cancelled,
                    dropped,
                },
            );
        self.topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(session_id.to_string())
            .or_default()
            .push(Outlet { id, sender });

        tracing::debug!(session_id = %session_id, subscription = id, "Subscribed");

        Ok(SubscriptionHandle {
            id,
            session_id: session_id.to_string(),
        })
    }

    /// Stop delivery for `handle`
    ///
    /// No callback starts after this returns; one already running may
    /// finish. The delivery thread exits once its channel is closed.
    /// Returns false if the handle was unknown.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.id);

        let Some(subscription) = removed else {
            return false;
        };
        subscription.cancelled.store(true, Ordering::Release);

        {
            let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
            if let Some(outlets) = topics.get_mut(&subscription.session_id) {
                outlets.retain(|outlet| outlet.id != handle.id);
                if outlets.is_empty() {
                    topics.remove(&subscription.session_id);
                }
            }
        }

        tracing::debug!(
            session_id = %subscription.session_id,
            subscription = handle.id,
            "Unsubscribed"
        );
        true
    }

    /// Publish a point to the subscribers of its session
    ///
    /// Never blocks and never fails; returns the number of subscribers the
    /// point was queued for.
    pub fn publish(&self, point: &DataPoint) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        let Some(outlets) = topics.get(&point.session_id) else {
            return 0;
        };

        let sent = outlets
            .iter()
            .filter(|outlet| outlet.sender.send(point.clone()).is_ok())
            .count();

        tracing::trace!(
            session_id = %point.session_id,
            subscribers = sent,
            "Published point"
        );
        sent
    }

    /// Points dropped so far for a subscription because it fell behind
    pub fn dropped(&self, handle: &SubscriptionHandle) -> Option<u64> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle.id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
    }

    /// Number of live subscriptions for a session
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.session_id == session_id)
            .count()
    }

    /// Number of live subscriptions across all sessions
    pub fn total_subscribers(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        // Dropping the outlets afterwards closes every channel
        let subscriptions = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(|e| e.into_inner());
        for (_, subscription) in subscriptions.drain() {
            subscription.cancelled.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn point(session: &str, ts: i64) -> DataPoint {
        DataPoint::new(session, ts).param("rpm", ts as f64)
    }

    fn recv_ts(rx: &mpsc::Receiver<i64>) -> Option<i64> {
        rx.recv_timeout(Duration::from_secs(1)).ok()
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.subscriber_buffer, 256);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = Broadcaster::new(HubConfig::default());
        assert_eq!(hub.publish(&point("S1", 1)), 0);
        assert_eq!(hub.total_subscribers(), 0);
    }

    #[test]
    fn test_delivery_in_publish_order() {
        let hub = Broadcaster::new(HubConfig::default());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let handle = hub
            .subscribe("S1", move |p| {
                let _ = tx.lock().unwrap().send(p.timestamp);
            })
            .unwrap();
        assert_eq!(handle.session_id(), "S1");
        assert_eq!(hub.subscriber_count("S1"), 1);

        for ts in [3000, 1000, 2000] {
            assert_eq!(hub.publish(&point("S1", ts)), 1);
        }

        assert_eq!(recv_ts(&rx), Some(3000));
        assert_eq!(recv_ts(&rx), Some(1000));
        assert_eq!(recv_ts(&rx), Some(2000));
    }

    #[test]
    fn test_fan_out_is_per_session() {
        let hub = Broadcaster::new(HubConfig::default());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let _handle = hub
            .subscribe("S1", move |p| {
                let _ = tx.lock().unwrap().send(p.timestamp);
            })
            .unwrap();

        assert_eq!(hub.publish(&point("S2", 5)), 0);
        assert_eq!(hub.publish(&point("S1", 7)), 1);

        assert_eq!(recv_ts(&rx), Some(7));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = Broadcaster::new(HubConfig::default());
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let (tx_a, tx_b) = (Mutex::new(tx_a), Mutex::new(tx_b));

        let a = hub
            .subscribe("S1", move |p| {
                let _ = tx_a.lock().unwrap().send(p.timestamp);
            })
            .unwrap();
        let _b = hub
            .subscribe("S1", move |p| {
                let _ = tx_b.lock().unwrap().send(p.timestamp);
            })
            .unwrap();

        hub.publish(&point("S1", 1));
        assert_eq!(recv_ts(&rx_a), Some(1));
        assert_eq!(recv_ts(&rx_b), Some(1));

        assert!(hub.unsubscribe(&a));
        assert!(!hub.unsubscribe(&a));
        assert_eq!(hub.subscriber_count("S1"), 1);

        assert_eq!(hub.publish(&point("S1", 2)), 1);
        assert_eq!(recv_ts(&rx_b), Some(2));
        // The exited delivery thread drops its callback and with it the sender
        assert_eq!(recv_ts(&rx_a), None);
    }

    #[test]
    fn test_slow_subscriber_drops_oldest() {
        let hub = Broadcaster::new(HubConfig {
            subscriber_buffer: 2,
        });
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let handle = hub
            .subscribe("S1", move |p| {
                // Block until the test releases this delivery
                let _ = gate_rx.lock().unwrap().recv();
                let _ = tx.lock().unwrap().send(p.timestamp);
            })
            .unwrap();

        // First point occupies the callback, the rest pile up in the buffer
        hub.publish(&point("S1", 0));
        std::thread::sleep(Duration::from_millis(50));
        for ts in 1..=5 {
            hub.publish(&point("S1", ts));
        }

        for _ in 0..3 {
            gate_tx.send(()).unwrap();
        }

        assert_eq!(recv_ts(&rx), Some(0));
        // 1..=3 were overwritten; only the newest two survive
        assert_eq!(recv_ts(&rx), Some(4));
        assert_eq!(recv_ts(&rx), Some(5));
        assert_eq!(hub.dropped(&handle), Some(3));
    }

    #[test]
    fn test_blocked_subscriber_does_not_hold_back_others() {
        let hub = Broadcaster::new(HubConfig::default());
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let stuck = hub
            .subscribe("S1", move |_p| {
                let _ = gate_rx.lock().unwrap().recv();
            })
            .unwrap();
        let _live = hub
            .subscribe("S1", move |p| {
                let _ = tx.lock().unwrap().send(p.timestamp);
            })
            .unwrap();

        let started = Instant::now();
        // Fewer points than the buffer, so the live subscriber cannot lag
        for ts in 0..200 {
            assert_eq!(hub.publish(&point("S1", ts)), 2);
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        let received: Vec<i64> = (0..200).filter_map(|_| recv_ts(&rx)).collect();
        assert_eq!(received, (0..200).collect::<Vec<i64>>());
        assert_eq!(hub.dropped(&stuck), Some(0));

        drop(gate_tx);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let hub = Broadcaster::new(HubConfig::default());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let _handle = hub
            .subscribe("S1", move |p| {
                if p.timestamp == 1 {
                    panic!("bad subscriber");
                }
                let _ = tx.lock().unwrap().send(p.timestamp);
            })
            .unwrap();

        hub.publish(&point("S1", 1));
        hub.publish(&point("S1", 2));
        assert_eq!(recv_ts(&rx), Some(2));
    }
}
