//! Live broadcast channel: fused risk updates and critical alerts fanned
//! out to every subscriber.
//!
//! Built on `tokio::sync::broadcast` with a bounded per-subscriber buffer.
//! A subscriber that falls behind the buffer bound observes a lag error on
//! receive and is unsubscribed (the WebSocket layer closes the socket; the
//! client must reconnect). A heartbeat frame goes out when the channel has
//! been idle for a full heartbeat interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config;
use crate::types::{LiveUpdate, RiskHistogram, Scenario, UpdateKind};

/// Fan-out handle for live updates. Cheap to clone.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<LiveUpdate>,
    published: Arc<AtomicU64>,
}

/// A subscription to the live channel.
pub type Subscription = broadcast::Receiver<LiveUpdate>;

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_buffer(config::get().broadcast.subscriber_buffer)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to all future updates.
    pub fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }

    /// Publish one frame to every subscriber. A send with no subscribers
    /// is not an error; the frame is simply gone.
    pub fn publish(&self, update: LiveUpdate) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let receivers = self.tx.receiver_count();
        if self.tx.send(update).is_err() {
            debug!("live update published with no subscribers");
        } else {
            debug!(subscribers = receivers, "live update published");
        }
    }

    /// Publish a fused risk update: histogram plus scenario descriptor.
    pub fn publish_risk_update(&self, histogram: &RiskHistogram, scenario: &Scenario) {
        self.publish(LiveUpdate::new(
            UpdateKind::RiskUpdate,
            serde_json::json!({
                "histogram": histogram,
                "scenario": {
                    "return_period": scenario.return_period,
                    "time_step": scenario.time_step,
                    "geotiff_enabled": scenario.geotiff_enabled,
                },
            }),
        ));
    }

    /// Publish a critical alert naming the offending stations/locations.
    pub fn publish_critical_alert(&self, locations: &[String]) {
        self.publish(LiveUpdate::new(
            UpdateKind::CriticalAlert,
            serde_json::json!({ "locations": locations }),
        ));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Shutdown flush: wait for subscribers to drain their buffers, up to
    /// the configured window, then give up.
    pub async fn flush(&self) {
        let window = Duration::from_secs(crate::config::defaults::BROADCAST_FLUSH_SECS);
        let _ = tokio::time::timeout(window, async {
            while self.subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
    }

    /// Heartbeat loop: emits a `system_status` frame whenever the channel
    /// has been idle for the configured interval. Runs until cancelled.
    pub async fn run_heartbeat(self, cancel: CancellationToken) {
        let interval = Duration::from_secs(config::get().broadcast.heartbeat_secs);
        let mut last_seen = self.published_count();
        let mut next = Instant::now() + interval;

        info!(interval_secs = interval.as_secs(), "Broadcast heartbeat started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Broadcast heartbeat stopped");
                    return;
                }
                _ = tokio::time::sleep_until(next) => {
                    let now_count = self.published_count();
                    if now_count == last_seen {
                        self.publish(LiveUpdate::new(
                            UpdateKind::SystemStatus,
                            serde_json::json!({
                                "status": "ok",
                                "subscribers": self.subscriber_count(),
                            }),
                        ));
                    }
                    last_seen = self.published_count();
                    next = Instant::now() + interval;
                }
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let b = Broadcaster::with_buffer(8);
        let mut s1 = b.subscribe();
        let mut s2 = b.subscribe();

        b.publish_critical_alert(&["Sto. Nino".to_string()]);

        let u1 = s1.recv().await.unwrap();
        let u2 = s2.recv().await.unwrap();
        assert_eq!(u1.kind, UpdateKind::CriticalAlert);
        assert_eq!(u1.data["locations"][0], "Sto. Nino");
        assert_eq!(u2.kind, UpdateKind::CriticalAlert);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_out() {
        let b = Broadcaster::with_buffer(4);
        let mut slow = b.subscribe();

        for _ in 0..10 {
            b.publish(LiveUpdate::new(UpdateKind::SystemStatus, serde_json::json!({})));
        }

        // The first receive on an overflowed subscription reports the lag
        match slow.recv().await {
            Err(RecvError::Lagged(missed)) => assert!(missed >= 6),
            other => panic!("expected lag, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let b = Broadcaster::with_buffer(4);
        b.publish(LiveUpdate::new(UpdateKind::SystemStatus, serde_json::json!({})));
        assert_eq!(b.published_count(), 1);
    }

    #[tokio::test]
    async fn test_risk_update_frame_shape() {
        let b = Broadcaster::with_buffer(4);
        let mut sub = b.subscribe();
        b.publish_risk_update(
            &RiskHistogram { low: 30, moderate: 4, high: 1, critical: 1 },
            &Scenario::default(),
        );
        let frame = sub.recv().await.unwrap();
        assert_eq!(frame.kind, UpdateKind::RiskUpdate);
        assert_eq!(frame.data["histogram"]["low"], 30);
        assert_eq!(frame.data["scenario"]["return_period"], "rr01");
    }
}
