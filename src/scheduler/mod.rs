//! Collection scheduler: a single fixed-period ticker fanning REQUESTs to
//! the collectors.
//!
//! The ticker never waits for the collectors; a slow round simply overlaps
//! the next. `trigger_now()` fires one out-of-band round for the admin
//! surface. Cancellation is cooperative: in-flight triggers are already on
//! the bus when the loop exits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{agent_ids, Envelope, MessageBus, Payload};
use crate::config;

/// Scheduler statistics, surfaced by `/health` and `/admin/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub last_fire: Option<DateTime<Utc>>,
    /// Lateness of the last tick relative to its schedule
    pub jitter_ms: u64,
}

/// Handle for firing the scheduler out of band. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger: Arc<Notify>,
}

impl SchedulerHandle {
    /// Fire one collection round immediately.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }
}

/// The collection scheduler.
pub struct Scheduler {
    bus: Arc<MessageBus>,
    stats: Arc<Mutex<SchedulerStats>>,
    trigger: Arc<Notify>,
    period: Duration,
    scout_enabled: bool,
}

impl Scheduler {
    pub fn new(bus: Arc<MessageBus>, stats: Arc<Mutex<SchedulerStats>>, scout_enabled: bool) -> Self {
        Self {
            bus,
            stats,
            trigger: Arc::new(Notify::new()),
            period: Duration::from_secs(config::get().collectors.period_secs),
            scout_enabled,
        }
    }

    /// Admin handle for `trigger_now`.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            trigger: self.trigger.clone(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            period_secs = self.period.as_secs(),
            scout = self.scout_enabled,
            "[Scheduler] Starting"
        );
        let mut next_fire = Instant::now() + self.period;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Scheduler] Received shutdown signal");
                    return;
                }
                _ = tokio::time::sleep_until(next_fire) => {
                    let late_ms = Instant::now().saturating_duration_since(next_fire).as_millis() as u64;
                    next_fire = Instant::now() + self.period;
                    self.fire(late_ms);
                }
                _ = self.trigger.notified() => {
                    self.fire(0);
                }
            }
        }
    }

    /// Fan out one round of collection REQUESTs without waiting.
    pub fn fire(&self, jitter_ms: u64) {
        let tick = {
            let mut stats = self.stats.lock().expect("scheduler stats poisoned");
            stats.ticks += 1;
            stats.last_fire = Some(Utc::now());
            stats.jitter_ms = jitter_ms;
            stats.ticks
        };

        let conversation = format!("tick-{tick}");
        if let Err(e) = self.bus.send(Envelope::request(
            agent_ids::SCHEDULER,
            agent_ids::FLOOD_COLLECTOR,
            Payload::CollectNow,
            conversation.clone(),
        )) {
            warn!(error = %e, "Failed to request flood collection");
        }

        if self.scout_enabled {
            if let Err(e) = self.bus.send(Envelope::request(
                agent_ids::SCHEDULER,
                agent_ids::SCOUT_COLLECTOR,
                Payload::ScoutPollNow,
                conversation,
            )) {
                warn!(error = %e, "Failed to request scout poll");
            }
        }

        info!(tick, jitter_ms, "Collection round triggered");
    }
}
