//! In-process message bus: one mailbox per registered agent id.
//!
//! Delivery is at-most-once within the process and preserves per-sender,
//! per-receiver order. Mailboxes are unbounded in principle with a soft
//! cap beyond which the oldest droppable INFORM is discarded and a counter
//! bumped. The bus stamps every envelope with a monotone sequence number
//! and never inspects payloads.

mod envelope;

pub use envelope::{Envelope, Payload, Performative};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config;

/// Well-known agent ids.
pub mod agent_ids {
    pub const HAZARD: &str = "hazard";
    pub const FLOOD_COLLECTOR: &str = "flood_collector";
    pub const SCOUT_COLLECTOR: &str = "scout_collector";
    pub const ROUTER: &str = "router";
    pub const EVACUATION: &str = "evacuation_planner";
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const SCHEDULER: &str = "scheduler";
}

/// Bus operation failures. Invariant violations here are treated as fatal
/// by callers: the process aborts so the supervisor restarts cleanly.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("no mailbox registered for agent '{0}'")]
    UnknownAgent(String),
    #[error("agent '{0}' is already registered")]
    AlreadyRegistered(String),
}

struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

/// The typed message bus.
pub struct MessageBus {
    mailboxes: Mutex<HashMap<String, Arc<Mailbox>>>,
    seq: AtomicU64,
    dropped: AtomicU64,
    soft_cap: usize,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_soft_cap(config::get().bus.mailbox_soft_cap)
    }

    pub fn with_soft_cap(soft_cap: usize) -> Self {
        Self {
            mailboxes: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            soft_cap,
        }
    }

    /// Create the mailbox for an agent id.
    pub fn register(&self, id: &str) -> Result<(), BusError> {
        let mut boxes = self.mailboxes.lock().expect("bus mailbox map poisoned");
        if boxes.contains_key(id) {
            return Err(BusError::AlreadyRegistered(id.to_string()));
        }
        boxes.insert(
            id.to_string(),
            Arc::new(Mailbox {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        );
        Ok(())
    }

    /// Non-blocking delivery into the receiver's mailbox. Stamps the
    /// sequence number. Over the soft cap, the oldest droppable INFORM is
    /// discarded first; if nothing is droppable the queue keeps growing.
    pub fn send(&self, mut envelope: Envelope) -> Result<(), BusError> {
        let mailbox = self.mailbox(&envelope.receiver_id)?;
        envelope.seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut queue = mailbox.queue.lock().expect("mailbox queue poisoned");
            if queue.len() >= self.soft_cap {
                if let Some(pos) = queue.iter().position(|e| e.droppable()) {
                    queue.remove(pos);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            queue.push_back(envelope);
        }

        mailbox.notify.notify_one();
        Ok(())
    }

    /// Await the next envelope for `id`, up to `timeout`. Returns `None`
    /// on timeout. Each envelope is delivered to exactly one receive.
    pub async fn receive(&self, id: &str, timeout: Duration) -> Result<Option<Envelope>, BusError> {
        let mailbox = self.mailbox(id)?;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = mailbox.notify.notified();
            if let Some(envelope) = Self::pop(&mailbox) {
                return Ok(Some(envelope));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Self::pop(&mailbox));
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Self::pop(&mailbox));
            }
        }
    }

    /// Non-blocking receive; `None` when the mailbox is empty.
    pub fn try_receive(&self, id: &str) -> Result<Option<Envelope>, BusError> {
        let mailbox = self.mailbox(id)?;
        Ok(Self::pop(&mailbox))
    }

    /// Envelopes discarded by the soft cap since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue depth of one mailbox.
    pub fn depth(&self, id: &str) -> Result<usize, BusError> {
        let mailbox = self.mailbox(id)?;
        let queue = mailbox.queue.lock().expect("mailbox queue poisoned");
        Ok(queue.len())
    }

    fn pop(mailbox: &Mailbox) -> Option<Envelope> {
        mailbox
            .queue
            .lock()
            .expect("mailbox queue poisoned")
            .pop_front()
    }

    fn mailbox(&self, id: &str) -> Result<Arc<Mailbox>, BusError> {
        self.mailboxes
            .lock()
            .expect("bus mailbox map poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| BusError::UnknownAgent(id.to_string()))
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
