//! Mission orchestrator: a state-machine coordinator composing the
//! multi-agent workflows.
//!
//! Missions arrive as typed requests (the natural-language path goes
//! through an external interpreter first and lands here as the same typed
//! request). Each mission type walks a fixed state chain; at every state
//! the orchestrator sends one REQUEST and awaits a single CONFIRM/FAILURE
//! correlated by conversation id, under a per-state timeout. Any FAILURE
//! or timeout moves the mission to FAILED with a structured reason.
//! Completed missions are retained in a bounded ring buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{agent_ids, Envelope, MessageBus, Payload, Performative};
use crate::config::defaults;
use crate::types::{MissionRecord, MissionRequest, MissionState};

/// Short opaque mission id.
pub fn new_mission_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Shared mission table: in-flight missions plus a bounded ring of
/// finished ones. The HTTP surface reads it; only the orchestrator writes.
pub struct MissionStore {
    active: HashMap<String, MissionRecord>,
    history: VecDeque<MissionRecord>,
    capacity: usize,
}

impl MissionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            history: VecDeque::new(),
            capacity,
        }
    }

    pub fn get(&self, mission_id: &str) -> Option<MissionRecord> {
        self.active
            .get(mission_id)
            .or_else(|| self.history.iter().find(|m| m.mission_id == mission_id))
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn history_count(&self) -> usize {
        self.history.len()
    }

    fn insert(&mut self, record: MissionRecord) {
        self.active.insert(record.mission_id.clone(), record);
    }

    fn retire(&mut self, mission_id: &str) {
        if let Some(record) = self.active.remove(mission_id) {
            if self.history.len() >= self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(record);
        }
    }
}

/// One step of a mission chain: the state to enter, the agent to ask, the
/// request payload, and the state's timeout.
struct Step {
    state: MissionState,
    agent: &'static str,
    payload: Payload,
    timeout: Duration,
}

/// The orchestrator agent.
pub struct Orchestrator {
    bus: Arc<MessageBus>,
    store: Arc<Mutex<MissionStore>>,
    deadlines: HashMap<String, Instant>,
}

impl Orchestrator {
    pub fn new(bus: Arc<MessageBus>, store: Arc<Mutex<MissionStore>>) -> Self {
        Self {
            bus,
            store,
            deadlines: HashMap::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("[Orchestrator] Agent starting");
        let poll = Duration::from_secs(defaults::MAILBOX_POLL_TIMEOUT_SECS);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Orchestrator] Received shutdown signal");
                    return;
                }
                received = self.bus.receive(agent_ids::ORCHESTRATOR, poll) => {
                    match received {
                        Ok(Some(envelope)) => self.handle(envelope),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Orchestrator mailbox error");
                            return;
                        }
                    }
                    self.expire_overdue();
                }
            }
        }
    }

    fn handle(&mut self, envelope: Envelope) {
        match (&envelope.performative, &envelope.payload) {
            (Performative::Request, Payload::StartMission { mission_id, request }) => {
                self.start_mission(mission_id.clone(), request.clone());
            }
            (Performative::Confirm, _) => {
                let Some(mission_id) = envelope.conversation_id.clone() else {
                    warn!("CONFIRM without conversation id, ignoring");
                    return;
                };
                self.on_confirm(&mission_id, &envelope.payload);
            }
            (Performative::Failure, Payload::Failure { reason }) => {
                if let Some(mission_id) = envelope.conversation_id.clone() {
                    self.fail_mission(&mission_id, reason.clone());
                }
            }
            (performative, payload) => {
                warn!(
                    performative = %performative,
                    content_type = payload.content_type(),
                    "Unexpected envelope at orchestrator, ignoring"
                );
            }
        }
    }

    fn start_mission(&mut self, mission_id: String, request: MissionRequest) {
        info!(mission_id = %mission_id, mission_type = %request.mission_type(), "Mission created");
        let record = MissionRecord::new(mission_id.clone(), request.clone());
        self.store.lock().expect("mission store poisoned").insert(record);

        if let MissionRequest::AssessRisk { location } = &request {
            if location.trim().is_empty() {
                self.fail_mission(&mission_id, "underspecified".to_string());
                return;
            }
        }

        match next_step(&request, MissionState::Created) {
            Some(step) => self.dispatch(&mission_id, step),
            None => self.complete_mission(&mission_id),
        }
    }

    fn on_confirm(&mut self, mission_id: &str, payload: &Payload) {
        let Some((request, state)) = self.mission_snapshot(mission_id) else {
            warn!(mission_id = %mission_id, "CONFIRM for unknown or finished mission");
            return;
        };

        self.merge_results(mission_id, payload);

        match next_step(&request, state) {
            Some(step) => self.dispatch(mission_id, step),
            None => self.complete_mission(mission_id),
        }
    }

    /// Record a step's outcome into the mission's partial results.
    fn merge_results(&self, mission_id: &str, payload: &Payload) {
        let mut store = self.store.lock().expect("mission store poisoned");
        let Some(record) = store.active.get_mut(mission_id) else {
            return;
        };
        match payload {
            Payload::Confirm { summary } => {
                if let Some(object) = summary.as_object() {
                    for (key, value) in object {
                        record.partial_results.insert(key.clone(), value.clone());
                    }
                }
            }
            Payload::RouteResult { plan } => {
                if let Ok(value) = serde_json::to_value(plan) {
                    record.partial_results.insert("route".to_string(), value);
                }
            }
            Payload::EvacuationResult { plan } => match plan {
                Some(plan) => {
                    if let Ok(value) = serde_json::to_value(plan) {
                        record.partial_results.insert("evacuation".to_string(), value);
                    }
                }
                None => {
                    record
                        .partial_results
                        .insert("no_safe_shelter".to_string(), serde_json::json!(true));
                }
            },
            _ => {}
        }
    }

    fn dispatch(&mut self, mission_id: &str, step: Step) {
        {
            let mut store = self.store.lock().expect("mission store poisoned");
            if let Some(record) = store.active.get_mut(mission_id) {
                record.state = step.state;
            }
        }
        self.deadlines
            .insert(mission_id.to_string(), Instant::now() + step.timeout);

        info!(mission_id = %mission_id, state = %step.state, agent = step.agent, "Mission step dispatched");
        let request = Envelope::request(agent_ids::ORCHESTRATOR, step.agent, step.payload, mission_id);
        if let Err(e) = self.bus.send(request) {
            self.fail_mission(mission_id, format!("dispatch failed: {e}"));
        }
    }

    fn complete_mission(&mut self, mission_id: &str) {
        self.deadlines.remove(mission_id);
        let mut store = self.store.lock().expect("mission store poisoned");
        if let Some(record) = store.active.get_mut(mission_id) {
            record.state = MissionState::Completed;
            record.completed_at = Some(Utc::now());
            info!(mission_id = %mission_id, "Mission completed");
        }
        store.retire(mission_id);
    }

    fn fail_mission(&mut self, mission_id: &str, reason: String) {
        self.deadlines.remove(mission_id);
        let mut store = self.store.lock().expect("mission store poisoned");
        if let Some(record) = store.active.get_mut(mission_id) {
            record.state = MissionState::Failed;
            record.reason = Some(reason.clone());
            record.completed_at = Some(Utc::now());
            warn!(mission_id = %mission_id, reason = %reason, "Mission failed");
        }
        store.retire(mission_id);
    }

    /// Fail every mission whose per-state deadline has passed.
    fn expire_overdue(&mut self) {
        let now = Instant::now();
        let overdue: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| id.clone())
            .collect();
        for mission_id in overdue {
            let state = self
                .mission_snapshot(&mission_id)
                .map(|(_, state)| state.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            self.fail_mission(&mission_id, format!("timeout in {state}"));
        }
    }

    fn mission_snapshot(&self, mission_id: &str) -> Option<(MissionRequest, MissionState)> {
        let store = self.store.lock().expect("mission store poisoned");
        store
            .active
            .get(mission_id)
            .map(|r| (r.request.clone(), r.state))
    }
}

/// The state chain per mission type: the step entered *from* `current`,
/// or `None` when `current` is the chain's last working state.
fn next_step(request: &MissionRequest, current: MissionState) -> Option<Step> {
    match request {
        MissionRequest::AssessRisk { location } => match current {
            MissionState::Created => Some(Step {
                state: MissionState::AwaitingScout,
                agent: agent_ids::SCOUT_COLLECTOR,
                payload: Payload::ScoutPollNow,
                timeout: Duration::from_secs(defaults::MISSION_SCOUT_TIMEOUT_SECS),
            }),
            MissionState::AwaitingScout => Some(Step {
                state: MissionState::AwaitingFlood,
                agent: agent_ids::FLOOD_COLLECTOR,
                payload: Payload::CollectNow,
                timeout: Duration::from_secs(defaults::MISSION_FLOOD_TIMEOUT_SECS),
            }),
            MissionState::AwaitingFlood => Some(Step {
                state: MissionState::AwaitingHazard,
                agent: agent_ids::HAZARD,
                payload: Payload::AssessLocation {
                    location: location.clone(),
                },
                timeout: Duration::from_secs(defaults::MISSION_HAZARD_TIMEOUT_SECS),
            }),
            _ => None,
        },
        MissionRequest::RouteCalculation { start, end, mode } => match current {
            MissionState::Created => Some(Step {
                state: MissionState::AwaitingRouting,
                agent: agent_ids::ROUTER,
                payload: Payload::RouteRequest {
                    start: *start,
                    end: *end,
                    mode: *mode,
                },
                timeout: Duration::from_secs(defaults::MISSION_ROUTING_TIMEOUT_SECS),
            }),
            _ => None,
        },
        MissionRequest::CoordinatedEvacuation { user_coord } => match current {
            MissionState::Created => Some(Step {
                state: MissionState::AwaitingEvacuation,
                agent: agent_ids::EVACUATION,
                payload: Payload::EvacuationRequest {
                    user_coord: *user_coord,
                },
                timeout: Duration::from_secs(defaults::MISSION_EVACUATION_TIMEOUT_SECS),
            }),
            _ => None,
        },
        MissionRequest::CascadeRiskUpdate => match current {
            MissionState::Created => Some(Step {
                state: MissionState::AwaitingFlood,
                agent: agent_ids::FLOOD_COLLECTOR,
                payload: Payload::CollectNow,
                timeout: Duration::from_secs(defaults::MISSION_FLOOD_TIMEOUT_SECS),
            }),
            MissionState::AwaitingFlood => Some(Step {
                state: MissionState::AwaitingHazard,
                agent: agent_ids::HAZARD,
                payload: Payload::FuseNow,
                timeout: Duration::from_secs(defaults::MISSION_HAZARD_TIMEOUT_SECS),
            }),
            _ => None,
        },
    }
}
