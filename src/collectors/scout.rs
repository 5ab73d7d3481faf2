//! Scout collector: crowdsourced flood reports from a social feed or a
//! replay file.
//!
//! Each raw text runs through a rule-based flood-relevance classifier, a
//! gazetteer geocoder (exact match, then substring), and a depth-term
//! severity vocabulary covering both English and Tagalog. Non-flood items
//! are discarded. In lenient mode (default) reports without a resolvable
//! location are forwarded with `coord = None` and the hazard core applies
//! its global fallback; strict mode drops them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{agent_ids, Envelope, MessageBus, Payload, Performative};
use crate::config;
use crate::config::defaults;
use crate::types::{Coord, ReportType, ScoutReport};

/// Depth-term vocabulary: (term, fractional severity). Longest match wins
/// so "hanggang tuhod" beats a bare keyword hit.
const DEPTH_TERMS: &[(&str, f64)] = &[
    ("gutter", 0.10),
    ("ankle", 0.15),
    ("bukung-bukong", 0.15),
    ("sakong", 0.15),
    ("half tire", 0.35),
    ("tire", 0.40),
    ("gulong", 0.40),
    ("knee", 0.50),
    ("tuhod", 0.50),
    ("hip", 0.70),
    ("balakang", 0.70),
    ("waist", 0.80),
    ("baywang", 0.80),
    ("chest", 0.90),
    ("dibdib", 0.90),
    ("neck", 0.95),
    ("leeg", 0.95),
    ("rooftop", 1.00),
    ("bubong", 1.00),
];

/// Keywords marking a text as flood-related.
const FLOOD_KEYWORDS: &[&str] = &[
    "flood", "flooded", "flooding", "baha", "bumabaha", "binaha", "bumaha", "underwater",
    "water level", "tubig", "rising water", "overflow", "umapaw",
];

/// Keywords marking a road blockage rather than standing water.
const BLOCKED_KEYWORDS: &[&str] = &["blocked", "impassable", "hindi madaanan", "sarado", "closed"];

// ============================================================================
// Gazetteer
// ============================================================================

/// Static name → coordinate table for geocoding location mentions.
pub struct Gazetteer {
    /// (normalized name, display name, coord), longest names first
    entries: Vec<(String, String, Coord)>,
}

impl Gazetteer {
    /// Load from the `name, lat, lon` CSV. Rows with non-finite
    /// coordinates are skipped.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| anyhow::anyhow!("failed to open gazetteer {}: {e}", path.display()))?;

        let mut entries = Vec::new();
        for row in reader.deserialize::<GazetteerRow>() {
            let Ok(row) = row else {
                warn!("Skipping malformed gazetteer row");
                continue;
            };
            let coord = Coord::new(row.lat, row.lon);
            if !coord.is_finite() {
                warn!(name = %row.name, "Skipping gazetteer row with non-finite coordinates");
                continue;
            }
            entries.push((row.name.to_lowercase(), row.name, coord));
        }
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        info!(locations = entries.len(), "Gazetteer loaded");
        Ok(Self { entries })
    }

    /// Build from in-memory pairs (tests, feedback intake).
    pub fn from_entries(pairs: Vec<(String, Coord)>) -> Self {
        let mut entries: Vec<(String, String, Coord)> = pairs
            .into_iter()
            .map(|(name, coord)| (name.to_lowercase(), name, coord))
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { entries }
    }

    /// Exact (case-insensitive) lookup.
    pub fn geocode(&self, name: &str) -> Option<Coord> {
        let needle = name.to_lowercase();
        self.entries
            .iter()
            .find(|(normalized, _, _)| *normalized == needle)
            .map(|(_, _, coord)| *coord)
    }

    /// Find the first gazetteer name mentioned in free text; longest names
    /// are checked first so "Concepcion Dos" wins over "Concepcion".
    pub fn extract(&self, text: &str) -> Option<(String, Coord)> {
        let haystack = text.to_lowercase();
        self.entries
            .iter()
            .find(|(normalized, _, _)| haystack.contains(normalized))
            .map(|(_, display, coord)| (display.clone(), *coord))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Deserialize)]
struct GazetteerRow {
    name: String,
    lat: f64,
    lon: f64,
}

// ============================================================================
// Classification
// ============================================================================

/// Rule-based classification of one raw text.
pub struct Classifier {
    depth_pattern: Regex,
}

impl Classifier {
    pub fn new() -> Self {
        // Numeric depth mentions: "1.2m", "0.5 meter", "30 cm"
        let depth_pattern =
            Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(m|meter|meters|cm)\b").expect("depth regex");
        Self { depth_pattern }
    }

    pub fn is_flood_related(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        FLOOD_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    pub fn report_type(&self, text: &str) -> ReportType {
        let lower = text.to_lowercase();
        if FLOOD_KEYWORDS.iter().any(|k| lower.contains(k)) {
            ReportType::Flood
        } else if BLOCKED_KEYWORDS.iter().any(|k| lower.contains(k)) {
            ReportType::Blocked
        } else if lower.contains("traffic") || lower.contains("trapik") {
            ReportType::Traffic
        } else if lower.contains("clear") || lower.contains("passable") {
            ReportType::Clear
        } else {
            ReportType::Other
        }
    }

    /// Severity from the depth vocabulary, a numeric depth mention, or a
    /// flood-keyword floor.
    pub fn severity(&self, text: &str) -> (f64, bool) {
        let lower = text.to_lowercase();

        for (term, level) in DEPTH_TERMS {
            if lower.contains(term) {
                return (*level, true);
            }
        }

        if let Some(caps) = self.depth_pattern.captures(&lower) {
            if let Ok(value) = caps[1].parse::<f64>() {
                let meters = if caps[2].starts_with("cm") {
                    value / 100.0
                } else {
                    value
                };
                // Map a stated depth through the same bands the vocabulary
                // covers: waist-deep water is ~0.8 m.
                return ((meters / 1.0).clamp(0.0, 1.0), true);
            }
        }

        (0.3, false)
    }

    /// Confidence from signal quality: a located, depth-termed report is
    /// worth more than a bare keyword mention.
    pub fn confidence(&self, has_location: bool, has_depth_term: bool, text: &str) -> f64 {
        let mut confidence: f64 = 0.5;
        if has_location {
            confidence += 0.2;
        }
        if has_depth_term {
            confidence += 0.2;
        }
        if text.len() < 15 {
            confidence -= 0.2;
        }
        confidence.clamp(0.0, 1.0)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Raw feed
// ============================================================================

/// One raw post from the feed or the replay file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPost {
    pub text: String,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

/// Scout statistics, surfaced by `/health` and `/admin/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoutCollectorStats {
    pub polls: u64,
    pub raw_posts_seen: u64,
    pub reports_extracted: u64,
    pub reports_discarded: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// The scout collection agent.
pub struct ScoutCollector {
    bus: Arc<MessageBus>,
    gazetteer: Arc<Gazetteer>,
    classifier: Classifier,
    stats: Arc<Mutex<ScoutCollectorStats>>,
    /// Replay file (simulation mode) read in chunks, cycling at EOF
    replay: Option<ReplayState>,
    feed: Option<FeedConfig>,
    strict_locations: bool,
}

struct ReplayState {
    path: PathBuf,
    cursor: Mutex<usize>,
}

struct FeedConfig {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

/// Posts consumed from the replay file per poll.
const REPLAY_CHUNK: usize = 20;

impl ScoutCollector {
    pub fn new(
        bus: Arc<MessageBus>,
        gazetteer: Arc<Gazetteer>,
        stats: Arc<Mutex<ScoutCollectorStats>>,
    ) -> Self {
        let cfg = config::get();
        let feed_token = std::env::var("AGOS_FEED_TOKEN").ok().filter(|t| !t.is_empty());

        let feed = match (&feed_token, cfg.collectors.scout_feed_enabled) {
            (Some(token), true) => Some(FeedConfig {
                http: reqwest::Client::builder()
                    .timeout(Duration::from_secs(cfg.collectors.source_timeout_secs))
                    .build()
                    .unwrap_or_default(),
                endpoint: "https://api.feed.example/v1/search?q=baha%20marikina".to_string(),
                token: token.clone(),
            }),
            _ => None,
        };

        let replay = cfg
            .assets
            .scout_replay
            .as_ref()
            .map(|path| ReplayState {
                path: path.clone(),
                cursor: Mutex::new(0),
            });

        if feed.is_none() {
            info!("Scout collector in simulation mode (replay file)");
        }

        Self {
            bus,
            gazetteer,
            classifier: Classifier::new(),
            stats,
            replay,
            feed,
            strict_locations: cfg.collectors.strict_scout_locations,
        }
    }

    /// Use a specific replay file instead of the configured one.
    pub fn with_replay_file(mut self, path: PathBuf) -> Self {
        self.replay = Some(ReplayState {
            path,
            cursor: Mutex::new(0),
        });
        self.feed = None;
        self
    }

    /// Agent loop: polls only on request (the scheduler drives cadence).
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            simulation = self.feed.is_none(),
            gazetteer = self.gazetteer.len(),
            "[Scout] Agent starting"
        );
        let poll = Duration::from_secs(defaults::MAILBOX_POLL_TIMEOUT_SECS);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Scout] Received shutdown signal");
                    return;
                }
                received = self.bus.receive(agent_ids::SCOUT_COLLECTOR, poll) => {
                    match received {
                        Ok(Some(envelope)) => {
                            if matches!(
                                (&envelope.performative, &envelope.payload),
                                (Performative::Request, Payload::ScoutPollNow)
                            ) {
                                self.poll_round(Some(&envelope)).await;
                            } else {
                                warn!(
                                    content_type = envelope.payload.content_type(),
                                    "Unexpected envelope at scout collector, ignoring"
                                );
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Scout collector mailbox error");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One poll round: pull raw posts, classify, batch, reply.
    pub async fn poll_round(&self, request: Option<&Envelope>) {
        let raw = match self.pull_raw().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Scout poll failed");
                if let Some(request) = request {
                    let _ = self.bus.send(Envelope::failure_to(
                        request,
                        agent_ids::SCOUT_COLLECTOR,
                        format!("scout poll failed: {e}"),
                    ));
                }
                return;
            }
        };

        let raw_count = raw.len();
        let reports = self.process_posts(raw);
        let extracted = reports.len();
        let has_coordinates = reports.iter().any(|r| r.coord.is_some());

        {
            let mut stats = self.stats.lock().expect("scout stats poisoned");
            stats.polls += 1;
            stats.raw_posts_seen += raw_count as u64;
            stats.reports_extracted += extracted as u64;
            stats.reports_discarded += (raw_count - extracted.min(raw_count)) as u64;
            stats.last_poll_at = Some(Utc::now());
        }

        if !reports.is_empty() {
            let batch = Envelope::inform(
                agent_ids::SCOUT_COLLECTOR,
                agent_ids::HAZARD,
                Payload::ScoutReportBatch {
                    reports,
                    has_coordinates,
                },
            );
            if let Err(e) = self.bus.send(batch) {
                warn!(error = %e, "Failed to deliver scout batch");
            }
        }

        if let Some(request) = request {
            let _ = self.bus.send(Envelope::confirm_to(
                request,
                agent_ids::SCOUT_COLLECTOR,
                serde_json::json!({
                    "raw_posts": raw_count,
                    "reports": extracted,
                    "has_coordinates": has_coordinates,
                }),
            ));
        }

        info!(raw = raw_count, reports = extracted, "Scout poll complete");
    }

    /// Classify, geocode, and filter a batch of raw posts.
    pub fn process_posts(&self, posts: Vec<RawPost>) -> Vec<ScoutReport> {
        let service_area = &config::get().service_area;
        let mut reports = Vec::new();

        for post in posts {
            if !self.classifier.is_flood_related(&post.text) {
                continue;
            }

            let located = self.gazetteer.extract(&post.text);
            if located.is_none() && self.strict_locations {
                continue;
            }

            let (severity, has_depth_term) = self.classifier.severity(&post.text);
            let confidence =
                self.classifier
                    .confidence(located.is_some(), has_depth_term, &post.text);

            let (location_name, coord) = match located {
                Some((name, coord)) => {
                    // A gazetteer hit outside the service area is treated
                    // as ungeocodable rather than trusted.
                    if service_area.contains(coord.lat, coord.lon) {
                        (Some(name), Some(coord))
                    } else {
                        (Some(name), None)
                    }
                }
                None => (None, None),
            };

            reports.push(
                ScoutReport {
                    text: post.text,
                    location_name,
                    coord,
                    severity,
                    confidence,
                    report_type: ReportType::Flood,
                    is_flood_related: true,
                    observed_at: post.posted_at.unwrap_or_else(Utc::now),
                }
                .clamped(),
            );
        }

        reports
    }

    async fn pull_raw(&self) -> anyhow::Result<Vec<RawPost>> {
        if let Some(feed) = &self.feed {
            return self.pull_feed(feed).await;
        }
        self.pull_replay()
    }

    async fn pull_feed(&self, feed: &FeedConfig) -> anyhow::Result<Vec<RawPost>> {
        #[derive(Deserialize)]
        struct FeedEnvelope {
            posts: Vec<RawPost>,
        }

        let body: FeedEnvelope = feed
            .http
            .get(&feed.endpoint)
            .bearer_auth(&feed.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.posts)
    }

    /// Read the next chunk of the replay file, cycling at EOF.
    fn pull_replay(&self) -> anyhow::Result<Vec<RawPost>> {
        let Some(replay) = &self.replay else {
            return Ok(Vec::new());
        };

        let contents = std::fs::read_to_string(&replay.path).map_err(|e| {
            anyhow::anyhow!("failed to read replay file {}: {e}", replay.path.display())
        })?;
        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let mut cursor = replay.cursor.lock().expect("replay cursor poisoned");
        let start = *cursor % lines.len();
        let mut posts = Vec::new();
        for offset in 0..REPLAY_CHUNK.min(lines.len()) {
            let line = lines[(start + offset) % lines.len()];
            match serde_json::from_str::<RawPost>(line) {
                Ok(post) => posts.push(post),
                Err(e) => warn!(error = %e, "Skipping malformed replay line"),
            }
        }
        *cursor = (start + REPLAY_CHUNK.min(lines.len())) % lines.len();

        Ok(posts)
    }
}
