//! Fingerprint computation and the sliding-window suppression algorithm
//! (§4.4), decoupled from bus wiring so it can be tested directly.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use warden_types::{now, FingerprintEntry, IncidentCreatedPayload};

/// Configuration governing dedup behavior, typically sourced from a
/// module's [`warden_config::ModuleConfig`].
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Incident fields whose values are concatenated to form the
    /// fingerprint, in order. Default `{title, severity, detectedBy}`.
    pub fields: Vec<String>,
    /// Sliding suppression window, in milliseconds.
    pub window_ms: u64,
    /// Hard cap on tracked fingerprints; LRU eviction on insert past this.
    pub max_fingerprints: usize,
    /// Whether to emit `incident.suppressed` on duplicate detection.
    pub emit_suppressed: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fields: vec!["title".to_string(), "severity".to_string(), "detectedBy".to_string()],
            window_ms: 5 * 60 * 1000,
            max_fingerprints: 10_000,
            emit_suppressed: true,
        }
    }
}

/// Result of feeding one incident through [`DedupEngine::on_incident_created`].
#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    /// A fresh fingerprint; the incident passes through.
    Passed,
    /// A duplicate within the window; the incident is suppressed.
    Suppressed {
        /// The incident id this fingerprint originally mapped to.
        original_incident_id: String,
        /// The matched fingerprint.
        fingerprint: String,
        /// Total occurrences including the original.
        occurrences: u64,
    },
}

fn field_value(payload: &IncidentCreatedPayload, field: &str) -> String {
    match field {
        "title" => payload.title.clone(),
        "severity" => payload.severity.to_string(),
        "detectedBy" | "detected_by" => payload.detected_by.clone(),
        "description" => payload.description.clone(),
        "incidentId" | "incident_id" => payload.incident_id.clone(),
        other => payload.context.as_ref().and_then(|c| c.get(other)).and_then(|v| v.as_str()).map(str::to_string).unwrap_or_default(),
    }
}

/// Computes the SHA-256 hex fingerprint of `payload` over `fields`, in
/// `<field>=<value>` form joined by `|` (§4.4, §6 "Fingerprint format").
pub fn fingerprint(payload: &IncidentCreatedPayload, fields: &[String]) -> String {
    let joined = fields.iter().map(|f| format!("{f}={}", field_value(payload, f))).collect::<Vec<_>>().join("|");
    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest.as_slice())
}

/// Tracks fingerprint windows and decides pass-through vs. suppression.
///
/// The concurrent map plus an ordering side-ledger mirrors the teacher's
/// `toka-orchestration::monitor::ProgressMonitor` shape (`DashMap` for
/// payload, a guarded structure for derived/ordered state).
pub struct DedupEngine {
    config: DedupConfig,
    table: DashMap<String, FingerprintEntry>,
    lru: Mutex<VecDeque<String>>,
}

impl DedupEngine {
    /// Builds an engine with the given configuration.
    pub fn new(config: DedupConfig) -> Self {
        Self { config, table: DashMap::new(), lru: Mutex::new(VecDeque::new()) }
    }

    /// The sweep period: `min(windowMs/2, 60s)` (§4.4).
    pub fn sweep_period_ms(&self) -> u64 {
        (self.config.window_ms / 2).min(60_000)
    }

    /// Whether `incident.suppressed` should be emitted on duplicate hits.
    pub fn emit_suppressed(&self) -> bool {
        self.config.emit_suppressed
    }

    /// The configured suppression window, in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.config.window_ms
    }

    /// Number of fingerprints currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.table.len()
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.config.window_ms as i64)
    }

    fn touch_lru(&self, fp: &str) {
        let mut lru = self.lru.lock().expect("dedup lru lock poisoned");
        if let Some(pos) = lru.iter().position(|x| x == fp) {
            lru.remove(pos);
        }
        lru.push_back(fp.to_string());
    }

    fn evict_if_at_capacity(&self) {
        if self.table.len() < self.config.max_fingerprints {
            return;
        }
        let mut lru = self.lru.lock().expect("dedup lru lock poisoned");
        while let Some(candidate) = lru.pop_front() {
            if self.table.remove(&candidate).is_some() {
                break;
            }
        }
    }

    /// Runs the algorithm of §4.4 "Algorithm on receive" for one incoming
    /// `incident.created` payload.
    pub fn on_incident_created(&self, payload: &IncidentCreatedPayload) -> DedupOutcome {
        let fp = fingerprint(payload, &self.config.fields);
        let now_ts = now();

        let mut existed_live = false;
        if let Some(mut entry) = self.table.get_mut(&fp) {
            if now_ts.signed_duration_since(entry.last_seen_at) < self.window() {
                entry.occurrences += 1;
                entry.last_seen_at = now_ts;
                let outcome = DedupOutcome::Suppressed {
                    original_incident_id: entry.original_incident_id.clone(),
                    fingerprint: fp.clone(),
                    occurrences: entry.occurrences,
                };
                drop(entry);
                self.touch_lru(&fp);
                return outcome;
            }
            existed_live = true;
        }

        if !existed_live {
            self.evict_if_at_capacity();
        }
        self.table.insert(
            fp.clone(),
            FingerprintEntry { fingerprint: fp.clone(), original_incident_id: payload.incident_id.clone(), occurrences: 1, first_seen_at: now_ts, last_seen_at: now_ts },
        );
        self.touch_lru(&fp);
        DedupOutcome::Passed
    }

    /// Removes fingerprint entries whose window has elapsed (§4.4, "Expiry
    /// sweep"). Directly callable so tests never depend on real time.
    pub fn expire_sweep(&self) {
        let window = self.window();
        let now_ts = now();
        self.table.retain(|_, entry| now_ts.signed_duration_since(entry.last_seen_at) < window);
        let mut lru = self.lru.lock().expect("dedup lru lock poisoned");
        lru.retain(|fp| self.table.contains_key(fp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::Severity;

    fn payload(incident_id: &str, title: &str) -> IncidentCreatedPayload {
        IncidentCreatedPayload {
            incident_id: incident_id.to_string(),
            title: title.to_string(),
            description: "desc".to_string(),
            severity: Severity::Critical,
            detected_by: "detector-1".to_string(),
            source_event: None,
            detected_at: now(),
            context: None,
        }
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_unrelated_fields() {
        let fields = vec!["title".to_string(), "severity".to_string()];
        let a = payload("INC-1", "Disk full");
        let mut b = payload("INC-2", "Disk full");
        b.description = "a totally different description".to_string();
        assert_eq!(fingerprint(&a, &fields), fingerprint(&b, &fields));
    }

    #[test]
    fn first_sighting_passes_second_within_window_is_suppressed() {
        let engine = DedupEngine::new(DedupConfig { window_ms: 5000, ..Default::default() });
        let first = payload("INC-1", "Disk full");
        let second = payload("INC-2", "Disk full");

        assert_eq!(engine.on_incident_created(&first), DedupOutcome::Passed);
        match engine.on_incident_created(&second) {
            DedupOutcome::Suppressed { original_incident_id, occurrences, .. } => {
                assert_eq!(original_incident_id, "INC-1");
                assert_eq!(occurrences, 2);
            }
            other => panic!("expected Suppressed, got {other:?}"),
        }
    }

    #[test]
    fn capacity_eviction_keeps_table_at_or_under_max() {
        let engine = DedupEngine::new(DedupConfig { max_fingerprints: 2, window_ms: 60_000, ..Default::default() });
        engine.on_incident_created(&payload("INC-1", "a"));
        engine.on_incident_created(&payload("INC-2", "b"));
        engine.on_incident_created(&payload("INC-3", "c"));
        assert!(engine.tracked_count() <= 2);
    }

    #[test]
    fn expire_sweep_allows_same_fingerprint_to_pass_again() {
        let engine = DedupEngine::new(DedupConfig { window_ms: 0, ..Default::default() });
        engine.on_incident_created(&payload("INC-1", "Disk full"));
        engine.expire_sweep();
        // window_ms = 0 means no entry is ever "live", so the very next
        // sighting with the same fingerprint is itself fresh.
        assert_eq!(engine.on_incident_created(&payload("INC-2", "Disk full")), DedupOutcome::Passed);
    }
}
