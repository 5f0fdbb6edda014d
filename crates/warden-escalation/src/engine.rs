//! Tracking table and sweep algorithm, decoupled from bus wiring (§4.5).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Duration as ChronoDuration;
use warden_types::{now, EscalationState, EscalationStatus, IncidentCreatedPayload, Severity};

use crate::policy::Policy;

/// Configuration governing escalation behavior.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Hard cap on tracked incidents; oldest-by-`startedAt` is evicted past this.
    pub max_tracked_incidents: usize,
    /// Statuses that, once reached, drop an incident from tracking.
    pub resolved_statuses: Vec<String>,
    /// Whether an acknowledged incident pauses its escalation sweep.
    pub acknowledged_pauses_escalation: bool,
    /// How often the periodic sweep runs, in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_tracked_incidents: 10_000,
            resolved_statuses: vec!["resolved".to_string(), "closed".to_string()],
            acknowledged_pauses_escalation: true,
            check_interval_ms: 30_000,
        }
    }
}

/// One escalation firing produced by a sweep, ready to become an
/// `incident.escalated` + `enrichment.completed` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationFiring {
    /// Incident that escalated.
    pub incident_id: String,
    /// The policy that fired.
    pub policy_id: String,
    /// The level that fired.
    pub level: u32,
    /// Notification targets for this level.
    pub notify: Vec<String>,
    /// Milliseconds elapsed since tracking began.
    pub elapsed_ms: u64,
    /// The incident's severity, carried for notifier convenience.
    pub severity: Severity,
    /// The incident's title, carried for notifier convenience.
    pub title: String,
}

/// Severity/title snapshot kept alongside the canonical [`EscalationState`]
/// since notifiers need them but the shared state struct does not carry
/// them (it is the cross-module, storage-shaped type).
#[derive(Debug, Clone)]
struct IncidentMeta {
    severity: Severity,
    title: String,
}

/// Tracks open incidents against loaded policies and decides when levels fire.
pub struct EscalationEngine {
    config: EscalationConfig,
    policies: Vec<Policy>,
    tracked: Mutex<HashMap<String, EscalationState>>,
    meta: Mutex<HashMap<String, IncidentMeta>>,
}

impl EscalationEngine {
    /// Builds an engine over already-compiled, declaration-ordered policies.
    pub fn new(config: EscalationConfig, policies: Vec<Policy>) -> Self {
        Self { config, policies, tracked: Mutex::new(HashMap::new()), meta: Mutex::new(HashMap::new()) }
    }

    /// The configured sweep period.
    pub fn check_interval_ms(&self) -> u64 {
        self.config.check_interval_ms
    }

    /// Number of incidents currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().expect("escalation tracked lock poisoned").len()
    }

    fn first_match(&self, severity: Severity, title: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.matches(severity, title))
    }

    fn evict_oldest_if_at_capacity(&self, tracked: &mut HashMap<String, EscalationState>) {
        if tracked.len() < self.config.max_tracked_incidents {
            return;
        }
        if let Some(oldest_id) = tracked.iter().min_by_key(|(_, s)| s.started_at).map(|(id, _)| id.clone()) {
            tracked.remove(&oldest_id);
        }
    }

    /// Starts tracking `payload` if a policy matches it (§4.5 "On
    /// `incident.created`"). Returns the matched policy id, if any.
    pub fn on_incident_created(&self, payload: &IncidentCreatedPayload) -> Option<String> {
        let policy = self.first_match(payload.severity, &payload.title)?;
        let policy_id = policy.id.clone();

        let mut tracked = self.tracked.lock().expect("escalation tracked lock poisoned");
        self.evict_oldest_if_at_capacity(&mut tracked);
        tracked.insert(
            payload.incident_id.clone(),
            EscalationState {
                incident_id: payload.incident_id.clone(),
                policy_id: policy_id.clone(),
                started_at: now(),
                current_level: 0,
                status: EscalationStatus::Open,
                acknowledged_at: None,
                last_notified_at: HashMap::new(),
            },
        );
        drop(tracked);
        self.meta
            .lock()
            .expect("escalation meta lock poisoned")
            .insert(payload.incident_id.clone(), IncidentMeta { severity: payload.severity, title: payload.title.clone() });
        Some(policy_id)
    }

    /// Applies a status transition observed via `incident.updated` (§4.5
    /// "On `incident.updated`").
    pub fn on_status_changed(&self, incident_id: &str, new_status: &str) {
        let mut tracked = self.tracked.lock().expect("escalation tracked lock poisoned");
        if self.config.resolved_statuses.iter().any(|s| s == new_status) {
            tracked.remove(incident_id);
            drop(tracked);
            self.meta.lock().expect("escalation meta lock poisoned").remove(incident_id);
            return;
        }
        if new_status == "acknowledged" {
            if let Some(state) = tracked.get_mut(incident_id) {
                state.status = EscalationStatus::Acknowledged;
                state.acknowledged_at = Some(now());
            }
        }
    }

    /// Runs one sweep pass, returning every firing that should be emitted
    /// (§4.5 "Sweep"). Directly callable so tests never depend on real time.
    pub fn sweep(&self) -> Vec<EscalationFiring> {
        let now_ts = now();
        let mut firings = Vec::new();
        let mut tracked = self.tracked.lock().expect("escalation tracked lock poisoned");
        let meta = self.meta.lock().expect("escalation meta lock poisoned");

        for state in tracked.values_mut() {
            if state.status == EscalationStatus::Acknowledged && self.config.acknowledged_pauses_escalation {
                continue;
            }
            let Some(policy) = self.policies.iter().find(|p| p.id == state.policy_id) else { continue };
            let Some(incident_meta) = meta.get(&state.incident_id) else { continue };
            let elapsed = now_ts.signed_duration_since(state.started_at);
            let elapsed_ms = elapsed.num_milliseconds().max(0) as u64;

            for level in &policy.levels {
                if ChronoDuration::milliseconds(level.after_ms as i64) > elapsed {
                    continue;
                }
                if level.level > state.current_level {
                    state.current_level = level.level;
                    state.status = EscalationStatus::Escalated;
                    state.last_notified_at.insert(level.level, now_ts);
                    firings.push(EscalationFiring {
                        incident_id: state.incident_id.clone(),
                        policy_id: policy.id.clone(),
                        level: level.level,
                        notify: level.notify.clone(),
                        elapsed_ms,
                        severity: incident_meta.severity,
                        title: incident_meta.title.clone(),
                    });
                } else if level.level == state.current_level && level.repeat {
                    let due = level.repeat_interval_ms.map(|interval| {
                        let last = state.last_notified_at.get(&level.level).copied().unwrap_or(state.started_at);
                        now_ts.signed_duration_since(last) >= ChronoDuration::milliseconds(interval as i64)
                    }).unwrap_or(false);
                    if due {
                        state.last_notified_at.insert(level.level, now_ts);
                        firings.push(EscalationFiring {
                            incident_id: state.incident_id.clone(),
                            policy_id: policy.id.clone(),
                            level: level.level,
                            notify: level.notify.clone(),
                            elapsed_ms,
                            severity: incident_meta.severity,
                            title: incident_meta.title.clone(),
                        });
                    }
                }
            }
        }
        firings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Level;

    fn payload(incident_id: &str, title: &str, severity: Severity) -> IncidentCreatedPayload {
        IncidentCreatedPayload {
            incident_id: incident_id.to_string(),
            title: title.to_string(),
            description: "desc".to_string(),
            severity,
            detected_by: "detector-1".to_string(),
            source_event: None,
            detected_at: now(),
            context: None,
        }
    }

    fn policy_with_levels(levels: Vec<Level>) -> Policy {
        Policy::compile("p1", vec![], None, levels).unwrap()
    }

    #[test]
    fn incident_created_starts_tracking_on_match() {
        let engine = EscalationEngine::new(EscalationConfig::default(), vec![policy_with_levels(vec![])]);
        let matched = engine.on_incident_created(&payload("INC-1", "t", Severity::Critical));
        assert_eq!(matched.as_deref(), Some("p1"));
        assert_eq!(engine.tracked_count(), 1);
    }

    #[test]
    fn resolved_status_drops_tracking() {
        let engine = EscalationEngine::new(EscalationConfig::default(), vec![policy_with_levels(vec![])]);
        engine.on_incident_created(&payload("INC-1", "t", Severity::Critical));
        engine.on_status_changed("INC-1", "resolved");
        assert_eq!(engine.tracked_count(), 0);
    }

    #[test]
    fn acknowledged_status_pauses_sweep() {
        let level = Level { level: 1, after_ms: 0, notify: vec!["slack".to_string()], repeat: false, repeat_interval_ms: None };
        let engine = EscalationEngine::new(EscalationConfig::default(), vec![policy_with_levels(vec![level])]);
        engine.on_incident_created(&payload("INC-1", "t", Severity::Critical));
        engine.on_status_changed("INC-1", "acknowledged");
        assert!(engine.sweep().is_empty());
    }

    #[test]
    fn sweep_fires_level_whose_after_ms_has_elapsed() {
        let level = Level { level: 1, after_ms: 0, notify: vec!["slack".to_string()], repeat: false, repeat_interval_ms: None };
        let engine = EscalationEngine::new(EscalationConfig::default(), vec![policy_with_levels(vec![level])]);
        engine.on_incident_created(&payload("INC-1", "t", Severity::Critical));

        let firings = engine.sweep();
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].level, 1);

        // Level already reached; a second immediate sweep fires nothing more
        // since repeat is false.
        assert!(engine.sweep().is_empty());
    }

    #[test]
    fn capacity_eviction_keeps_table_at_or_under_max() {
        let config = EscalationConfig { max_tracked_incidents: 2, ..Default::default() };
        let engine = EscalationEngine::new(config, vec![policy_with_levels(vec![])]);
        engine.on_incident_created(&payload("INC-1", "t", Severity::Critical));
        engine.on_incident_created(&payload("INC-2", "t", Severity::Critical));
        engine.on_incident_created(&payload("INC-3", "t", Severity::Critical));
        assert!(engine.tracked_count() <= 2);
    }
}
