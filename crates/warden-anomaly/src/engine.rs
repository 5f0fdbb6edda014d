//! Per-metric state and the ingest-a-line pipeline, decoupled from bus
//! wiring (§4.6).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use warden_types::{now, Severity};

use crate::detect::{detect, update_ewma};
use crate::metric::{Direction, MetricConfig};

fn rate_limit_window() -> ChronoDuration {
    ChronoDuration::seconds(60)
}

/// One firing ready to become an `incident.created` event.
#[derive(Debug, Clone)]
pub struct AnomalyFiring {
    /// The metric that fired.
    pub metric_id: String,
    /// The value that triggered the fire.
    pub value: f64,
    /// Which statistical method judged this sample (§4.6 "Emission").
    pub method: &'static str,
    /// The method's expected baseline.
    pub expected: f64,
    /// Lower anomaly bound.
    pub lower_bound: f64,
    /// Upper anomaly bound.
    pub upper_bound: f64,
    /// Deviation score at fire time.
    pub deviation_score: f64,
    /// Window size at fire time.
    pub window_size: usize,
    /// `"above"` or `"below"`, per §4.6 "Emission".
    pub direction: &'static str,
    /// Severity configured for this metric.
    pub severity: Severity,
}

#[derive(Debug, Clone)]
struct PerMetricState {
    window: VecDeque<f64>,
    ewma_value: Option<f64>,
    ewma_variance: f64,
    last_fired_at: Option<DateTime<Utc>>,
}

impl PerMetricState {
    fn new() -> Self {
        Self { window: VecDeque::new(), ewma_value: None, ewma_variance: 0.0, last_fired_at: None }
    }
}

/// Tracks rolling windows per metric and decides when a sample is
/// anomalous enough, and un-suppressed enough, to fire.
pub struct AnomalyEngine {
    metrics: Vec<MetricConfig>,
    states: Mutex<HashMap<String, PerMetricState>>,
    rate_limiter: Mutex<VecDeque<DateTime<Utc>>>,
    max_incidents_per_minute: usize,
}

impl AnomalyEngine {
    /// Builds an engine over already-compiled metric configurations.
    pub fn new(metrics: Vec<MetricConfig>, max_incidents_per_minute: usize) -> Self {
        Self { metrics, states: Mutex::new(HashMap::new()), rate_limiter: Mutex::new(VecDeque::new()), max_incidents_per_minute }
    }

    fn rate_limit_allows(&self, now_ts: DateTime<Utc>) -> bool {
        let mut limiter = self.rate_limiter.lock().expect("anomaly rate limiter lock poisoned");
        while let Some(&front) = limiter.front() {
            if now_ts.signed_duration_since(front) > rate_limit_window() {
                limiter.pop_front();
            } else {
                break;
            }
        }
        if limiter.len() >= self.max_incidents_per_minute {
            return false;
        }
        limiter.push_back(now_ts);
        true
    }

    /// Feeds one ingested log line through every configured metric,
    /// returning a firing for each metric that fires (§4.6 "Ingestion"
    /// through "Emission").
    pub fn ingest_line(&self, line: &str) -> Vec<AnomalyFiring> {
        let mut firings = Vec::new();
        for metric in &self.metrics {
            let Some(sample) = metric.extract(line) else { continue };
            if let Some(firing) = self.ingest_sample(metric, sample) {
                firings.push(firing);
            }
        }
        firings
    }

    fn ingest_sample(&self, metric: &MetricConfig, sample: f64) -> Option<AnomalyFiring> {
        let now_ts = now();
        let mut states = self.states.lock().expect("anomaly states lock poisoned");
        let state = states.entry(metric.id.clone()).or_insert_with(PerMetricState::new);

        let mut firing = None;
        if state.window.len() >= metric.min_training_samples {
            // Detect against the window *before* this sample joins it.
            let result = detect(metric.method, sample, &state.window, state.ewma_value.unwrap_or(sample), state.ewma_variance, metric.sensitivity);
            let is_anomaly = metric.direction.is_anomaly(sample, result.lower_bound, result.upper_bound);
            if is_anomaly {
                let on_cooldown = state.last_fired_at.map(|last| now_ts.signed_duration_since(last) < ChronoDuration::milliseconds(metric.cooldown_ms as i64)).unwrap_or(false);
                if !on_cooldown && self.rate_limit_allows(now_ts) {
                    state.last_fired_at = Some(now_ts);
                    firing = Some(AnomalyFiring {
                        metric_id: metric.id.clone(),
                        value: sample,
                        method: metric.method.as_str(),
                        expected: result.expected,
                        lower_bound: result.lower_bound,
                        upper_bound: result.upper_bound,
                        deviation_score: result.deviation_score,
                        window_size: state.window.len(),
                        direction: if sample > result.upper_bound { "above" } else { "below" },
                        severity: metric.severity,
                    });
                }
            }
        }

        let (ewma_value, ewma_variance) = update_ewma(state.ewma_value, state.ewma_variance, metric.alpha, sample);
        state.ewma_value = Some(ewma_value);
        state.ewma_variance = ewma_variance;

        state.window.push_back(sample);
        if state.window.len() > metric.training_window_size {
            state.window.pop_front();
        }

        firing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::DetectionMethod;

    fn zscore_metric(min_training: usize, window: usize, cooldown_ms: u64) -> MetricConfig {
        MetricConfig::compile("cpu", r"cpu_usage", r"cpu_usage=(\d+(?:\.\d+)?)", DetectionMethod::Zscore, 2.0, window, min_training, Direction::High, cooldown_ms, Severity::Warning, 0.3).unwrap()
    }

    #[test]
    fn warm_up_never_fires_before_minimum_samples() {
        let engine = AnomalyEngine::new(vec![zscore_metric(5, 100, 0)], 1000);
        for _ in 0..4 {
            assert!(engine.ingest_line("cpu_usage=10").is_empty());
        }
    }

    #[test]
    fn post_warmup_outlier_fires_exactly_once_then_cools_down() {
        let engine = AnomalyEngine::new(vec![zscore_metric(5, 100, 60_000)], 1000);
        for _ in 0..5 {
            engine.ingest_line("cpu_usage=10");
        }
        let firings = engine.ingest_line("cpu_usage=9999");
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].metric_id, "cpu");
        assert_eq!(firings[0].direction, "above");
        assert_eq!(firings[0].method, "zscore");

        // Still within cooldown: no second fire even though still anomalous.
        assert!(engine.ingest_line("cpu_usage=9999").is_empty());
    }

    #[test]
    fn global_rate_limiter_drops_incidents_beyond_cap() {
        let metrics = vec![zscore_metric(5, 100, 0), MetricConfig::compile("mem", r"mem_usage", r"mem_usage=(\d+(?:\.\d+)?)", DetectionMethod::Zscore, 2.0, 100, 5, Direction::High, 0, Severity::Warning, 0.3).unwrap()];
        let engine = AnomalyEngine::new(metrics, 1);
        for _ in 0..5 {
            engine.ingest_line("cpu_usage=10");
            engine.ingest_line("mem_usage=10");
        }
        let first = engine.ingest_line("cpu_usage=9999");
        assert_eq!(first.len(), 1);
        let second = engine.ingest_line("mem_usage=9999");
        assert!(second.is_empty(), "rate limiter should have dropped the second incident this minute");
    }

    #[test]
    fn window_is_capped_at_training_window_size() {
        let engine = AnomalyEngine::new(vec![zscore_metric(2, 3, 0)], 1000);
        for i in 0..10 {
            engine.ingest_line(&format!("cpu_usage={i}"));
        }
        let states = engine.states.lock().unwrap();
        assert!(states["cpu"].window.len() <= 3);
    }
}
