//! Per-metric configuration: extraction patterns, detection method, and
//! firing policy (§4.6).

use regex::Regex;
use warden_types::Severity;

/// Which statistical method a metric uses to judge a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// Standard-deviation based z-score.
    Zscore,
    /// Median absolute deviation.
    Mad,
    /// Interquartile range.
    Iqr,
    /// Exponentially weighted moving average.
    Ewma,
}

/// Which side of the bounds counts as anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Only values above the upper bound.
    High,
    /// Only values below the lower bound.
    Low,
    /// Either side.
    Both,
}

/// Errors raised compiling a [`MetricConfig`] (§4.6 "Fails with").
#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    /// A configured regex failed to compile.
    #[error("metric {metric_id}: invalid {field} {pattern:?}: {source}")]
    InvalidPattern { metric_id: String, field: &'static str, pattern: String, #[source] source: regex::Error },
}

/// Static, compiled configuration for one tracked metric.
#[derive(Debug, Clone)]
pub struct MetricConfig {
    /// Unique metric identifier.
    pub id: String,
    /// Matches the log lines this metric is extracted from.
    pub metric_regex: Regex,
    /// Extracts the numeric sample; first capture group is parsed as `f64`.
    pub value_regex: Regex,
    /// Detection method.
    pub method: DetectionMethod,
    /// Multiplier applied to spread when computing bounds.
    pub sensitivity: f64,
    /// Maximum rolling window length.
    pub training_window_size: usize,
    /// Minimum samples required before detection begins.
    pub min_training_samples: usize,
    /// Which side of the bounds triggers a fire.
    pub direction: Direction,
    /// Minimum time between fires for this metric, in milliseconds.
    pub cooldown_ms: u64,
    /// Severity stamped onto incidents this metric creates.
    pub severity: Severity,
    /// EWMA smoothing factor, used only when `method == Ewma`.
    pub alpha: f64,
}

impl MetricConfig {
    /// Compiles a metric's patterns, failing fast at load time rather than
    /// on first ingestion (§4.6 "Fails with: `InvalidPattern`").
    #[allow(clippy::too_many_arguments)]
    pub fn compile(
        id: impl Into<String>,
        metric_pattern: &str,
        value_pattern: &str,
        method: DetectionMethod,
        sensitivity: f64,
        training_window_size: usize,
        min_training_samples: usize,
        direction: Direction,
        cooldown_ms: u64,
        severity: Severity,
        alpha: f64,
    ) -> Result<Self, MetricError> {
        let id = id.into();
        let metric_regex = Regex::new(metric_pattern)
            .map_err(|source| MetricError::InvalidPattern { metric_id: id.clone(), field: "metricRegex", pattern: metric_pattern.to_string(), source })?;
        let value_regex = Regex::new(value_pattern)
            .map_err(|source| MetricError::InvalidPattern { metric_id: id.clone(), field: "valueRegex", pattern: value_pattern.to_string(), source })?;
        Ok(Self { id, metric_regex, value_regex, method, sensitivity, training_window_size, min_training_samples, direction, cooldown_ms, severity, alpha })
    }

    /// Extracts a numeric sample from `line`, if it matches this metric's
    /// patterns and the captured text parses as a float (§4.6 "Ingestion").
    pub fn extract(&self, line: &str) -> Option<f64> {
        if !self.metric_regex.is_match(line) {
            return None;
        }
        let captures = self.value_regex.captures(line)?;
        let raw = captures.get(1)?.as_str();
        raw.trim().parse::<f64>().ok()
    }
}

impl DetectionMethod {
    /// The lowercase name used in `incident.created` context (§4.6 "Emission").
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Zscore => "zscore",
            DetectionMethod::Mad => "mad",
            DetectionMethod::Iqr => "iqr",
            DetectionMethod::Ewma => "ewma",
        }
    }
}

impl Direction {
    /// Whether `value` counts as anomalous given `lower`/`upper` bounds.
    pub fn is_anomaly(&self, value: f64, lower: f64, upper: f64) -> bool {
        match self {
            Direction::High => value > upper,
            Direction::Low => value < lower,
            Direction::Both => value > upper || value < lower,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric() -> MetricConfig {
        MetricConfig::compile("cpu", r"cpu_usage", r"cpu_usage=(\d+(?:\.\d+)?)", DetectionMethod::Zscore, 3.0, 100, 5, Direction::High, 60_000, Severity::Warning, 0.3).unwrap()
    }

    #[test]
    fn extract_parses_first_capture_group() {
        assert_eq!(metric().extract("host-1 cpu_usage=87.5 other=1"), Some(87.5));
    }

    #[test]
    fn extract_returns_none_when_line_does_not_match_metric_regex() {
        assert_eq!(metric().extract("unrelated line"), None);
    }

    #[test]
    fn extract_returns_none_when_capture_does_not_parse() {
        let m = MetricConfig::compile("cpu", r"cpu_usage", r"cpu_usage=(\w+)", DetectionMethod::Zscore, 3.0, 100, 5, Direction::High, 60_000, Severity::Warning, 0.3).unwrap();
        assert_eq!(m.extract("cpu_usage=notanumber"), None);
    }

    #[test]
    fn invalid_metric_regex_is_rejected_at_compile_time() {
        let result = MetricConfig::compile("cpu", "(", r"(\d+)", DetectionMethod::Zscore, 3.0, 100, 5, Direction::High, 60_000, Severity::Warning, 0.3);
        assert!(matches!(result, Err(MetricError::InvalidPattern { field: "metricRegex", .. })));
    }

    #[test]
    fn direction_high_only_fires_above_upper_bound() {
        assert!(Direction::High.is_anomaly(11.0, 0.0, 10.0));
        assert!(!Direction::High.is_anomaly(5.0, 0.0, 10.0));
        assert!(!Direction::High.is_anomaly(-5.0, 0.0, 10.0));
    }

    #[test]
    fn direction_both_fires_on_either_side() {
        assert!(Direction::Both.is_anomaly(11.0, 0.0, 10.0));
        assert!(Direction::Both.is_anomaly(-1.0, 0.0, 10.0));
        assert!(!Direction::Both.is_anomaly(5.0, 0.0, 10.0));
    }
}
