//! The four detection methods of §4.6's method table, evaluated against a
//! snapshot of a metric's current window.

use std::collections::VecDeque;

use crate::metric::DetectionMethod;
use crate::stats::{effective_spread, mad, mean, median_of_sorted, quartiles, sorted_copy, stddev};

/// One method's verdict on a single sample, before the direction filter is
/// applied.
#[derive(Debug, Clone, Copy)]
pub struct DetectionResult {
    /// The sample being judged.
    pub value: f64,
    /// The method's notion of "normal" for this sample.
    pub expected: f64,
    /// How many effective-spread units away from `expected` the value is.
    pub deviation_score: f64,
    /// Lower anomaly bound.
    pub lower_bound: f64,
    /// Upper anomaly bound.
    pub upper_bound: f64,
}

/// Runs `method` against `window` (the state *before* this sample is
/// appended — §4.6 "Detect-then-record order") plus the running EWMA state.
pub fn detect(method: DetectionMethod, value: f64, window: &VecDeque<f64>, ewma_value: f64, ewma_variance: f64, sensitivity: f64) -> DetectionResult {
    let samples: Vec<f64> = window.iter().copied().collect();
    match method {
        DetectionMethod::Zscore => {
            let expected = mean(&samples);
            let spread = effective_spread(stddev(&samples, expected));
            DetectionResult {
                value,
                expected,
                deviation_score: (value - expected).abs() / spread,
                lower_bound: expected - sensitivity * spread,
                upper_bound: expected + sensitivity * spread,
            }
        }
        DetectionMethod::Mad => {
            let sorted = sorted_copy(&samples);
            let expected = median_of_sorted(&sorted);
            let spread = effective_spread(mad(&samples, expected));
            DetectionResult {
                value,
                expected,
                deviation_score: (value - expected).abs() / spread,
                lower_bound: expected - sensitivity * spread,
                upper_bound: expected + sensitivity * spread,
            }
        }
        DetectionMethod::Iqr => {
            let sorted = sorted_copy(&samples);
            let (q1, q3) = quartiles(&sorted);
            let spread = effective_spread(q3 - q1);
            let center = (q1 + q3) / 2.0;
            let deviation_score = if value >= center { ((value - q3) / spread).max(0.0) } else { ((q1 - value) / spread).max(0.0) };
            DetectionResult { value, expected: center, deviation_score, lower_bound: q1 - sensitivity * spread, upper_bound: q3 + sensitivity * spread }
        }
        DetectionMethod::Ewma => {
            let spread = effective_spread(ewma_variance.sqrt());
            DetectionResult {
                value,
                expected: ewma_value,
                deviation_score: (value - ewma_value).abs() / spread,
                lower_bound: ewma_value - sensitivity * spread,
                upper_bound: ewma_value + sensitivity * spread,
            }
        }
    }
}

/// Applies the EWMA recurrence for one new sample (§4.6 "EWMA update").
/// Returns the updated `(ewma_value, ewma_variance)`.
pub fn update_ewma(prev_value: Option<f64>, prev_variance: f64, alpha: f64, sample: f64) -> (f64, f64) {
    match prev_value {
        None => (sample, 0.0),
        Some(prev_ewma) => {
            let diff = sample - prev_ewma;
            let new_ewma = alpha * sample + (1.0 - alpha) * prev_ewma;
            let new_variance = (1.0 - alpha) * (prev_variance + alpha * diff * diff);
            (new_ewma, new_variance)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(values: &[f64]) -> VecDeque<f64> {
        values.iter().copied().collect()
    }

    #[test]
    fn zscore_flags_value_far_from_mean() {
        let w = window(&[10.0, 10.0, 10.0, 10.0, 10.0]);
        let result = detect(DetectionMethod::Zscore, 100.0, &w, 0.0, 0.0, 3.0);
        assert_eq!(result.expected, 10.0);
        assert!(result.value > result.upper_bound);
    }

    #[test]
    fn iqr_deviation_is_nonnegative_on_both_sides() {
        let w = window(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let above = detect(DetectionMethod::Iqr, 100.0, &w, 0.0, 0.0, 1.5);
        let below = detect(DetectionMethod::Iqr, -100.0, &w, 0.0, 0.0, 1.5);
        assert!(above.deviation_score >= 0.0);
        assert!(below.deviation_score >= 0.0);
    }

    #[test]
    fn ewma_update_initializes_on_first_sample() {
        let (ewma, variance) = update_ewma(None, 0.0, 0.3, 42.0);
        assert_eq!(ewma, 42.0);
        assert_eq!(variance, 0.0);
    }

    #[test]
    fn ewma_update_follows_recurrence_on_subsequent_samples() {
        let (ewma, variance) = update_ewma(Some(10.0), 0.0, 0.5, 20.0);
        assert_eq!(ewma, 15.0);
        assert_eq!(variance, 0.5 * (0.0 + 0.5 * 10.0 * 10.0));
    }
}
