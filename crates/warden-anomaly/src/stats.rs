//! Small statistics helpers shared by the detection methods (§4.6).

/// Clamps a spread value away from zero, per §4.6's "effective spread"
/// column: values already safely above zero pass through unchanged; a
/// near-zero spread (which would blow up every deviation score) is treated
/// as `1.0` rather than the raw, barely-nonzero figure.
pub fn effective_spread(spread: f64) -> f64 {
    if spread < 1e-10 {
        1.0
    } else {
        spread
    }
}

/// Arithmetic mean.
pub fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation around `mean_val`.
pub fn stddev(xs: &[f64], mean_val: f64) -> f64 {
    let variance = xs.iter().map(|x| (x - mean_val).powi(2)).sum::<f64>() / xs.len() as f64;
    variance.sqrt()
}

/// Returns a new, ascending-sorted copy of `xs`.
pub fn sorted_copy(xs: &[f64]) -> Vec<f64> {
    let mut v = xs.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).expect("anomaly samples must not be NaN"));
    v
}

/// Median of an already-sorted slice (§4.6 "Quartile choice").
pub fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Median absolute deviation, scaled by the usual 1.4826 normal-consistency
/// constant.
pub fn mad(xs: &[f64], median_val: f64) -> f64 {
    let deviations: Vec<f64> = xs.iter().map(|x| (x - median_val).abs()).collect();
    1.4826 * median_of_sorted(&sorted_copy(&deviations))
}

/// First and third quartiles of an already-sorted slice (§4.6 "Quartile choice").
pub fn quartiles(sorted: &[f64]) -> (f64, f64) {
    let n = sorted.len();
    let q1_idx = ((0.25 * n as f64).floor() as usize).min(n - 1);
    let q3_idx = ((0.75 * n as f64).floor() as usize).min(n - 1);
    (sorted[q1_idx], sorted[q3_idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_length_is_middle_element() {
        assert_eq!(median_of_sorted(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn median_of_even_length_is_mean_of_middle_two() {
        assert_eq!(median_of_sorted(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn effective_spread_clamps_near_zero_to_one() {
        assert_eq!(effective_spread(0.0), 1.0);
        assert_eq!(effective_spread(5.0), 5.0);
    }

    #[test]
    fn quartiles_match_spec_formula() {
        let sorted = sorted_copy(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let (q1, q3) = quartiles(&sorted);
        assert_eq!(q1, sorted[2]);
        assert_eq!(q3, sorted[6]);
    }
}
