//! Statistics helpers with the pipeline's boundary contracts baked in.
//!
//! The extractor requires every aggregate to be finite: empty input yields 0,
//! variance and std-dev use the sample formula and are 0 below two values.

use statrs::statistics::Statistics;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.to_vec().mean()
}

/// Sample variance (n − 1). Fewer than two values yields 0.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.to_vec().variance()
}

/// Sample standard deviation. Fewer than two values yields 0.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.to_vec().std_dev()
}

/// Percentile by the ceiling-rank convention: `idx = ⌈p/100 · n⌉ − 1`,
/// clamped into `[0, n − 1]`, over the ascending sort.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(variance(&[5.0]), 0.0);
        assert_eq!(std_dev(&[5.0]), 0.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_sample_variance() {
        // Sample variance of {2, 4, 6} = 4
        assert!((variance(&[2.0, 4.0, 6.0]) - 4.0).abs() < 1e-12);
        assert!((std_dev(&[2.0, 4.0, 6.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ceiling_rank_percentile() {
        let values = [10.0, 20.0, 30.0, 40.0];
        // ⌈0.25·4⌉−1 = 0
        assert_eq!(percentile(&values, 25.0), 10.0);
        // ⌈0.50·4⌉−1 = 1
        assert_eq!(percentile(&values, 50.0), 20.0);
        // ⌈0.75·4⌉−1 = 2
        assert_eq!(percentile(&values, 75.0), 30.0);
        assert_eq!(percentile(&values, 100.0), 40.0);
        assert_eq!(percentile(&values, 0.0), 10.0);
    }

    #[test]
    fn test_percentile_unsorted_input() {
        let values = [30.0, 10.0, 40.0, 20.0];
        assert_eq!(percentile(&values, 50.0), 20.0);
    }
}
