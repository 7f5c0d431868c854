//! Calibration of raw classifier scores into a probability distribution
//! with quality signals.
//!
//! Temperature-scaled softmax, normalized entropy, top-two margin, and the
//! rule-based confidence adjustment. A numerically degenerate softmax falls
//! back to the uniform distribution rather than failing the request.

use log::warn;
use serde::{Deserialize, Serialize};

/// A single calibrated prediction.
///
/// `probabilities[i]` belongs to `labels[i]`; the label order comes from the
/// model artifact and must not be re-derived elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_label: String,
    pub probabilities: Vec<f32>,
    pub labels: Vec<String>,
    /// Shannon entropy normalized by log(|labels|): 0 certain, 1 uniform.
    pub entropy: f64,
    /// Gap between the two largest probabilities.
    pub top_two_margin: f64,
    /// Top probability after the quality modifiers, in [0, 1].
    pub adjusted_confidence: f64,
}

/// Temperature-scaled softmax. Non-positive temperature is treated as 1;
/// underflow, overflow or an all-zero sum yields the uniform distribution.
pub fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let tau = if temperature > 0.0 { temperature } else { 1.0 };

    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&s| ((s - max) / tau).exp()).collect();
    let sum: f64 = exps.iter().sum();

    if !sum.is_finite() || sum <= 0.0 || exps.iter().any(|e| !e.is_finite()) {
        warn!("degenerate softmax over {} scores, using uniform", scores.len());
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    exps.iter().map(|&e| e / sum).collect()
}

/// Shannon entropy of `probs` normalized into [0, 1]. One or zero classes
/// carry no uncertainty.
pub fn normalized_entropy(probs: &[f64]) -> f64 {
    if probs.len() <= 1 {
        return 0.0;
    }
    let raw: f64 = probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum();
    (raw / (probs.len() as f64).ln()).clamp(0.0, 1.0)
}

/// Difference between the largest and second-largest probability; 1 when
/// there are fewer than two classes.
pub fn top_two_margin(probs: &[f64]) -> f64 {
    if probs.len() < 2 {
        return 1.0;
    }
    let mut sorted = probs.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    (sorted[0] - sorted[1]).clamp(0.0, 1.0)
}

/// Apply the quality modifiers to the top probability, in order.
pub fn adjust_confidence(top_probability: f64, entropy: f64, margin: f64) -> f64 {
    let mut confidence = top_probability;

    if entropy > 0.70 {
        confidence *= 0.85;
    } else if entropy > 0.50 {
        confidence *= 0.92;
    }

    if margin < 0.10 {
        confidence *= 0.80;
    } else if margin < 0.20 {
        confidence *= 0.90;
    }

    if entropy < 0.30 && margin > 0.40 {
        confidence = (confidence * 1.05).min(1.0);
    }

    confidence.clamp(0.0, 1.0)
}

/// Calibrate raw scores into a full prediction result.
pub fn calibrate(labels: &[String], raw_scores: &[f64], temperature: f64) -> PredictionResult {
    let probs = softmax(raw_scores, temperature);
    let entropy = normalized_entropy(&probs);
    let margin = top_two_margin(&probs);

    let (top_index, top_probability) = probs
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, &p)| (i, p))
        .unwrap_or((0, 0.0));

    let predicted_label = labels
        .get(top_index)
        .cloned()
        .unwrap_or_else(|| crate::features::UNKNOWN_LABEL.to_string());

    PredictionResult {
        predicted_label,
        probabilities: probs.iter().map(|&p| p as f32).collect(),
        labels: labels.to_vec(),
        entropy,
        top_two_margin: margin,
        adjusted_confidence: adjust_confidence(top_probability, entropy, margin),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0], 1.0);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(probs.iter().all(|&p| p >= 0.0));
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_idempotent_on_log_probs() {
        // softmax(ln p) at τ = 1 reproduces p.
        let original: [f64; 3] = [0.6, 0.3, 0.1];
        let logs: Vec<f64> = original.iter().map(|p| p.ln()).collect();
        let probs = softmax(&logs, 1.0);
        for (a, b) in probs.iter().zip(&original) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_softmax_temperature() {
        let sharp = softmax(&[1.0, 2.0], 0.5);
        let flat = softmax(&[1.0, 2.0], 2.0);
        assert!(sharp[1] > flat[1]);
    }

    #[test]
    fn test_softmax_degenerate_falls_back_to_uniform() {
        let probs = softmax(&[f64::NAN, 1.0, 2.0], 1.0);
        assert_eq!(probs, vec![1.0 / 3.0; 3]);
    }

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(normalized_entropy(&[1.0]), 0.0);
        assert!((normalized_entropy(&[0.25; 4]) - 1.0).abs() < 1e-9);
        assert!(normalized_entropy(&[0.99, 0.01]) < 0.1);
    }

    #[test]
    fn test_top_two_margin() {
        assert_eq!(top_two_margin(&[1.0]), 1.0);
        assert!((top_two_margin(&[0.7, 0.2, 0.1]) - 0.5).abs() < 1e-9);
        assert!((top_two_margin(&[0.5, 0.5]) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_modifiers() {
        // High entropy: ×0.85
        assert!((adjust_confidence(0.5, 0.8, 0.3) - 0.5 * 0.85).abs() < 1e-9);
        // Mid entropy and thin margin stack: ×0.92 ×0.80
        assert!((adjust_confidence(0.5, 0.6, 0.05) - 0.5 * 0.92 * 0.80).abs() < 1e-9);
        // Confident and separated: ×1.05
        assert!((adjust_confidence(0.8, 0.1, 0.5) - 0.8 * 1.05).abs() < 1e-9);
        // Boost clamps at 1.
        assert_eq!(adjust_confidence(0.99, 0.1, 0.5), 1.0);
    }

    #[test]
    fn test_calibrate_full_result() {
        let labels = vec!["alice".to_string(), "bob".to_string()];
        let result = calibrate(&labels, &[3.0, 1.0], 1.0);
        assert_eq!(result.predicted_label, "alice");
        assert_eq!(result.labels, labels);
        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(result.adjusted_confidence > 0.0 && result.adjusted_confidence <= 1.0);
    }
}
