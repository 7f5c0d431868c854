//! Maximum-entropy (multinomial logistic) model.
//!
//! Full-batch gradient descent from a zero init with light L2, deterministic
//! and cheap. Serves as the linear candidate in ensemble selection.

use serde::{Deserialize, Serialize};

const ITERATIONS: usize = 500;
const LEARNING_RATE: f64 = 0.5;
const L2: f64 = 1e-4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxEntModel {
    num_classes: usize,
    /// Per class: one weight per feature plus a trailing bias.
    weights: Vec<Vec<f64>>,
}

impl MaxEntModel {
    pub fn fit(rows: &[Vec<f32>], classes: &[usize], num_classes: usize) -> Self {
        let n = rows.len();
        let k = num_classes.max(1);
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut weights = vec![vec![0.0f64; width + 1]; k];

        if n == 0 {
            return Self {
                num_classes: k,
                weights,
            };
        }

        for _ in 0..ITERATIONS {
            let mut gradients = vec![vec![0.0f64; width + 1]; k];

            for (row, &class) in rows.iter().zip(classes) {
                let logits: Vec<f64> = weights.iter().map(|w| dot(w, row)).collect();
                let probs = softmax(&logits);

                for (c, gradient) in gradients.iter_mut().enumerate() {
                    let y = if c == class { 1.0 } else { 0.0 };
                    let err = probs[c] - y;
                    for (j, &v) in row.iter().enumerate() {
                        gradient[j] += err * v as f64;
                    }
                    gradient[width] += err;
                }
            }

            let scale = LEARNING_RATE / n as f64;
            for (w, gradient) in weights.iter_mut().zip(&gradients) {
                for (wj, &gj) in w.iter_mut().zip(gradient) {
                    *wj -= scale * gj + LEARNING_RATE * L2 * *wj;
                }
            }
        }

        Self {
            num_classes: k,
            weights,
        }
    }

    /// Raw per-class logits for one preprocessed row.
    pub fn predict_scores(&self, row: &[f32]) -> Vec<f64> {
        self.weights.iter().map(|w| dot(w, row)).collect()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

fn dot(weights: &[f64], row: &[f32]) -> f64 {
    let mut sum = weights[weights.len() - 1]; // bias
    for (w, &v) in weights.iter().zip(row) {
        sum += w * v as f64;
    }
    sum
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / logits.len().max(1) as f64; logits.len()]
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn argmax(scores: &[f64]) -> usize {
        scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_separates_two_classes() {
        let rows: Vec<Vec<f32>> = vec![
            vec![0.1, 0.2],
            vec![0.2, 0.1],
            vec![0.15, 0.15],
            vec![0.9, 0.8],
            vec![0.8, 0.9],
            vec![0.85, 0.85],
        ];
        let classes = vec![0, 0, 0, 1, 1, 1];
        let model = MaxEntModel::fit(&rows, &classes, 2);

        for (row, &class) in rows.iter().zip(&classes) {
            assert_eq!(argmax(&model.predict_scores(row)), class);
        }
    }

    #[test]
    fn test_deterministic() {
        let rows: Vec<Vec<f32>> = vec![vec![0.0], vec![1.0], vec![0.1], vec![0.9]];
        let classes = vec![0, 1, 0, 1];
        let a = MaxEntModel::fit(&rows, &classes, 2);
        let b = MaxEntModel::fit(&rows, &classes, 2);
        assert_eq!(a.predict_scores(&rows[0]), b.predict_scores(&rows[0]));
    }

    #[test]
    fn test_empty_fit_is_safe() {
        let model = MaxEntModel::fit(&[], &[], 3);
        assert_eq!(model.predict_scores(&[]).len(), 3);
    }
}
