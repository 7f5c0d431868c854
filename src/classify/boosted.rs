//! Multiclass gradient boosting over regression trees.
//!
//! One tree per class per round is fit to the softmax gradient residuals
//! `y − p`; leaves take the multiclass Newton step. Raw per-class scores come
//! out un-normalized; the calibrator turns them into probabilities.

use super::tree::RegressionTree;
use serde::{Deserialize, Serialize};

/// Hyperparameters for one boosted ensemble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoostedConfig {
    pub iterations: usize,
    pub max_leaves: usize,
    pub learning_rate: f64,
}

impl BoostedConfig {
    /// Deeper, slower-learning candidate.
    pub fn deep() -> Self {
        Self {
            iterations: 300,
            max_leaves: 31,
            learning_rate: 0.05,
        }
    }

    /// Wider, faster-learning candidate.
    pub fn wide() -> Self {
        Self {
            iterations: 200,
            max_leaves: 63,
            learning_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    num_classes: usize,
    learning_rate: f64,
    /// `rounds[r][k]` is round r's tree for class k.
    rounds: Vec<Vec<RegressionTree>>,
}

impl GradientBoostedTrees {
    /// Fit on preprocessed rows with dense integer class labels in
    /// `0..num_classes`.
    pub fn fit(
        rows: &[Vec<f32>],
        classes: &[usize],
        num_classes: usize,
        config: &BoostedConfig,
    ) -> Self {
        let n = rows.len();
        let k = num_classes.max(1);
        let mut scores = vec![vec![0.0f64; k]; n];
        let mut rounds = Vec::with_capacity(config.iterations);

        for _ in 0..config.iterations {
            let probs: Vec<Vec<f64>> = scores.iter().map(|s| softmax_row(s)).collect();

            // Converged: every sample already sits on its own class.
            let worst = (0..n)
                .map(|i| 1.0 - probs[i][classes[i]])
                .fold(0.0f64, f64::max);
            if worst < 1e-3 {
                break;
            }

            let mut round_trees = Vec::with_capacity(k);
            for class in 0..k {
                let residuals: Vec<f64> = (0..n)
                    .map(|i| {
                        let y = if classes[i] == class { 1.0 } else { 0.0 };
                        y - probs[i][class]
                    })
                    .collect();

                let tree = RegressionTree::fit(rows, &residuals, config.max_leaves, |samples| {
                    newton_leaf(&residuals, samples, k)
                });

                for (i, row) in rows.iter().enumerate() {
                    scores[i][class] += config.learning_rate * tree.predict(row);
                }
                round_trees.push(tree);
            }
            rounds.push(round_trees);
        }

        Self {
            num_classes: k,
            learning_rate: config.learning_rate,
            rounds,
        }
    }

    /// Raw per-class scores for one preprocessed row.
    pub fn predict_scores(&self, row: &[f32]) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.num_classes];
        for round in &self.rounds {
            for (class, tree) in round.iter().enumerate() {
                scores[class] += self.learning_rate * tree.predict(row);
            }
        }
        scores
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Newton step for the multiclass softmax objective:
/// `((K−1)/K) · Σr / (Σ|r|(1−|r|) + ε)`.
fn newton_leaf(residuals: &[f64], samples: &[usize], num_classes: usize) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&i| residuals[i]).sum();
    let hess: f64 = samples
        .iter()
        .map(|&i| residuals[i].abs() * (1.0 - residuals[i].abs()))
        .sum();
    let k = num_classes.max(2) as f64;
    ((k - 1.0) / k) * sum / (hess + 1e-9)
}

fn softmax_row(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / scores.len().max(1) as f64; scores.len()]
    }
}

// =============================================================================
// Tests
// =============================================================================
