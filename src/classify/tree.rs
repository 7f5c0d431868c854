//! Regression trees for the boosting ensemble.
//!
//! Best-first growth: the frontier leaf with the largest variance reduction
//! is split next, until the leaf budget is exhausted or no split helps.
//! Fitting is deterministic for a fixed input order.

use serde::{Deserialize, Serialize};

/// Children must keep at least this many samples.
const MIN_LEAF_SAMPLES: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

struct FrontierLeaf {
    node_index: usize,
    samples: Vec<usize>,
    split: Option<CandidateSplit>,
}

struct CandidateSplit {
    feature: usize,
    threshold: f32,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl RegressionTree {
    /// Fit a tree of at most `max_leaves` leaves to `targets`, with leaf
    /// values produced by `leaf_value` over the samples that reach the leaf.
    pub fn fit<F>(
        rows: &[Vec<f32>],
        targets: &[f64],
        max_leaves: usize,
        leaf_value: F,
    ) -> Self
    where
        F: Fn(&[usize]) -> f64,
    {
        let all: Vec<usize> = (0..rows.len()).collect();
        let mut nodes = vec![TreeNode::Leaf {
            value: leaf_value(&all),
        }];

        let mut root = FrontierLeaf {
            node_index: 0,
            samples: all,
            split: None,
        };
        root.split = best_split(rows, targets, &root.samples);
        let mut frontier = vec![root];

        let mut leaves = 1;
        while leaves < max_leaves {
            // Expand the frontier leaf with the best gain.
            let best = frontier
                .iter()
                .enumerate()
                .filter(|(_, l)| l.split.is_some())
                .max_by(|(_, a), (_, b)| {
                    let ga = a.split.as_ref().map(|s| s.gain).unwrap_or(0.0);
                    let gb = b.split.as_ref().map(|s| s.gain).unwrap_or(0.0);
                    ga.partial_cmp(&gb).unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);

            let Some(best_idx) = best else {
                break;
            };

            let leaf = frontier.swap_remove(best_idx);
            let Some(split) = leaf.split else {
                break;
            };

            let left_index = nodes.len();
            let right_index = nodes.len() + 1;
            nodes.push(TreeNode::Leaf {
                value: leaf_value(&split.left),
            });
            nodes.push(TreeNode::Leaf {
                value: leaf_value(&split.right),
            });
            nodes[leaf.node_index] = TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: left_index,
                right: right_index,
            };

            let mut left_leaf = FrontierLeaf {
                node_index: left_index,
                samples: split.left,
                split: None,
            };
            left_leaf.split = best_split(rows, targets, &left_leaf.samples);
            let mut right_leaf = FrontierLeaf {
                node_index: right_index,
                samples: split.right,
                split: None,
            };
            right_leaf.split = best_split(rows, targets, &right_leaf.samples);
            frontier.push(left_leaf);
            frontier.push(right_leaf);

            leaves += 1;
        }

        Self { nodes }
    }

    /// Predicted value for one row.
    pub fn predict(&self, row: &[f32]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }
}

/// Best variance-reduction split over all features, or `None` when no split
/// leaves both children with enough samples and positive gain.
fn best_split(rows: &[Vec<f32>], targets: &[f64], samples: &[usize]) -> Option<CandidateSplit> {
    if samples.len() < 2 * MIN_LEAF_SAMPLES {
        return None;
    }
    let width = rows[samples[0]].len();

    let total_sum: f64 = samples.iter().map(|&i| targets[i]).sum();
    let total_sq: f64 = samples.iter().map(|&i| targets[i] * targets[i]).sum();
    let n = samples.len() as f64;
    let parent_sse = total_sq - total_sum * total_sum / n;

    let mut best: Option<(usize, f32, f64)> = None;

    let mut order: Vec<usize> = samples.to_vec();
    for feature in 0..width {
        order.sort_by(|&a, &b| {
            rows[a][feature]
                .partial_cmp(&rows[b][feature])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for split_at in 1..order.len() {
            let prev = order[split_at - 1];
            left_sum += targets[prev];
            left_sq += targets[prev] * targets[prev];

            let lo = rows[prev][feature];
            let hi = rows[order[split_at]][feature];
            if lo == hi {
                continue;
            }
            if split_at < MIN_LEAF_SAMPLES || order.len() - split_at < MIN_LEAF_SAMPLES {
                continue;
            }

            let ln = split_at as f64;
            let rn = n - ln;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / ln) + (right_sq - right_sum * right_sum / rn);
            let gain = parent_sse - sse;

            if gain > 1e-12 && best.map(|(_, _, g)| gain > g).unwrap_or(true) {
                best = Some((feature, (lo + hi) / 2.0, gain));
            }
        }
    }

    best.map(|(feature, threshold, gain)| {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for &i in samples {
            if rows[i][feature] <= threshold {
                left.push(i);
            } else {
                right.push(i);
            }
        }
        CandidateSplit {
            feature,
            threshold,
            gain,
            left,
            right,
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_leaf(targets: &[f64]) -> impl Fn(&[usize]) -> f64 + '_ {
        move |samples| {
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().map(|&i| targets[i]).sum::<f64>() / samples.len() as f64
            }
        }
    }

    #[test]
    fn test_learns_a_step_function() {
        let rows: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32]).collect();
        let targets: Vec<f64> = (0..10).map(|i| if i < 5 { -1.0 } else { 1.0 }).collect();

        let tree = RegressionTree::fit(&rows, &targets, 4, mean_leaf(&targets));
        assert!(tree.predict(&[1.0]) < 0.0);
        assert!(tree.predict(&[8.0]) > 0.0);
    }

    #[test]
    fn test_respects_leaf_budget() {
        let rows: Vec<Vec<f32>> = (0..40).map(|i| vec![i as f32, (i * 7 % 13) as f32]).collect();
        let targets: Vec<f64> = (0..40).map(|i| (i as f64).sin()).collect();

        let tree = RegressionTree::fit(&rows, &targets, 6, mean_leaf(&targets));
        assert!(tree.leaf_count() <= 6);
    }

    #[test]
    fn test_constant_targets_stay_single_leaf() {
        let rows: Vec<Vec<f32>> = (0..8).map(|i| vec![i as f32]).collect();
        let targets = vec![3.0; 8];

        let tree = RegressionTree::fit(&rows, &targets, 8, mean_leaf(&targets));
        assert_eq!(tree.leaf_count(), 1);
        assert!((tree.predict(&[4.0]) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic() {
        let rows: Vec<Vec<f32>> = (0..20).map(|i| vec![(i * 3 % 7) as f32, i as f32]).collect();
        let targets: Vec<f64> = (0..20).map(|i| (i % 4) as f64).collect();

        let a = RegressionTree::fit(&rows, &targets, 5, mean_leaf(&targets));
        let b = RegressionTree::fit(&rows, &targets, 5, mean_leaf(&targets));
        for i in 0..20 {
            assert_eq!(a.predict(&rows[i]), b.predict(&rows[i]));
        }
    }
}
