//! Shared preprocessing for every learner: per-feature min–max scaling with
//! mean imputation for non-finite inputs. The fitted parameters travel inside
//! the model artifact so trainer and predictor apply the same transform.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaling {
    mins: Vec<f32>,
    maxs: Vec<f32>,
    means: Vec<f32>,
}

impl FeatureScaling {
    /// Fit scaling parameters over the training rows. Non-finite entries are
    /// ignored while fitting; a feature with no finite values scales to 0.
    pub fn fit(rows: &[Vec<f32>]) -> Self {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut mins = vec![f32::INFINITY; width];
        let mut maxs = vec![f32::NEG_INFINITY; width];
        let mut sums = vec![0.0f64; width];
        let mut counts = vec![0usize; width];

        for row in rows {
            for (j, &v) in row.iter().enumerate() {
                if !v.is_finite() {
                    continue;
                }
                mins[j] = mins[j].min(v);
                maxs[j] = maxs[j].max(v);
                sums[j] += v as f64;
                counts[j] += 1;
            }
        }

        let means = (0..width)
            .map(|j| {
                if counts[j] > 0 {
                    (sums[j] / counts[j] as f64) as f32
                } else {
                    0.0
                }
            })
            .collect();

        for j in 0..width {
            if !mins[j].is_finite() {
                mins[j] = 0.0;
                maxs[j] = 0.0;
            }
        }

        Self { mins, maxs, means }
    }

    /// Impute and scale one row into [0, 1] per feature. Constant features
    /// map to 0.
    pub fn transform(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .enumerate()
            .map(|(j, &v)| {
                let v = if v.is_finite() { v } else { self.means[j] };
                let range = self.maxs[j] - self.mins[j];
                if range > 0.0 {
                    (v - self.mins[j]) / range
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn transform_all(&self, rows: &[Vec<f32>]) -> Vec<Vec<f32>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
