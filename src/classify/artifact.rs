//! The trained model artifact.
//!
//! `labels` is the canonical order: index i of every score vector IS subject
//! `labels[i]`. Nothing else (not the store, not alphabetical order) may be
//! used to reassociate scores with subjects. On disk the artifact is bincode,
//! written to a temp file and atomically renamed into place.

use super::boosted::GradientBoostedTrees;
use super::linear::MaxEntModel;
use super::pipeline::FeatureScaling;
use crate::error::{ProfilerError, Result};
use crate::features::schema::{FeatureVector, FEATURE_SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedModel {
    Boosted(GradientBoostedTrees),
    MaxEnt(MaxEntModel),
}

impl FittedModel {
    pub fn predict_scores(&self, row: &[f32]) -> Vec<f64> {
        match self {
            FittedModel::Boosted(model) => model.predict_scores(row),
            FittedModel::MaxEnt(model) => model.predict_scores(row),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    /// Canonical label order for score-vector positions.
    pub labels: Vec<String>,
    pub scaling: FeatureScaling,
    pub model: FittedModel,
    pub algorithm: String,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn new(
        labels: Vec<String>,
        scaling: FeatureScaling,
        model: FittedModel,
        algorithm: &str,
    ) -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION,
            labels,
            scaling,
            model,
            algorithm: algorithm.to_string(),
            trained_at: Utc::now(),
        }
    }

    /// Raw per-class scores for a feature vector, in `labels` order.
    pub fn predict_raw(&self, vector: &FeatureVector) -> Result<Vec<f64>> {
        if vector.values.len() != self.scaling.width() {
            return Err(ProfilerError::Computation(format!(
                "feature width {} does not match artifact width {}",
                vector.values.len(),
                self.scaling.width()
            )));
        }
        let row = self.scaling.transform(&vector.values);
        Ok(self.model.predict_scores(&row))
    }

    /// Serialize to `path`, replacing any previous artifact atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProfilerError::Persistence(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load from `path`, rejecting artifacts built against a different
    /// feature schema.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let (artifact, _): (ModelArtifact, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| ProfilerError::Persistence(e.to_string()))?;

        if artifact.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ProfilerError::SchemaMismatch {
                expected: FEATURE_SCHEMA_VERSION,
                found: artifact.schema_version,
            });
        }
        Ok(artifact)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_artifact() -> ModelArtifact {
        let rows = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let scaling = FeatureScaling::fit(&rows);
        let model = MaxEntModel::fit(&scaling.transform_all(&rows), &[0, 1], 2);
        ModelArtifact::new(
            vec!["alice".into(), "bob".into()],
            scaling,
            FittedModel::MaxEnt(model),
            "max-entropy",
        )
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.kpm");

        let artifact = small_artifact();
        artifact.save(&path).unwrap();

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.labels, artifact.labels);
        assert_eq!(loaded.schema_version, FEATURE_SCHEMA_VERSION);
        assert_eq!(loaded.algorithm, "max-entropy");
    }

    #[test]
    fn test_schema_version_gate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.kpm");

        let mut artifact = small_artifact();
        artifact.schema_version = FEATURE_SCHEMA_VERSION + 1;
        artifact.save(&path).unwrap();

        match ModelArtifact::load(&path) {
            Err(ProfilerError::SchemaMismatch { expected, found }) => {
                assert_eq!(expected, FEATURE_SCHEMA_VERSION);
                assert_eq!(found, FEATURE_SCHEMA_VERSION + 1);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_width_mismatch_is_an_error() {
        let artifact = small_artifact();
        let vector = FeatureVector {
            label: "x".into(),
            values: vec![0.0; 3],
        };
        assert!(artifact.predict_raw(&vector).is_err());
    }
}
