//! Training orchestration: dataset assembly with augmentation, data-size
//! dependent model selection, evaluation metrics, and the refit that
//! produces the publishable artifact.

use crate::calibrate;
use crate::classify::{
    BoostedConfig, FeatureScaling, FittedModel, GradientBoostedTrees, MaxEntModel, ModelArtifact,
};
use crate::config::TrainingConfig;
use crate::error::{ProfilerError, Result};
use crate::events::normalize_events;
use crate::features::schema::{IDX_MEAN_DWELL, IDX_MEAN_FLIGHT, IDX_TYPING_SPEED};
use crate::features::{extract, FeatureVector, FEATURE_COUNT};
use crate::store::TrainingSession;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Fewest vectors a label needs to stay in the dataset.
const MIN_VECTORS_PER_LABEL: usize = 2;
/// Fewest vectors overall for a training run to proceed.
const MIN_TOTAL_VECTORS: usize = 5;
/// Dataset size that enables ensemble selection.
const ENSEMBLE_MIN_VECTORS: usize = 30;
/// Dataset size that enables cross-validation.
const CV_MIN_VECTORS: usize = 20;
/// Distinct labels required for ensemble selection or cross-validation.
const MIN_LABELS_FOR_SELECTION: usize = 3;

/// Metrics record persisted next to the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingMetrics {
    pub micro_accuracy: f64,
    pub macro_accuracy: f64,
    pub log_loss: f64,
    pub log_loss_reduction: f64,
    pub total_samples: usize,
    pub unique_labels: usize,
    pub feature_count: usize,
    pub algorithm: String,
    pub trained_at: DateTime<Utc>,
    pub samples_per_user: BTreeMap<String, usize>,
}

impl TrainingMetrics {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// A completed training run.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub metrics: TrainingMetrics,
}

/// Run a full training pass over the persisted labeled sessions.
pub fn train(sessions: &[TrainingSession], config: &TrainingConfig) -> Result<TrainingOutcome> {
    let vectors = build_dataset(sessions, config);
    let vectors = enforce_label_minimums(vectors);

    if vectors.len() < MIN_TOTAL_VECTORS {
        return Err(ProfilerError::InsufficientData(format!(
            "{} valid vectors after filtering, need at least {MIN_TOTAL_VECTORS}",
            vectors.len()
        )));
    }

    // Canonical label order for the artifact: sorted distinct labels.
    let mut labels: Vec<String> = vectors.iter().map(|v| v.label.clone()).collect();
    labels.sort();
    labels.dedup();
    let label_index: HashMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();

    let rows: Vec<Vec<f32>> = vectors.iter().map(|v| v.values.clone()).collect();
    let classes: Vec<usize> = vectors
        .iter()
        .map(|v| label_index[v.label.as_str()])
        .collect();

    let scaling = FeatureScaling::fit(&rows);
    let scaled = scaling.transform_all(&rows);
    let num_classes = labels.len();

    let (candidate, evaluation) = if vectors.len() >= ENSEMBLE_MIN_VECTORS
        && num_classes >= MIN_LABELS_FOR_SELECTION
    {
        select_by_ensemble(&scaled, &classes, num_classes, config)
    } else if vectors.len() >= CV_MIN_VECTORS && num_classes >= MIN_LABELS_FOR_SELECTION {
        cross_validate(&scaled, &classes, num_classes, config)
    } else {
        single_split(&scaled, &classes, num_classes, Candidate::BoostedDeep, config)
    };

    info!(
        "training: {} vectors, {} labels, chose {} (micro {:.3}, macro {:.3})",
        vectors.len(),
        num_classes,
        candidate.name(),
        evaluation.micro_accuracy,
        evaluation.macro_accuracy
    );

    // Refit the chosen candidate on the full dataset for the live artifact.
    let model = candidate.fit(&scaled, &classes, num_classes);
    let artifact = ModelArtifact::new(labels.clone(), scaling, model, candidate.name());

    let mut samples_per_user = BTreeMap::new();
    for vector in &vectors {
        *samples_per_user.entry(vector.label.clone()).or_insert(0) += 1;
    }

    let metrics = TrainingMetrics {
        micro_accuracy: evaluation.micro_accuracy,
        macro_accuracy: evaluation.macro_accuracy,
        log_loss: evaluation.log_loss,
        log_loss_reduction: evaluation.log_loss_reduction,
        total_samples: vectors.len(),
        unique_labels: num_classes,
        feature_count: FEATURE_COUNT,
        algorithm: candidate.name().to_string(),
        trained_at: artifact.trained_at,
        samples_per_user,
    };

    Ok(TrainingOutcome { artifact, metrics })
}

// =============================================================================
// Dataset assembly
// =============================================================================

/// Extract one vector per session plus sliding-window augmentations for
/// long sessions. Vectors failing the validity gate are dropped.
fn build_dataset(sessions: &[TrainingSession], config: &TrainingConfig) -> Vec<FeatureVector> {
    let mut vectors = Vec::new();

    for session in sessions {
        let events = normalize_events(&session.events);
        if events.len() < config.min_training_events {
            warn!(
                "session {}: {} events, below the {} training minimum",
                session.id,
                events.len(),
                config.min_training_events
            );
            continue;
        }

        let full = extract(&events, Some(&session.label));
        if passes_validity_gate(&full) {
            vectors.push(full);
        } else {
            warn!("session {}: degenerate full-session vector dropped", session.id);
        }

        if events.len() < config.min_events_to_augment {
            continue;
        }

        let n = events.len();
        let window = (config.window_fraction * n as f64).floor() as usize;
        let step = ((config.step_fraction * n as f64).floor() as usize).max(1);
        if window < config.min_window_events {
            continue;
        }

        let mut start = 0;
        while start + window <= n {
            let slice = &events[start..start + window];
            let vector = extract(slice, Some(&session.label));
            if passes_validity_gate(&vector) {
                vectors.push(vector);
            }
            start += step;
        }
    }

    vectors
}

fn passes_validity_gate(vector: &FeatureVector) -> bool {
    vector.is_finite()
        && vector.values[IDX_MEAN_DWELL] > 0.0
        && vector.values[IDX_MEAN_FLIGHT] > 0.0
        && vector.values[IDX_TYPING_SPEED] > 0.0
}

/// Drop vectors whose label has too few accepted vectors.
fn enforce_label_minimums(vectors: Vec<FeatureVector>) -> Vec<FeatureVector> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for vector in &vectors {
        *counts.entry(vector.label.clone()).or_insert(0) += 1;
    }
    vectors
        .into_iter()
        .filter(|v| counts[&v.label] >= MIN_VECTORS_PER_LABEL)
        .collect()
}

// =============================================================================
// Model selection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    BoostedDeep,
    BoostedWide,
    MaxEnt,
}

impl Candidate {
    fn name(self) -> &'static str {
        match self {
            Candidate::BoostedDeep => "boosted-deep",
            Candidate::BoostedWide => "boosted-wide",
            Candidate::MaxEnt => "max-entropy",
        }
    }

    fn fit(self, rows: &[Vec<f32>], classes: &[usize], num_classes: usize) -> FittedModel {
        match self {
            Candidate::BoostedDeep => FittedModel::Boosted(GradientBoostedTrees::fit(
                rows,
                classes,
                num_classes,
                &BoostedConfig::deep(),
            )),
            Candidate::BoostedWide => FittedModel::Boosted(GradientBoostedTrees::fit(
                rows,
                classes,
                num_classes,
                &BoostedConfig::wide(),
            )),
            Candidate::MaxEnt => {
                FittedModel::MaxEnt(MaxEntModel::fit(rows, classes, num_classes))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Evaluation {
    micro_accuracy: f64,
    macro_accuracy: f64,
    log_loss: f64,
    log_loss_reduction: f64,
}

/// Fit the three candidates on a held-out split and keep the one with the
/// best blended accuracy.
fn select_by_ensemble(
    rows: &[Vec<f32>],
    classes: &[usize],
    num_classes: usize,
    config: &TrainingConfig,
) -> (Candidate, Evaluation) {
    let (train_idx, test_idx) = holdout_split(rows.len(), config);

    let try_candidate = |candidate: Candidate| -> (Candidate, Evaluation, f64) {
        let model = candidate.fit(
            &gather(rows, &train_idx),
            &gather_classes(classes, &train_idx),
            num_classes,
        );
        let evaluation = evaluate(&model, rows, classes, &test_idx, num_classes);
        let score = 0.6 * evaluation.macro_accuracy + 0.4 * evaluation.micro_accuracy;
        info!(
            "candidate {}: micro {:.3} macro {:.3} blended {:.3}",
            candidate.name(),
            evaluation.micro_accuracy,
            evaluation.macro_accuracy,
            score
        );
        (candidate, evaluation, score)
    };

    let mut best = try_candidate(Candidate::BoostedDeep);
    for candidate in [Candidate::BoostedWide, Candidate::MaxEnt] {
        let contender = try_candidate(candidate);
        if contender.2 > best.2 {
            best = contender;
        }
    }

    (best.0, best.1)
}

/// K-fold cross-validation of the deep boosted pipeline; fold metrics are
/// averaged.
fn cross_validate(
    rows: &[Vec<f32>],
    classes: &[usize],
    num_classes: usize,
    config: &TrainingConfig,
) -> (Candidate, Evaluation) {
    let folds = config.cv_folds.max(2).min(rows.len());
    let mut order: Vec<usize> = (0..rows.len()).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    order.shuffle(&mut rng);

    let mut sums = Evaluation {
        micro_accuracy: 0.0,
        macro_accuracy: 0.0,
        log_loss: 0.0,
        log_loss_reduction: 0.0,
    };

    for fold in 0..folds {
        let test_idx: Vec<usize> = order
            .iter()
            .enumerate()
            .filter(|(i, _)| i % folds == fold)
            .map(|(_, &idx)| idx)
            .collect();
        let train_idx: Vec<usize> = order
            .iter()
            .enumerate()
            .filter(|(i, _)| i % folds != fold)
            .map(|(_, &idx)| idx)
            .collect();

        let model = Candidate::BoostedDeep.fit(
            &gather(rows, &train_idx),
            &gather_classes(classes, &train_idx),
            num_classes,
        );
        let evaluation = evaluate(&model, rows, classes, &test_idx, num_classes);
        sums.micro_accuracy += evaluation.micro_accuracy;
        sums.macro_accuracy += evaluation.macro_accuracy;
        sums.log_loss += evaluation.log_loss;
        sums.log_loss_reduction += evaluation.log_loss_reduction;
    }

    let n = folds as f64;
    (
        Candidate::BoostedDeep,
        Evaluation {
            micro_accuracy: sums.micro_accuracy / n,
            macro_accuracy: sums.macro_accuracy / n,
            log_loss: sums.log_loss / n,
            log_loss_reduction: sums.log_loss_reduction / n,
        },
    )
}

/// Single held-out split of the given candidate.
fn single_split(
    rows: &[Vec<f32>],
    classes: &[usize],
    num_classes: usize,
    candidate: Candidate,
    config: &TrainingConfig,
) -> (Candidate, Evaluation) {
    let (train_idx, test_idx) = holdout_split(rows.len(), config);
    let model = candidate.fit(
        &gather(rows, &train_idx),
        &gather_classes(classes, &train_idx),
        num_classes,
    );
    let evaluation = evaluate(&model, rows, classes, &test_idx, num_classes);
    (candidate, evaluation)
}

/// Seeded shuffle split. The test side always gets at least one sample.
fn holdout_split(n: usize, config: &TrainingConfig) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    order.shuffle(&mut rng);

    let test_count = ((n as f64 * config.holdout_fraction).round() as usize)
        .max(1)
        .min(n.saturating_sub(1));
    let test_idx = order[..test_count].to_vec();
    let train_idx = order[test_count..].to_vec();
    (train_idx, test_idx)
}

fn gather(rows: &[Vec<f32>], indices: &[usize]) -> Vec<Vec<f32>> {
    indices.iter().map(|&i| rows[i].clone()).collect()
}

fn gather_classes(classes: &[usize], indices: &[usize]) -> Vec<usize> {
    indices.iter().map(|&i| classes[i]).collect()
}

fn evaluate(
    model: &FittedModel,
    rows: &[Vec<f32>],
    classes: &[usize],
    test_idx: &[usize],
    num_classes: usize,
) -> Evaluation {
    if test_idx.is_empty() {
        return Evaluation {
            micro_accuracy: 0.0,
            macro_accuracy: 0.0,
            log_loss: 0.0,
            log_loss_reduction: 0.0,
        };
    }

    let mut correct = 0usize;
    let mut per_class_total = vec![0usize; num_classes];
    let mut per_class_correct = vec![0usize; num_classes];
    let mut log_loss_sum = 0.0;

    for &i in test_idx {
        let probs = calibrate::softmax(&model.predict_scores(&rows[i]), 1.0);
        let truth = classes[i];

        let predicted = probs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(c, _)| c)
            .unwrap_or(0);

        per_class_total[truth] += 1;
        if predicted == truth {
            correct += 1;
            per_class_correct[truth] += 1;
        }
        log_loss_sum -= probs.get(truth).copied().unwrap_or(0.0).max(1e-15).ln();
    }

    let n = test_idx.len() as f64;
    let micro_accuracy = correct as f64 / n;

    let mut recalls = Vec::new();
    for class in 0..num_classes {
        if per_class_total[class] > 0 {
            recalls.push(per_class_correct[class] as f64 / per_class_total[class] as f64);
        }
    }
    let macro_accuracy = if recalls.is_empty() {
        0.0
    } else {
        recalls.iter().sum::<f64>() / recalls.len() as f64
    };

    let log_loss = log_loss_sum / n;

    // Reduction relative to always predicting the test-set class priors.
    let prior_loss: f64 = per_class_total
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let freq = count as f64 / n;
            -freq * freq.ln()
        })
        .sum();
    let log_loss_reduction = if prior_loss > 0.0 {
        (prior_loss - log_loss) / prior_loss
    } else {
        0.0
    };

    Evaluation {
        micro_accuracy,
        macro_accuracy,
        log_loss,
        log_loss_reduction,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::KeystrokeEvent;
    use uuid::Uuid;

    /// A session typed with per-subject dwell and flight signatures.
    fn session(label: &str, dwell: i64, flight: i64, chars: usize) -> TrainingSession {
        let text = "the quick brown fox jumps over the lazy dog and then some more ";
        let mut events = Vec::new();
        let mut t = 0i64;
        for c in text.chars().cycle().take(chars) {
            let key = c.to_string();
            events.push(KeystrokeEvent::down(&key, t));
            events.push(KeystrokeEvent::up(&key, t + dwell));
            t += flight;
        }
        TrainingSession {
            id: Uuid::new_v4(),
            label: label.to_string(),
            platform: "test".to_string(),
            created_at: Utc::now(),
            events,
        }
    }

    fn two_subject_corpus() -> Vec<TrainingSession> {
        let mut sessions = Vec::new();
        for i in 0..3 {
            sessions.push(session("alice", 60 + i, 110 + i, 60));
            sessions.push(session("bob", 140 + i, 260 + i, 60));
        }
        sessions
    }

    #[test]
    fn test_insufficient_data() {
        let sessions = vec![session("alice", 80, 150, 12)];
        let err = train(&sessions, &TrainingConfig::default()).unwrap_err();
        assert!(matches!(err, ProfilerError::InsufficientData(_)));
    }

    #[test]
    fn test_below_label_minimum_is_insufficient() {
        // Labels below the per-label minimum are dropped entirely.
        let sessions = vec![session("alice", 80, 150, 60)];
        let config = TrainingConfig {
            min_events_to_augment: 1000,
            ..TrainingConfig::default()
        };
        let err = train(&sessions, &config).unwrap_err();
        assert!(matches!(err, ProfilerError::InsufficientData(_)));
    }

    #[test]
    fn test_train_two_subjects() {
        let outcome = train(&two_subject_corpus(), &TrainingConfig::default()).unwrap();
        assert_eq!(outcome.artifact.labels, vec!["alice", "bob"]);
        assert_eq!(outcome.metrics.unique_labels, 2);
        assert_eq!(outcome.metrics.feature_count, FEATURE_COUNT);
        assert!(outcome.metrics.total_samples >= MIN_TOTAL_VECTORS);
        assert_eq!(outcome.metrics.samples_per_user.len(), 2);
    }

    #[test]
    fn test_trained_model_separates_subjects() {
        let outcome = train(&two_subject_corpus(), &TrainingConfig::default()).unwrap();

        let probe = session("?", 60, 110, 60);
        let events = normalize_events(&probe.events);
        let vector = extract(&events, None);
        let scores = outcome.artifact.predict_raw(&vector).unwrap();
        let alice = outcome.artifact.labels.iter().position(|l| l == "alice").unwrap();
        let bob = outcome.artifact.labels.iter().position(|l| l == "bob").unwrap();
        assert!(scores[alice] > scores[bob]);
    }

    #[test]
    fn test_augmentation_multiplies_samples() {
        let sessions = vec![session("alice", 60, 110, 80), session("bob", 140, 260, 80)];
        let vectors = build_dataset(&sessions, &TrainingConfig::default());
        // Full vector plus sliding windows for each 80-event session.
        assert!(vectors.len() > 2);
    }

    #[test]
    fn test_deterministic_training() {
        let corpus = two_subject_corpus();
        let config = TrainingConfig::default();
        let a = train(&corpus, &config).unwrap();
        let b = train(&corpus, &config).unwrap();
        assert_eq!(a.metrics.micro_accuracy, b.metrics.micro_accuracy);
        assert_eq!(a.metrics.algorithm, b.metrics.algorithm);

        let probe = extract(
            &normalize_events(&corpus[0].events),
            None,
        );
        assert_eq!(
            a.artifact.predict_raw(&probe).unwrap(),
            b.artifact.predict_raw(&probe).unwrap()
        );
    }

    #[test]
    fn test_metrics_sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training_metrics.json");
        let outcome = train(&two_subject_corpus(), &TrainingConfig::default()).unwrap();
        outcome.metrics.save(&path).unwrap();

        let loaded = TrainingMetrics::load(&path).unwrap();
        assert_eq!(loaded.unique_labels, 2);
        assert_eq!(loaded.algorithm, outcome.metrics.algorithm);
    }

    #[test]
    fn test_holdout_split_covers_all() {
        let config = TrainingConfig::default();
        let (train_idx, test_idx) = holdout_split(20, &config);
        assert_eq!(train_idx.len() + test_idx.len(), 20);
        assert_eq!(test_idx.len(), 3);
    }
}
