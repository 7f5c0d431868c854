//! Per-session evidence accumulation and progressive elimination.
//!
//! Each identification session fuses successive per-sample distributions into
//! a running belief. Subjects whose cumulative probability falls below a
//! sample-count-dependent threshold are eliminated for the rest of the
//! session; once eliminated they cannot return. State lives in an expiring
//! cache with a 10-minute sliding window.

use crate::config::EliminationConfig;
use crate::features::UNKNOWN_LABEL;
use dashmap::DashMap;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Floor substituted for non-positive probabilities before normalization.
const PROB_EPSILON: f64 = 1e-4;
/// Retained per-sample history entries.
const MAX_HISTORY: usize = 50;

/// Running belief for one identification session.
#[derive(Debug, Clone)]
pub struct SessionEvidenceState {
    pub session_id: String,
    /// Fixed on first evidence; a length change re-initializes the state.
    pub labels: Vec<String>,
    /// Non-negative, zero at eliminated indices, sums to 1 over survivors.
    pub cumulative: Vec<f64>,
    pub eliminated: HashSet<usize>,
    pub sample_count: u32,
    pub last_update: Instant,
    pub score_history: Vec<Vec<f64>>,
}

impl SessionEvidenceState {
    fn new(session_id: &str, labels: &[String]) -> Self {
        Self {
            session_id: session_id.to_string(),
            labels: labels.to_vec(),
            cumulative: vec![0.0; labels.len()],
            eliminated: HashSet::new(),
            sample_count: 0,
            last_update: Instant::now(),
            score_history: Vec::new(),
        }
    }

    pub fn surviving_count(&self) -> usize {
        self.labels.len() - self.eliminated.len()
    }
}

/// Verdict of one evidence step.
#[derive(Debug, Clone)]
pub struct EvidenceVerdict {
    pub label: String,
    pub confidence: f64,
    pub sample_count: u32,
    pub surviving: usize,
    pub total: usize,
}

/// Read-only view of a session's state, for status surfaces.
#[derive(Debug, Clone)]
pub struct EvidenceSnapshot {
    pub labels: Vec<String>,
    pub cumulative: Vec<f64>,
    pub eliminated: Vec<String>,
    pub sample_count: u32,
}

/// Process-wide evidence cache. Different session ids proceed in parallel;
/// steps within one session are serialized by a per-session mutex.
pub struct EvidenceAccumulator {
    sessions: DashMap<String, Arc<Mutex<SessionEvidenceState>>>,
    ttl: Duration,
    elimination: EliminationConfig,
}

impl EvidenceAccumulator {
    pub fn new(ttl: Duration, elimination: EliminationConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            elimination,
        }
    }

    /// Fold one per-sample distribution into the session's belief and return
    /// the verdict. `labels` and `probs` come from the live artifact and
    /// calibrator; a length mismatch with stored state resets the session.
    pub fn observe(&self, session_id: &str, labels: &[String], probs: &[f64]) -> EvidenceVerdict {
        self.purge_expired();

        let n = labels.len().min(probs.len());
        let labels = &labels[..n];
        let probs = &probs[..n];

        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionEvidenceState::new(session_id, labels))))
            .clone();

        let mut state = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.last_update.elapsed() > self.ttl || state.labels.len() != n {
            debug!(
                "resetting evidence state for session {session_id} \
                 ({} labels -> {n})",
                state.labels.len()
            );
            *state = SessionEvidenceState::new(session_id, labels);
        }

        let normalized = normalize(probs);

        state.score_history.push(normalized.clone());
        if state.score_history.len() > MAX_HISTORY {
            state.score_history.remove(0);
        }
        state.sample_count += 1;
        state.last_update = Instant::now();

        // Exponential moving average with a weight that grows with evidence.
        if state.sample_count == 1 {
            state.cumulative = normalized;
        } else {
            let alpha = 0.3 + 0.4 * (state.sample_count.min(5) as f64) / 5.0;
            for (c, p) in state.cumulative.iter_mut().zip(&normalized) {
                *c = (1.0 - alpha) * *c + alpha * p;
            }
        }
        let eliminated: Vec<usize> = state.eliminated.iter().copied().collect();
        for i in eliminated {
            state.cumulative[i] = 0.0;
        }
        renormalize_survivors(&mut state.cumulative);

        if state.sample_count >= 3 && state.surviving_count() > 1 {
            self.eliminate_unlikely(&mut state);
        }

        let verdict = self.verdict(&state);
        debug!(
            "session {session_id}: sample {} -> {} ({:.3}), {}/{} surviving",
            verdict.sample_count,
            verdict.label,
            verdict.confidence,
            verdict.surviving,
            verdict.total
        );
        verdict
    }

    /// Snapshot a session's state, refreshing its sliding TTL.
    pub fn snapshot(&self, session_id: &str) -> Option<EvidenceSnapshot> {
        let entry = self.sessions.get(session_id)?.clone();
        let mut state = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.last_update.elapsed() > self.ttl {
            return None;
        }
        state.last_update = Instant::now();
        Some(EvidenceSnapshot {
            labels: state.labels.clone(),
            cumulative: state.cumulative.clone(),
            eliminated: state
                .eliminated
                .iter()
                .map(|&i| state.labels[i].clone())
                .collect(),
            sample_count: state.sample_count,
        })
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Threshold below which a surviving subject is eliminated.
    fn threshold(&self, sample_count: u32) -> f64 {
        let base = self.elimination.base;
        if sample_count < 10 {
            return base;
        }
        let steps = ((sample_count - 10) / 5 + 1) as f64;
        (base + self.elimination.step * steps).min(self.elimination.cap)
    }

    fn eliminate_unlikely(&self, state: &mut SessionEvidenceState) {
        let threshold = self.threshold(state.sample_count);

        let mut survivors: Vec<usize> = (0..state.labels.len())
            .filter(|i| !state.eliminated.contains(i))
            .collect();
        survivors.sort_by(|&a, &b| {
            state.cumulative[a]
                .partial_cmp(&state.cumulative[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut remaining = survivors.len();
        let mut changed = false;
        for &i in &survivors {
            if remaining <= self.elimination.min_users_to_keep {
                break;
            }
            if state.cumulative[i] < threshold {
                info!(
                    "session {}: eliminating {} at {:.4} (threshold {:.2}, sample {})",
                    state.session_id,
                    state.labels[i],
                    state.cumulative[i],
                    threshold,
                    state.sample_count
                );
                state.eliminated.insert(i);
                state.cumulative[i] = 0.0;
                remaining -= 1;
                changed = true;
            }
        }

        if changed {
            renormalize_survivors(&mut state.cumulative);
        }
    }

    fn verdict(&self, state: &SessionEvidenceState) -> EvidenceVerdict {
        let survivors: Vec<usize> = (0..state.labels.len())
            .filter(|i| !state.eliminated.contains(i))
            .collect();

        let Some(&best) = survivors.iter().max_by(|&&a, &&b| {
            state.cumulative[a]
                .partial_cmp(&state.cumulative[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            // Unreachable while at least one subject is always kept.
            return EvidenceVerdict {
                label: UNKNOWN_LABEL.to_string(),
                confidence: 0.0,
                sample_count: state.sample_count,
                surviving: 0,
                total: state.labels.len(),
            };
        };

        let top = state.cumulative[best];
        let margin = if survivors.len() < 2 {
            0.0
        } else {
            let mut values: Vec<f64> = survivors.iter().map(|&i| state.cumulative[i]).collect();
            values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            values[0] - values[1]
        };

        let sample_boost = (0.03 * state.sample_count as f64).min(0.15);
        let mut confidence = top + 0.3 * margin + sample_boost;

        let surviving = survivors.len();
        if surviving <= 3 {
            confidence *= 1.10;
        }
        if surviving == 2 {
            confidence *= 1.15;
        }

        EvidenceVerdict {
            label: state.labels[best].clone(),
            confidence: confidence.clamp(0.05, 0.99),
            sample_count: state.sample_count,
            surviving,
            total: state.labels.len(),
        }
    }

    fn purge_expired(&self) {
        self.sessions.retain(|_, entry| {
            entry
                .try_lock()
                .map(|state| state.last_update.elapsed() <= self.ttl)
                .unwrap_or(true)
        });
    }
}

/// Replace non-positive entries with ε and scale to sum 1; an all-zero input
/// becomes uniform.
fn normalize(probs: &[f64]) -> Vec<f64> {
    if probs.is_empty() {
        return Vec::new();
    }
    let floored: Vec<f64> = probs
        .iter()
        .map(|&p| if p > 0.0 && p.is_finite() { p } else { PROB_EPSILON })
        .collect();
    let sum: f64 = floored.iter().sum();
    if sum > 0.0 {
        floored.iter().map(|&p| p / sum).collect()
    } else {
        vec![1.0 / probs.len() as f64; probs.len()]
    }
}

/// Scale positive entries to sum 1, leaving zeros (eliminated) in place.
fn renormalize_survivors(cumulative: &mut [f64]) {
    let sum: f64 = cumulative.iter().sum();
    if sum > 0.0 {
        for c in cumulative.iter_mut() {
            *c /= sum;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
