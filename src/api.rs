//! Public service façade.
//!
//! Glues the pipeline together behind three entry points (submit a labeled
//! session, identify, train) using the JSON wire shapes of the HTTP layer.
//! The live classifier artifact is swapped atomically: readers take a
//! snapshot reference under a brief lock and predict outside it.

use crate::calibrate;
use crate::classify::ModelArtifact;
use crate::config::ProfilerConfig;
use crate::error::{ProfilerError, Result};
use crate::events::{normalize_events, KeystrokeEvent};
use crate::evidence::EvidenceAccumulator;
use crate::features::{extract, UNKNOWN_LABEL};
use crate::store::SessionStore;
use crate::training::{self, TrainingMetrics};
use anyhow::anyhow;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Wire Types
// =============================================================================

/// Request body shared by submit and identify.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSubmission {
    pub platform: String,
    pub events: Vec<KeystrokeEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifyStatus {
    Authenticated,
    Continue,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub user: String,
    /// Percentage in [0, 100].
    pub confidence: f64,
    pub message: String,
    pub status: IdentifyStatus,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub message: String,
    pub metrics: TrainingMetrics,
}

/// Operational summary for status surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub model_loaded: bool,
    pub known_subjects: Vec<String>,
    pub stored_sessions: usize,
    pub active_identification_sessions: usize,
}

// =============================================================================
// Service
// =============================================================================

pub struct ProfilerService {
    config: ProfilerConfig,
    store: Mutex<SessionStore>,
    live: RwLock<Option<Arc<ModelArtifact>>>,
    evidence: EvidenceAccumulator,
    /// Handle back to the owning `Arc`, for background training tasks.
    self_ref: Weak<ProfilerService>,
}

impl ProfilerService {
    /// Open the service over the configured data directory, loading the
    /// persisted model artifact when one is present.
    pub fn open(config: ProfilerConfig) -> Result<Arc<Self>> {
        let store = SessionStore::open(config.store_path())?;
        Ok(Self::assemble(config, store))
    }

    /// Service over an in-memory store; state dies with the process.
    pub fn open_in_memory(config: ProfilerConfig) -> Result<Arc<Self>> {
        let store = SessionStore::open_in_memory()?;
        Ok(Self::assemble(config, store))
    }

    fn assemble(config: ProfilerConfig, store: SessionStore) -> Arc<Self> {
        let model_path = config.model_path();
        let live = if model_path.exists() {
            match ModelArtifact::load(&model_path) {
                Ok(artifact) => {
                    info!(
                        "loaded model artifact: {} subjects, algorithm {}",
                        artifact.labels.len(),
                        artifact.algorithm
                    );
                    Some(Arc::new(artifact))
                }
                Err(e) => {
                    warn!("ignoring unusable model artifact: {e}");
                    None
                }
            }
        } else {
            None
        };

        let evidence = EvidenceAccumulator::new(
            Duration::from_secs(config.session.ttl_secs),
            config.elimination.clone(),
        );

        Arc::new_cyclic(|self_ref| Self {
            config,
            store: Mutex::new(store),
            live: RwLock::new(live),
            evidence,
            self_ref: self_ref.clone(),
        })
    }

    /// Persist a labeled session for `subject` (the authenticated identity
    /// from the auth collaborator) and kick off background training on
    /// every Nth submission.
    pub async fn submit_session(
        &self,
        subject: &str,
        request: SessionSubmission,
    ) -> Result<SubmitResponse> {
        if subject.is_empty() || subject == UNKNOWN_LABEL {
            return Err(ProfilerError::Anyhow(anyhow!(
                "labeled sessions require a trusted subject"
            )));
        }

        let events = normalize_events(&request.events);
        let stored_count = {
            let store = self
                .store
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            store.insert(subject, &request.platform, &events)?;
            store.labeled_count()?
        };

        let every = self.config.training.auto_train_every;
        if every > 0 && stored_count % every == 0 {
            if let Some(service) = self.self_ref.upgrade() {
                info!("{stored_count} labeled sessions stored, starting background training");
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = service.train() {
                        warn!("background training failed: {e}");
                    }
                });
            }
        }

        Ok(SubmitResponse {
            message: format!("Session recorded for {subject} ({} events)", events.len()),
        })
    }

    /// Run one identification step for the submitted passage.
    pub fn identify(&self, request: SessionSubmission) -> Result<IdentifyResponse> {
        let min_events = self.config.session.min_identify_events;
        if request.events.len() < min_events {
            return Err(ProfilerError::InsufficientInput {
                needed: min_events,
                got: request.events.len(),
            });
        }

        let session_id = request
            .session_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let artifact = match self.live_artifact().ok_or(ProfilerError::ModelNotReady) {
            Ok(artifact) => artifact,
            Err(e) => {
                // Benign: the client keeps polling until a model is trained.
                warn!("identify: {e}");
                return Ok(IdentifyResponse {
                    user: UNKNOWN_LABEL.to_string(),
                    confidence: 0.0,
                    message: "No trained model is available yet".to_string(),
                    status: IdentifyStatus::Error,
                    session_id,
                });
            }
        };

        let events = normalize_events(&request.events);
        let vector = extract(&events, None);
        let scores = artifact.predict_raw(&vector)?;
        let prediction = calibrate::calibrate(
            &artifact.labels,
            &scores,
            self.config.calibration.temperature,
        );

        let probs: Vec<f64> = prediction.probabilities.iter().map(|&p| p as f64).collect();
        let verdict = self
            .evidence
            .observe(&session_id, &artifact.labels, &probs);

        let threshold = if verdict.sample_count > 3 {
            self.config.calibration.auth_threshold
        } else {
            self.config.calibration.early_auth_threshold
        };

        let status = if verdict.confidence > threshold {
            IdentifyStatus::Authenticated
        } else {
            IdentifyStatus::Continue
        };

        let message = match status {
            IdentifyStatus::Authenticated => format!(
                "Identified {} after {} samples",
                verdict.label, verdict.sample_count
            ),
            _ => format!(
                "Gathering evidence: {} of {} candidates remain after {} samples",
                verdict.surviving, verdict.total, verdict.sample_count
            ),
        };

        Ok(IdentifyResponse {
            user: verdict.label,
            confidence: verdict.confidence * 100.0,
            message,
            status,
            session_id,
        })
    }

    /// Synchronous training pass: rebuild the classifier from every stored
    /// labeled session and publish the artifact on success. On failure the
    /// previous artifact stays live.
    pub fn train(&self) -> Result<TrainResponse> {
        let sessions = {
            let store = self
                .store
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            store.labeled_sessions()?
        };

        let outcome = training::train(&sessions, &self.config.training)?;
        outcome.artifact.save(&self.config.model_path())?;
        outcome.metrics.save(&self.config.metrics_path())?;

        let message = format!(
            "Trained on {} samples across {} subjects ({})",
            outcome.metrics.total_samples,
            outcome.metrics.unique_labels,
            outcome.metrics.algorithm
        );
        info!("{message}");

        let metrics = outcome.metrics.clone();
        self.publish(Arc::new(outcome.artifact));

        Ok(TrainResponse { message, metrics })
    }

    /// Current service summary.
    pub fn status(&self) -> Result<ServiceStatus> {
        let stored_sessions = {
            let store = self
                .store
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            store.labeled_count()?
        };
        let artifact = self.live_artifact();
        Ok(ServiceStatus {
            model_loaded: artifact.is_some(),
            known_subjects: artifact.map(|a| a.labels.clone()).unwrap_or_default(),
            stored_sessions,
            active_identification_sessions: self.evidence.active_sessions(),
        })
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Snapshot of the live artifact; prediction happens outside the lock.
    fn live_artifact(&self) -> Option<Arc<ModelArtifact>> {
        self.live
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Atomically replace the live artifact. In-flight identifications keep
    /// the snapshot they already hold.
    fn publish(&self, artifact: Arc<ModelArtifact>) {
        let mut live = self
            .live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *live = Some(artifact);
    }
}

// =============================================================================
// Tests
// =============================================================================
