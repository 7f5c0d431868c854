pub mod api;
pub mod calibrate;
pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod evidence;
pub mod features;
pub mod keyboard;
pub mod stats;
pub mod store;
pub mod training;

// Re-export common types
pub use crate::api::{
    IdentifyResponse, IdentifyStatus, ProfilerService, ServiceStatus, SessionSubmission,
    SubmitResponse, TrainResponse,
};
pub use crate::calibrate::PredictionResult;
pub use crate::classify::ModelArtifact;
pub use crate::config::ProfilerConfig;
pub use crate::error::ProfilerError;
pub use crate::events::{normalize_events, normalize_key, KeyEventKind, KeystrokeEvent};
pub use crate::evidence::{EvidenceAccumulator, EvidenceVerdict, SessionEvidenceState};
pub use crate::features::{FeatureVector, FEATURE_COUNT, FEATURE_SCHEMA_VERSION};
pub use crate::store::{SessionStore, TrainingSession};
pub use crate::training::{TrainingMetrics, TrainingOutcome};
