//! Error kinds for the identification pipeline.
//!
//! Faults in feature extraction and calibration degrade a single request,
//! never the service; training faults never affect prediction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("profiler: insufficient input - got {got} events, need at least {needed}")]
    InsufficientInput { needed: usize, got: usize },

    #[error("profiler: no trained model available")]
    ModelNotReady,

    #[error("profiler: insufficient training data - {0}")]
    InsufficientData(String),

    #[error("profiler: feature schema version mismatch - artifact has {found}, expected {expected}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("profiler: storage error - {0}")]
    Persistence(String),

    #[error("profiler: computation error - {0}")]
    Computation(String),

    #[error("profiler: io error - {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ProfilerError {
    fn from(e: rusqlite::Error) -> Self {
        ProfilerError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for ProfilerError {
    fn from(e: serde_json::Error) -> Self {
        ProfilerError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProfilerError>;
