use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration for the identification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub training: TrainingConfig,

    #[serde(default)]
    pub elimination: EliminationConfig,
}

/// Calibration and authentication-threshold knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Softmax temperature. <1 sharpens, >1 flattens.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Confidence required to authenticate once more than three samples
    /// have been observed.
    #[serde(default = "default_auth_threshold")]
    pub auth_threshold: f64,

    /// Stricter confidence required for the first three samples.
    #[serde(default = "default_early_auth_threshold")]
    pub early_auth_threshold: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            auth_threshold: default_auth_threshold(),
            early_auth_threshold: default_early_auth_threshold(),
        }
    }
}

/// Identification-session handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding inactivity window before per-session evidence is evicted.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// Minimum events accepted by the identify entry point.
    #[serde(default = "default_min_identify_events")]
    pub min_identify_events: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            min_identify_events: default_min_identify_events(),
        }
    }
}

/// Training orchestration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Minimum events for a per-sample training feature extraction.
    #[serde(default = "default_min_training_events")]
    pub min_training_events: usize,

    /// A background training run starts after every Nth persisted
    /// labeled session.
    #[serde(default = "default_auto_train_every")]
    pub auto_train_every: usize,

    /// Sliding-window augmentation: window length as a fraction of the
    /// session's event count.
    #[serde(default = "default_window_fraction")]
    pub window_fraction: f64,

    /// Sliding-window augmentation: step as a fraction of the event count.
    #[serde(default = "default_step_fraction")]
    pub step_fraction: f64,

    /// Windows shorter than this many events are discarded.
    #[serde(default = "default_min_window_events")]
    pub min_window_events: usize,

    /// Sessions shorter than this are not augmented.
    #[serde(default = "default_min_events_to_augment")]
    pub min_events_to_augment: usize,

    /// Held-out fraction for single-split evaluation.
    #[serde(default = "default_holdout_fraction")]
    pub holdout_fraction: f64,

    /// Folds for cross-validated training.
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,

    /// Shuffle seed for splits and fold assignment.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_training_events: default_min_training_events(),
            auto_train_every: default_auto_train_every(),
            window_fraction: default_window_fraction(),
            step_fraction: default_step_fraction(),
            min_window_events: default_min_window_events(),
            min_events_to_augment: default_min_events_to_augment(),
            holdout_fraction: default_holdout_fraction(),
            cv_folds: default_cv_folds(),
            seed: default_seed(),
        }
    }
}

/// Progressive-elimination thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliminationConfig {
    /// Threshold applied from the third sample onward.
    #[serde(default = "default_elimination_base")]
    pub base: f64,

    /// Threshold increment applied for every five samples past the tenth.
    #[serde(default = "default_elimination_step")]
    pub step: f64,

    /// Hard ceiling on the elimination threshold.
    #[serde(default = "default_elimination_cap")]
    pub cap: f64,

    /// Number of subjects that can never be eliminated.
    #[serde(default = "default_min_users_to_keep")]
    pub min_users_to_keep: usize,
}

impl Default for EliminationConfig {
    fn default() -> Self {
        Self {
            base: default_elimination_base(),
            step: default_elimination_step(),
            cap: default_elimination_cap(),
            min_users_to_keep: default_min_users_to_keep(),
        }
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            calibration: CalibrationConfig::default(),
            session: SessionConfig::default(),
            training: TrainingConfig::default(),
            elimination: EliminationConfig::default(),
        }
    }
}

impl ProfilerConfig {
    /// Build a default configuration rooted at the given data directory.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            ..Self::default()
        }
    }

    /// Load `keyprint.toml` from the data directory, falling back to
    /// defaults when the file is absent. Missing fields take their defaults.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("keyprint.toml");

        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)?;
            let mut config: ProfilerConfig = toml::from_str(&raw)?;
            config.data_dir = data_dir.to_path_buf();
            return Ok(config);
        }

        Ok(Self::with_data_dir(data_dir))
    }

    /// Persist the configuration to `keyprint.toml` in the data directory.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let raw = toml::to_string_pretty(self)?;
        fs::write(self.data_dir.join("keyprint.toml"), raw)?;
        Ok(())
    }

    /// Path of the live model artifact.
    pub fn model_path(&self) -> PathBuf {
        self.data_dir.join("model.kpm")
    }

    /// Path of the training-metrics sidecar.
    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join("training_metrics.json")
    }

    /// Path of the labeled-session database.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".keyprint"))
        .unwrap_or_else(|| PathBuf::from(".keyprint"))
}

fn default_temperature() -> f64 {
    1.0
}

fn default_auth_threshold() -> f64 {
    0.75
}

fn default_early_auth_threshold() -> f64 {
    0.90
}

fn default_session_ttl_secs() -> u64 {
    600
}

fn default_min_identify_events() -> usize {
    5
}

fn default_min_training_events() -> usize {
    10
}

fn default_auto_train_every() -> usize {
    10
}

fn default_window_fraction() -> f64 {
    0.7
}

fn default_step_fraction() -> f64 {
    0.3
}

fn default_min_window_events() -> usize {
    20
}

fn default_min_events_to_augment() -> usize {
    30
}

fn default_holdout_fraction() -> f64 {
    0.15
}

fn default_cv_folds() -> usize {
    5
}

fn default_seed() -> u64 {
    42
}

fn default_elimination_base() -> f64 {
    0.05
}

fn default_elimination_step() -> f64 {
    0.05
}

fn default_elimination_cap() -> f64 {
    0.50
}

fn default_min_users_to_keep() -> usize {
    1
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ProfilerConfig::default();
        assert_eq!(config.calibration.temperature, 1.0);
        assert_eq!(config.session.ttl_secs, 600);
        assert_eq!(config.training.auto_train_every, 10);
        assert_eq!(config.elimination.cap, 0.50);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let mut config = ProfilerConfig::with_data_dir(dir.path());
        config.calibration.temperature = 0.8;
        config.save().unwrap();

        let loaded = ProfilerConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.calibration.temperature, 0.8);
        assert_eq!(loaded.session.min_identify_events, 5);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("keyprint.toml"),
            "[calibration]\ntemperature = 2.0\n",
        )
        .unwrap();

        let loaded = ProfilerConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.calibration.temperature, 2.0);
        assert_eq!(loaded.training.cv_folds, 5);
    }
}
