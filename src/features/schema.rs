//! The frozen feature schema.
//!
//! Trainer and predictor compile against this one table. The slot order is
//! the wire order of every feature vector; any addition, removal or reorder
//! must bump [`FEATURE_SCHEMA_VERSION`] so stale artifacts are rejected at
//! load instead of silently misread.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Bumped on any change to slot layout, n-gram lists or keyboard tables.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Label used for unlabeled or degenerate vectors.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Tracked trigraphs, dash-joined normalized keys.
pub const TRIGRAPHS: [&str; 10] = [
    "t-h-e", "a-n-d", "i-n-g", "i-o-n", "t-i-o", "e-n-t", "f-o-r", "h-e-r", "h-a-t", "h-i-s",
];

/// Keys with a dedicated mean-dwell slot.
pub const TRACKED_KEYS: [&str; 15] = [
    "e", "t", "a", "o", "i", "n", "s", "r", "h", "l", "d", "c", "u", "m", "Space",
];

/// Tracked digraphs, dash-joined normalized keys.
pub const DIGRAPHS: [&str; 50] = [
    "t-h", "h-e", "i-n", "e-r", "a-n", "r-e", "o-n", "a-t", "e-n", "n-d", "t-i", "e-s", "o-r",
    "t-e", "o-f", "e-d", "i-s", "i-t", "a-l", "a-r", "s-t", "t-o", "n-t", "n-g", "s-e", "h-a",
    "a-s", "o-u", "i-o", "l-e", "v-e", "c-o", "m-e", "d-e", "h-i", "r-i", "r-o", "i-c", "n-e",
    "e-a", "r-a", "c-e", "l-i", "c-h", "l-l", "b-e", "m-a", "s-i", "o-m", "u-r",
];

/// Digraphs with a dedicated flight-variance slot.
pub const VARIANCE_DIGRAPHS: [&str; 5] = ["t-h", "h-e", "i-n", "e-r", "a-n"];

// Slot offsets, in schema order.
pub const IDX_MEAN_DWELL: usize = 0;
pub const IDX_MEAN_FLIGHT: usize = 1;
pub const IDX_TYPING_SPEED: usize = 2;

const CORE_SLOTS: usize = 3;
const SPREAD_SLOTS: usize = 4;
const PERCENTILE_SLOTS: usize = 6;
const RHYTHM_SLOTS: usize = 3;
const PAUSE_SLOTS: usize = 4;
const ERROR_SLOTS: usize = 4;
const HAND_SLOTS: usize = 5;
const ROW_SLOTS: usize = 4;
const FINGER_SLOTS: usize = 5;
const OVERLAP_SLOTS: usize = 2;
const WORD_SLOTS: usize = 3;
const FATIGUE_SLOTS: usize = 2;

/// Total width of a feature vector.
pub const FEATURE_COUNT: usize = CORE_SLOTS
    + SPREAD_SLOTS
    + PERCENTILE_SLOTS
    + RHYTHM_SLOTS
    + PAUSE_SLOTS
    + ERROR_SLOTS
    + HAND_SLOTS
    + ROW_SLOTS
    + FINGER_SLOTS
    + TRIGRAPHS.len()
    + TRACKED_KEYS.len()
    + DIGRAPHS.len()
    + VARIANCE_DIGRAPHS.len()
    + OVERLAP_SLOTS
    + WORD_SLOTS
    + FATIGUE_SLOTS;

lazy_static! {
    /// Human-readable slot names, in schema order. Used for metrics and
    /// debugging; the pipeline itself goes by position.
    pub static ref SLOT_NAMES: Vec<String> = {
        let mut names: Vec<String> = vec![
            "mean_dwell".into(),
            "mean_flight".into(),
            "typing_speed".into(),
            "dwell_variance".into(),
            "dwell_std_dev".into(),
            "flight_variance".into(),
            "flight_std_dev".into(),
            "dwell_p25".into(),
            "dwell_p50".into(),
            "dwell_p75".into(),
            "flight_p25".into(),
            "flight_p50".into(),
            "flight_p75".into(),
            "rhythm_consistency".into(),
            "dwell_consistency".into(),
            "rhythm_stability".into(),
            "short_pause_freq".into(),
            "medium_pause_freq".into(),
            "long_pause_freq".into(),
            "mean_pause_duration".into(),
            "backspace_rate".into(),
            "consecutive_backspaces".into(),
            "error_correction_speed".into(),
            "error_rate_increase".into(),
            "hand_transition_ratio".into(),
            "left_left_freq".into(),
            "left_right_freq".into(),
            "right_left_freq".into(),
            "right_right_freq".into(),
            "top_row_usage".into(),
            "home_row_usage".into(),
            "bottom_row_usage".into(),
            "row_jump_ratio".into(),
            "pinky_dwell".into(),
            "ring_dwell".into(),
            "middle_dwell".into(),
            "index_dwell".into(),
            "thumb_dwell".into(),
        ];
        for t in TRIGRAPHS {
            names.push(format!("trigraph_{t}"));
        }
        for k in TRACKED_KEYS {
            names.push(format!("dwell_{k}"));
        }
        for d in DIGRAPHS {
            names.push(format!("digraph_{d}"));
        }
        for d in VARIANCE_DIGRAPHS {
            names.push(format!("digraph_var_{d}"));
        }
        names.push("key_overlap_freq".into());
        names.push("mean_overlap_gap".into());
        names.push("pre_space_flight".into());
        names.push("post_space_flight".into());
        names.push("mean_word_length".into());
        names.push("typing_speed_decay".into());
        names.push("dwell_drift".into());
        names
    };
}

/// A fixed-width feature vector with its subject label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub label: String,
    pub values: Vec<f32>,
}

impl FeatureVector {
    /// All-zero vector with the `"Unknown"` label, returned for trivial input.
    pub fn zeroed() -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            values: vec![0.0; FEATURE_COUNT],
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// True when every slot is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

// =============================================================================
// Tests
// =============================================================================
