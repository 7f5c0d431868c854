//! Frozen QWERTY classification tables.
//!
//! Hand, row and finger assignment for normalized key names. A key absent
//! from every table still contributes to aggregate timing features, just not
//! to the positional ones. The tables are part of the feature schema: any
//! edit invalidates trained models.

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Row {
    Top,
    Home,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finger {
    Pinky,
    Ring,
    Middle,
    Index,
    Thumb,
}

impl Finger {
    /// Stable index into per-finger feature slots.
    pub fn index(self) -> usize {
        match self {
            Finger::Pinky => 0,
            Finger::Ring => 1,
            Finger::Middle => 2,
            Finger::Index => 3,
            Finger::Thumb => 4,
        }
    }
}

const LEFT_KEYS: &[&str] = &[
    "q", "w", "e", "r", "t", "a", "s", "d", "f", "g", "z", "x", "c", "v", "b", "1", "2", "3", "4",
    "5", "`", "~",
];

const RIGHT_KEYS: &[&str] = &[
    "y", "u", "i", "o", "p", "h", "j", "k", "l", "n", "m", "6", "7", "8", "9", "0", "-", "=", "[",
    "]", "\\", ";", "'", ",", ".", "/",
];

const HOME_KEYS: &[&str] = &["a", "s", "d", "f", "g", "h", "j", "k", "l", ";"];

const TOP_KEYS: &[&str] = &["q", "w", "e", "r", "t", "y", "u", "i", "o", "p", "[", "]", "\\"];

const BOTTOM_KEYS: &[&str] = &["z", "x", "c", "v", "b", "n", "m", ",", ".", "/"];

const PINKY_KEYS: &[&str] = &["q", "a", "z", "p", ";", "/", "1", "0", "-", "="];
const RING_KEYS: &[&str] = &["w", "s", "x", "o", "l", ".", "2", "9"];
const MIDDLE_KEYS: &[&str] = &["e", "d", "c", "i", "k", ",", "3", "8"];
const INDEX_KEYS: &[&str] = &[
    "r", "f", "v", "t", "g", "b", "y", "h", "n", "u", "j", "m", "4", "5", "6", "7",
];

lazy_static! {
    static ref LEFT_SET: HashSet<&'static str> = LEFT_KEYS.iter().copied().collect();
    static ref RIGHT_SET: HashSet<&'static str> = RIGHT_KEYS.iter().copied().collect();
    static ref HOME_SET: HashSet<&'static str> = HOME_KEYS.iter().copied().collect();
    static ref TOP_SET: HashSet<&'static str> = TOP_KEYS.iter().copied().collect();
    static ref BOTTOM_SET: HashSet<&'static str> = BOTTOM_KEYS.iter().copied().collect();
    static ref FINGER_MAP: HashMap<&'static str, Finger> = {
        let mut m = HashMap::new();
        for &k in PINKY_KEYS {
            m.insert(k, Finger::Pinky);
        }
        for &k in RING_KEYS {
            m.insert(k, Finger::Ring);
        }
        for &k in MIDDLE_KEYS {
            m.insert(k, Finger::Middle);
        }
        for &k in INDEX_KEYS {
            m.insert(k, Finger::Index);
        }
        m.insert("Space", Finger::Thumb);
        m
    };
}

/// Hand of a normalized key, if classified.
pub fn hand_of(key: &str) -> Option<Hand> {
    if LEFT_SET.contains(key) {
        Some(Hand::Left)
    } else if RIGHT_SET.contains(key) {
        Some(Hand::Right)
    } else {
        None
    }
}

/// Row of a normalized key, if classified.
pub fn row_of(key: &str) -> Option<Row> {
    if HOME_SET.contains(key) {
        Some(Row::Home)
    } else if TOP_SET.contains(key) {
        Some(Row::Top)
    } else if BOTTOM_SET.contains(key) {
        Some(Row::Bottom)
    } else {
        None
    }
}

/// Finger of a normalized key, if classified. `"Space"` maps to the thumb.
pub fn finger_of(key: &str) -> Option<Finger> {
    FINGER_MAP.get(key).copied()
}

// =============================================================================
// Tests
// =============================================================================
