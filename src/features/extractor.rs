//! Feature extraction: raw event stream to fixed-width vector.
//!
//! All timing aggregates use only intervals inside the validity window
//! (0, 2000] ms; values outside are dropped, not clipped. Fewer than two
//! events yields the all-zero vector labeled `"Unknown"`.

use super::schema::{
    FeatureVector, DIGRAPHS, TRACKED_KEYS, TRIGRAPHS, UNKNOWN_LABEL, VARIANCE_DIGRAPHS,
};
use crate::events::{KeyEventKind, KeystrokeEvent};
use crate::keyboard::{finger_of, hand_of, row_of, Hand, Row};
use crate::stats;
use std::collections::HashMap;

/// Upper bound for a dwell or flight interval to count, in milliseconds.
const VALID_INTERVAL_MS: f64 = 2000.0;
/// Flights at or above this are pauses.
const PAUSE_THRESHOLD_MS: f64 = 200.0;
/// Pauses at or above this are long pauses.
const LONG_PAUSE_THRESHOLD_MS: f64 = 500.0;
/// Two keys pressed within this window count as an overlap.
const OVERLAP_WINDOW_MS: f64 = 100.0;

const BACKSPACE: &str = "backspace";
const SPACE: &str = "Space";

/// Extract the feature vector for a normalized event stream.
///
/// `label` is attached when the stream has enough events to produce a
/// non-degenerate vector; trivial input is always labeled `"Unknown"`.
pub fn extract(events: &[KeystrokeEvent], label: Option<&str>) -> FeatureVector {
    if events.len() < 2 {
        return FeatureVector::zeroed();
    }

    let timing = TimingSamples::collect(events);
    let mut values: Vec<f64> = Vec::with_capacity(super::schema::FEATURE_COUNT);

    let mean_dwell = stats::mean(&timing.dwells);
    let mean_flight = stats::mean(&timing.flights);
    let flight_variance = stats::variance(&timing.flights);

    // Core timing
    values.push(mean_dwell);
    values.push(mean_flight);
    values.push(typing_speed(events, timing.keydowns.len()));

    // Spread
    values.push(stats::variance(&timing.dwells));
    values.push(stats::std_dev(&timing.dwells));
    values.push(flight_variance);
    values.push(stats::std_dev(&timing.flights));

    // Percentiles
    values.push(stats::percentile(&timing.dwells, 25.0));
    values.push(stats::percentile(&timing.dwells, 50.0));
    values.push(stats::percentile(&timing.dwells, 75.0));
    values.push(stats::percentile(&timing.flights, 25.0));
    values.push(stats::percentile(&timing.flights, 50.0));
    values.push(stats::percentile(&timing.flights, 75.0));

    // Rhythm
    values.push(ratio_or_zero(stats::std_dev(&timing.flights), mean_flight));
    values.push(ratio_or_zero(stats::std_dev(&timing.dwells), mean_dwell));
    values.push(1.0 / (1.0 + flight_variance));

    // Pauses
    values.extend(pause_features(&timing.flights));

    // Errors
    values.extend(error_features(&timing.keydowns, events));

    // Hand transitions
    values.extend(hand_features(&timing.keydowns));

    // Rows
    values.extend(row_features(&timing.keydowns));

    // Per-finger dwell
    values.extend(finger_features(&timing, mean_dwell));

    // Trigraphs
    for trigraph in TRIGRAPHS {
        let slot = timing
            .trigraph_times
            .get(trigraph)
            .map(|t| stats::mean(t))
            .unwrap_or(mean_flight);
        values.push(slot);
    }

    // Per-key dwell
    for key in TRACKED_KEYS {
        let slot = timing
            .key_dwells
            .get(key)
            .map(|d| stats::mean(d))
            .unwrap_or(mean_dwell);
        values.push(slot);
    }

    // Digraph flights
    for digraph in DIGRAPHS {
        let slot = timing
            .digraph_times
            .get(digraph)
            .map(|t| stats::mean(t))
            .unwrap_or(mean_flight);
        values.push(slot);
    }

    // Digraph flight variance; below two occurrences the slot is 0
    for digraph in VARIANCE_DIGRAPHS {
        let slot = timing
            .digraph_times
            .get(digraph)
            .filter(|t| t.len() >= 2)
            .map(|t| stats::variance(t))
            .unwrap_or(0.0);
        values.push(slot);
    }

    // Overlap
    values.push(ratio_or_zero(
        timing.overlap_gaps.len() as f64,
        timing.keydowns.len() as f64,
    ));
    values.push(stats::mean(&timing.overlap_gaps));

    // Word boundary
    values.extend(word_boundary_features(&timing));

    // Fatigue
    values.extend(fatigue_features(&timing));

    let values: Vec<f32> = values
        .into_iter()
        .map(|v| if v.is_finite() { v as f32 } else { 0.0 })
        .collect();

    FeatureVector {
        label: label.unwrap_or(UNKNOWN_LABEL).to_string(),
        values,
    }
}

// =============================================================================
// Timing collection
// =============================================================================

/// Per-stream timing samples, gathered in one pass over the events.
struct TimingSamples {
    /// Normalized key and timestamp of every keydown, in order.
    keydowns: Vec<(String, i64)>,
    /// Valid dwell intervals, with the index of the owning keydown.
    dwell_samples: Vec<(usize, f64)>,
    dwells: Vec<f64>,
    flights: Vec<f64>,
    key_dwells: HashMap<String, Vec<f64>>,
    digraph_times: HashMap<String, Vec<f64>>,
    trigraph_times: HashMap<String, Vec<f64>>,
    overlap_gaps: Vec<f64>,
}

impl TimingSamples {
    fn collect(events: &[KeystrokeEvent]) -> Self {
        let mut keydowns: Vec<(String, i64)> = Vec::new();
        let mut dwell_samples: Vec<(usize, f64)> = Vec::new();
        let mut key_dwells: HashMap<String, Vec<f64>> = HashMap::new();
        let mut overlap_gaps: Vec<f64> = Vec::new();

        // key -> (keydown index, keydown timestamp) while held
        let mut pressed: HashMap<&str, (usize, i64)> = HashMap::new();

        for event in events {
            match event.kind {
                KeyEventKind::Keydown => {
                    for (_, &(_, t0)) in pressed.iter() {
                        let gap = (event.timestamp - t0) as f64;
                        if gap >= 0.0 && gap <= OVERLAP_WINDOW_MS {
                            overlap_gaps.push(gap);
                        }
                    }
                    let idx = keydowns.len();
                    keydowns.push((event.key.clone(), event.timestamp));
                    pressed.insert(event.key.as_str(), (idx, event.timestamp));
                }
                KeyEventKind::Keyup => {
                    if let Some((idx, down_t)) = pressed.remove(event.key.as_str()) {
                        let dwell = (event.timestamp - down_t) as f64;
                        if dwell > 0.0 && dwell <= VALID_INTERVAL_MS {
                            dwell_samples.push((idx, dwell));
                            key_dwells.entry(event.key.clone()).or_default().push(dwell);
                        }
                    }
                }
            }
        }

        let dwells: Vec<f64> = dwell_samples.iter().map(|&(_, d)| d).collect();

        // Flight times between consecutive keydowns, with n-gram bookkeeping.
        let mut flights: Vec<f64> = Vec::new();
        let mut pair_flights: Vec<Option<f64>> = Vec::new();
        let mut digraph_times: HashMap<String, Vec<f64>> = HashMap::new();

        for pair in keydowns.windows(2) {
            let flight = (pair[1].1 - pair[0].1) as f64;
            if flight > 0.0 && flight <= VALID_INTERVAL_MS {
                flights.push(flight);
                pair_flights.push(Some(flight));
                let digraph = format!("{}-{}", pair[0].0, pair[1].0);
                digraph_times.entry(digraph).or_default().push(flight);
            } else {
                pair_flights.push(None);
            }
        }

        let mut trigraph_times: HashMap<String, Vec<f64>> = HashMap::new();
        for i in 0..keydowns.len().saturating_sub(2) {
            if let (Some(first), Some(second)) = (pair_flights[i], pair_flights[i + 1]) {
                let trigraph = format!(
                    "{}-{}-{}",
                    keydowns[i].0,
                    keydowns[i + 1].0,
                    keydowns[i + 2].0
                );
                trigraph_times
                    .entry(trigraph)
                    .or_default()
                    .push((first + second) / 2.0);
            }
        }

        Self {
            keydowns,
            dwell_samples,
            dwells,
            flights,
            key_dwells,
            digraph_times,
            trigraph_times,
            overlap_gaps,
        }
    }
}

// =============================================================================
// Feature groups
// =============================================================================

fn typing_speed(events: &[KeystrokeEvent], keydown_count: usize) -> f64 {
    let first = events.first().map(|e| e.timestamp).unwrap_or(0);
    let last = events.last().map(|e| e.timestamp).unwrap_or(0);
    let span_secs = (last - first) as f64 / 1000.0;
    if span_secs > 0.0 {
        keydown_count as f64 / span_secs
    } else {
        0.0
    }
}

fn pause_features(flights: &[f64]) -> [f64; 4] {
    if flights.is_empty() {
        return [0.0; 4];
    }
    let total = flights.len() as f64;
    let short = flights.iter().filter(|&&f| f < PAUSE_THRESHOLD_MS).count() as f64;
    let medium = flights
        .iter()
        .filter(|&&f| f >= PAUSE_THRESHOLD_MS && f < LONG_PAUSE_THRESHOLD_MS)
        .count() as f64;
    let long = flights
        .iter()
        .filter(|&&f| f >= LONG_PAUSE_THRESHOLD_MS)
        .count() as f64;

    let pauses: Vec<f64> = flights
        .iter()
        .copied()
        .filter(|&f| f >= PAUSE_THRESHOLD_MS)
        .collect();

    [
        short / total,
        medium / total,
        long / total,
        stats::mean(&pauses),
    ]
}

fn error_features(keydowns: &[(String, i64)], events: &[KeystrokeEvent]) -> [f64; 4] {
    if keydowns.is_empty() {
        return [0.0; 4];
    }

    let backspace_count = keydowns.iter().filter(|(k, _)| k == BACKSPACE).count();
    let backspace_rate = backspace_count as f64 / keydowns.len() as f64;

    // Mean length of maximal runs of consecutive backspace keydowns.
    let mut runs: Vec<f64> = Vec::new();
    let mut run = 0usize;
    for (key, _) in keydowns {
        if key == BACKSPACE {
            run += 1;
        } else if run > 0 {
            runs.push(run as f64);
            run = 0;
        }
    }
    if run > 0 {
        runs.push(run as f64);
    }
    let consecutive_backspaces = stats::mean(&runs);

    // Time from each backspace to the next non-backspace keydown.
    let mut correction_gaps: Vec<f64> = Vec::new();
    for (i, (key, t)) in keydowns.iter().enumerate() {
        if key != BACKSPACE {
            continue;
        }
        if let Some((_, next_t)) = keydowns[i + 1..].iter().find(|(k, _)| k != BACKSPACE) {
            let gap = (next_t - t) as f64;
            if gap > 0.0 && gap <= VALID_INTERVAL_MS {
                correction_gaps.push(gap);
            }
        }
    }
    let error_correction_speed = stats::mean(&correction_gaps);

    // Backspace count drift across the session timeline.
    let first = events.first().map(|e| e.timestamp).unwrap_or(0);
    let last = events.last().map(|e| e.timestamp).unwrap_or(0);
    let midpoint = first + (last - first) / 2;
    let first_half = keydowns
        .iter()
        .filter(|(k, t)| k == BACKSPACE && *t <= midpoint)
        .count() as f64;
    let second_half = keydowns
        .iter()
        .filter(|(k, t)| k == BACKSPACE && *t > midpoint)
        .count() as f64;
    let error_rate_increase = (second_half - first_half) / first_half.max(1.0);

    [
        backspace_rate,
        consecutive_backspaces,
        error_correction_speed,
        error_rate_increase,
    ]
}

fn hand_features(keydowns: &[(String, i64)]) -> [f64; 5] {
    let mut ll = 0.0;
    let mut lr = 0.0;
    let mut rl = 0.0;
    let mut rr = 0.0;

    for pair in keydowns.windows(2) {
        match (hand_of(&pair[0].0), hand_of(&pair[1].0)) {
            (Some(Hand::Left), Some(Hand::Left)) => ll += 1.0,
            (Some(Hand::Left), Some(Hand::Right)) => lr += 1.0,
            (Some(Hand::Right), Some(Hand::Left)) => rl += 1.0,
            (Some(Hand::Right), Some(Hand::Right)) => rr += 1.0,
            _ => {}
        }
    }

    let total = ll + lr + rl + rr;
    if total == 0.0 {
        // No classified transitions: the ratio is uninformative, not zero.
        return [0.5, 0.0, 0.0, 0.0, 0.0];
    }

    [
        (lr + rl) / total,
        ll / total,
        lr / total,
        rl / total,
        rr / total,
    ]
}

fn row_features(keydowns: &[(String, i64)]) -> [f64; 4] {
    let rows: Vec<Option<Row>> = keydowns.iter().map(|(k, _)| row_of(k)).collect();
    let classified = rows.iter().flatten().count() as f64;

    if classified == 0.0 {
        return [0.0; 4];
    }

    let count_row = |target: Row| rows.iter().flatten().filter(|&&r| r == target).count() as f64;

    let mut jumps = 0.0;
    let mut transitions = 0.0;
    for pair in rows.windows(2) {
        if let (Some(a), Some(b)) = (pair[0], pair[1]) {
            transitions += 1.0;
            if matches!(
                (a, b),
                (Row::Top, Row::Bottom) | (Row::Bottom, Row::Top)
            ) {
                jumps += 1.0;
            }
        }
    }

    [
        count_row(Row::Top) / classified,
        count_row(Row::Home) / classified,
        count_row(Row::Bottom) / classified,
        ratio_or_zero(jumps, transitions),
    ]
}

fn finger_features(timing: &TimingSamples, mean_dwell: f64) -> [f64; 5] {
    let mut per_finger: [Vec<f64>; 5] = Default::default();
    for &(idx, dwell) in &timing.dwell_samples {
        if let Some(finger) = finger_of(&timing.keydowns[idx].0) {
            per_finger[finger.index()].push(dwell);
        }
    }

    let mut out = [0.0; 5];
    for (i, samples) in per_finger.iter().enumerate() {
        out[i] = if samples.is_empty() {
            mean_dwell
        } else {
            stats::mean(samples)
        };
    }
    out
}

fn word_boundary_features(timing: &TimingSamples) -> [f64; 3] {
    let mut pre_space: Vec<f64> = Vec::new();
    let mut post_space: Vec<f64> = Vec::new();

    for pair in timing.keydowns.windows(2) {
        let flight = (pair[1].1 - pair[0].1) as f64;
        if flight <= 0.0 || flight > VALID_INTERVAL_MS {
            continue;
        }
        if pair[1].0 == SPACE {
            pre_space.push(flight);
        }
        if pair[0].0 == SPACE {
            post_space.push(flight);
        }
    }

    // Maximal runs of non-space keydowns.
    let mut word_lengths: Vec<f64> = Vec::new();
    let mut run = 0usize;
    for (key, _) in &timing.keydowns {
        if key == SPACE {
            if run > 0 {
                word_lengths.push(run as f64);
                run = 0;
            }
        } else {
            run += 1;
        }
    }
    if run > 0 {
        word_lengths.push(run as f64);
    }

    [
        stats::mean(&pre_space),
        stats::mean(&post_space),
        stats::mean(&word_lengths),
    ]
}

fn fatigue_features(timing: &TimingSamples) -> [f64; 2] {
    let n = timing.keydowns.len();
    let mid = n / 2;

    let flights_in = |range: std::ops::Range<usize>| -> Vec<f64> {
        timing.keydowns[range]
            .windows(2)
            .map(|pair| (pair[1].1 - pair[0].1) as f64)
            .filter(|&f| f > 0.0 && f <= VALID_INTERVAL_MS)
            .collect()
    };

    let first_flight = stats::mean(&flights_in(0..mid));
    let second_flight = stats::mean(&flights_in(mid..n));
    let speed_decay = if first_flight > 0.0 {
        (second_flight - first_flight) / first_flight
    } else {
        0.0
    };

    let first_dwells: Vec<f64> = timing
        .dwell_samples
        .iter()
        .filter(|&&(idx, _)| idx < mid)
        .map(|&(_, d)| d)
        .collect();
    let second_dwells: Vec<f64> = timing
        .dwell_samples
        .iter()
        .filter(|&&(idx, _)| idx >= mid)
        .map(|&(_, d)| d)
        .collect();
    let first_dwell = stats::mean(&first_dwells);
    let second_dwell = stats::mean(&second_dwells);
    let dwell_drift = if first_dwell > 0.0 {
        (second_dwell - first_dwell) / first_dwell
    } else {
        0.0
    };

    [speed_decay, dwell_drift]
}

fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

// =============================================================================
// Tests
// =============================================================================
