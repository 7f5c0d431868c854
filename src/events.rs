//! Keystroke events and the input normalizer.
//!
//! Raw client events arrive as `{ key, timestamp, type }` JSON. Normalization
//! canonicalizes key names, orders events by time and drops `keyup` events
//! that never saw a matching `keydown`.

use serde::{Deserialize, Serialize};

/// Press or release of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEventKind {
    Keydown,
    Keyup,
}

/// A single time-stamped key event, as submitted by clients.
///
/// Timestamps are milliseconds, session-relative or wall-clock; only the
/// differences matter downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystrokeEvent {
    pub key: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: KeyEventKind,
}

impl KeystrokeEvent {
    pub fn down(key: &str, timestamp: i64) -> Self {
        Self {
            key: key.to_string(),
            timestamp,
            kind: KeyEventKind::Keydown,
        }
    }

    pub fn up(key: &str, timestamp: i64) -> Self {
        Self {
            key: key.to_string(),
            timestamp,
            kind: KeyEventKind::Keyup,
        }
    }
}

/// Canonical key name: lower-cased, with a literal space mapped to the
/// `"Space"` sentinel. Idempotent.
pub fn normalize_key(key: &str) -> String {
    if key == " " || key.eq_ignore_ascii_case("space") {
        return "Space".to_string();
    }
    key.to_lowercase()
}

/// Canonicalize and order a raw event stream.
///
/// Events are stable-sorted by timestamp, keys are normalized, and a `keyup`
/// is kept only when a matching `keydown` was observed since the last `keyup`
/// of the same key. Non-monotonic timestamps survive the sort; the feature
/// extractor's validity window handles the intervals they produce.
pub fn normalize_events(events: &[KeystrokeEvent]) -> Vec<KeystrokeEvent> {
    let mut sorted: Vec<KeystrokeEvent> = events
        .iter()
        .map(|e| KeystrokeEvent {
            key: normalize_key(&e.key),
            timestamp: e.timestamp,
            kind: e.kind,
        })
        .collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut held: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(sorted.len());

    for event in sorted {
        match event.kind {
            KeyEventKind::Keydown => {
                held.insert(event.key.clone());
                out.push(event);
            }
            KeyEventKind::Keyup => {
                if held.remove(&event.key) {
                    out.push(event);
                }
                // Unmatched keyup: silently dropped.
            }
        }
    }

    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("A"), "a");
        assert_eq!(normalize_key(" "), "Space");
        assert_eq!(normalize_key("Backspace"), "backspace");
        assert_eq!(normalize_key("Space"), "Space");
        // Idempotent
        assert_eq!(normalize_key(&normalize_key("Q")), "q");
    }

    #[test]
    fn test_sort_is_stable() {
        let events = vec![
            KeystrokeEvent::down("a", 10),
            KeystrokeEvent::up("a", 10),
            KeystrokeEvent::down("b", 5),
        ];
        let normalized = normalize_events(&events);
        assert_eq!(normalized[0].key, "b");
        // Same-timestamp pair keeps submission order.
        assert_eq!(normalized[1].kind, KeyEventKind::Keydown);
        assert_eq!(normalized[2].kind, KeyEventKind::Keyup);
    }

    #[test]
    fn test_orphan_keyup_dropped() {
        let events = vec![
            KeystrokeEvent::up("a", 5),
            KeystrokeEvent::down("a", 10),
            KeystrokeEvent::up("a", 80),
            KeystrokeEvent::up("a", 90),
        ];
        let normalized = normalize_events(&events);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].timestamp, 10);
        assert_eq!(normalized[1].timestamp, 80);
    }

    #[test]
    fn test_normalization_applied_before_matching() {
        let events = vec![
            KeystrokeEvent::down("A", 0),
            KeystrokeEvent::up("a", 50),
        ];
        let normalized = normalize_events(&events);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].key, "a");
    }

    #[test]
    fn test_event_json_shape() {
        let event = KeystrokeEvent::down("h", 120);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["key"], "h");
        assert_eq!(json["timestamp"], 120);
        assert_eq!(json["type"], "keydown");

        let parsed: KeystrokeEvent =
            serde_json::from_str(r#"{"key":" ","timestamp":3,"type":"keyup"}"#).unwrap();
        assert_eq!(parsed.kind, KeyEventKind::Keyup);
    }
}
