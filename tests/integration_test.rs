use keyprint_core::api::{IdentifyStatus, ProfilerService, SessionSubmission};
use keyprint_core::config::ProfilerConfig;
use keyprint_core::error::ProfilerError;
use keyprint_core::events::KeystrokeEvent;
use keyprint_core::store::SessionStore;
use keyprint_core::training;
use keyprint_core::KeyEventKind;
use std::sync::Arc;
use tempfile::TempDir;

const PROSE: &str = "the quick brown fox jumps over the lazy dog and runs on ";

/// Type `chars` characters of prose with a per-subject timing signature.
fn typed_passage(dwell: i64, flight: i64, chars: usize, jitter: i64) -> Vec<KeystrokeEvent> {
    let mut events = Vec::new();
    let mut t = 0i64;
    for (i, c) in PROSE.chars().cycle().take(chars).enumerate() {
        let key = c.to_string();
        let wobble = (i as i64 % 5) * jitter;
        events.push(KeystrokeEvent::down(&key, t));
        events.push(KeystrokeEvent::up(&key, t + dwell + wobble));
        t += flight + wobble;
    }
    events
}

fn request(events: Vec<KeystrokeEvent>, session_id: Option<&str>) -> SessionSubmission {
    SessionSubmission {
        platform: "test".to_string(),
        events,
        session_id: session_id.map(str::to_string),
    }
}

/// Service with two clearly distinct trained subjects.
async fn trained_service(data_dir: &std::path::Path) -> Arc<ProfilerService> {
    let config = ProfilerConfig::with_data_dir(data_dir);
    let service = ProfilerService::open(config).unwrap();

    for i in 0..3 {
        service
            .submit_session("alice", request(typed_passage(60, 110, 60, i), None))
            .await
            .unwrap();
        service
            .submit_session("bob", request(typed_passage(150, 270, 60, i), None))
            .await
            .unwrap();
    }
    service.train().unwrap();
    service
}

#[tokio::test]
async fn test_identify_single_sample() {
    let tmp = TempDir::new().unwrap();
    let service = trained_service(tmp.path()).await;

    let response = service
        .identify(request(typed_passage(60, 110, 50, 1), Some("session-one")))
        .unwrap();

    assert_eq!(response.user, "alice");
    assert_eq!(response.session_id, "session-one");
    assert_ne!(response.status, IdentifyStatus::Error);
    assert!(response.confidence > 0.0 && response.confidence <= 100.0);
    assert!(response.message.contains("1 sample"));
}

#[tokio::test]
async fn test_progressive_authentication() {
    let tmp = TempDir::new().unwrap();
    let service = trained_service(tmp.path()).await;

    let mut last = None;
    for i in 0..5 {
        let response = service
            .identify(request(typed_passage(60, 110, 50, i), Some("progressive")))
            .unwrap();
        assert_eq!(response.user, "alice");
        last = Some(response);
    }

    let response = last.unwrap();
    assert_eq!(response.status, IdentifyStatus::Authenticated);
    assert!(response.confidence > 75.0);
    assert!(response.message.contains("5 sample"));
}

#[tokio::test]
async fn test_ambiguous_evidence_keeps_gathering() {
    let tmp = TempDir::new().unwrap();
    let service = trained_service(tmp.path()).await;

    // Timing midway between the two trained subjects.
    let response = service
        .identify(request(typed_passage(105, 190, 50, 1), Some("ambiguous")))
        .unwrap();

    assert_ne!(response.status, IdentifyStatus::Error);
    assert!(response.user == "alice" || response.user == "bob");
    assert!(response.confidence >= 5.0 && response.confidence <= 99.0);
}

#[test]
fn test_unknown_labels_filtered_from_training() {
    let tmp = TempDir::new().unwrap();
    let store = SessionStore::open(tmp.path().join("sessions.db")).unwrap();

    for _ in 0..4 {
        store
            .insert("Unknown", "test", &typed_passage(80, 150, 60, 1))
            .unwrap();
    }
    store
        .insert("alice", "test", &typed_passage(60, 110, 60, 1))
        .unwrap();

    let sessions = store.labeled_sessions().unwrap();
    assert_eq!(sessions.len(), 1);

    let err = training::train(&sessions, &Default::default()).unwrap_err();
    assert!(matches!(err, ProfilerError::InsufficientData(_)));
}

#[tokio::test]
async fn test_train_failure_keeps_previous_model() {
    let tmp = TempDir::new().unwrap();
    let service = trained_service(tmp.path()).await;
    let before = service.status().unwrap();
    assert!(before.model_loaded);

    // A fresh service over the same directory but an empty store: training
    // fails, the artifact already on disk stays live.
    let empty = ProfilerService::open_in_memory(ProfilerConfig::with_data_dir(tmp.path())).unwrap();
    assert!(empty.train().is_err());
    assert!(empty.status().unwrap().model_loaded);

    let response = empty
        .identify(request(typed_passage(60, 110, 50, 1), None))
        .unwrap();
    assert_ne!(response.status, IdentifyStatus::Error);
}

#[test]
fn test_identify_without_model() {
    let tmp = TempDir::new().unwrap();
    let config = ProfilerConfig::with_data_dir(tmp.path());
    let service = ProfilerService::open(config).unwrap();

    let response = service
        .identify(request(typed_passage(80, 150, 30, 1), None))
        .unwrap();

    assert_eq!(response.user, "Unknown");
    assert_eq!(response.confidence, 0.0);
    assert_eq!(response.status, IdentifyStatus::Error);
    assert!(!response.session_id.is_empty());
}

#[test]
fn test_identify_with_too_few_events() {
    let tmp = TempDir::new().unwrap();
    let config = ProfilerConfig::with_data_dir(tmp.path());
    let service = ProfilerService::open(config).unwrap();

    let events = vec![
        KeystrokeEvent::down("a", 0),
        KeystrokeEvent::up("a", 80),
        KeystrokeEvent::down("b", 150),
    ];
    let result = service.identify(request(events, None));
    assert!(matches!(
        result,
        Err(ProfilerError::InsufficientInput { needed: 5, got: 3 })
    ));
}

#[tokio::test]
async fn test_session_expiry_starts_over() {
    let tmp = TempDir::new().unwrap();
    let mut config = ProfilerConfig::with_data_dir(tmp.path());
    config.session.ttl_secs = 0;
    let service = ProfilerService::open(config).unwrap();

    // Reuse the artifact trained by a sibling service over the same dir.
    let trainer = trained_service(tmp.path()).await;
    drop(trainer);
    let service = ProfilerService::open(service.config().clone()).unwrap();

    let first = service
        .identify(request(typed_passage(60, 110, 50, 1), Some("expiring")))
        .unwrap();
    assert!(first.message.contains("1 sample"));

    std::thread::sleep(std::time::Duration::from_millis(20));

    let second = service
        .identify(request(typed_passage(60, 110, 50, 2), Some("expiring")))
        .unwrap();
    // The sliding window lapsed: the session starts from one sample again.
    assert!(second.message.contains("1 sample"));
}

#[tokio::test]
async fn test_retraining_with_new_subject_resets_session() {
    let tmp = TempDir::new().unwrap();
    let service = trained_service(tmp.path()).await;

    for i in 0..2 {
        service
            .identify(request(typed_passage(60, 110, 50, i), Some("drift")))
            .unwrap();
    }

    // A third subject joins and the model is rebuilt.
    for i in 0..2 {
        service
            .submit_session("carol", request(typed_passage(100, 420, 60, i), None))
            .await
            .unwrap();
    }
    service.train().unwrap();
    assert_eq!(service.status().unwrap().known_subjects.len(), 3);

    // The stored two-label evidence no longer matches: the session restarts.
    let response = service
        .identify(request(typed_passage(60, 110, 50, 3), Some("drift")))
        .unwrap();
    assert!(response.message.contains("1 sample"));
}

#[tokio::test]
async fn test_label_order_is_authoritative() {
    let tmp = TempDir::new().unwrap();
    let service = trained_service(tmp.path()).await;

    // Opposite probes must resolve to opposite subjects.
    let alice_like = service
        .identify(request(typed_passage(60, 110, 50, 1), Some("order-a")))
        .unwrap();
    let bob_like = service
        .identify(request(typed_passage(150, 270, 50, 1), Some("order-b")))
        .unwrap();

    assert_eq!(alice_like.user, "alice");
    assert_eq!(bob_like.user, "bob");
}

#[test]
fn test_wire_event_round_trip() {
    let json = r#"[
        {"key":"T","timestamp":0,"type":"keydown"},
        {"key":"T","timestamp":85,"type":"keyup"},
        {"key":" ","timestamp":140,"type":"keydown"},
        {"key":" ","timestamp":210,"type":"keyup"}
    ]"#;
    let events: Vec<KeystrokeEvent> = serde_json::from_str(json).unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events[2].kind, KeyEventKind::Keydown);

    let normalized = keyprint_core::normalize_events(&events);
    assert_eq!(normalized[0].key, "t");
    assert_eq!(normalized[2].key, "Space");
}
