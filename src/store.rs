//! Durable store for labeled training sessions.
//!
//! One row per submitted session: the raw event stream as JSON, the trusted
//! subject label, and submission metadata. Rows are immutable after insert.

use crate::error::Result;
use crate::events::KeystrokeEvent;
use crate::features::UNKNOWN_LABEL;
use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use rusqlite::{params, Connection};
use std::path::Path;
use uuid::Uuid;

/// A persisted labeled session.
#[derive(Debug, Clone)]
pub struct TrainingSession {
    pub id: Uuid,
    pub label: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub events: Vec<KeystrokeEvent>,
}

pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests and ephemeral use.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS training_sessions (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                raw_data_json   TEXT NOT NULL,
                platform        TEXT NOT NULL DEFAULT '',
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_training_sessions_user
                ON training_sessions(user_id);",
        )?;
        Ok(())
    }

    /// Append a labeled session and return the stored record.
    pub fn insert(
        &self,
        label: &str,
        platform: &str,
        events: &[KeystrokeEvent],
    ) -> Result<TrainingSession> {
        let session = TrainingSession {
            id: Uuid::new_v4(),
            label: label.to_string(),
            platform: platform.to_string(),
            created_at: Utc::now(),
            events: events.to_vec(),
        };

        let raw_json = serde_json::to_string(&session.events)?;
        self.conn.execute(
            "INSERT INTO training_sessions (id, user_id, raw_data_json, platform, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.to_string(),
                session.label,
                raw_json,
                session.platform,
                session.created_at.timestamp_millis(),
            ],
        )?;

        Ok(session)
    }

    /// All sessions with a trusted label, oldest first. Rows whose event
    /// blob no longer deserializes are skipped with a warning.
    pub fn labeled_sessions(&self) -> Result<Vec<TrainingSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, raw_data_json, platform, created_at
             FROM training_sessions
             WHERE user_id != '' AND user_id != ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![UNKNOWN_LABEL], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, label, raw_json, platform, created_ms) = row?;

            let events: Vec<KeystrokeEvent> = match serde_json::from_str(&raw_json) {
                Ok(events) => events,
                Err(e) => {
                    warn!("skipping session {id}: undeserializable event blob ({e})");
                    continue;
                }
            };
            let id = match Uuid::parse_str(&id) {
                Ok(id) => id,
                Err(e) => {
                    warn!("skipping session {id}: malformed id ({e})");
                    continue;
                }
            };

            sessions.push(TrainingSession {
                id,
                label,
                platform,
                created_at: Utc
                    .timestamp_millis_opt(created_ms)
                    .single()
                    .unwrap_or_else(Utc::now),
                events,
            });
        }
        Ok(sessions)
    }

    /// Total number of persisted sessions with a trusted label.
    pub fn labeled_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM training_sessions WHERE user_id != '' AND user_id != ?1",
            params![UNKNOWN_LABEL],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Session counts per label.
    pub fn counts_by_label(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, COUNT(*) FROM training_sessions
             GROUP BY user_id ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM training_sessions WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<KeystrokeEvent> {
        vec![
            KeystrokeEvent::down("a", 0),
            KeystrokeEvent::up("a", 80),
            KeystrokeEvent::down("b", 150),
            KeystrokeEvent::up("b", 230),
        ]
    }

    #[test]
    fn test_insert_and_list() {
        let store = SessionStore::open_in_memory().unwrap();
        store.insert("alice", "web", &sample_events()).unwrap();
        store.insert("bob", "web", &sample_events()).unwrap();

        let sessions = store.labeled_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].events.len(), 4);
        assert_eq!(store.labeled_count().unwrap(), 2);
    }

    #[test]
    fn test_unknown_label_excluded() {
        let store = SessionStore::open_in_memory().unwrap();
        store.insert("Unknown", "web", &sample_events()).unwrap();
        store.insert("alice", "web", &sample_events()).unwrap();

        let sessions = store.labeled_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].label, "alice");
        assert_eq!(store.labeled_count().unwrap(), 1);
    }

    #[test]
    fn test_counts_by_label() {
        let store = SessionStore::open_in_memory().unwrap();
        store.insert("alice", "web", &sample_events()).unwrap();
        store.insert("alice", "web", &sample_events()).unwrap();
        store.insert("bob", "web", &sample_events()).unwrap();

        let counts = store.counts_by_label().unwrap();
        assert_eq!(counts, vec![("alice".into(), 2), ("bob".into(), 1)]);
    }

    #[test]
    fn test_corrupt_blob_skipped() {
        let store = SessionStore::open_in_memory().unwrap();
        store.insert("alice", "web", &sample_events()).unwrap();
        store
            .conn
            .execute(
                "INSERT INTO training_sessions (id, user_id, raw_data_json, platform, created_at)
                 VALUES ('bad', 'bob', 'not json', '', 0)",
                [],
            )
            .unwrap();

        let sessions = store.labeled_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_delete() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.insert("alice", "web", &sample_events()).unwrap();
        store.delete(session.id).unwrap();
        assert_eq!(store.labeled_count().unwrap(), 0);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let store = SessionStore::open(&path).unwrap();
            store.insert("alice", "web", &sample_events()).unwrap();
        }
        let store = SessionStore::open(&path).unwrap();
        assert_eq!(store.labeled_count().unwrap(), 1);
    }
}
