use anyhow::{Context, Result};
use quizsync_core::models::{now_ms, SessionSummary, SyncQueueEntry, UserRecord};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Local SQLite cache used by quizsync-syncd.
///
/// One row per persisted field, keyed `{app_id}_{field}` so that multiple
/// application deployments sharing a device never see each other's data.
/// The namespacing is a hard invariant, not an optimization.
pub struct LocalStore {
    conn: Connection,
    app_id: String,
}

impl LocalStore {
    /// Open the cache at the given path and initialize tables if needed.
    pub fn open(path: &Path, app_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache database: {}", path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn,
            app_id: app_id.to_string(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn storage_key(&self, field: &str) -> String {
        format!("{}_{}", self.app_id, field)
    }

    fn get_raw(&self, field: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM cache WHERE key = ?1")?;
        let mut rows = stmt.query(params![self.storage_key(field)])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put_raw(&self, field: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cache (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![self.storage_key(field), value],
        )?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned + Default>(&self, field: &str) -> Result<T> {
        match self.get_raw(field)? {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Ok(value),
                Err(e) => {
                    eprintln!(
                        "WARNING: Discarding unreadable cache entry {}: {}",
                        self.storage_key(field),
                        e
                    );
                    Ok(T::default())
                }
            },
            None => Ok(T::default()),
        }
    }

    fn put_json<T: Serialize>(&self, field: &str, value: &T) -> Result<()> {
        self.put_raw(field, &serde_json::to_string(value)?)
    }

    /// Reconstruct the user record from per-field entries.
    ///
    /// Absence is a valid initial state: missing fields come back as empty
    /// containers, so this never fails on a fresh device.
    pub fn load(&self) -> Result<UserRecord> {
        let mut record = UserRecord {
            mistakes: self.get_json("mistakes")?,
            archive: self.get_json("archive")?,
            fav: self.get_json("fav")?,
            settings: self.get_json("settings")?,
            app_id: self.app_id.clone(),
            ..UserRecord::default()
        };
        record.last_updated = self
            .get_raw("last_sync")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(record)
    }

    /// Write every field back to storage and stamp `last_updated` with the
    /// local clock. No remote call is made here.
    pub fn persist(&self, record: &mut UserRecord) -> Result<()> {
        let now = now_ms();
        self.put_json("mistakes", &record.mistakes)?;
        self.put_json("archive", &record.archive)?;
        self.put_json("fav", &record.fav)?;
        self.put_json("settings", &record.settings)?;
        self.put_raw("last_sync", &now.to_string())?;
        record.last_updated = now;
        Ok(())
    }

    /// Per-device session history; never synchronized.
    pub fn load_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.get_json("sessions")
    }

    pub fn append_session(&self, summary: &SessionSummary) -> Result<()> {
        let mut sessions = self.load_sessions()?;
        sessions.push(summary.clone());
        self.put_json("sessions", &sessions)
    }

    /// Offline write queue, persisted so it survives process restart.
    pub fn load_queue(&self) -> Result<Vec<SyncQueueEntry>> {
        self.get_json("sync_queue")
    }

    pub fn save_queue(&self, entries: &[SyncQueueEntry]) -> Result<()> {
        self.put_json("sync_queue", &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizsync_core::models::UserIdentity;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, app_id: &str) -> LocalStore {
        LocalStore::open(&dir.path().join("cache.db"), app_id).unwrap()
    }

    #[test]
    fn load_on_empty_store_yields_empty_containers() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, "quizsync_v1");

        let record = store.load().unwrap();
        assert!(record.mistakes.is_empty());
        assert!(record.archive.is_empty());
        assert!(record.fav.is_empty());
        assert!(record.settings.is_empty());
        assert_eq!(record.last_updated, 0);
        assert!(store.load_sessions().unwrap().is_empty());
        assert!(store.load_queue().unwrap().is_empty());
    }

    #[test]
    fn persist_then_load_round_trips_and_stamps() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, "quizsync_v1");

        let mut record = UserRecord::default();
        record.mistakes.insert(3);
        record.mistakes.insert(17);
        record.fav.insert(5);
        record.settings.insert("theme".into(), "dark".into());
        record.owner = Some(UserIdentity(9));

        store.persist(&mut record).unwrap();
        assert!(record.last_updated > 0);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.mistakes, record.mistakes);
        assert_eq!(loaded.fav, record.fav);
        assert_eq!(loaded.settings, record.settings);
        assert_eq!(loaded.last_updated, record.last_updated);
    }

    #[test]
    fn app_ids_isolate_their_namespaces() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("cache.db");

        {
            let store = LocalStore::open(&db_path, "quizsync_v1").unwrap();
            let mut record = UserRecord::default();
            record.mistakes.insert(42);
            store.persist(&mut record).unwrap();
        }

        // a second deployment on the same device sees nothing
        let other = LocalStore::open(&db_path, "quizsync_v2").unwrap();
        assert!(other.load().unwrap().mistakes.is_empty());

        let original = LocalStore::open(&db_path, "quizsync_v1").unwrap();
        assert!(original.load().unwrap().mistakes.contains(&42));
    }

    #[test]
    fn session_history_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, "quizsync_v1");

        for n in 1..=3u32 {
            let summary = SessionSummary {
                questions: n,
                correct: n,
                ..SessionSummary::default()
            };
            store.append_session(&summary).unwrap();
        }

        let sessions = store.load_sessions().unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[2].questions, 3);
    }
}
