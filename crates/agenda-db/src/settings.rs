//! Key/value settings persisted next to the events.

use agenda_core::error::{AgendaError, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Well-known setting keys.
pub mod keys {
    /// Base URL of the wake server.
    pub const WAKE_SERVER_URL: &str = "wake.server_url";
}

/// String settings table.
pub struct SettingsStore {
    conn: Mutex<Connection>,
}

impl SettingsStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| AgendaError::storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| AgendaError::storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(|e| AgendaError::storage(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| r.get(0))
            .optional()
            .map_err(|e| AgendaError::storage(e.to_string()))
    }

    /// Insert or overwrite a setting.
    pub fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| AgendaError::storage(e.to_string()))?;
        Ok(())
    }

    /// Remove a setting; returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute("DELETE FROM settings WHERE key = ?1", [key])
            .map_err(|e| AgendaError::storage(e.to_string()))?;
        Ok(n > 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AgendaError::storage(format!("settings lock poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite_remove() {
        let store = SettingsStore::open_in_memory().unwrap();
        assert_eq!(store.get_string(keys::WAKE_SERVER_URL).unwrap(), None);

        store.set_string(keys::WAKE_SERVER_URL, "http://10.0.0.2:9000").unwrap();
        store.set_string(keys::WAKE_SERVER_URL, "http://10.0.0.3:9000").unwrap();
        assert_eq!(
            store.get_string(keys::WAKE_SERVER_URL).unwrap().as_deref(),
            Some("http://10.0.0.3:9000")
        );

        assert!(store.remove(keys::WAKE_SERVER_URL).unwrap());
        assert!(!store.remove(keys::WAKE_SERVER_URL).unwrap());
    }

    #[test]
    fn test_shares_file_with_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agenda.db");
        let _events = crate::SqliteStorage::open(&path).unwrap();
        let store = SettingsStore::open(&path).unwrap();
        store.set_string("ui.theme", "dark").unwrap();
        drop(store);
        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.get_string("ui.theme").unwrap().as_deref(), Some("dark"));
    }
}
