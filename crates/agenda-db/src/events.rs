//! SQLite-backed event storage.
//! Events survive restarts; the scheduler re-derives its queue from this table.

use agenda_core::error::{AgendaError, Result};
use agenda_core::event::{Event, EventDraft, Series};
use agenda_core::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const EVENT_COLUMNS: &str =
    "id, title, description, start, duration_secs, category, notifier, action, recurrence";

fn db_err(e: rusqlite::Error) -> AgendaError {
    AgendaError::storage(e.to_string())
}

/// Event table stored in a single SQLite file.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the database, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let storage = Self { conn: Mutex::new(conn) };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                start TEXT NOT NULL,              -- RFC 3339, UTC
                start_ts INTEGER NOT NULL,        -- unix seconds, for range queries
                duration_secs INTEGER NOT NULL DEFAULT 0,
                category TEXT NOT NULL DEFAULT '',
                notifier TEXT NOT NULL DEFAULT '',
                action TEXT NOT NULL DEFAULT '',
                recurrence TEXT,                  -- JSON series, NULL for single events
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_start ON events(start_ts);
            ",
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Number of stored events.
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AgendaError::storage(format!("connection lock poisoned: {e}")))
    }

    fn select_one(conn: &Connection, id: &str) -> Result<Event> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
        let row = conn
            .query_row(&sql, [id], read_row)
            .optional()
            .map_err(db_err)?;
        match row {
            Some(raw) => raw.into_event(),
            None => Err(AgendaError::not_found(format!("event {id}"))),
        }
    }
}

/// Column values as stored; decoded outside the rusqlite row callback.
struct RawEvent {
    id: String,
    title: String,
    description: String,
    start: String,
    duration_secs: i64,
    category: String,
    notifier: String,
    action: String,
    recurrence: Option<String>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        start: row.get(3)?,
        duration_secs: row.get(4)?,
        category: row.get(5)?,
        notifier: row.get(6)?,
        action: row.get(7)?,
        recurrence: row.get(8)?,
    })
}

impl RawEvent {
    fn into_event(self) -> Result<Event> {
        let start = DateTime::parse_from_rfc3339(&self.start)
            .map_err(|e| AgendaError::storage(format!("event {}: bad start '{}': {e}", self.id, self.start)))?
            .with_timezone(&Utc);
        let recurrence = match self.recurrence.as_deref() {
            Some(json) => Some(serde_json::from_str::<Series>(json)?),
            None => None,
        };
        Ok(Event {
            id: self.id,
            title: self.title,
            description: self.description,
            start,
            duration_secs: self.duration_secs.max(0) as u64,
            category: self.category,
            notifier: self.notifier,
            action: self.action,
            recurrence,
        })
    }
}

fn recurrence_json(draft: &EventDraft) -> Result<Option<String>> {
    match &draft.recurrence {
        Some(series) => Ok(Some(serde_json::to_string(series)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list_events_due_before(&self, before: DateTime<Utc>) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE start_ts <= ?1 ORDER BY start_ts, id"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([before.timestamp()], read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut events = Vec::with_capacity(rows.len());
        for raw in rows {
            // start_ts is truncated to whole seconds; the exact bound is checked here.
            let event = raw.into_event()?;
            if event.start < before {
                events.push(event);
            }
        }
        Ok(events)
    }

    async fn get_event(&self, id: &str) -> Result<Event> {
        let conn = self.lock()?;
        Self::select_one(&conn, id)
    }

    async fn create_event(&self, draft: EventDraft) -> Result<Event> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events
             (id, title, description, start, start_ts, duration_secs, category, notifier, action,
              recurrence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            rusqlite::params![
                id,
                draft.title,
                draft.description,
                draft.start.to_rfc3339(),
                draft.start.timestamp(),
                draft.duration_secs as i64,
                draft.category,
                draft.notifier,
                draft.action,
                recurrence_json(&draft)?,
                now,
            ],
        )
        .map_err(db_err)?;
        tracing::debug!("💾 Event stored: '{}' ({id})", draft.title);
        Ok(draft.into_event(id))
    }

    async fn update_event(&self, id: &str, draft: EventDraft) -> Result<Event> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE events SET title = ?2, description = ?3, start = ?4, start_ts = ?5,
                 duration_secs = ?6, category = ?7, notifier = ?8, action = ?9, recurrence = ?10,
                 updated_at = ?11
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    draft.title,
                    draft.description,
                    draft.start.to_rfc3339(),
                    draft.start.timestamp(),
                    draft.duration_secs as i64,
                    draft.category,
                    draft.notifier,
                    draft.action,
                    recurrence_json(&draft)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AgendaError::not_found(format!("event {id}")));
        }
        Ok(draft.into_event(id.to_string()))
    }

    async fn delete_event(&self, id: &str) -> Result<Event> {
        let conn = self.lock()?;
        let existing = Self::select_one(&conn, id)?;
        conn.execute("DELETE FROM events WHERE id = ?1", [id])
            .map_err(db_err)?;
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenda_core::recurrence::RecurrenceRule;
    use chrono::{Duration, TimeZone};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_get_roundtrip_with_series() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let draft = EventDraft::task("Water plants", at(2, 8), "console", "hello")
            .with_duration(Duration::minutes(15))
            .repeating(RecurrenceRule::weekly(at(2, 8)).with_count(4));
        let created = storage.create_event(draft).await.unwrap();
        assert_eq!(created.id.len(), 36);

        let loaded = storage.get_event(&created.id).await.unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.recurrence.unwrap().rule.end, created.recurrence.unwrap().rule.end);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let created = storage.create_event(EventDraft::new("Draft", at(5, 9))).await.unwrap();

        let updated = storage
            .update_event(&created.id, EventDraft::new("Final", at(6, 10)))
            .await
            .unwrap();
        assert_eq!(storage.get_event(&created.id).await.unwrap(), updated);

        let deleted = storage.delete_event(&created.id).await.unwrap();
        assert_eq!(deleted.title, "Final");
        assert_eq!(storage.count().unwrap(), 0);
        assert!(storage.delete_event(&created.id).await.unwrap_err().is_not_found());
        assert!(storage
            .update_event(&created.id, EventDraft::new("x", at(1, 1)))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_due_before_orders_by_start() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for (title, day) in [("c", 9), ("a", 3), ("b", 6), ("later", 20)] {
            storage.create_event(EventDraft::new(title, at(day, 12))).await.unwrap();
        }
        let due = storage.list_events_due_before(at(10, 0)).await.unwrap();
        let titles: Vec<_> = due.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);

        let none = storage.list_events_due_before(at(3, 12)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let id = {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.create_event(EventDraft::new("Keep me", at(1, 7))).await.unwrap().id
        };
        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.get_event(&id).await.unwrap().title, "Keep me");
    }
}
