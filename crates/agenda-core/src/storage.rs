//! Storage capability consumed by the scheduler and the calendar facade.
//!
//! Any persistence engine satisfies [`Storage`]; the scheduler never depends
//! on a concrete query language. [`MemoryStorage`] is the in-process backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{AgendaError, Result};
use crate::event::{Event, EventDraft};

/// Persistence interface for events.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Events whose (first) start is strictly before `before`, ordered by start.
    async fn list_events_due_before(&self, before: DateTime<Utc>) -> Result<Vec<Event>>;

    async fn get_event(&self, id: &str) -> Result<Event>;

    async fn create_event(&self, draft: EventDraft) -> Result<Event>;

    /// Replace every field of an existing event.
    async fn update_event(&self, id: &str, draft: EventDraft) -> Result<Event>;

    /// Remove an event, returning what was stored.
    async fn delete_event(&self, id: &str) -> Result<Event>;
}

/// In-memory storage; ids are sequential integers.
pub struct MemoryStorage {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    events: HashMap<String, Event>,
    next_id: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|e| AgendaError::storage(format!("memory storage poisoned: {e}")))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_events_due_before(&self, before: DateTime<Utc>) -> Result<Vec<Event>> {
        let state = self.lock()?;
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|e| e.start < before)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn get_event(&self, id: &str) -> Result<Event> {
        let state = self.lock()?;
        state
            .events
            .get(id)
            .cloned()
            .ok_or_else(|| AgendaError::not_found(format!("event {id}")))
    }

    async fn create_event(&self, draft: EventDraft) -> Result<Event> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let event = draft.into_event(state.next_id.to_string());
        state.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn update_event(&self, id: &str, draft: EventDraft) -> Result<Event> {
        let mut state = self.lock()?;
        let slot = state
            .events
            .get_mut(id)
            .ok_or_else(|| AgendaError::not_found(format!("event {id}")))?;
        *slot = draft.into_event(id.to_string());
        Ok(slot.clone())
    }

    async fn delete_event(&self, id: &str) -> Result<Event> {
        let mut state = self.lock()?;
        state
            .events
            .remove(id)
            .ok_or_else(|| AgendaError::not_found(format!("event {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let storage = MemoryStorage::new();
        let created = storage.create_event(EventDraft::new("Call", at(9))).await.unwrap();
        assert_eq!(storage.get_event(&created.id).await.unwrap(), created);

        let updated = storage
            .update_event(&created.id, EventDraft::new("Call mom", at(10)))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, "Call mom");

        storage.delete_event(&created.id).await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let storage = MemoryStorage::new();
        assert!(storage.get_event("9").await.unwrap_err().is_not_found());
        assert!(storage.delete_event("9").await.unwrap_err().is_not_found());
        assert!(storage
            .update_event("9", EventDraft::new("x", at(1)))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_due_before_is_ordered_and_exclusive() {
        let storage = MemoryStorage::new();
        storage.create_event(EventDraft::new("late", at(15))).await.unwrap();
        storage.create_event(EventDraft::new("early", at(8))).await.unwrap();
        storage.create_event(EventDraft::new("edge", at(12))).await.unwrap();

        let due = storage.list_events_due_before(at(12)).await.unwrap();
        let titles: Vec<_> = due.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["early"]);

        let all = storage
            .list_events_due_before(at(12) + Duration::hours(6))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].title, "late");
    }
}
