//! Calendar facade — event mutations kept in sync with the engine, plus
//! read queries over expanded occurrences and free time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use agenda_core::availability::{self, FreeSlot, Interval, WorkingHours};
use agenda_core::error::Result;
use agenda_core::event::{Event, EventDraft};
use agenda_core::storage::Storage;

use crate::engine::SchedulerEngine;

/// One concrete instance of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub event_id: String,
    pub title: String,
    pub category: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Summary counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalendarStats {
    pub total_events: usize,
    pub recurring_events: usize,
    pub by_category: BTreeMap<String, usize>,
    /// Schedulable events with an occurrence still ahead within the horizon.
    pub upcoming_tasks: usize,
    pub armed_tasks: usize,
}

pub struct Calendar {
    storage: Arc<dyn Storage>,
    engine: Arc<SchedulerEngine>,
    hours: WorkingHours,
}

impl Calendar {
    pub fn new(storage: Arc<dyn Storage>, engine: Arc<SchedulerEngine>, hours: WorkingHours) -> Self {
        Self { storage, engine, hours }
    }

    pub fn working_hours(&self) -> WorkingHours {
        self.hours
    }

    /// Validate, persist, and arm.
    pub async fn create(&self, draft: EventDraft) -> Result<Event> {
        let _guard = self.engine.reconcile_lock().await;
        let event = self.storage.create_event(draft.prepare()?).await?;
        let armed = self.engine.arm_from_event(&event);
        tracing::info!("📅 Event created: '{}' ({}), {} armed", event.title, event.id, armed.len());
        Ok(event)
    }

    /// Replace an event; stale armed tasks are cancelled before re-arming.
    pub async fn update(&self, id: &str, draft: EventDraft) -> Result<Event> {
        let _guard = self.engine.reconcile_lock().await;
        let event = self.storage.update_event(id, draft.prepare()?).await?;
        let armed = self.engine.arm_from_event(&event);
        tracing::info!("✏️ Event updated: '{}' ({}), {} armed", event.title, event.id, armed.len());
        Ok(event)
    }

    pub async fn delete(&self, id: &str) -> Result<Event> {
        let _guard = self.engine.reconcile_lock().await;
        let event = self.storage.delete_event(id).await?;
        let cancelled = self.engine.cancel_for_event(id);
        tracing::info!("🗑️ Event deleted: '{}' ({id}), {cancelled} cancelled", event.title);
        Ok(event)
    }

    pub async fn get(&self, id: &str) -> Result<Event> {
        self.storage.get_event(id).await
    }

    /// Every occurrence starting in `[from, to]`, sorted by start.
    pub async fn occurrences_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Occurrence>> {
        let events = self.storage.list_events_due_before(to + Duration::seconds(1)).await?;
        let mut out: Vec<Occurrence> = events
            .iter()
            .flat_map(|event| {
                event
                    .occurrences_between(from, to)
                    .into_iter()
                    .map(move |start| Occurrence {
                        event_id: event.id.clone(),
                        title: event.title.clone(),
                        category: event.category.clone(),
                        start,
                        end: start + event.duration(),
                    })
            })
            .collect();
        out.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.event_id.cmp(&b.event_id)));
        Ok(out)
    }

    /// Free slots inside the working window of one local day.
    pub async fn free_slots_on<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> Result<Vec<FreeSlot>> {
        let Some(window) = self.hours.window_on(date, tz) else {
            return Ok(Vec::new());
        };
        let booked = self.booked(window.start, window.end).await?;
        Ok(availability::free_slots(&booked, window))
    }

    /// Free slots for each day in `[from, to]`.
    pub async fn free_slots_between<Tz: TimeZone>(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        tz: &Tz,
    ) -> Result<Vec<FreeSlot>> {
        if to < from {
            return Ok(Vec::new());
        }
        let (Some(first), Some(last)) = (self.hours.window_on(from, tz), self.hours.window_on(to, tz)) else {
            return Ok(Vec::new());
        };
        let booked = self.booked(first.start, last.end).await?;
        Ok(availability::free_slots_in_range(&booked, from, to, self.hours, tz))
    }

    /// Earliest slot of at least `min_duration` starting at or after `from`,
    /// searching `days` days.
    pub async fn next_free_slot<Tz: TimeZone>(
        &self,
        min_duration: Duration,
        from: DateTime<Utc>,
        days: u32,
        tz: &Tz,
    ) -> Result<Option<FreeSlot>> {
        let until = from + Duration::days(i64::from(days) + 1);
        let booked = self.booked(from, until).await?;
        Ok(availability::next_slot(&booked, from, min_duration, days, self.hours, tz))
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<CalendarStats> {
        let events = self.storage.list_events_due_before(DateTime::<Utc>::MAX_UTC).await?;
        let config = self.engine.config();
        let horizon_end = now + config.horizon();

        let mut stats = CalendarStats {
            total_events: events.len(),
            armed_tasks: self.engine.armed_count(),
            ..CalendarStats::default()
        };
        for event in &events {
            *stats.by_category.entry(event.category.clone()).or_default() += 1;
            if event.is_recurring() {
                stats.recurring_events += 1;
            }
            if event.category == config.schedulable_category
                && event.occurrences_between(now, horizon_end).iter().any(|t| *t > now)
            {
                stats.upcoming_tasks += 1;
            }
        }
        Ok(stats)
    }

    async fn booked(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Interval>> {
        let events = self.storage.list_events_due_before(to).await?;
        Ok(events.iter().flat_map(|e| e.busy_between(from, to)).collect())
    }
}
