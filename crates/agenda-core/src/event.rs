//! Event definitions — the durable data model the scheduler is derived from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::availability::Interval;
use crate::error::{AgendaError, Result};
use crate::recurrence::{self, RecurrenceRule};

/// Category value that marks an event as eligible for scheduling.
pub const TASK_CATEGORY: &str = "task";

/// Recurrence metadata attached to a series anchor event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub rule: RecurrenceRule,
    /// External series identifier (e.g. an imported calendar series).
    #[serde(default)]
    pub series_id: Option<String>,
}

/// A persisted calendar event or task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque id assigned by storage.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Absolute start instant (first occurrence for a series).
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub duration_secs: u64,
    /// Free-form tag; `"task"` marks schedulable entries.
    #[serde(default)]
    pub category: String,
    /// Registered notifier handler name, empty for none.
    #[serde(default)]
    pub notifier: String,
    /// Registered action handler name, empty for none.
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub recurrence: Option<Series>,
}

impl Event {
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs as i64)
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration()
    }

    pub fn is_task(&self) -> bool {
        self.category == TASK_CATEGORY
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Start instants of this event inside `[from, to]`, series expanded.
    pub fn occurrences_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        match &self.recurrence {
            Some(series) => recurrence::expand(&series.rule, from, to).collect(),
            None if self.start >= from && self.start <= to => vec![self.start],
            None => Vec::new(),
        }
    }

    /// Busy intervals this event occupies that overlap `[from, to]`.
    pub fn busy_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Interval> {
        let duration = self.duration();
        // Widen the lower bound so occurrences that started earlier but still overlap count.
        self.occurrences_between(from - duration, to)
            .into_iter()
            .map(|start| Interval::new(start, start + duration))
            .filter(|i| i.end > from && i.start < to)
            .collect()
    }

    /// The draft this event was created from.
    pub fn to_draft(&self) -> EventDraft {
        EventDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            start: self.start,
            duration_secs: self.duration_secs,
            category: self.category.clone(),
            notifier: self.notifier.clone(),
            action: self.action.clone(),
            recurrence: self.recurrence.clone(),
        }
    }
}

/// Input for creating or replacing an event; storage assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub notifier: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub recurrence: Option<Series>,
}

impl EventDraft {
    pub fn new(title: &str, start: DateTime<Utc>) -> Self {
        Self {
            title: title.to_string(),
            description: String::new(),
            start,
            duration_secs: 0,
            category: String::new(),
            notifier: String::new(),
            action: String::new(),
            recurrence: None,
        }
    }

    /// A schedulable task firing the given handlers.
    pub fn task(title: &str, start: DateTime<Utc>, notifier: &str, action: &str) -> Self {
        Self {
            category: TASK_CATEGORY.to_string(),
            notifier: notifier.to_string(),
            action: action.to_string(),
            ..Self::new(title, start)
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = duration.num_seconds().max(0) as u64;
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn repeating(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence = Some(Series { rule, series_id: None });
        self
    }

    /// Re-anchor the recurrence rule at `start` and validate.
    pub fn prepare(mut self) -> Result<Self> {
        if self.title.trim().is_empty() {
            return Err(AgendaError::invalid_event("title must not be empty"));
        }
        if let Some(series) = self.recurrence.as_mut() {
            series.rule.anchor = self.start;
            series.rule.validate()?;
        }
        Ok(self)
    }

    /// Materialize the draft under a storage-assigned id.
    pub fn into_event(self, id: String) -> Event {
        Event {
            id,
            title: self.title,
            description: self.description,
            start: self.start,
            duration_secs: self.duration_secs,
            category: self.category,
            notifier: self.notifier,
            action: self.action,
            recurrence: self.recurrence,
        }
    }
}
