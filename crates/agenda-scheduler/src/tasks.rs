//! Scheduled tasks — the engine's unit of work.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use agenda_core::event::Event;

use crate::registry::{Callback, CallbackRegistry};

/// A task armed on the engine, carrying its already-bound callbacks.
#[derive(Clone)]
pub struct ScheduledTask {
    /// Mirrors the owning event id when lowered from an event.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Category of the owning event (diagnostics only).
    pub category: String,
    /// Main fire time.
    pub fire_at: DateTime<Utc>,
    /// Reminder times, each strictly before `fire_at`.
    pub pre_notify_at: Vec<DateTime<Utc>>,
    /// Handler names the callbacks were bound from.
    pub notifier_name: String,
    pub action_name: String,
    /// Invoked for every reminder and at the main fire time.
    pub notify: Option<Callback>,
    /// Invoked at the main fire time only.
    pub action: Option<Callback>,
    /// Re-arm interval for recurring tasks.
    pub repeat: Option<Duration>,
}

impl ScheduledTask {
    /// A one-shot task with no callbacks.
    pub fn once(id: &str, title: &str, fire_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            category: String::new(),
            fire_at,
            pre_notify_at: Vec::new(),
            notifier_name: String::new(),
            action_name: String::new(),
            notify: None,
            action: None,
            repeat: None,
        }
    }

    /// Re-arm every `interval` after each main fire.
    pub fn every(mut self, interval: Duration) -> Self {
        self.repeat = Some(interval);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_pre_notify(mut self, at: DateTime<Utc>) -> Self {
        self.pre_notify_at.push(at);
        self
    }

    pub fn with_notify(mut self, name: &str, cb: Callback) -> Self {
        self.notifier_name = name.to_string();
        self.notify = Some(cb);
        self
    }

    pub fn with_action(mut self, name: &str, cb: Callback) -> Self {
        self.action_name = name.to_string();
        self.action = Some(cb);
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat.is_some()
    }

    /// Lower one occurrence of `event` into a task.
    ///
    /// Handlers are resolved now and bound to the event's id and title. A single
    /// reminder `lead` before the occurrence is added when the occurrence is at
    /// least `lead` away and the reminder is still in the future.
    pub fn from_event(
        event: &Event,
        occurrence: DateTime<Utc>,
        registry: &CallbackRegistry,
        lead: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let mut task = Self::once(&event.id, &event.title, occurrence).with_category(&event.category);
        task.notifier_name = event.notifier.clone();
        task.action_name = event.action.clone();
        task.notify = registry.bind_notifier(&event.notifier, &event.id, &event.title);
        task.action = registry.bind_action(&event.action);

        if lead > Duration::zero() && occurrence - now >= lead {
            let reminder = occurrence - lead;
            if reminder > now {
                task.pre_notify_at.push(reminder);
            }
        }
        task
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("fire_at", &self.fire_at)
            .field("pre_notify_at", &self.pre_notify_at)
            .field("notify", &self.notifier_name)
            .field("action", &self.action_name)
            .field("repeat", &self.repeat)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenda_core::event::EventDraft;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap()
    }

    fn registry() -> CallbackRegistry {
        let registry = CallbackRegistry::new();
        registry.register_notifier("console", |_, _| async { anyhow::Ok(()) });
        registry.register_action("hello", || async { anyhow::Ok(()) });
        registry
    }

    #[test]
    fn test_from_event_binds_handlers_and_reminder() {
        let event = EventDraft::task("Call", now() + Duration::hours(1), "console", "hello")
            .into_event("e1".into());
        let task = ScheduledTask::from_event(&event, event.start, &registry(), Duration::minutes(10), now());
        assert_eq!(task.id, "e1");
        assert!(task.notify.is_some());
        assert!(task.action.is_some());
        assert_eq!(task.pre_notify_at, vec![event.start - Duration::minutes(10)]);
    }

    #[test]
    fn test_reminder_skipped_when_too_close() {
        let event = EventDraft::task("Soon", now() + Duration::minutes(5), "console", "")
            .into_event("e2".into());
        let task = ScheduledTask::from_event(&event, event.start, &registry(), Duration::minutes(10), now());
        assert!(task.pre_notify_at.is_empty());
        assert!(task.action.is_none());
    }

    #[test]
    fn test_unknown_handlers_keep_names_for_diagnostics() {
        let event = EventDraft::task("Ghost", now() + Duration::hours(2), "pager", "teleport")
            .into_event("e3".into());
        let task = ScheduledTask::from_event(&event, event.start, &registry(), Duration::minutes(10), now());
        assert!(task.notify.is_none());
        assert!(task.action.is_none());
        assert_eq!(task.notifier_name, "pager");
        assert_eq!(task.action_name, "teleport");
    }
}
