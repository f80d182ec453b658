//! Scheduler Engine — one driver loop over the time-ordered task queue.
//!
//! The loop sleeps until the earliest armed trigger (capped at `max_idle_secs`
//! so wall-clock jumps are noticed), fires everything due, and goes back to
//! sleep. `arm`/`cancel` wake it through a `Notify`. Callbacks run on worker
//! tasks in a `JoinSet`; errors and panics are caught there and never reach
//! the loop.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{Notify, watch};
use tokio::task::{JoinHandle, JoinSet};

use agenda_core::config::SchedulerConfig;
use agenda_core::error::Result;
use agenda_core::event::Event;
use agenda_core::storage::Storage;

use crate::history::{FireHistory, FireOutcome, FireRecord};
use crate::queue::{ArmedTask, Firing, TaskHandle, TaskQueue, TriggerKind};
use crate::registry::{Callback, CallbackRegistry};
use crate::tasks::ScheduledTask;

struct Shared {
    queue: Mutex<TaskQueue>,
    wakeup: Notify,
    history: Mutex<FireHistory>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn history(&self) -> MutexGuard<'_, FireHistory> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Driver {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The scheduler engine — owns the armed set and the driver loop.
pub struct SchedulerEngine {
    shared: Arc<Shared>,
    registry: Arc<CallbackRegistry>,
    config: SchedulerConfig,
    driver: Mutex<Option<Driver>>,
    /// Held across a storage read or write and the arming that follows it.
    reconcile: tokio::sync::Mutex<()>,
}

impl SchedulerEngine {
    pub fn new(registry: Arc<CallbackRegistry>, config: SchedulerConfig) -> Self {
        let history = FireHistory::new(config.history_limit);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(TaskQueue::new()),
                wakeup: Notify::new(),
                history: Mutex::new(history),
            }),
            registry,
            config,
            driver: Mutex::new(None),
            reconcile: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Arm a task and wake the loop so it re-reads the next fire time.
    pub fn arm(&self, task: ScheduledTask) -> TaskHandle {
        let (id, fire_at) = (task.id.clone(), task.fire_at);
        let handle = self.shared.queue().arm(task, Utc::now());
        tracing::debug!("📅 Armed {handle} '{id}' for {fire_at}");
        self.shared.wakeup.notify_one();
        handle
    }

    /// Cancel a not-yet-fired task. Idempotent.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let removed = self.shared.queue().cancel(handle);
        if removed {
            tracing::debug!("🗑️ Cancelled {handle}");
            self.shared.wakeup.notify_one();
        }
        removed
    }

    /// Held by callers across a storage mutation and the arming that follows;
    /// `rehydrate` holds it across its listing.
    pub async fn reconcile_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.reconcile.lock().await
    }

    /// Lower an event into armed tasks, replacing any previously armed for its id.
    ///
    /// Non-schedulable categories only cancel. Series are expanded over the
    /// scheduling horizon; occurrences at or before now are skipped.
    pub fn arm_from_event(&self, event: &Event) -> Vec<TaskHandle> {
        self.arm_from_event_at(event, Utc::now())
    }

    fn arm_from_event_at(&self, event: &Event, now: DateTime<Utc>) -> Vec<TaskHandle> {
        let lead = self.config.pre_notify_lead();
        let horizon_end = self.horizon_end(now);

        let mut queue = self.shared.queue();
        queue.cancel_id(&event.id);
        if event.category != self.config.schedulable_category {
            return Vec::new();
        }

        let handles: Vec<TaskHandle> = event
            .occurrences_between(now, horizon_end)
            .into_iter()
            .filter(|at| *at > now)
            .map(|at| {
                let task = ScheduledTask::from_event(event, at, &self.registry, lead, now);
                queue.arm(task, now)
            })
            .collect();
        drop(queue);

        if !handles.is_empty() {
            tracing::debug!("📅 Event '{}' ({}) armed x{}", event.title, event.id, handles.len());
            self.shared.wakeup.notify_one();
        }
        handles
    }

    fn horizon_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.config.horizon())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether `event` would arm anything at `now`.
    fn has_upcoming(&self, event: &Event, now: DateTime<Utc>, horizon_end: DateTime<Utc>) -> bool {
        event.category == self.config.schedulable_category
            && event
                .occurrences_between(now, horizon_end)
                .iter()
                .any(|at| *at > now)
    }

    /// Cancel every task armed for `event_id`.
    pub fn cancel_for_event(&self, event_id: &str) -> usize {
        let removed = self.shared.queue().cancel_id(event_id);
        if removed > 0 {
            self.shared.wakeup.notify_one();
        }
        removed
    }

    /// Diagnostic listing of armed tasks, soonest first.
    pub fn snapshot(&self) -> Vec<ArmedTask> {
        self.shared.queue().snapshot()
    }

    pub fn armed_count(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.shared.queue().next_fire_at()
    }

    /// Recent fire records, oldest first.
    pub fn history(&self) -> Vec<FireRecord> {
        self.shared.history().records()
    }

    /// Drop cancelled entries from the heap.
    pub fn prune(&self) -> usize {
        let removed = self.shared.queue().compact();
        if removed > 0 {
            tracing::debug!("🧹 Pruned {removed} stale queue entries");
        }
        removed
    }

    /// Arm every schedulable future occurrence of the persisted events within
    /// the horizon. Safe to run repeatedly: each event's tasks are replaced.
    ///
    /// `rehydrate_limit` counts events with an occurrence still ahead; past
    /// events never use it up.
    pub async fn rehydrate(&self, storage: &dyn Storage) -> Result<usize> {
        let _guard = self.reconcile_lock().await;
        let now = Utc::now();
        let horizon_end = self.horizon_end(now);
        let mut events: Vec<Event> = storage
            .list_events_due_before(horizon_end)
            .await?
            .into_iter()
            .filter(|event| self.has_upcoming(event, now, horizon_end))
            .collect();
        let limit = self.config.rehydrate_limit;
        if events.len() > limit {
            tracing::warn!(
                "⚠️ Rehydrate: {} upcoming events within horizon, arming the first {limit}",
                events.len()
            );
            events.truncate(limit);
        }

        let armed: usize = events
            .iter()
            .map(|event| self.arm_from_event_at(event, now).len())
            .sum();
        tracing::info!(
            "♻️ Rehydrated {armed} tasks from {} events ({})",
            events.len(),
            storage.name()
        );
        Ok(armed)
    }

    /// Spawn the driver loop. Must be called inside a tokio runtime; a second
    /// call while running is ignored.
    pub fn start(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.is_some() {
            tracing::warn!("⚠️ Scheduler already running");
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let max_idle = StdDuration::from_secs(self.config.max_idle_secs.max(1));
        let handle = tokio::spawn(drive(self.shared.clone(), rx, max_idle));
        *driver = Some(Driver { shutdown, handle });
        tracing::info!("⏰ Scheduler started (max idle {}s)", max_idle.as_secs());
    }

    pub fn is_running(&self) -> bool {
        self.driver
            .lock()
            .map(|d| d.is_some())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for in-flight callbacks to finish.
    pub async fn stop(&self) {
        let driver = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(driver) = driver else {
            return;
        };
        let _ = driver.shutdown.send(true);
        if let Err(e) = driver.handle.await {
            tracing::warn!("⚠️ Scheduler loop ended abnormally: {e}");
        }
        tracing::info!("⏹️ Scheduler stopped");
    }
}

async fn drive(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>, max_idle: StdDuration) {
    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let due = shared.queue().take_due(Utc::now());
        for firing in due {
            let shared = shared.clone();
            workers.spawn(async move {
                let record = run_firing(firing).await;
                shared.history().record(record);
            });
        }
        while let Some(joined) = workers.try_join_next() {
            if let Err(e) = joined {
                tracing::warn!("⚠️ Callback worker failed: {e}");
            }
        }

        let next = shared.queue().next_fire_at();
        let sleep_for = match next {
            Some(at) => (at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO).min(max_idle),
            None => max_idle,
        };

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = shared.wakeup.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("⚠️ Callback worker failed: {e}");
        }
    }
}

/// Run the callbacks of one trigger: reminders notify, the main fire notifies
/// then acts. The action still runs when the notifier fails.
async fn run_firing(firing: Firing) -> FireRecord {
    let fired_at = Utc::now();
    let Firing { kind, scheduled_at, task, .. } = firing;
    tracing::info!("🔔 '{}' ({}) {:?} at {}", task.title, task.id, kind, scheduled_at);

    let mut callbacks: Vec<(&str, &Callback)> = Vec::with_capacity(2);
    if let Some(notify) = &task.notify {
        callbacks.push((task.notifier_name.as_str(), notify));
    }
    if kind == TriggerKind::Main {
        if let Some(action) = &task.action {
            callbacks.push((task.action_name.as_str(), action));
        }
    }

    let mut outcome = if callbacks.is_empty() {
        FireOutcome::Silent
    } else {
        FireOutcome::Ok
    };
    for (name, cb) in callbacks {
        let result = AssertUnwindSafe(async { cb().await }).catch_unwind().await;
        let failure = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => FireOutcome::Failed(format!("{name}: {e:#}")),
            Err(panic) => FireOutcome::Panicked(format!("{name}: {}", panic_message(panic.as_ref()))),
        };
        tracing::warn!(
            "⚠️ Task '{}' handler failed (fire at {scheduled_at}): {failure:?}",
            task.id
        );
        if !outcome.is_failure() {
            outcome = failure;
        }
    }

    FireRecord {
        task_id: task.id,
        title: task.title,
        kind,
        scheduled_at,
        fired_at,
        outcome,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::callback;
    use agenda_core::event::EventDraft;
    use agenda_core::recurrence::RecurrenceRule;
    use agenda_core::storage::MemoryStorage;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> SchedulerEngine {
        SchedulerEngine::new(Arc::new(CallbackRegistry::new()), SchedulerConfig::default())
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Callback {
        let counter = counter.clone();
        callback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
    }

    async fn refuse() -> anyhow::Result<()> {
        anyhow::bail!("unreachable host")
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("handler bug")
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_fires_once_at_time() {
        let engine = engine();
        let hits = Arc::new(AtomicUsize::new(0));
        engine.start();
        let task = ScheduledTask::once("t1", "Ping", Utc::now() + Duration::milliseconds(150))
            .with_action("count", counting(&hits));
        let fire_at = task.fire_at;
        engine.arm(task);

        wait_for(|| hits.load(Ordering::SeqCst) == 1).await;
        engine.stop().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.armed_count(), 0);
        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].fired_at >= fire_at);
    }

    #[tokio::test]
    async fn test_cancel_before_fire_suppresses_callbacks() {
        let engine = engine();
        let hits = Arc::new(AtomicUsize::new(0));
        engine.start();
        let handle = engine.arm(
            ScheduledTask::once("t1", "Never", Utc::now() + Duration::milliseconds(200))
                .with_notify("count", counting(&hits)),
        );
        assert!(engine.cancel(handle));
        tokio::time::sleep(StdDuration::from_millis(400)).await;
        engine.stop().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!engine.cancel(handle));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_callbacks_do_not_stop_loop() {
        let engine = engine();
        let hits = Arc::new(AtomicUsize::new(0));
        engine.start();
        let soon = Utc::now() + Duration::milliseconds(50);
        engine.arm(
            ScheduledTask::once("bad", "Bad", soon)
                .with_notify("err", callback(refuse))
                .with_action("panic", callback(explode)),
        );
        engine.arm(
            ScheduledTask::once("good", "Good", soon + Duration::milliseconds(100))
                .with_action("count", counting(&hits)),
        );

        wait_for(|| hits.load(Ordering::SeqCst) == 1).await;
        engine.stop().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let history = engine.history();
        let bad = history.iter().find(|r| r.task_id == "bad").unwrap();
        assert!(matches!(bad.outcome, FireOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_recurring_task_refires() {
        let engine = engine();
        let hits = Arc::new(AtomicUsize::new(0));
        engine.start();
        let handle = engine.arm(
            ScheduledTask::once("tick", "Tick", Utc::now() + Duration::milliseconds(50))
                .every(Duration::milliseconds(100))
                .with_action("count", counting(&hits)),
        );
        wait_for(|| hits.load(Ordering::SeqCst) >= 3).await;
        assert_eq!(engine.armed_count(), 1);
        engine.cancel(handle);
        engine.stop().await;
        assert!(hits.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_callbacks() {
        let engine = engine();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        engine.start();
        engine.arm(
            ScheduledTask::once("slow", "Slow", Utc::now()).with_action(
                "slow",
                callback(move || {
                    let flag = flag.clone();
                    async move {
                        tokio::time::sleep(StdDuration::from_millis(200)).await;
                        flag.store(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                }),
            ),
        );
        wait_for(|| engine.armed_count() == 0).await;
        engine.stop().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_arm_from_event_respects_category_and_replaces() {
        let engine = engine();
        let start = Utc::now() + Duration::hours(2);
        let task = EventDraft::task("Gym", start, "", "").into_event("e1".into());
        assert_eq!(engine.arm_from_event(&task).len(), 1);
        assert_eq!(engine.arm_from_event(&task).len(), 1);
        assert_eq!(engine.armed_count(), 1);
        assert_eq!(engine.snapshot()[0].pending_reminders.len(), 1);

        let mut note = task.clone();
        note.category = "note".into();
        assert!(engine.arm_from_event(&note).is_empty());
        assert_eq!(engine.armed_count(), 0);

        let past = EventDraft::task("Old", Utc::now() - Duration::hours(1), "", "").into_event("e2".into());
        assert!(engine.arm_from_event(&past).is_empty());
    }

    #[tokio::test]
    async fn test_series_expanded_within_horizon() {
        let mut config = SchedulerConfig::default();
        config.horizon_hours = 24 * 7;
        let engine = SchedulerEngine::new(Arc::new(CallbackRegistry::new()), config);
        let start = Utc::now() + Duration::hours(1);
        let series = EventDraft::task("Meds", start, "", "")
            .repeating(RecurrenceRule::daily(start))
            .prepare()
            .unwrap()
            .into_event("s1".into());
        let handles = engine.arm_from_event(&series);
        assert!((7..=8).contains(&handles.len()));
        assert_eq!(engine.cancel_for_event("s1"), handles.len());
    }

    #[tokio::test]
    async fn test_rehydrate_is_idempotent() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        storage.create_event(EventDraft::task("Future", now + Duration::hours(3), "", "")).await.unwrap();
        storage.create_event(EventDraft::task("Past", now - Duration::hours(3), "", "")).await.unwrap();
        storage.create_event(EventDraft::new("Note", now + Duration::hours(3))).await.unwrap();
        storage
            .create_event(EventDraft::task("Far", now + Duration::days(400), "", ""))
            .await
            .unwrap();

        let engine = engine();
        assert_eq!(engine.rehydrate(&storage).await.unwrap(), 1);
        assert_eq!(engine.rehydrate(&storage).await.unwrap(), 1);
        assert_eq!(engine.armed_count(), 1);
        assert_eq!(engine.snapshot()[0].title, "Future");
        assert!(engine.prune() >= 2);
    }

    #[tokio::test]
    async fn test_rehydrate_applies_limit() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        for i in 1..=5 {
            storage
                .create_event(EventDraft::task(&format!("t{i}"), now + Duration::hours(i), "", ""))
                .await
                .unwrap();
        }
        let mut config = SchedulerConfig::default();
        config.rehydrate_limit = 3;
        let engine = SchedulerEngine::new(Arc::new(CallbackRegistry::new()), config);
        assert_eq!(engine.rehydrate(&storage).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rehydrate_limit_ignores_past_events() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        for i in 1..=5 {
            storage
                .create_event(EventDraft::task(&format!("old{i}"), now - Duration::days(i), "", ""))
                .await
                .unwrap();
        }
        storage
            .create_event(EventDraft::new("Note", now + Duration::hours(1)))
            .await
            .unwrap();
        storage
            .create_event(EventDraft::task("Next", now + Duration::hours(2), "", ""))
            .await
            .unwrap();

        let mut config = SchedulerConfig::default();
        config.rehydrate_limit = 3;
        let engine = SchedulerEngine::new(Arc::new(CallbackRegistry::new()), config);
        assert_eq!(engine.rehydrate(&storage).await.unwrap(), 1);
        assert_eq!(engine.snapshot()[0].title, "Next");
    }

    #[tokio::test]
    async fn test_huge_horizon_does_not_overflow() {
        let mut config = SchedulerConfig::default();
        config.horizon_hours = i64::MAX;
        let engine = SchedulerEngine::new(Arc::new(CallbackRegistry::new()), config);
        let task = EventDraft::task("Far", Utc::now() + Duration::hours(1), "", "").into_event("e1".into());
        assert_eq!(engine.arm_from_event(&task).len(), 1);
    }
}
