//! Wake Scheduler — keeps the wake trigger and daily maintenance armed.
//!
//! The wake trigger fires `lead_minutes` before the day's first schedulable
//! event it can still precede and POSTs to the wake endpoint. Maintenance is a
//! one-shot task on the same engine that re-arms itself for the next local
//! `maintenance_time` each time it runs, so it stays on wall-clock time across
//! DST changes. Each pass re-plans today's wake, re-hydrates events that
//! entered the horizon, and prunes the queue.

use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use agenda_core::availability::local_to_utc;
use agenda_core::config::WakeConfig;
use agenda_core::error::{AgendaError, Result};
use agenda_core::storage::Storage;

use crate::dispatch::{self, WakeReason};
use crate::engine::SchedulerEngine;
use crate::queue::TaskHandle;
use crate::registry::callback;
use crate::tasks::ScheduledTask;

pub const WAKE_TASK_ID: &str = "system:wake";
pub const MAINTENANCE_TASK_ID: &str = "system:maintenance";
const SYSTEM_CATEGORY: &str = "system";

/// Snapshot of the wake scheduler's armed triggers.
#[derive(Debug, Clone, Serialize)]
pub struct WakeStatus {
    pub enabled: bool,
    pub server_url: String,
    pub next_wake: Option<DateTime<Utc>>,
    pub next_maintenance: Option<DateTime<Utc>>,
}

pub struct WakeScheduler {
    engine: Arc<SchedulerEngine>,
    storage: Arc<dyn Storage>,
    config: WakeConfig,
    client: reqwest::Client,
    wake: Mutex<Option<TaskHandle>>,
    maintenance: Mutex<Option<TaskHandle>>,
    me: Weak<WakeScheduler>,
}

impl WakeScheduler {
    pub fn new(
        engine: Arc<SchedulerEngine>,
        storage: Arc<dyn Storage>,
        config: WakeConfig,
    ) -> Result<Arc<Self>> {
        config.maintenance_time()?;
        let client = dispatch::build_client(&config.timeouts)?;
        Ok(Arc::new_cyclic(|me| Self {
            engine,
            storage,
            config,
            client,
            wake: Mutex::new(None),
            maintenance: Mutex::new(None),
            me: me.clone(),
        }))
    }

    pub fn config(&self) -> &WakeConfig {
        &self.config
    }

    /// Plan the wake trigger for the current local day.
    pub async fn schedule_today(&self) -> Result<Option<DateTime<Utc>>> {
        let (start, end) = day_bounds(Local::now().date_naive(), &Local)?;
        self.schedule_window(start, end, Utc::now()).await
    }

    /// Plan the wake trigger for the day `[day_start, day_end)`.
    ///
    /// Any previously armed wake is cancelled first, so repeated calls leave at
    /// most one. Returns the wake time when one was armed.
    pub async fn schedule_window(
        &self,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        if !self.config.is_active() {
            self.replace_wake(None);
            tracing::debug!("😴 Wake disabled (no endpoint configured)");
            return Ok(None);
        }

        let category = &self.engine.config().schedulable_category;
        let lead = self.config.lead();
        let events = self.storage.list_events_due_before(day_end).await?;
        let first = events
            .iter()
            .filter(|e| &e.category == category)
            .flat_map(|e| e.occurrences_between(day_start, day_end))
            .filter(|at| *at < day_end && *at - lead > now)
            .min();

        let Some(first) = first else {
            self.replace_wake(None);
            tracing::info!("😴 No task left today that a wake can precede; wake not armed");
            return Ok(None);
        };
        let wake_at = first - lead;

        let client = self.client.clone();
        let url = self.config.server_url.clone();
        let task = ScheduledTask::once(WAKE_TASK_ID, "Wake device", wake_at)
            .with_category(SYSTEM_CATEGORY)
            .with_action(
                "wake",
                callback(move || {
                    let client = client.clone();
                    let url = url.clone();
                    async move {
                        dispatch::send_wake(&client, &url, WakeReason::Scheduled, Some(first)).await?;
                        anyhow::Ok(())
                    }
                }),
            );
        self.replace_wake(Some(task));
        tracing::info!("🌅 Wake armed for {wake_at} (first task at {first})");
        Ok(Some(wake_at))
    }

    /// Arm the daily maintenance task at the next local `maintenance_time`,
    /// replacing any previous one. Returns the fire time.
    pub fn schedule_daily_maintenance(&self) -> Result<DateTime<Utc>> {
        self.arm_maintenance(Local, Utc::now())
    }

    /// Arm maintenance for the first `maintenance_time` in `tz` after `after`.
    /// When it fires it re-arms the following day before doing its work.
    fn arm_maintenance<Tz>(&self, tz: Tz, after: DateTime<Utc>) -> Result<DateTime<Utc>>
    where
        Tz: TimeZone + Send + Sync + 'static,
    {
        let time = self.config.maintenance_time()?;
        let at = next_local_time(time, after, &tz)?;
        let me = self.me.clone();
        let task = ScheduledTask::once(MAINTENANCE_TASK_ID, "Daily maintenance", at)
            .with_category(SYSTEM_CATEGORY)
            .with_action(
                "maintenance",
                callback(move || {
                    let me = me.clone();
                    let tz = tz.clone();
                    async move {
                        if let Some(wake) = me.upgrade() {
                            wake.maintenance_tick(tz).await?;
                        }
                        anyhow::Ok(())
                    }
                }),
            );

        let mut slot = self.maintenance.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            self.engine.cancel(previous);
        }
        *slot = Some(self.engine.arm(task));
        tracing::info!("🛠️ Daily maintenance armed for {at}");
        Ok(at)
    }

    /// A fired maintenance trigger: arm tomorrow's, then run the pass.
    async fn maintenance_tick<Tz>(&self, tz: Tz) -> Result<()>
    where
        Tz: TimeZone + Send + Sync + 'static,
    {
        if let Err(e) = self.arm_maintenance(tz, Utc::now()) {
            tracing::warn!("⚠️ Could not re-arm maintenance: {e}");
        }
        self.run_maintenance().await
    }

    /// One maintenance pass: re-plan today's wake, re-hydrate, prune.
    pub async fn run_maintenance(&self) -> Result<()> {
        tracing::info!("🛠️ Maintenance pass");
        if let Err(e) = self.schedule_today().await {
            tracing::warn!("⚠️ Wake planning failed: {e}");
        }
        self.engine.rehydrate(self.storage.as_ref()).await?;
        self.engine.prune();
        Ok(())
    }

    /// Send a wake request now.
    pub async fn trigger_wake(&self) -> Result<()> {
        if self.config.server_url.trim().is_empty() {
            return Err(AgendaError::config("wake server URL is not configured"));
        }
        dispatch::send_wake(&self.client, &self.config.server_url, WakeReason::Manual, None).await
    }

    pub fn status(&self) -> WakeStatus {
        let wake = *self.wake.lock().unwrap_or_else(|e| e.into_inner());
        let maintenance = *self.maintenance.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = self.engine.snapshot();
        let fire_time = |handle: Option<TaskHandle>| {
            handle.and_then(|h| snapshot.iter().find(|t| t.handle == h).map(|t| t.next_fire_at))
        };
        WakeStatus {
            enabled: self.config.is_active(),
            server_url: self.config.server_url.clone(),
            next_wake: fire_time(wake),
            next_maintenance: fire_time(maintenance),
        }
    }

    fn replace_wake(&self, task: Option<ScheduledTask>) {
        let mut slot = self.wake.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            self.engine.cancel(previous);
        }
        *slot = task.map(|t| self.engine.arm(t));
    }
}

/// `[midnight, next midnight)` of `date` in `tz`, as UTC instants.
pub fn day_bounds<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = date
        .succ_opt()
        .ok_or_else(|| AgendaError::config(format!("no day after {date}")))?;
    Ok((local_instant(date, NaiveTime::MIN, tz)?, local_instant(next, NaiveTime::MIN, tz)?))
}

/// The next instant strictly after `now` whose wall-clock time in `tz` is `time`.
pub fn next_local_time<Tz: TimeZone>(time: NaiveTime, now: DateTime<Utc>, tz: &Tz) -> Result<DateTime<Utc>> {
    let today = now.with_timezone(tz).date_naive();
    for date in today.iter_days().take(3) {
        let candidate = local_instant(date, time, tz)?;
        if candidate > now {
            return Ok(candidate);
        }
    }
    Err(AgendaError::config(format!("cannot place {time} after {now}")))
}

fn local_instant<Tz: TimeZone>(date: NaiveDate, time: NaiveTime, tz: &Tz) -> Result<DateTime<Utc>> {
    local_to_utc(date, time, tz)
        .ok_or_else(|| AgendaError::config(format!("{date} {time} does not exist locally")))
}
