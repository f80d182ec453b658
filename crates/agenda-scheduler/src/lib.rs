//! # Agenda Scheduler
//!
//! Wall-clock task scheduler for personal calendar events.
//!
//! ## Design
//! - One driver loop, one min-heap of armed triggers, no polling tick
//! - Callbacks resolved by name at arm time; unknown names are no-ops
//! - Callback failures and panics stay on their worker task
//! - Wake and daily maintenance are ordinary recurring tasks on the same engine
//!
//! ## Architecture
//! ```text
//! Calendar (create / update / delete)
//!   ├── Storage (events, durable)
//!   └── SchedulerEngine::arm_from_event → cancel + re-arm
//!
//! SchedulerEngine (tokio task)
//!   ├── TaskQueue: (fire_at, seq) min-heap
//!   ├── sleep until next trigger (or Notify on arm/cancel)
//!   └── due → JoinSet worker → notify / action callback
//!
//! WakeScheduler
//!   ├── wake: lead before the day's first task → POST wake endpoint
//!   └── maintenance (daily, local time, re-arms itself): schedule_today → rehydrate → prune
//! ```

pub mod builtins;
pub mod calendar;
pub mod dispatch;
pub mod engine;
pub mod history;
pub mod queue;
pub mod registry;
pub mod tasks;
pub mod wake;

pub use calendar::{Calendar, CalendarStats, Occurrence};
pub use engine::SchedulerEngine;
pub use history::{FireOutcome, FireRecord};
pub use queue::{ArmedTask, TaskHandle, TriggerKind};
pub use registry::{Callback, CallbackRegistry};
pub use tasks::ScheduledTask;
pub use wake::{WakeScheduler, WakeStatus};
