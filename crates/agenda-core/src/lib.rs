//! # Agenda Core
//!
//! Data model and pure algorithms shared by the scheduler, storage, and the
//! binary:
//! - [`event`] — events, drafts, and series metadata
//! - [`recurrence`] — recurrence rules and lazy expansion
//! - [`availability`] — free-slot search inside a working window
//! - [`storage`] — the `Storage` capability plus an in-memory backend
//! - [`config`] — TOML configuration
//! - [`error`] — `AgendaError` and `Result`

pub mod availability;
pub mod config;
pub mod error;
pub mod event;
pub mod recurrence;
pub mod storage;

pub use availability::{FreeSlot, Interval, WorkingHours};
pub use config::AgendaConfig;
pub use error::{AgendaError, Result};
pub use event::{Event, EventDraft, Series, TASK_CATEGORY};
pub use recurrence::{Frequency, RecurrenceEnd, RecurrenceRule};
pub use storage::{MemoryStorage, Storage};
