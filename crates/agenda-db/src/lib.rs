//! # Agenda DB
//!
//! SQLite persistence for Agenda: the [`SqliteStorage`] event table
//! (implements `agenda_core::Storage`) and the [`SettingsStore`] key/value table.
//! Both live in the same database file.

pub mod events;
pub mod settings;

pub use events::SqliteStorage;
pub use settings::{SettingsStore, keys};
