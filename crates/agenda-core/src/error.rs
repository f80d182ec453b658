//! Unified error types for Agenda.

use thiserror::Error;

/// Result type alias using AgendaError.
pub type Result<T> = std::result::Result<T, AgendaError>;

#[derive(Error, Debug)]
pub enum AgendaError {
    // Model errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid recurrence rule: {0}")]
    InvalidRecurrenceRule(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    // Outbound calls (wake endpoint, protocol actions, webhooks)
    #[error("Transport error: {0}")]
    Transport(String),

    // Persistence
    #[error("Storage error: {0}")]
    Storage(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgendaError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_rule(msg: impl Into<String>) -> Self {
        Self::InvalidRecurrenceRule(msg.into())
    }

    pub fn invalid_event(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error refers to a missing event or task.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
