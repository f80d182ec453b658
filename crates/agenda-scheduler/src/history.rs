//! Fire history — what the engine fired recently, and how it went.
//! In-memory ring buffer; nothing is persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::queue::TriggerKind;

/// How a fired trigger's callbacks finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FireOutcome {
    Ok,
    /// No callback was bound (unresolved handler names).
    Silent,
    Failed(String),
    Panicked(String),
}

impl FireOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Panicked(_))
    }
}

/// One fired trigger.
#[derive(Debug, Clone, Serialize)]
pub struct FireRecord {
    pub task_id: String,
    pub title: String,
    pub kind: TriggerKind,
    pub scheduled_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub outcome: FireOutcome,
}

/// Ring buffer of the most recent fire records.
pub struct FireHistory {
    records: VecDeque<FireRecord>,
    limit: usize,
}

impl FireHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Append a record, evicting the oldest past the limit.
    pub fn record(&mut self, record: FireRecord) {
        if self.limit == 0 {
            return;
        }
        self.records.push_back(record);
        while self.records.len() > self.limit {
            self.records.pop_front();
        }
    }

    /// Oldest first.
    pub fn records(&self) -> Vec<FireRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for FireHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
