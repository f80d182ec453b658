//! Recurrence rules and their expansion into concrete occurrence instants.
//!
//! Expansion is a pure function of the rule and the requested range: every
//! occurrence is computed from the anchor (`anchor + n * step`), never from
//! the previous occurrence, so re-expanding any range yields the same set.
//!
//! Monthly rules anchored on a day that a month does not have (the 31st, or
//! Feb 29th) land on the last day of that month and return to the anchor day
//! in longer months.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AgendaError, Result};

/// How often a series repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    /// Fixed step in seconds.
    Custom { every_secs: u64 },
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Custom { every_secs } => write!(f, "every:{every_secs}"),
        }
    }
}

impl FromStr for Frequency {
    type Err = AgendaError;

    /// Accepts `daily`, `weekly`, `monthly`, and `every:<seconds>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => {
                let secs = s
                    .strip_prefix("every:")
                    .and_then(|n| n.parse::<u64>().ok())
                    .ok_or_else(|| AgendaError::invalid_rule(format!("unknown frequency '{s}'")))?;
                Ok(Frequency::Custom { every_secs: secs })
            }
        }
    }
}

/// When a series stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceEnd {
    /// Total number of occurrences, anchor included.
    Count(u32),
    /// Last instant an occurrence may fall on (inclusive).
    Until(DateTime<Utc>),
}

/// A recurrence rule anchored at the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Repeat every N frequency units.
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub end: Option<RecurrenceEnd>,
    pub anchor: DateTime<Utc>,
}

fn default_interval() -> u32 { 1 }

impl RecurrenceRule {
    pub fn new(frequency: Frequency, anchor: DateTime<Utc>) -> Self {
        Self {
            frequency,
            interval: 1,
            end: None,
            anchor,
        }
    }

    pub fn daily(anchor: DateTime<Utc>) -> Self {
        Self::new(Frequency::Daily, anchor)
    }

    pub fn weekly(anchor: DateTime<Utc>) -> Self {
        Self::new(Frequency::Weekly, anchor)
    }

    pub fn monthly(anchor: DateTime<Utc>) -> Self {
        Self::new(Frequency::Monthly, anchor)
    }

    pub fn every(step: Duration, anchor: DateTime<Utc>) -> Self {
        Self::new(
            Frequency::Custom {
                every_secs: step.num_seconds().max(0) as u64,
            },
            anchor,
        )
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.end = Some(RecurrenceEnd::Count(count));
        self
    }

    pub fn until(mut self, last: DateTime<Utc>) -> Self {
        self.end = Some(RecurrenceEnd::Until(last));
        self
    }

    /// Reject rules the expander cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(AgendaError::invalid_rule("interval must be at least 1"));
        }
        if let Frequency::Custom { every_secs } = self.frequency {
            if every_secs == 0 {
                return Err(AgendaError::invalid_rule("custom step must be at least 1 second"));
            }
        }
        match self.end {
            Some(RecurrenceEnd::Count(0)) => {
                Err(AgendaError::invalid_rule("count must be at least 1"))
            }
            Some(RecurrenceEnd::Until(last)) if last < self.anchor => Err(
                AgendaError::invalid_rule("end date is before the first occurrence"),
            ),
            _ => Ok(()),
        }
    }

    /// The `n`-th occurrence (0 = anchor), ignoring the end condition.
    pub fn nth(&self, n: u64) -> Option<DateTime<Utc>> {
        let steps = n.checked_mul(self.interval as u64)?;
        match self.frequency {
            Frequency::Monthly => {
                let months = u32::try_from(steps).ok()?;
                self.anchor.checked_add_months(Months::new(months))
            }
            _ => {
                let secs = self.step_secs()?.checked_mul(n)?;
                let secs = i64::try_from(secs).ok()?;
                self.anchor.checked_add_signed(Duration::try_seconds(secs)?)
            }
        }
    }

    /// Fixed step length for non-monthly rules.
    fn step_secs(&self) -> Option<u64> {
        let unit: u64 = match self.frequency {
            Frequency::Daily => 86_400,
            Frequency::Weekly => 7 * 86_400,
            Frequency::Custom { every_secs } => every_secs,
            Frequency::Monthly => return None,
        };
        unit.checked_mul(self.interval as u64)
    }

    /// Index of the first occurrence that could fall on or after `at`.
    fn first_index_from(&self, at: DateTime<Utc>) -> u64 {
        if at <= self.anchor {
            return 0;
        }
        let elapsed = (at - self.anchor).num_seconds().max(0) as u64;
        match (self.frequency, self.step_secs()) {
            (Frequency::Monthly, _) => {
                // Each step is at least 28 days; start low and let the iterator skip.
                let per_step = 31 * 86_400 * self.interval as u64;
                (elapsed / per_step).saturating_sub(1)
            }
            (_, Some(step)) if step > 0 => elapsed / step,
            _ => 0,
        }
    }

    /// Whether any occurrence at or after `at` can still exist.
    fn exhausted_before(&self, index: u64, at: DateTime<Utc>) -> bool {
        match self.end {
            Some(RecurrenceEnd::Count(count)) => index >= count as u64,
            Some(RecurrenceEnd::Until(last)) => last < at,
            None => false,
        }
    }
}

/// Lazily expand `rule` into occurrences within `[range_start, range_end]`.
pub fn expand(
    rule: &RecurrenceRule,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> Occurrences {
    let index = rule.first_index_from(range_start);
    Occurrences {
        rule: rule.clone(),
        index,
        range_start,
        range_end,
        done: range_end < range_start || rule.validate().is_err(),
    }
}

/// Iterator over the occurrences of a rule inside a bounded range.
#[derive(Debug, Clone)]
pub struct Occurrences {
    rule: RecurrenceRule,
    index: u64,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    done: bool,
}

impl Iterator for Occurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.rule.exhausted_before(self.index, self.range_start) {
                self.done = true;
                break;
            }
            let Some(at) = self.rule.nth(self.index) else {
                self.done = true;
                break;
            };
            self.index += 1;

            if at > self.range_end {
                self.done = true;
                break;
            }
            if let Some(RecurrenceEnd::Until(last)) = self.rule.end {
                if at > last {
                    self.done = true;
                    break;
                }
            }
            if at >= self.range_start {
                return Some(at);
            }
        }
        None
    }
}
