//! Time-ordered task queue.
//!
//! A min-heap of `(fire time, sequence)` entries over a map of live tasks.
//! Cancellation removes the live task and leaves its heap entries behind;
//! stale entries are skipped when popped and dropped by [`TaskQueue::compact`].
//! Every (re-)arm bumps the task's epoch, so an entry only counts while its
//! epoch matches the live task. The queue is synchronous and clock-free:
//! callers pass `now`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crate::tasks::ScheduledTask;

/// Cancellation handle returned by `arm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskHandle(u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which trigger of a task fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A pre-notification: notify callback only.
    Reminder,
    /// The main fire time: notify, then action.
    Main,
}

/// A due trigger handed to the engine for execution.
#[derive(Debug, Clone)]
pub struct Firing {
    pub handle: TaskHandle,
    pub kind: TriggerKind,
    pub scheduled_at: DateTime<Utc>,
    pub task: ScheduledTask,
}

/// Diagnostic view of an armed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArmedTask {
    pub handle: TaskHandle,
    pub id: String,
    pub title: String,
    pub category: String,
    pub next_fire_at: DateTime<Utc>,
    pub pending_reminders: Vec<DateTime<Utc>>,
    pub repeat_secs: Option<i64>,
    pub notifier: String,
    pub action: String,
}

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    at: DateTime<Utc>,
    seq: u64,
    handle: TaskHandle,
    epoch: u64,
    kind: TriggerKind,
}

// BinaryHeap is a max-heap; reverse so the earliest (then first-armed) entry is on top.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Armed {
    task: ScheduledTask,
    epoch: u64,
}

/// Armed tasks ordered by next trigger time.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Entry>,
    live: HashMap<TaskHandle, Armed>,
    by_id: HashMap<String, Vec<TaskHandle>>,
    next_handle: u64,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a task. Reminders at or before `now`, or not before the main fire
    /// time, are dropped.
    pub fn arm(&mut self, mut task: ScheduledTask, now: DateTime<Utc>) -> TaskHandle {
        self.next_handle += 1;
        let handle = TaskHandle(self.next_handle);

        normalize_reminders(&mut task, now);
        push_entries(&mut self.heap, &mut self.next_seq, handle, 0, &task);
        self.by_id.entry(task.id.clone()).or_default().push(handle);
        self.live.insert(handle, Armed { task, epoch: 0 });
        handle
    }

    /// Remove a not-yet-fired task. Returns `false` if it was already gone.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let Some(armed) = self.live.remove(&handle) else {
            return false;
        };
        self.unindex(&armed.task.id, handle);
        true
    }

    /// Cancel every task armed under `id`. Returns how many were removed.
    pub fn cancel_id(&mut self, id: &str) -> usize {
        let handles = self.by_id.remove(id).unwrap_or_default();
        handles
            .into_iter()
            .filter(|h| self.live.remove(h).is_some())
            .count()
    }

    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn handles_for(&self, id: &str) -> Vec<TaskHandle> {
        self.by_id.get(id).cloned().unwrap_or_default()
    }

    /// Live task count.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Heap entries including stale ones.
    pub fn entry_count(&self) -> usize {
        self.heap.len()
    }

    /// Earliest live trigger time. Discards stale entries on top of the heap.
    pub fn next_fire_at(&mut self) -> Option<DateTime<Utc>> {
        while let Some(top) = self.heap.peek() {
            if self.is_current(top) {
                return Some(top.at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every trigger due at `now`, in fire-time then arming order.
    ///
    /// A fired one-shot task is removed. A recurring task is re-armed at its
    /// next fire time after `now` (missed intervals are skipped) with its
    /// reminders shifted by the same amount, so exactly one live instance
    /// remains.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.at > now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };
            let Some(armed) = self.live.get_mut(&entry.handle) else {
                continue;
            };
            if armed.epoch != entry.epoch {
                continue;
            }

            due.push(Firing {
                handle: entry.handle,
                kind: entry.kind,
                scheduled_at: entry.at,
                task: armed.task.clone(),
            });
            if entry.kind == TriggerKind::Reminder {
                continue;
            }

            match armed.task.repeat.filter(|step| *step > Duration::zero()) {
                Some(step) => {
                    let next = next_after(entry.at, step, now);
                    let shift = next - armed.task.fire_at;
                    armed.task.fire_at = next;
                    for reminder in armed.task.pre_notify_at.iter_mut() {
                        *reminder += shift;
                    }
                    normalize_reminders(&mut armed.task, now);
                    armed.epoch += 1;
                    push_entries(&mut self.heap, &mut self.next_seq, entry.handle, armed.epoch, &armed.task);
                }
                None => {
                    if let Some(armed) = self.live.remove(&entry.handle) {
                        self.unindex(&armed.task.id, entry.handle);
                    }
                }
            }
        }
        due
    }

    /// Drop stale heap entries. Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.heap.len();
        let entries = std::mem::take(&mut self.heap).into_vec();
        let live = &self.live;
        self.heap = entries
            .into_iter()
            .filter(|e| live.get(&e.handle).is_some_and(|a| a.epoch == e.epoch))
            .collect();
        before - self.heap.len()
    }

    /// Armed tasks ordered by next fire time.
    pub fn snapshot(&self) -> Vec<ArmedTask> {
        let mut tasks: Vec<ArmedTask> = self
            .live
            .iter()
            .map(|(handle, armed)| ArmedTask {
                handle: *handle,
                id: armed.task.id.clone(),
                title: armed.task.title.clone(),
                category: armed.task.category.clone(),
                next_fire_at: armed.task.fire_at,
                pending_reminders: armed.task.pre_notify_at.clone(),
                repeat_secs: armed.task.repeat.map(|d| d.num_seconds()),
                notifier: armed.task.notifier_name.clone(),
                action: armed.task.action_name.clone(),
            })
            .collect();
        tasks.sort_by_key(|t| (t.next_fire_at, t.handle));
        tasks
    }

    fn is_current(&self, entry: &Entry) -> bool {
        self.live
            .get(&entry.handle)
            .is_some_and(|a| a.epoch == entry.epoch)
    }

    fn unindex(&mut self, id: &str, handle: TaskHandle) {
        if let Some(handles) = self.by_id.get_mut(id) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.by_id.remove(id);
            }
        }
    }
}

fn normalize_reminders(task: &mut ScheduledTask, now: DateTime<Utc>) {
    let fire_at = task.fire_at;
    task.pre_notify_at.retain(|t| *t > now && *t < fire_at);
    task.pre_notify_at.sort();
    task.pre_notify_at.dedup();
}

fn push_entries(
    heap: &mut BinaryHeap<Entry>,
    seq: &mut u64,
    handle: TaskHandle,
    epoch: u64,
    task: &ScheduledTask,
) {
    let triggers = task
        .pre_notify_at
        .iter()
        .map(|at| (*at, TriggerKind::Reminder))
        .chain(std::iter::once((task.fire_at, TriggerKind::Main)));
    for (at, kind) in triggers {
        *seq += 1;
        heap.push(Entry { at, seq: *seq, handle, epoch, kind });
    }
}

/// First `fired + k * step` (k >= 1) strictly after `now`.
fn next_after(fired: DateTime<Utc>, step: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = fired + step;
    if next > now {
        return next;
    }
    let step_ms = step.num_milliseconds().max(1);
    let behind_ms = (now - next).num_milliseconds();
    let skips = behind_ms / step_ms + 1;
    let mut next = next + Duration::milliseconds(step_ms * skips);
    while next <= now {
        next += step;
    }
    next
}
