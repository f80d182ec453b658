//! Free-slot search over booked intervals.
//!
//! Booked intervals are sorted and merged (overlapping or touching intervals
//! collapse into one), then the gaps are walked and clipped to a working
//! window. A fully booked window is a valid, empty result.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgendaError, Result};

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An available interval; derived, never persisted.
pub type FreeSlot = Interval;

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Daily working window in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
}

impl WorkingHours {
    pub fn new(day_start: NaiveTime, day_end: NaiveTime) -> Result<Self> {
        if day_end <= day_start {
            return Err(AgendaError::config(format!(
                "working window must end after it starts ({day_start} - {day_end})"
            )));
        }
        Ok(Self { day_start, day_end })
    }

    /// The window on `date` in timezone `tz`, as absolute instants.
    ///
    /// A boundary skipped by a DST transition moves past the gap; a repeated
    /// one takes the earlier instant for the start and the later for the end.
    pub fn window_on<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> Option<Interval> {
        let start = resolve_local(date.and_time(self.day_start), tz, false)?;
        let end = resolve_local(date.and_time(self.day_end), tz, true)?;
        Some(Interval::new(start, end))
    }
}

/// `time` on `date` in `tz` as a UTC instant. Wall-clock times inside a DST
/// gap resolve to the same offset past the gap; repeated ones to the earlier.
pub fn local_to_utc<Tz: TimeZone>(date: NaiveDate, time: NaiveTime, tz: &Tz) -> Option<DateTime<Utc>> {
    resolve_local(date.and_time(time), tz, false)
}

fn resolve_local<Tz: TimeZone>(naive: NaiveDateTime, tz: &Tz, latest: bool) -> Option<DateTime<Utc>> {
    let pick = |n: NaiveDateTime| {
        let local = tz.from_local_datetime(&n);
        if latest { local.latest() } else { local.earliest() }
    };
    // Gaps are at most an hour, so an hour later always exists.
    pick(naive)
        .or_else(|| pick(naive + Duration::hours(1)))
        .map(|t| t.with_timezone(&Utc))
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Sort and merge overlapping or touching intervals. Empty intervals are dropped.
pub fn merge_intervals(booked: &[Interval]) -> Vec<Interval> {
    let mut sorted: Vec<Interval> = booked.iter().copied().filter(|i| !i.is_empty()).collect();
    sorted.sort_by_key(|i| (i.start, i.end));

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Gaps of `window` not covered by `booked`.
pub fn free_slots(booked: &[Interval], window: Interval) -> Vec<FreeSlot> {
    walk_gaps(booked, window, None)
}

/// First gap inside `window` at least `min_duration` long.
pub fn first_slot(booked: &[Interval], window: Interval, min_duration: Duration) -> Option<FreeSlot> {
    walk_gaps(booked, window, Some(min_duration)).into_iter().next()
}

fn walk_gaps(booked: &[Interval], window: Interval, min_duration: Option<Duration>) -> Vec<FreeSlot> {
    let mut slots = Vec::new();
    if window.is_empty() {
        return slots;
    }

    let mut cursor = window.start;
    let emit = |start: DateTime<Utc>, end: DateTime<Utc>, slots: &mut Vec<FreeSlot>| -> bool {
        let gap = Interval::new(start, end);
        if gap.is_empty() {
            return false;
        }
        match min_duration {
            Some(min) if gap.duration() < min => false,
            Some(_) => {
                slots.push(gap);
                true
            }
            None => {
                slots.push(gap);
                false
            }
        }
    };

    for busy in merge_intervals(booked) {
        if busy.end <= window.start {
            continue;
        }
        if busy.start >= window.end {
            break;
        }
        if emit(cursor, busy.start.min(window.end), &mut slots) {
            return slots;
        }
        cursor = cursor.max(busy.end);
        if cursor >= window.end {
            return slots;
        }
    }
    emit(cursor, window.end, &mut slots);
    slots
}

/// Free slots inside the working window of a single local day.
pub fn free_slots_on<Tz: TimeZone>(
    booked: &[Interval],
    date: NaiveDate,
    hours: WorkingHours,
    tz: &Tz,
) -> Vec<FreeSlot> {
    match hours.window_on(date, tz) {
        Some(window) => free_slots(booked, window),
        None => Vec::new(),
    }
}

/// Free slots for every day in `[from, to]` (inclusive), in day order.
pub fn free_slots_in_range<Tz: TimeZone>(
    booked: &[Interval],
    from: NaiveDate,
    to: NaiveDate,
    hours: WorkingHours,
    tz: &Tz,
) -> Vec<FreeSlot> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .flat_map(|date| free_slots_on(booked, date, hours, tz))
        .collect()
}

/// Earliest slot of at least `min_duration`, starting no earlier than `not_before`,
/// searching at most `days` working days.
pub fn next_slot<Tz: TimeZone>(
    booked: &[Interval],
    not_before: DateTime<Utc>,
    min_duration: Duration,
    days: u32,
    hours: WorkingHours,
    tz: &Tz,
) -> Option<FreeSlot> {
    let first_day = not_before.with_timezone(tz).date_naive();
    first_day.iter_days().take(days as usize).find_map(|date| {
        let mut window = hours.window_on(date, tz)?;
        window.start = window.start.max(not_before);
        first_slot(booked, window, min_duration)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
    }

    fn iv(a: (u32, u32), b: (u32, u32)) -> Interval {
        Interval::new(t(a.0, a.1), t(b.0, b.1))
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    #[test]
    fn test_gaps_within_working_window() {
        let booked = vec![iv((9, 0), (10, 0)), iv((10, 30), (11, 0))];
        let slots = free_slots_on(&booked, day(), WorkingHours::default(), &Utc);
        assert_eq!(
            slots,
            vec![iv((8, 0), (9, 0)), iv((10, 0), (10, 30)), iv((11, 0), (18, 0))]
        );
    }

    #[test]
    fn test_merge_overlapping_and_touching() {
        let merged = merge_intervals(&[
            iv((13, 0), (14, 0)),
            iv((9, 0), (10, 0)),
            iv((9, 30), (11, 0)),
            iv((11, 0), (12, 0)),
        ]);
        assert_eq!(merged, vec![iv((9, 0), (12, 0)), iv((13, 0), (14, 0))]);
    }

    #[test]
    fn test_fully_booked_day_is_empty() {
        let booked = vec![iv((7, 0), (12, 0)), iv((12, 0), (19, 0))];
        assert!(free_slots_on(&booked, day(), WorkingHours::default(), &Utc).is_empty());
    }

    #[test]
    fn test_unbooked_day_is_whole_window() {
        let slots = free_slots_on(&[], day(), WorkingHours::default(), &Utc);
        assert_eq!(slots, vec![iv((8, 0), (18, 0))]);
    }

    #[test]
    fn test_bookings_outside_window_are_clipped() {
        let booked = vec![iv((6, 0), (8, 30)), iv((17, 0), (20, 0))];
        let slots = free_slots_on(&booked, day(), WorkingHours::default(), &Utc);
        assert_eq!(slots, vec![iv((8, 30), (17, 0))]);
    }

    #[test]
    fn test_first_slot_exits_at_long_enough_gap() {
        let booked = vec![iv((8, 20), (9, 0)), iv((9, 30), (12, 0))];
        let window = iv((8, 0), (18, 0));
        let slot = first_slot(&booked, window, Duration::minutes(30)).unwrap();
        assert_eq!(slot, iv((9, 0), (9, 30)));

        let slot = first_slot(&booked, window, Duration::hours(2)).unwrap();
        assert_eq!(slot, iv((12, 0), (18, 0)));

        assert!(first_slot(&booked, window, Duration::hours(7)).is_none());
    }

    #[test]
    fn test_next_slot_rolls_to_following_day() {
        let booked = vec![iv((8, 0), (18, 0))];
        let hours = WorkingHours::default();
        let slot = next_slot(&booked, t(7, 0), Duration::hours(1), 3, hours, &Utc).unwrap();
        assert_eq!(slot.start, Utc.with_ymd_and_hms(2026, 5, 5, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_next_slot_respects_not_before() {
        let hours = WorkingHours::default();
        let slot = next_slot(&[], t(15, 10), Duration::hours(1), 1, hours, &Utc).unwrap();
        assert_eq!(slot, iv((15, 10), (18, 0)));
        assert!(next_slot(&[], t(17, 30), Duration::hours(1), 1, hours, &Utc).is_none());
    }

    #[test]
    fn test_range_covers_each_day() {
        let to = NaiveDate::from_ymd_opt(2026, 5, 6).unwrap();
        let slots = free_slots_in_range(&[iv((8, 0), (12, 0))], day(), to, WorkingHours::default(), &Utc);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0], iv((12, 0), (18, 0)));
    }

    #[test]
    fn test_window_in_fixed_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let window = WorkingHours::default().window_on(day(), &tz).unwrap();
        assert_eq!(window, iv((6, 0), (16, 0)));
    }

    #[test]
    fn test_window_boundary_in_dst_gap_moves_past_it() {
        // Berlin skips 02:00-03:00 on 2026-03-29.
        let tz = chrono_tz::Europe::Berlin;
        let date = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let hours = WorkingHours::new(
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        )
        .unwrap();
        let window = hours.window_on(date, &tz).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 3, 29, 1, 30, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 3, 29, 16, 0, 0).unwrap());
        assert_eq!(free_slots(&[], window), vec![window]);
    }

    #[test]
    fn test_local_to_utc_on_repeated_hour_takes_earlier() {
        // 02:30 happens twice in Berlin on 2026-10-25.
        let tz = chrono_tz::Europe::Berlin;
        let date = NaiveDate::from_ymd_opt(2026, 10, 25).unwrap();
        let at = local_to_utc(date, NaiveTime::from_hms_opt(2, 30, 0).unwrap(), &tz).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap());
    }

    #[test]
    fn test_invalid_working_hours() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(WorkingHours::new(nine, nine).is_err());
    }
}
