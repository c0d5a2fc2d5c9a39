//! Daily repeating schedules (basal rate, carb ratio, insulin sensitivity).
//!
//! Entries are keyed by time of day. An entry without an end runs until the
//! next entry's start, or to the end of the day for the last one. An explicit
//! end that is not after the start wraps past midnight.

use crate::error::ensure_same_len;
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One segment of a daily schedule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub start: NaiveTime,
    #[serde(default)]
    pub end: Option<NaiveTime>,
    pub value: f64,
}

impl ScheduleEntry {
    pub fn new(start: NaiveTime, end: Option<NaiveTime>, value: f64) -> Self {
        Self { start, end, value }
    }
}

/// A piecewise-constant daily schedule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

/// Half-open `[start, end)` interval in seconds since midnight.
/// `end` may exceed a day's length when the entry wraps.
#[derive(Clone, Copy, Debug)]
struct DayInterval {
    start: u32,
    end: u32,
}

const SECONDS_PER_DAY: u32 = 86_400;

fn seconds_of(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight()
}

impl DayInterval {
    fn contains(&self, t: u32) -> bool {
        (self.start <= t && t < self.end)
            || (self.end > SECONDS_PER_DAY && t < self.end - SECONDS_PER_DAY)
    }
}

impl Schedule {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    /// Schedule whose entries run back to back (no explicit ends)
    pub fn from_starts(starts: &[NaiveTime], values: &[f64]) -> Result<Self> {
        Self::from_columns(starts, &[], values)
    }

    /// Build from parallel columns; `ends` may be empty to leave every entry open.
    pub fn from_columns(starts: &[NaiveTime], ends: &[NaiveTime], values: &[f64]) -> Result<Self> {
        if ends.is_empty() {
            ensure_same_len("schedule", &[starts.len(), values.len()])?;
        } else {
            ensure_same_len("schedule", &[starts.len(), ends.len(), values.len()])?;
        }

        let entries = starts
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (&start, &value))| ScheduleEntry::new(start, ends.get(i).copied(), value))
            .collect();

        Ok(Self { entries })
    }

    /// Build from starts and segment lengths in minutes, the layout basal
    /// schedules are exported in. A length of a full day or more covers the day.
    pub fn from_durations(starts: &[NaiveTime], values: &[f64], minutes: &[f64]) -> Result<Self> {
        ensure_same_len("basal schedule", &[starts.len(), values.len(), minutes.len()])?;

        let entries = starts
            .iter()
            .zip(values)
            .zip(minutes)
            .map(|((&start, &value), &length)| {
                let length = Duration::seconds((length * 60.0).round() as i64);
                let (end, _) = start.overflowing_add_signed(length);
                ScheduleEntry::new(start, Some(end), value)
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn interval(&self, index: usize) -> DayInterval {
        let entry = &self.entries[index];
        let start = seconds_of(entry.start);

        let end = match entry.end {
            Some(end) => {
                let end = seconds_of(end);
                if end > start {
                    end
                } else {
                    end + SECONDS_PER_DAY
                }
            }
            None => match self.entries.get(index + 1) {
                // Open entries never wrap; an out-of-order successor leaves them empty
                Some(next) => seconds_of(next.start).max(start),
                None => SECONDS_PER_DAY,
            },
        };

        DayInterval { start, end }
    }

    /// Value in effect at a time of day.
    ///
    /// Entries are checked in order, so at a boundary the entry starting there
    /// wins over the one ending there.
    pub fn value_at_time(&self, time: NaiveTime) -> Result<f64> {
        let t = seconds_of(time);
        (0..self.entries.len())
            .find(|&i| self.interval(i).contains(t))
            .map(|i| self.entries[i].value)
            .ok_or_else(|| Error::NotFound(time.to_string()))
    }

    /// Value in effect at an instant (its UTC time of day)
    pub fn value_at(&self, date: DateTime<Utc>) -> Result<f64> {
        self.value_at_time(date.time())
    }
}
