//! Time arithmetic shared by every timeline computation.
//!
//! All instants are UTC; callers normalise zones before handing data in.

use chrono::{DateTime, Duration, Utc};

/// Seconds elapsed from `b` to `a` (negative when `a` precedes `b`).
pub fn time_interval_since(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    let delta = a - b;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

/// Build a duration from fractional minutes, rounded to the millisecond.
///
/// Saturates at the representable range; NaN maps to zero.
pub fn minutes(value: f64) -> Duration {
    from_millis(value * 60_000.0)
}

/// Build a duration from fractional hours, rounded to the millisecond.
pub fn hours(value: f64) -> Duration {
    from_millis(value * 3_600_000.0)
}

fn from_millis(ms: f64) -> Duration {
    // `as` saturates, but i64::MIN milliseconds is still out of range
    let ms = ms.round() as i64;
    Duration::try_milliseconds(ms).unwrap_or(if ms < 0 { Duration::MIN } else { Duration::MAX })
}

/// Round `date` down onto the `interval` grid anchored at the Unix epoch.
pub fn floor_to_interval(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds();
    if step <= 0 {
        return date;
    }
    let ms = date.timestamp_millis();
    let floored = ms.div_euclid(step) * step;
    date + Duration::milliseconds(floored - ms)
}

/// Round `date` up onto the `interval` grid anchored at the Unix epoch.
pub fn ceil_to_interval(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let floored = floor_to_interval(date, interval);
    if floored == date {
        date
    } else {
        floored + interval
    }
}
