//! Dose annotation, trimming and date-range filtering.

use crate::{Dose, EffectSample, Result, Schedule};
use chrono::{DateTime, Utc};

/// Attach the scheduled basal rate in effect at each dose's start.
///
/// The net effect of a rate dose is measured against this rate, so a missing
/// schedule entry is an error rather than a guess.
pub fn annotated(doses: &[Dose], basal_schedule: &Schedule) -> Result<Vec<Dose>> {
    doses
        .iter()
        .map(|dose| {
            let rate = basal_schedule.value_at(dose.start)?;
            Ok(Dose {
                scheduled_basal_rate: Some(rate),
                ..dose.clone()
            })
        })
        .collect()
}

/// Clip a dose to `[window_start, window_end]`.
///
/// A dose entirely outside the window collapses to zero duration at the
/// nearest window edge; callers drop those via [`is_within`].
pub fn trim(dose: &Dose, window_start: DateTime<Utc>, window_end: Option<DateTime<Utc>>) -> Dose {
    let start = dose.start.max(window_start);
    let end = match window_end {
        Some(window_end) => dose.end.min(window_end),
        None => dose.end,
    };

    Dose {
        start,
        end: end.max(start),
        ..dose.clone()
    }
}

/// Whether any part of the dose lies within `[window_start, window_end]`
pub fn is_within(
    dose: &Dose,
    window_start: DateTime<Utc>,
    window_end: Option<DateTime<Utc>>,
) -> bool {
    if dose.end < window_start {
        return false;
    }
    match window_end {
        Some(window_end) => dose.start <= window_end,
        None => true,
    }
}

/// Doses that touch `[start, end]`
pub fn filter_date_range_for_doses(
    doses: &[Dose],
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Vec<Dose> {
    doses
        .iter()
        .filter(|dose| is_within(dose, start, end))
        .cloned()
        .collect()
}

/// Samples whose start lies in `[start, end)`; no upper bound when `end` is `None`.
pub fn filter_date_range(
    samples: Vec<EffectSample>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Vec<EffectSample> {
    samples
        .into_iter()
        .filter(|sample| sample.start >= start && end.map_or(true, |end| sample.start < end))
        .collect()
}
