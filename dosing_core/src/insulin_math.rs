//! Insulin-on-board and glucose-effect timelines.
//!
//! Both sweeps walk a grid of `delta`-spaced instants and sum, over every
//! dose, how much of its net insulin is still pending (IOB) or has already
//! acted (glucose effect). Rate doses longer than about one grid step are
//! integrated in `delta`-sized slices; anything shorter counts as delivered
//! at its start.

use crate::time::{ceil_to_interval, floor_to_interval, minutes};
use crate::{
    time_interval_since, Dose, EffectSample, GlucoseEffect, InsulinModel, InsulinValue, Result,
    Schedule,
};
use chrono::{DateTime, Duration, Utc};

/// Lag between delivery and the start of insulin action
pub const DEFAULT_DELAY_MINUTES: f64 = 10.0;

/// Spacing of the simulation grid
pub const DEFAULT_DELTA_MINUTES: f64 = 5.0;

/// Doses shorter than this many grid steps are treated as momentary
const MOMENTARY_DELTA_FACTOR: f64 = 1.05;

/// Delivery-to-action lag and grid spacing for one sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectTiming {
    pub delay: Duration,
    pub delta: Duration,
}

impl Default for EffectTiming {
    fn default() -> Self {
        Self {
            delay: minutes(DEFAULT_DELAY_MINUTES),
            delta: minutes(DEFAULT_DELTA_MINUTES),
        }
    }
}

impl EffectTiming {
    pub fn new(delay: Duration, delta: Duration) -> Self {
        Self { delay, delta }
    }

    fn seconds(&self) -> Timing {
        Timing {
            delay: self.delay.num_milliseconds() as f64 / 1000.0,
            delta: self.delta.num_milliseconds() as f64 / 1000.0,
        }
    }
}

/// Timing of one sweep, in seconds
#[derive(Clone, Copy, Debug)]
struct Timing {
    delay: f64,
    delta: f64,
}

/// Sum `weight(percent_remaining)` over the slices of a dose delivered so far.
///
/// Slices are `delta` long and evenly share the dose; slicing stops at the
/// last grid step reached by `time + delay` or the end of the dose.
fn integrate_slices(
    dose: &Dose,
    time: f64,
    model: &InsulinModel,
    timing: Timing,
    weight: impl Fn(f64) -> f64,
) -> f64 {
    let dose_duration = time_interval_since(dose.end, dose.start);
    let last_slice = ((time + timing.delay) / timing.delta).floor() * timing.delta;
    let limit = last_slice.min(dose_duration);

    let mut total = 0.0;
    let mut slice_start = 0.0;
    loop {
        let segment = if dose_duration > 0.0 {
            ((slice_start + timing.delta).min(dose_duration) - slice_start).max(0.0) / dose_duration
        } else {
            1.0
        };
        let remaining =
            model.percent_effect_remaining((time - timing.delay - slice_start) / 60.0);
        total += segment * weight(remaining);

        slice_start += timing.delta;
        if slice_start > limit {
            break;
        }
    }
    total
}

/// Fraction-weighted activity for one dose at `date`; `weight` maps the
/// percent of effect remaining onto the quantity being summed.
fn dose_activity(
    dose: &Dose,
    date: DateTime<Utc>,
    model: &InsulinModel,
    timing: Timing,
    weight: impl Fn(f64) -> f64,
) -> f64 {
    let time = time_interval_since(date, dose.start);
    if time < 0.0 {
        return 0.0;
    }

    let duration = time_interval_since(dose.end, dose.start);
    if duration <= MOMENTARY_DELTA_FACTOR * timing.delta {
        weight(model.percent_effect_remaining((time - timing.delay) / 60.0))
    } else {
        integrate_slices(dose, time, model, timing, weight)
    }
}

/// Units of a dose's net insulin still on board at `date`
pub fn dose_insulin_on_board(
    dose: &Dose,
    date: DateTime<Utc>,
    model: &InsulinModel,
    timing: EffectTiming,
) -> f64 {
    dose.net_basal_units()
        * dose_activity(dose, date, model, timing.seconds(), |remaining| remaining)
}

/// Glucose-lowering effect (mg/dL) a dose has had by `date`
pub fn dose_glucose_effect(
    dose: &Dose,
    date: DateTime<Utc>,
    model: &InsulinModel,
    insulin_sensitivity: f64,
    timing: EffectTiming,
) -> f64 {
    dose.net_basal_units()
        * insulin_sensitivity
        * dose_activity(dose, date, model, timing.seconds(), |remaining| 1.0 - remaining)
}

/// Grid instants from `start` (floored) through `end` (ceiled, inclusive).
///
/// Without an explicit end the grid runs until the last dose has finished
/// acting. Returns nothing when there are no doses or the step is not positive.
fn simulation_dates(
    doses: &[Dose],
    model: &InsulinModel,
    timing: EffectTiming,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Vec<DateTime<Utc>> {
    let EffectTiming { delay, delta } = timing;
    if delta <= Duration::zero() {
        tracing::warn!("Simulation step {:?} is not positive; no timeline produced", delta);
        return vec![];
    }

    let last_dose_end = match doses.iter().map(|dose| dose.end).max() {
        Some(last) => last,
        None => return vec![],
    };

    let start = floor_to_interval(start, delta);
    let end = ceil_to_interval(
        end.unwrap_or(last_dose_end + model.effect_duration() + delay),
        delta,
    );

    let mut dates = Vec::new();
    let mut date = start;
    while date <= end {
        dates.push(date);
        date += delta;
    }
    dates
}

/// Insulin on board (U) at each grid instant of the window.
///
/// Only insulin beyond the annotated scheduled basal rate counts; an empty
/// dose list yields an empty timeline.
pub fn insulin_on_board(
    doses: &[Dose],
    model: &InsulinModel,
    timing: EffectTiming,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Vec<InsulinValue> {
    let net_units: Vec<f64> = doses.iter().map(Dose::net_basal_units).collect();

    let seconds = timing.seconds();

    simulation_dates(doses, model, timing, start, end)
        .into_iter()
        .map(|date| {
            let value: f64 = doses
                .iter()
                .zip(&net_units)
                .map(|(dose, units)| {
                    units * dose_activity(dose, date, model, seconds, |remaining| remaining)
                })
                .sum();
            InsulinValue { date, value }
        })
        .collect()
}

/// Cumulative glucose-lowering effect (mg/dL) at each grid instant.
///
/// Each dose is weighted by the insulin sensitivity in effect at its start.
pub fn cumulative_glucose_effects(
    doses: &[Dose],
    model: &InsulinModel,
    sensitivity_schedule: &Schedule,
    timing: EffectTiming,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<GlucoseEffect>> {
    let seconds = timing.seconds();
    let scales = doses
        .iter()
        .map(|dose| Ok(dose.net_basal_units() * sensitivity_schedule.value_at(dose.start)?))
        .collect::<Result<Vec<f64>>>()?;

    Ok(simulation_dates(doses, model, timing, start, end)
        .into_iter()
        .map(|date| {
            let value: f64 = doses
                .iter()
                .zip(&scales)
                .map(|(dose, scale)| {
                    scale * dose_activity(dose, date, model, seconds, |remaining| 1.0 - remaining)
                })
                .sum();
            GlucoseEffect { date, value }
        })
        .collect())
}

/// Glucose-lowering effect (mg/dL) acting within each grid interval.
///
/// The difference of consecutive cumulative values, so the samples sum to
/// the total effect over the window.
pub fn glucose_effects(
    doses: &[Dose],
    model: &InsulinModel,
    sensitivity_schedule: &Schedule,
    timing: EffectTiming,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<EffectSample>> {
    let cumulative =
        cumulative_glucose_effects(doses, model, sensitivity_schedule, timing, start, end)?;

    Ok(cumulative
        .windows(2)
        .map(|pair| EffectSample::new(pair[0].date, pair[1].date, pair[1].value - pair[0].value))
        .collect())
}
