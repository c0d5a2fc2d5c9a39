//! Carb absorption apportionment.
//!
//! Given the glucose-effect velocity that insulin does not explain, work out
//! how much of each meal has actually been absorbed. Every effect sample is
//! split among the meals still absorbing at that time, in proportion to each
//! meal's minimum absorption rate. The split is a sequential waterfall: each
//! meal takes its share of what the earlier meals left, so entry order
//! changes the result.
//!
//! This assumes:
//! - the insulin effects removed from the observed glucose change are correct
//! - meals absorb in the order they were eaten, without mixing

use crate::time::minutes;
use crate::{time_interval_since, CarbEntry, EffectSample, Error, Result, Schedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest leftover effect (mg/dL) still credited as overrun
pub const EPSILON: f64 = f64::EPSILON;

/// Tunables for one absorption query
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbAbsorptionSettings {
    /// Multiplier widening each entry's absorption window
    pub absorption_time_overrun: f64,
    /// Absorption time (minutes) for entries that do not give one
    pub default_absorption_time: f64,
    /// Lag (minutes) between eating and the start of absorption
    pub delay: f64,
    /// Remainder below this is dropped instead of credited as overrun
    pub overrun_epsilon: f64,
}

impl Default for CarbAbsorptionSettings {
    fn default() -> Self {
        Self {
            absorption_time_overrun: 1.5,
            default_absorption_time: 180.0,
            delay: 10.0,
            overrun_epsilon: EPSILON,
        }
    }
}

/// Per-entry values derived once, before any effect is apportioned
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbEntryProperties {
    /// mg/dL per gram at the time of the meal
    pub carb_sensitivity: f64,
    /// Minutes
    pub max_absorption_time: f64,
    pub max_end_time: DateTime<Utc>,
    pub last_effect_date: DateTime<Utc>,
    /// mg/dL the whole meal is expected to raise glucose by
    pub total_expected_effect: f64,
}

/// Absorption summary for one entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AbsorptionResult {
    pub total_grams: f64,
    pub clamped_grams: f64,
    pub remaining_grams: f64,
    pub observed_start: DateTime<Utc>,
    pub observed_end: DateTime<Utc>,
    pub estimated_minutes_remaining: f64,
}

/// Everything learned about one entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbStatus {
    pub entry: CarbEntry,
    pub properties: CarbEntryProperties,
    pub observed_grams: f64,
    pub absorption: AbsorptionResult,
    /// Grams absorbed per effect interval; withheld when the observation
    /// falls short of the linear minimum
    pub timeline: Option<Vec<EffectSample>>,
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Fraction of a meal absorbed `time` minutes in, absorbing at a constant
/// rate over `absorption_time` minutes
pub fn linear_percent_absorbed(time: f64, absorption_time: f64) -> f64 {
    if time <= 0.0 {
        0.0
    } else if time < absorption_time {
        time / absorption_time
    } else {
        1.0
    }
}

/// Grams of `total` absorbed under the linear model
pub fn linearly_absorbed_carbs(total: f64, time: f64, absorption_time: f64) -> f64 {
    total * linear_percent_absorbed(time, absorption_time)
}

/// Accumulates observed absorption for one entry
struct EntryBuilder {
    entry: CarbEntry,
    properties: CarbEntryProperties,
    observed_effect: f64,
    observed_completion: Option<DateTime<Utc>>,
    timeline: Vec<EffectSample>,
}

impl EntryBuilder {
    fn new(
        entry: &CarbEntry,
        carb_ratios: &Schedule,
        sensitivities: &Schedule,
        settings: &CarbAbsorptionSettings,
        last_effect_date: DateTime<Utc>,
    ) -> Result<Self> {
        let carb_sensitivity = safe_div(
            sensitivities.value_at(entry.start)?,
            carb_ratios.value_at(entry.start)?,
        );
        let absorption_time = entry
            .absorption_time
            .filter(|time| time.is_finite() && *time > 0.0)
            .unwrap_or(settings.default_absorption_time);
        let max_absorption_time = absorption_time * settings.absorption_time_overrun;

        Ok(Self {
            entry: entry.clone(),
            properties: CarbEntryProperties {
                carb_sensitivity,
                max_absorption_time,
                max_end_time: entry
                    .start
                    .checked_add_signed(minutes(max_absorption_time + settings.delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                last_effect_date,
                total_expected_effect: entry.quantity * carb_sensitivity,
            },
            observed_effect: 0.0,
            observed_completion: None,
            timeline: Vec::new(),
        })
    }

    /// Grams per minute needed to finish within the widened window
    fn max_absorption_rate(&self) -> f64 {
        safe_div(self.entry.quantity, self.properties.max_absorption_time)
    }

    fn is_active_at(&self, date: DateTime<Utc>) -> bool {
        self.entry.start <= date && date < self.properties.max_end_time
    }

    fn remaining_effect(&self) -> f64 {
        (self.properties.total_expected_effect - self.observed_effect).max(0.0)
    }

    fn add_observed_effect(&mut self, effect: f64, start: DateTime<Utc>, end: DateTime<Utc>) {
        if start < self.entry.start {
            return;
        }

        self.observed_effect += effect;

        // The timeline stops growing once the whole meal has been seen
        if self.observed_completion.is_none() {
            // An overrun credit gets its own record, even for an interval
            // already allocated
            let grams = safe_div(effect, self.properties.carb_sensitivity);
            self.timeline.push(EffectSample::new(start, end, grams));

            if self.observed_effect >= self.properties.total_expected_effect {
                self.observed_completion = Some(end);
            }
        }
    }

    fn finish(self, settings: &CarbAbsorptionSettings) -> CarbStatus {
        let quantity = self.entry.quantity;
        let max_absorption_time = self.properties.max_absorption_time;

        let elapsed = time_interval_since(self.properties.last_effect_date, self.entry.start) / 60.0
            - settings.delay;
        let min_predicted_grams = linearly_absorbed_carbs(quantity, elapsed, max_absorption_time);
        let observed_grams = safe_div(self.observed_effect, self.properties.carb_sensitivity);
        let clamped_grams = quantity.min(min_predicted_grams.max(observed_grams));

        let min_absorption_rate = safe_div(quantity, max_absorption_time);
        let estimated_minutes_remaining = if min_absorption_rate > 0.0 {
            (quantity - clamped_grams) / min_absorption_rate
        } else {
            0.0
        };

        let timeline = if observed_grams >= min_predicted_grams {
            Some(self.timeline)
        } else {
            None
        };

        CarbStatus {
            absorption: AbsorptionResult {
                total_grams: quantity,
                clamped_grams,
                remaining_grams: quantity - clamped_grams,
                observed_start: self.entry.start,
                observed_end: self
                    .observed_completion
                    .unwrap_or(self.properties.last_effect_date),
                estimated_minutes_remaining,
            },
            entry: self.entry,
            properties: self.properties,
            observed_grams,
            timeline,
        }
    }
}

/// Map carb entries onto the observed carb-effect velocity timeline.
///
/// `entries` must be sorted by start time. `effects` is the glucose change
/// (mg/dL per sample) left after removing the insulin effect, in
/// chronological order. Returns one status per entry, in entry order; no
/// entries or no effects yield an empty result.
pub fn map_carb_absorption(
    entries: &[CarbEntry],
    effects: &[EffectSample],
    carb_ratios: &Schedule,
    sensitivities: &Schedule,
    settings: &CarbAbsorptionSettings,
) -> Result<Vec<CarbStatus>> {
    if let Some(pair) = entries.windows(2).find(|pair| pair[1].start < pair[0].start) {
        return Err(Error::Unsorted(format!(
            "carb entry at {} follows one at {}",
            pair[1].start, pair[0].start
        )));
    }

    let last_effect_date = match effects.last() {
        Some(effect) => effect.end,
        None => return Ok(vec![]),
    };
    if entries.is_empty() || carb_ratios.is_empty() || sensitivities.is_empty() {
        return Ok(vec![]);
    }

    let mut builders = entries
        .iter()
        .map(|entry| {
            EntryBuilder::new(entry, carb_ratios, sensitivities, settings, last_effect_date)
        })
        .collect::<Result<Vec<_>>>()?;

    for effect in effects {
        if effect.is_degenerate() {
            continue;
        }

        // Not necessarily contiguous: windows end at different times
        let active: Vec<usize> = (0..builders.len())
            .filter(|&i| builders[i].is_active_at(effect.start))
            .collect();
        let Some(&last_active) = active.last() else {
            continue;
        };

        // Falling velocities come from insulin, not negative absorption
        let mut effect_value = effect.value.max(0.0);
        let mut total_rate: f64 = active.iter().map(|&i| builders[i].max_absorption_rate()).sum();

        for &i in &active {
            let builder = &mut builders[i];
            let rate = builder.max_absorption_rate();
            let partial_effect = if total_rate != 0.0 && effect_value != 0.0 {
                builder.remaining_effect().min(rate / total_rate * effect_value)
            } else {
                0.0
            };

            total_rate -= rate;
            effect_value -= partial_effect;
            builder.add_observed_effect(partial_effect, effect.start, effect.end);
        }

        // Unexplained leftover counts as overrun on the most recent active meal
        if effect_value > settings.overrun_epsilon {
            tracing::trace!(
                "Crediting {:.3} mg/dL overrun at {} to entry {}",
                effect_value,
                effect.start,
                last_active
            );
            builders[last_active].add_observed_effect(effect_value, effect.start, effect.end);
        }
    }

    let statuses: Vec<CarbStatus> = builders
        .into_iter()
        .map(|builder| builder.finish(settings))
        .collect();

    tracing::debug!(
        "Mapped {} effect samples onto {} carb entries",
        effects.len(),
        statuses.len()
    );
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 15, 18, 0, 0).unwrap()
    }

    fn constant(value: f64) -> Schedule {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        Schedule::from_starts(&[midnight], &[value]).unwrap()
    }

    /// Constant velocity samples every 5 minutes from `start` for `count` samples
    fn velocity(start: DateTime<Utc>, count: i32, value: f64) -> Vec<EffectSample> {
        let five = Duration::minutes(5);
        (0..count)
            .map(|i| EffectSample::new(start + five * i, start + five * (i + 1), value))
            .collect()
    }

    fn settings() -> CarbAbsorptionSettings {
        CarbAbsorptionSettings {
            absorption_time_overrun: 1.0,
            default_absorption_time: 180.0,
            delay: 0.0,
            overrun_epsilon: EPSILON,
        }
    }

    #[test]
    fn test_linear_percent_absorbed() {
        assert_eq!(linear_percent_absorbed(0.0, 120.0), 0.0);
        assert_eq!(linear_percent_absorbed(120.0, 120.0), 1.0);
        assert_eq!(linear_percent_absorbed(-10.0, 120.0), 0.0);
        assert_eq!(linear_percent_absorbed(200.0, 120.0), 1.0);
        let mut previous = 0.0;
        for t in 1..120 {
            let p = linear_percent_absorbed(t as f64, 120.0);
            assert!(p > previous);
            previous = p;
        }
        assert_eq!(linearly_absorbed_carbs(30.0, 60.0, 120.0), 15.0);
    }

    #[test]
    fn test_single_entry_absorbs_everything_positive() {
        let entries = vec![CarbEntry::new(t0(), 30.0, Some(120.0))];
        // csf = 40 / 10 = 4 mg/dL/g, so 120 mg/dL expected in total
        let effects = velocity(t0(), 12, 2.0);

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(40.0), &settings())
                .unwrap();

        let status = &statuses[0];
        assert_eq!(status.properties.carb_sensitivity, 4.0);
        assert_eq!(status.properties.total_expected_effect, 120.0);
        assert!((status.observed_grams - 6.0).abs() < 1e-9);
        // One hour into a two hour window the linear floor is 15 g
        assert!((status.absorption.clamped_grams - 15.0).abs() < 1e-9);
        assert!(status.timeline.is_none());
        assert!((status.absorption.estimated_minutes_remaining - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_velocity_is_ignored() {
        let entries = vec![CarbEntry::new(t0(), 30.0, Some(120.0))];
        let mut effects = velocity(t0(), 6, 8.0);
        effects[2].value = -20.0;

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(40.0), &settings())
                .unwrap();

        assert!((statuses[0].observed_grams - 10.0).abs() < 1e-9);
        let timeline = statuses[0].timeline.as_ref().unwrap();
        assert_eq!(timeline[2].value, 0.0);
    }

    #[test]
    fn test_waterfall_split_then_handoff() {
        crate::logging::init_test();
        let entries = vec![
            CarbEntry::new(t0(), 20.0, None),
            CarbEntry::new(t0() + Duration::minutes(30), 30.0, None),
        ];
        // csf = 5; entry effects 100 and 150 mg/dL
        let effects = velocity(t0(), 36, 6.0);

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(50.0), &settings())
                .unwrap();

        let first = statuses[0].timeline.as_ref().unwrap();
        let second = statuses[1].timeline.as_ref().unwrap();

        // Before the second meal the first takes everything
        assert!((first[0].value - 6.0 / 5.0).abs() < 1e-12);

        // Shared samples split 20:30 by minimum absorption rate
        let shared_first = &first[6];
        let shared_second = &second[0];
        assert_eq!(shared_first.start, shared_second.start);
        assert!((shared_first.value - 0.4 * 6.0 / 5.0).abs() < 1e-12);
        assert!((shared_second.value - 0.6 * 6.0 / 5.0).abs() < 1e-12);

        // Once the first meal is complete the second gets the whole velocity
        let completion = statuses[0].absorption.observed_end;
        assert!(completion < t0() + Duration::hours(3));
        let after = second.iter().find(|s| s.start >= completion).unwrap();
        assert!((after.value - 6.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_overrun_credits_last_active_entry() {
        let entries = vec![CarbEntry::new(t0(), 10.0, Some(60.0))];
        // csf = 5, 50 mg/dL expected; 20 mg/dL per sample overruns quickly
        let effects = velocity(t0(), 6, 20.0);

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(50.0), &settings())
                .unwrap();

        let status = &statuses[0];
        assert!((status.observed_grams - 24.0).abs() < 1e-9);
        assert_eq!(status.absorption.clamped_grams, 10.0);
        assert_eq!(status.absorption.remaining_grams, 0.0);
        assert_eq!(status.absorption.observed_end, t0() + Duration::minutes(15));
        // The timeline stops at completion
        let timeline = status.timeline.as_ref().unwrap();
        assert_eq!(timeline.len(), 3);
        assert!((timeline[0].value - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_clamped_bounds_hold() {
        let entries = vec![
            CarbEntry::new(t0(), 45.0, Some(120.0)),
            CarbEntry::new(t0() + Duration::minutes(20), 15.0, Some(60.0)),
            CarbEntry::new(t0() + Duration::minutes(50), 60.0, None),
        ];
        let mut effects = velocity(t0(), 48, 3.0);
        for (i, effect) in effects.iter_mut().enumerate() {
            effect.value = ((i % 7) as f64 - 2.0) * 1.5;
        }

        let statuses = map_carb_absorption(
            &entries,
            &effects,
            &constant(12.0),
            &constant(45.0),
            &CarbAbsorptionSettings::default(),
        )
        .unwrap();

        let delay = CarbAbsorptionSettings::default().delay;
        for status in &statuses {
            let result = &status.absorption;
            assert!(result.clamped_grams >= 0.0);
            assert!(result.clamped_grams <= result.total_grams);
            let accounted = result.remaining_grams + result.clamped_grams;
            assert!((accounted - result.total_grams).abs() < 1e-9);

            // Never less than the linear model says must be gone by the last sample
            let since_entry =
                time_interval_since(status.properties.last_effect_date, status.entry.start);
            let elapsed = since_entry / 60.0 - delay;
            let min_predicted = linearly_absorbed_carbs(
                status.entry.quantity,
                elapsed,
                status.properties.max_absorption_time,
            );
            assert!(
                result.clamped_grams >= min_predicted,
                "clamped {} below linear floor {}",
                result.clamped_grams,
                min_predicted
            );
        }
    }

    #[test]
    fn test_allocations_never_exceed_sample() {
        let entries = vec![
            CarbEntry::new(t0(), 40.0, Some(90.0)),
            CarbEntry::new(t0() + Duration::minutes(10), 25.0, Some(120.0)),
        ];
        let effects = velocity(t0(), 30, 4.0);

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(50.0), &settings())
                .unwrap();

        let total_observed: f64 = statuses
            .iter()
            .map(|s| s.observed_grams * s.properties.carb_sensitivity)
            .sum();
        assert!(total_observed <= 4.0 * 30.0 + 1e-9);
    }

    #[test]
    fn test_allocations_within_each_sample() {
        let entries = vec![
            CarbEntry::new(t0(), 40.0, Some(300.0)),
            CarbEntry::new(t0() + Duration::minutes(10), 25.0, Some(600.0)),
        ];
        // csf = 5; 325 mg/dL of capacity against 290 mg/dL of rise
        let mut effects = velocity(t0(), 30, 10.0);
        effects[3].value = -5.0;

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(50.0), &settings())
                .unwrap();

        let explained: f64 = statuses
            .iter()
            .map(|s| s.observed_grams * s.properties.carb_sensitivity)
            .sum();
        assert!((explained - 290.0).abs() < 1e-9);

        for effect in &effects {
            let allocated: f64 = statuses
                .iter()
                .map(|status| {
                    let grams: f64 = status
                        .timeline
                        .as_ref()
                        .unwrap()
                        .iter()
                        .filter(|s| s.start == effect.start)
                        .map(|s| s.value)
                        .sum();
                    grams * status.properties.carb_sensitivity
                })
                .sum();
            assert!(
                allocated <= effect.value.max(0.0) + 1e-9,
                "allocated {} at {} exceeds {}",
                allocated,
                effect.start,
                effect.value
            );
        }
    }

    #[test]
    fn test_repeat_interval_allocation_appends() {
        let entry = CarbEntry::new(t0(), 30.0, Some(120.0));
        let mut builder = EntryBuilder::new(
            &entry,
            &constant(10.0),
            &constant(40.0),
            &settings(),
            t0() + Duration::minutes(30),
        )
        .unwrap();

        let end = t0() + Duration::minutes(5);
        builder.add_observed_effect(4.0, t0(), end);
        builder.add_observed_effect(2.0, t0(), end);

        assert_eq!(builder.observed_effect, 6.0);
        assert_eq!(builder.timeline.len(), 2);
        assert_eq!(builder.timeline[0].value, 1.0);
        assert_eq!(builder.timeline[1].value, 0.5);
        assert!(builder.timeline.iter().all(|s| s.start == t0() && s.end == end));
    }

    #[test]
    fn test_unbounded_absorption_time_does_not_fault() {
        let effects = velocity(t0(), 6, 4.0);

        let huge = vec![CarbEntry::new(t0(), 30.0, Some(1e300))];
        let statuses =
            map_carb_absorption(&huge, &effects, &constant(10.0), &constant(40.0), &settings())
                .unwrap();
        let status = &statuses[0];
        assert_eq!(status.properties.max_end_time, DateTime::<Utc>::MAX_UTC);
        assert!((status.observed_grams - 6.0).abs() < 1e-9);
        assert!(status.absorption.clamped_grams <= 30.0);
        assert!(status.absorption.estimated_minutes_remaining.is_finite());

        // Non-finite times fall back to the default
        for time in [f64::INFINITY, f64::NAN] {
            let entries = vec![CarbEntry::new(t0(), 30.0, Some(time))];
            let statuses = map_carb_absorption(
                &entries,
                &effects,
                &constant(10.0),
                &constant(40.0),
                &settings(),
            )
            .unwrap();
            assert_eq!(statuses[0].properties.max_absorption_time, 180.0);
            assert_eq!(statuses[0].properties.max_end_time, t0() + Duration::minutes(180));
        }
    }

    #[test]
    fn test_degenerate_samples_skipped() {
        let entries = vec![CarbEntry::new(t0(), 30.0, Some(120.0))];
        let effects = vec![
            EffectSample::new(t0(), t0(), 50.0),
            EffectSample::new(t0(), t0() + Duration::minutes(5), 4.0),
        ];

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(40.0), &settings())
                .unwrap();

        assert!((statuses[0].observed_grams - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_ratio_does_not_fault() {
        let entries = vec![CarbEntry::new(t0(), 30.0, Some(120.0))];
        let effects = velocity(t0(), 6, 4.0);

        let statuses =
            map_carb_absorption(&entries, &effects, &constant(0.0), &constant(40.0), &settings())
                .unwrap();

        let status = &statuses[0];
        assert_eq!(status.properties.carb_sensitivity, 0.0);
        assert_eq!(status.observed_grams, 0.0);
        assert!(status.absorption.clamped_grams.is_finite());
        assert!(status.absorption.estimated_minutes_remaining.is_finite());
    }

    #[test]
    fn test_empty_inputs() {
        let entries = vec![CarbEntry::new(t0(), 30.0, None)];
        let effects = velocity(t0(), 3, 1.0);
        let s = settings();

        assert!(map_carb_absorption(&[], &effects, &constant(10.0), &constant(40.0), &s)
            .unwrap()
            .is_empty());
        assert!(map_carb_absorption(&entries, &[], &constant(10.0), &constant(40.0), &s)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unsorted_entries_rejected() {
        let entries = vec![
            CarbEntry::new(t0() + Duration::minutes(30), 20.0, None),
            CarbEntry::new(t0(), 20.0, None),
        ];
        let effects = velocity(t0(), 3, 1.0);

        let err =
            map_carb_absorption(&entries, &effects, &constant(10.0), &constant(40.0), &settings())
                .unwrap_err();
        assert!(matches!(err, Error::Unsorted(_)));
    }
}
