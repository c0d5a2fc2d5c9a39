//! Windowed queries over raw dose history.
//!
//! Each query prepares the history the same way before handing it to the
//! effect math: look back one full action duration so earlier doses still
//! count, reconcile, annotate with the scheduled basal, and trim to the
//! look-back start.

use crate::dose_math::{annotated, filter_date_range, filter_date_range_for_doses, trim};
use crate::insulin_math::{glucose_effects, insulin_on_board, EffectTiming};
use crate::reconcile::{reconciled, sort_by_start};
use crate::{Dose, DoseType, EffectSample, InsulinModel, InsulinValue, Result, Schedule};
use chrono::{DateTime, Duration, Utc};

/// How far back `last_bolus_time` looks
const BOLUS_LOOKBACK_HOURS: i64 = 24;

/// Earliest dose start that can still act at `start`
fn lookback_start(start: DateTime<Utc>, model: &InsulinModel) -> DateTime<Utc> {
    start
        .checked_sub_signed(model.effect_duration())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Reconcile, annotate and trim the doses relevant from `dose_start` on.
fn prepare_doses(
    doses: &[Dose],
    dose_start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    trim_end: Option<DateTime<Utc>>,
    basal_schedule: &Schedule,
) -> Result<Vec<Dose>> {
    let filtered = filter_date_range_for_doses(doses, dose_start, end);
    let reconciled = reconciled(&filtered);
    let annotated = annotated(&reconciled, basal_schedule)?;

    let prepared: Vec<Dose> = annotated
        .iter()
        .map(|dose| trim(dose, dose_start, trim_end))
        .collect();

    tracing::debug!(
        "Prepared {} of {} doses from {}",
        prepared.len(),
        doses.len(),
        dose_start
    );
    Ok(prepared)
}

/// Glucose effect of insulin, per grid interval, for samples starting in
/// `[start, end)`.
pub fn compute_glucose_effects(
    doses: &[Dose],
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    basal_schedule: &Schedule,
    sensitivity_schedule: &Schedule,
    model: &InsulinModel,
    timing: EffectTiming,
) -> Result<Vec<EffectSample>> {
    let dose_start = lookback_start(start, model);
    let prepared = prepare_doses(doses, dose_start, end, None, basal_schedule)?;

    let effects = glucose_effects(
        &prepared,
        model,
        sensitivity_schedule,
        timing,
        start,
        end,
    )?;

    Ok(filter_date_range(effects, start, end))
}

/// Insulin on board at each grid instant in `[start, end)`.
///
/// `basal_dosing_end` caps dose intervals independently of the output
/// window, for callers that want to ignore basal delivery past some point.
pub fn compute_insulin_on_board(
    doses: &[Dose],
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    basal_schedule: &Schedule,
    model: &InsulinModel,
    timing: EffectTiming,
    basal_dosing_end: Option<DateTime<Utc>>,
) -> Result<Vec<InsulinValue>> {
    let dose_start = lookback_start(start, model);
    let prepared = prepare_doses(doses, dose_start, end, basal_dosing_end, basal_schedule)?;

    Ok(insulin_on_board(&prepared, model, timing, start, end)
        .into_iter()
        .filter(|value| value.date >= start && end.map_or(true, |end| value.date < end))
        .collect())
}

/// Start of the most recent bolus within the 24 hours before `now`
pub fn last_bolus_time(doses: &[Dose], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let since = now - Duration::hours(BOLUS_LOOKBACK_HOURS);
    let mut recent = filter_date_range_for_doses(doses, since, None);
    sort_by_start(&mut recent);

    recent
        .iter()
        .rev()
        .find(|dose| dose.dose_type == DoseType::Bolus)
        .map(|dose| dose.start)
}
