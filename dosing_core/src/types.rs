//! Core domain types for the dosing engine.
//!
//! This module defines the value records every computation consumes or produces:
//! - Dose events from pump history
//! - Carb entries
//! - Effect samples and insulin-on-board values

use crate::error::ensure_same_len;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Dose Types
// ============================================================================

/// Kind of pump dose event
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseType {
    Basal,
    #[serde(alias = "tempBasal", alias = "tempbasal")]
    TempBasal,
    Suspend,
    Resume,
    Bolus,
}

impl DoseType {
    /// Basal and temp basal doses both program a delivery rate
    pub fn is_basal_rate(self) -> bool {
        matches!(self, DoseType::Basal | DoseType::TempBasal)
    }
}

impl FromStr for DoseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "").as_str() {
            "basal" => Ok(DoseType::Basal),
            "tempbasal" => Ok(DoseType::TempBasal),
            "suspend" => Ok(DoseType::Suspend),
            "resume" => Ok(DoseType::Resume),
            "bolus" => Ok(DoseType::Bolus),
            other => Err(Error::Config(format!("Unknown dose type: {}", other))),
        }
    }
}

/// A single insulin delivery record.
///
/// `value` is U/hr for rate-like types and U for boluses. Zero-duration doses
/// are discrete events (boluses, resumes).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Dose {
    #[serde(rename = "type")]
    pub dose_type: DoseType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub scheduled_basal_rate: Option<f64>,
}

impl Dose {
    pub fn new(dose_type: DoseType, start: DateTime<Utc>, end: DateTime<Utc>, value: f64) -> Self {
        Self {
            dose_type,
            start,
            end,
            value,
            scheduled_basal_rate: None,
        }
    }

    pub fn bolus(at: DateTime<Utc>, units: f64) -> Self {
        Self::new(DoseType::Bolus, at, at, units)
    }

    pub fn temp_basal(start: DateTime<Utc>, end: DateTime<Utc>, units_per_hour: f64) -> Self {
        Self::new(DoseType::TempBasal, start, end, units_per_hour)
    }

    /// Build doses from parallel columns, as exported by pump history stores.
    ///
    /// Rejects columns of unequal length before looking at any value.
    pub fn from_columns(
        types: &[DoseType],
        starts: &[DateTime<Utc>],
        ends: &[DateTime<Utc>],
        values: &[f64],
    ) -> Result<Vec<Dose>> {
        ensure_same_len("dose", &[types.len(), starts.len(), ends.len(), values.len()])?;

        Ok(types
            .iter()
            .zip(starts)
            .zip(ends)
            .zip(values)
            .map(|(((&dose_type, &start), &end), &value)| {
                if end < start {
                    tracing::warn!(
                        "{:?} dose at {} ends before it starts; treating as momentary",
                        dose_type,
                        start
                    );
                }
                Dose::new(dose_type, start, end.max(start), value)
            })
            .collect())
    }

    /// Length of the dose in hours
    pub fn hours(&self) -> f64 {
        crate::time_interval_since(self.end, self.start) / 3600.0
    }

    /// Insulin delivered beyond what the scheduled basal would have delivered.
    ///
    /// Boluses count in full. Rate doses count their rate minus the annotated
    /// scheduled rate over their duration; suspends deliver nothing, so they
    /// come out negative.
    pub fn net_basal_units(&self) -> f64 {
        if self.dose_type == DoseType::Bolus {
            return self.value;
        }

        let hours = self.hours();
        if hours <= 0.0 {
            return 0.0;
        }

        let delivered_rate = match self.dose_type {
            DoseType::Suspend => 0.0,
            _ => self.value,
        };
        let scheduled_rate = self.scheduled_basal_rate.unwrap_or(0.0);

        (delivered_rate - scheduled_rate) * hours
    }
}

// ============================================================================
// Carb Types
// ============================================================================

/// A meal record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbEntry {
    pub start: DateTime<Utc>,
    /// Grams of carbohydrate
    pub quantity: f64,
    /// Expected absorption time in minutes; the configured default applies when absent
    #[serde(default)]
    pub absorption_time: Option<f64>,
}

impl CarbEntry {
    pub fn new(start: DateTime<Utc>, quantity: f64, absorption_time: Option<f64>) -> Self {
        Self {
            start,
            quantity,
            absorption_time,
        }
    }

    /// Build carb entries from parallel columns
    pub fn from_columns(
        starts: &[DateTime<Utc>],
        quantities: &[f64],
        absorption_times: &[Option<f64>],
    ) -> Result<Vec<CarbEntry>> {
        ensure_same_len(
            "carb entry",
            &[starts.len(), quantities.len(), absorption_times.len()],
        )?;

        Ok(starts
            .iter()
            .zip(quantities)
            .zip(absorption_times)
            .map(|((&start, &quantity), &absorption_time)| {
                CarbEntry::new(start, quantity, absorption_time)
            })
            .collect())
    }
}

// ============================================================================
// Timeline Types
// ============================================================================

/// Glucose effect (mg/dL) attributed to a cause over `[start, end)`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EffectSample {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
}

impl EffectSample {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, value: f64) -> Self {
        Self { start, end, value }
    }

    /// A sample that does not span forward in time carries no information
    pub fn is_degenerate(&self) -> bool {
        self.start >= self.end
    }

    /// Build effect samples from parallel columns
    pub fn from_columns(
        starts: &[DateTime<Utc>],
        ends: &[DateTime<Utc>],
        values: &[f64],
    ) -> Result<Vec<EffectSample>> {
        ensure_same_len("effect", &[starts.len(), ends.len(), values.len()])?;

        Ok(starts
            .iter()
            .zip(ends)
            .zip(values)
            .map(|((&start, &end), &value)| EffectSample::new(start, end, value))
            .collect())
    }
}

/// Insulin on board (U) at an instant
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InsulinValue {
    pub date: DateTime<Utc>,
    pub value: f64,
}

/// Cumulative glucose effect (mg/dL) at an instant
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseEffect {
    pub date: DateTime<Utc>,
    pub value: f64,
}
