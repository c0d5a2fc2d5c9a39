//! Insulin action curves.
//!
//! Each model answers one question: what fraction of a dose is still waiting
//! to act, some number of minutes after it was delivered.

use crate::time::{hours, minutes};
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Pharmacokinetic insulin model
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InsulinModel {
    /// Walsh IOB curves, parameterized by duration of insulin action
    Walsh { action_duration_hours: f64 },
    /// Exponential decay with an explicit time to peak activity
    Exponential {
        action_duration_minutes: f64,
        peak_activity_minutes: f64,
    },
}

/// Published exponential curve parameters
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExponentialPreset {
    RapidActingAdult,
    RapidActingChild,
    Fiasp,
}

impl ExponentialPreset {
    pub fn model(self) -> InsulinModel {
        let peak = match self {
            ExponentialPreset::RapidActingAdult => 75.0,
            ExponentialPreset::RapidActingChild => 65.0,
            ExponentialPreset::Fiasp => 55.0,
        };
        InsulinModel::Exponential {
            action_duration_minutes: 360.0,
            peak_activity_minutes: peak,
        }
    }
}

impl InsulinModel {
    pub fn walsh(action_duration_hours: f64) -> Result<Self> {
        let model = InsulinModel::Walsh {
            action_duration_hours,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn exponential(action_duration_minutes: f64, peak_activity_minutes: f64) -> Result<Self> {
        let model = InsulinModel::Exponential {
            action_duration_minutes,
            peak_activity_minutes,
        };
        model.validate()?;
        Ok(model)
    }

    /// Model from a bare parameter list: `[DIA hours]` selects Walsh,
    /// `[DIA minutes, peak minutes]` selects exponential.
    pub fn from_parameters(parameters: &[f64]) -> Result<Self> {
        match *parameters {
            [hours] => Self::walsh(hours),
            [duration, peak] => Self::exponential(duration, peak),
            _ => Err(Error::InvalidModel(format!(
                "expected 1 (Walsh) or 2 (exponential) parameters, got {}",
                parameters.len()
            ))),
        }
    }

    /// Check the parameters describe a curve that can be evaluated
    pub fn validate(&self) -> Result<()> {
        match *self {
            InsulinModel::Walsh {
                action_duration_hours,
            } => {
                if !(action_duration_hours.is_finite() && action_duration_hours > 0.0) {
                    return Err(Error::InvalidModel(format!(
                        "Walsh action duration must be positive, got {} h",
                        action_duration_hours
                    )));
                }
            }
            InsulinModel::Exponential {
                action_duration_minutes,
                peak_activity_minutes,
            } => {
                if !(action_duration_minutes.is_finite() && action_duration_minutes > 0.0) {
                    return Err(Error::InvalidModel(format!(
                        "exponential action duration must be positive, got {} min",
                        action_duration_minutes
                    )));
                }
                // The curve's time constant is only positive for peaks in (0, DIA / 2)
                if !(peak_activity_minutes > 0.0
                    && peak_activity_minutes < action_duration_minutes / 2.0)
                {
                    return Err(Error::InvalidModel(format!(
                        "peak activity {} min must lie within (0, {}) min",
                        peak_activity_minutes,
                        action_duration_minutes / 2.0
                    )));
                }
            }
        }
        Ok(())
    }

    /// Duration of insulin action in minutes
    pub fn action_duration_minutes(&self) -> f64 {
        match *self {
            InsulinModel::Walsh {
                action_duration_hours,
            } => action_duration_hours * 60.0,
            InsulinModel::Exponential {
                action_duration_minutes,
                ..
            } => action_duration_minutes,
        }
    }

    /// How far back doses can still influence the present
    pub fn effect_duration(&self) -> Duration {
        match *self {
            InsulinModel::Walsh {
                action_duration_hours,
            } => hours(action_duration_hours),
            InsulinModel::Exponential {
                action_duration_minutes,
                ..
            } => minutes(action_duration_minutes),
        }
    }

    /// Fraction of a dose not yet acting, `minutes` after delivery.
    ///
    /// 1 at or before delivery, 0 once the action duration has elapsed.
    pub fn percent_effect_remaining(&self, minutes: f64) -> f64 {
        let duration = self.action_duration_minutes();
        if minutes <= 0.0 {
            return 1.0;
        }
        if minutes >= duration {
            return 0.0;
        }

        match *self {
            InsulinModel::Walsh {
                action_duration_hours,
            } => walsh_percent_effect_remaining(minutes, action_duration_hours),
            InsulinModel::Exponential {
                action_duration_minutes,
                peak_activity_minutes,
            } => exponential_percent_effect_remaining(
                minutes,
                action_duration_minutes,
                peak_activity_minutes,
            ),
        }
    }
}

/// Walsh curves exist for 3, 4, 5 and 6 hour actions; other durations are
/// scaled onto the nearest one.
fn walsh_percent_effect_remaining(minutes: f64, action_duration_hours: f64) -> f64 {
    let modeled_hours = if action_duration_hours < 4.0 {
        3.0
    } else if action_duration_hours < 5.0 {
        4.0
    } else if action_duration_hours < 6.0 {
        5.0
    } else {
        6.0
    };

    let t = minutes * modeled_hours / action_duration_hours;
    let (a4, a3, a2, a1, a0) = if modeled_hours == 3.0 {
        (-3.2030e-9, 1.354e-6, -1.759e-4, 9.255e-4, 0.99951)
    } else if modeled_hours == 4.0 {
        (-3.310e-10, 2.530e-7, -5.510e-5, -9.086e-4, 0.99950)
    } else if modeled_hours == 5.0 {
        (-2.950e-10, 2.320e-7, -5.550e-5, 4.490e-4, 0.99300)
    } else {
        (-1.493e-10, 1.413e-7, -4.095e-5, 6.365e-4, 0.99700)
    };

    let remaining = (((a4 * t + a3) * t + a2) * t + a1) * t + a0;
    remaining.clamp(0.0, 1.0)
}

fn exponential_percent_effect_remaining(minutes: f64, duration: f64, peak: f64) -> f64 {
    let tau = peak * (1.0 - peak / duration) / (1.0 - 2.0 * peak / duration);
    let a = 2.0 * tau / duration;
    let s = 1.0 / (1.0 - a + (1.0 + a) * (-duration / tau).exp());

    let t = minutes;
    1.0 - s * (1.0 - a)
        * ((t.powi(2) / (tau * duration * (1.0 - a)) - t / tau - 1.0) * (-t / tau).exp() + 1.0)
}
