#![forbid(unsafe_code)]

//! Core effect math for an automated insulin-dosing loop.
//!
//! This crate provides:
//! - Domain types (doses, carb entries, effect samples)
//! - Daily schedules (basal rate, carb ratio, insulin sensitivity)
//! - Dose reconciliation, annotation and trimming
//! - Insulin models and insulin-on-board / glucose-effect timelines
//! - Carb absorption apportionment
//! - Windowed queries over raw dose history

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod time;
pub mod schedule;
pub mod reconcile;
pub mod dose_math;
pub mod insulin_model;
pub mod insulin_math;
pub mod carb_math;
pub mod dose_store;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Settings;
pub use time::time_interval_since;
pub use schedule::{Schedule, ScheduleEntry};
pub use reconcile::reconciled;
pub use dose_math::{annotated, trim};
pub use insulin_model::{ExponentialPreset, InsulinModel};
pub use insulin_math::{glucose_effects, insulin_on_board, EffectTiming};
pub use carb_math::{map_carb_absorption, CarbAbsorptionSettings, CarbStatus, EPSILON};
pub use dose_store::{compute_glucose_effects, compute_insulin_on_board, last_bolus_time};
