//! Configuration file support for dosekit.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/dosekit/config.toml`.

use crate::carb_math::{CarbAbsorptionSettings, EPSILON};
use crate::insulin_math::{EffectTiming, DEFAULT_DELAY_MINUTES, DEFAULT_DELTA_MINUTES};
use crate::time::minutes;
use crate::{Error, InsulinModel, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine settings
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub insulin: InsulinConfig,

    #[serde(default)]
    pub carbs: CarbConfig,
}

/// Which insulin curve to use
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Walsh,
    #[default]
    Exponential,
}

/// Insulin model and simulation grid configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InsulinConfig {
    #[serde(default)]
    pub model: ModelKind,

    #[serde(default = "default_action_duration_minutes")]
    pub action_duration_minutes: f64,

    /// Only used by the exponential model
    #[serde(default = "default_peak_activity_minutes")]
    pub peak_activity_minutes: f64,

    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: f64,

    #[serde(default = "default_delta_minutes")]
    pub delta_minutes: f64,
}

impl Default for InsulinConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            action_duration_minutes: default_action_duration_minutes(),
            peak_activity_minutes: default_peak_activity_minutes(),
            delay_minutes: default_delay_minutes(),
            delta_minutes: default_delta_minutes(),
        }
    }
}

/// Carb absorption configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbConfig {
    #[serde(default = "default_absorption_minutes")]
    pub default_absorption_minutes: f64,

    #[serde(default = "default_absorption_time_overrun")]
    pub absorption_time_overrun: f64,

    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: f64,

    #[serde(default = "default_overrun_epsilon")]
    pub overrun_epsilon: f64,
}

impl Default for CarbConfig {
    fn default() -> Self {
        Self {
            default_absorption_minutes: default_absorption_minutes(),
            absorption_time_overrun: default_absorption_time_overrun(),
            delay_minutes: default_delay_minutes(),
            overrun_epsilon: default_overrun_epsilon(),
        }
    }
}

// Default value functions
fn default_action_duration_minutes() -> f64 {
    360.0
}

fn default_peak_activity_minutes() -> f64 {
    75.0
}

fn default_delay_minutes() -> f64 {
    DEFAULT_DELAY_MINUTES
}

fn default_delta_minutes() -> f64 {
    DEFAULT_DELTA_MINUTES
}

fn default_absorption_minutes() -> f64 {
    180.0
}

fn default_absorption_time_overrun() -> f64 {
    1.5
}

fn default_overrun_epsilon() -> f64 {
    EPSILON
}

impl Settings {
    /// Load settings from the standard config path
    pub fn load() -> Result<Self> {
        match Self::default_config_path() {
            Some(config_path) if config_path.exists() => Self::load_from(&config_path),
            config_path => {
                tracing::info!(
                    "No config file found at {:?}, using defaults",
                    config_path
                );
                Ok(Self::default())
            }
        }
    }

    /// Load settings from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        settings.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(settings)
    }

    /// Get the default config file path, if the platform has a config directory
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|base| base.join("dosekit").join("config.toml"))
    }

    /// Save the current settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject settings no computation could run with
    pub fn validate(&self) -> Result<()> {
        self.insulin_model()
            .map_err(|e| Error::Config(e.to_string()))?;

        let insulin = &self.insulin;
        if insulin.delta_minutes <= 0.0 {
            return Err(Error::Config(format!(
                "insulin.delta_minutes must be positive, got {}",
                insulin.delta_minutes
            )));
        }
        if insulin.delay_minutes < 0.0 || self.carbs.delay_minutes < 0.0 {
            return Err(Error::Config("delay_minutes must not be negative".into()));
        }

        let carbs = &self.carbs;
        if carbs.default_absorption_minutes <= 0.0 || carbs.absorption_time_overrun <= 0.0 {
            return Err(Error::Config(
                "carb absorption time and overrun must be positive".into(),
            ));
        }
        if carbs.overrun_epsilon < 0.0 {
            return Err(Error::Config("carbs.overrun_epsilon must not be negative".into()));
        }

        Ok(())
    }

    /// The configured insulin curve
    pub fn insulin_model(&self) -> Result<InsulinModel> {
        match self.insulin.model {
            ModelKind::Walsh => InsulinModel::walsh(self.insulin.action_duration_minutes / 60.0),
            ModelKind::Exponential => InsulinModel::exponential(
                self.insulin.action_duration_minutes,
                self.insulin.peak_activity_minutes,
            ),
        }
    }

    pub fn effect_timing(&self) -> EffectTiming {
        EffectTiming::new(
            minutes(self.insulin.delay_minutes),
            minutes(self.insulin.delta_minutes),
        )
    }

    pub fn carb_absorption(&self) -> CarbAbsorptionSettings {
        CarbAbsorptionSettings {
            absorption_time_overrun: self.carbs.absorption_time_overrun,
            default_absorption_time: self.carbs.default_absorption_minutes,
            delay: self.carbs.delay_minutes,
            overrun_epsilon: self.carbs.overrun_epsilon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.insulin.model, ModelKind::Exponential);
        assert_eq!(settings.effect_timing(), EffectTiming::default());
        assert_eq!(settings.carb_absorption(), CarbAbsorptionSettings::default());
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings::default();
        let toml_str = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&toml_str).unwrap();

        assert_eq!(settings, parsed);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[insulin]
model = "walsh"
action_duration_minutes = 240
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(
            settings.insulin_model().unwrap(),
            InsulinModel::Walsh {
                action_duration_hours: 4.0
            }
        );
        assert_eq!(settings.carbs.absorption_time_overrun, 1.5); // default
    }

    #[test]
    fn test_invalid_peak_rejected() {
        let mut settings = Settings::default();
        settings.insulin.peak_activity_minutes = 200.0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_and_save() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.carbs.default_absorption_minutes = 240.0;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.carbs.default_absorption_minutes, 240.0);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[insulin]\ndelta_minutes = 0\n").unwrap();

        assert!(Settings::load_from(&path).is_err());
    }
}
