//! Tunable parameters for the tick engine
//!
//! Every field has a serde default so scenario files only list what they
//! change.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_food_per_capita() -> f64 {
    0.05
}

fn default_water_per_capita() -> f64 {
    0.04
}

fn default_base_storage() -> f64 {
    100.0
}

fn default_shortage_happiness_penalty() -> f64 {
    5.0
}

/// Population upkeep and storage baseline applied on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomyConfig {
    #[serde(default = "default_food_per_capita")]
    pub food_per_capita: f64,
    #[serde(default = "default_water_per_capita")]
    pub water_per_capita: f64,
    /// Capacity every settlement has per resource before storage modifiers.
    #[serde(default = "default_base_storage")]
    pub base_storage: f64,
    /// Happiness lost per resource with unmet demand in a tick.
    #[serde(default = "default_shortage_happiness_penalty")]
    pub shortage_happiness_penalty: f64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            food_per_capita: default_food_per_capita(),
            water_per_capita: default_water_per_capita(),
            base_storage: default_base_storage(),
            shortage_happiness_penalty: default_shortage_happiness_penalty(),
        }
    }
}

fn default_density_weight() -> f64 {
    0.5
}

fn default_density_reference() -> f64 {
    10.0
}

fn default_history_weight() -> f64 {
    0.25
}

fn default_history_lookback() -> i64 {
    24
}

fn default_resilience_half_point() -> f64 {
    50.0
}

fn default_max_probability() -> f64 {
    0.5
}

fn default_max_loss_fraction() -> f64 {
    0.5
}

fn default_casualty_rate() -> f64 {
    0.1
}

fn default_damage_rate() -> f64 {
    0.5
}

fn default_destroy_fraction() -> f64 {
    0.5
}

fn default_resilience_gain_scale() -> f64 {
    10.0
}

fn default_resilience_gain_exponent() -> f64 {
    1.5
}

/// Game-balance curve of the disaster engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterConfig {
    /// Occurrence boost per unit of structure density.
    #[serde(default = "default_density_weight")]
    pub density_weight: f64,
    /// Built structure count that counts as density 1.0.
    #[serde(default = "default_density_reference")]
    pub density_reference: f64,
    /// Occurrence boost per disaster in the lookback period.
    #[serde(default = "default_history_weight")]
    pub history_weight: f64,
    #[serde(default = "default_history_lookback")]
    pub history_lookback_windows: i64,
    /// Resilience at which occurrence and severity are halved.
    #[serde(default = "default_resilience_half_point")]
    pub resilience_half_point: f64,
    #[serde(default = "default_max_probability")]
    pub max_probability: f64,
    /// Share of each holding lost to a severity-100 disaster.
    #[serde(default = "default_max_loss_fraction")]
    pub max_loss_fraction: f64,
    #[serde(default = "default_casualty_rate")]
    pub casualty_rate: f64,
    #[serde(default = "default_damage_rate")]
    pub damage_rate: f64,
    /// Share of affected structures destroyed by a catastrophic disaster.
    #[serde(default = "default_destroy_fraction")]
    pub destroy_fraction: f64,
    #[serde(default = "default_resilience_gain_scale")]
    pub resilience_gain_scale: f64,
    #[serde(default = "default_resilience_gain_exponent")]
    pub resilience_gain_exponent: f64,
}

impl Default for DisasterConfig {
    fn default() -> Self {
        Self {
            density_weight: default_density_weight(),
            density_reference: default_density_reference(),
            history_weight: default_history_weight(),
            history_lookback_windows: default_history_lookback(),
            resilience_half_point: default_resilience_half_point(),
            max_probability: default_max_probability(),
            max_loss_fraction: default_max_loss_fraction(),
            casualty_rate: default_casualty_rate(),
            damage_rate: default_damage_rate(),
            destroy_fraction: default_destroy_fraction(),
            resilience_gain_scale: default_resilience_gain_scale(),
            resilience_gain_exponent: default_resilience_gain_exponent(),
        }
    }
}

impl DisasterConfig {
    pub fn validate(&self) -> Result<(), String> {
        let fractions = [
            ("max_probability", self.max_probability),
            ("max_loss_fraction", self.max_loss_fraction),
            ("casualty_rate", self.casualty_rate),
            ("damage_rate", self.damage_rate),
            ("destroy_fraction", self.destroy_fraction),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must lie in [0, 1], got {value}"));
            }
        }
        let weights = [
            ("density_weight", self.density_weight),
            ("history_weight", self.history_weight),
            ("resilience_gain_scale", self.resilience_gain_scale),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be finite and non-negative, got {value}"));
            }
        }
        if !self.resilience_gain_exponent.is_finite() || self.resilience_gain_exponent <= 0.0 {
            return Err(format!(
                "resilience_gain_exponent must be positive, got {}",
                self.resilience_gain_exponent
            ));
        }
        if self.density_reference <= 0.0 || self.resilience_half_point <= 0.0 {
            return Err("density_reference and resilience_half_point must be positive".into());
        }
        if self.history_lookback_windows < 0 {
            return Err("history_lookback_windows must not be negative".into());
        }
        Ok(())
    }
}

fn default_parallel_threshold() -> usize {
    64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Settlement count at which a pass switches to parallel processing.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    /// Stop starting new settlements once a pass has run this long.
    #[serde(default)]
    pub pass_timeout_ms: Option<u64>,
}

impl OrchestratorConfig {
    pub fn pass_timeout(&self) -> Option<Duration> {
        self.pass_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: default_parallel_threshold(),
            pass_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Write any config section back out as YAML.
pub fn to_yaml<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(value)?;
    fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
