//! Structure modifiers: per-level scaling curves and how they stack.
//!
//! Stacking order per resource channel:
//! 1. `Production` values are summed.
//! 2. The sum is scaled by `1 + Σ ProductionEfficiency / 100`.
//! 3. The result is scaled by the biome yield multiplier.
//!
//! `Consumption` is summed on its own and never scaled. `Storage` adds to
//! capacity; `Happiness` and `Resilience` are settlement-wide sums.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ledger::ResourceKind;

/// Decimal places every resolved modifier value is rounded to.
pub const ROUNDING_DECIMALS: i32 = 2;

/// Round half away from zero to [`ROUNDING_DECIMALS`] places.
pub fn round_value(value: f64) -> f64 {
    let factor = 10f64.powi(ROUNDING_DECIMALS);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "curve", rename_all = "snake_case")]
pub enum Scaling {
    /// `base + per_level_factor * level`
    Linear,
    /// `base * (1 - decay_base^level)`, approaching `base` from below.
    Diminishing { decay_base: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModifierKind {
    Production { resource: ResourceKind },
    Consumption { resource: ResourceKind },
    /// Percentage applied to the channel's summed production.
    ProductionEfficiency { resource: ResourceKind },
    Storage { resource: ResourceKind },
    Happiness,
    Resilience,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModifierSpec {
    pub kind: ModifierKind,
    pub scaling: Scaling,
    pub base_value: f64,
    #[serde(default)]
    pub per_level_factor: f64,
}

impl ModifierSpec {
    pub fn linear(kind: ModifierKind, base_value: f64, per_level_factor: f64) -> Self {
        Self {
            kind,
            scaling: Scaling::Linear,
            base_value,
            per_level_factor,
        }
    }

    pub fn diminishing(kind: ModifierKind, base_value: f64, decay_base: f64) -> Self {
        Self {
            kind,
            scaling: Scaling::Diminishing { decay_base },
            base_value,
            per_level_factor: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.base_value.is_finite() || !self.per_level_factor.is_finite() {
            return Err("base_value and per_level_factor must be finite".into());
        }
        if let Scaling::Diminishing { decay_base } = self.scaling {
            if !(decay_base > 0.0 && decay_base < 1.0) {
                return Err(format!("decay_base must lie in (0, 1), got {decay_base}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedModifier {
    pub kind: ModifierKind,
    pub value: f64,
}

pub fn calculate_modifier_value(spec: &ModifierSpec, level: u32) -> f64 {
    let raw = match spec.scaling {
        Scaling::Linear => spec.base_value + spec.per_level_factor * level as f64,
        Scaling::Diminishing { decay_base } => {
            spec.base_value * (1.0 - decay_base.powi(level as i32))
        }
    };
    round_value(raw)
}

/// Per-channel accumulation of resolved modifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifierTotals {
    production: BTreeMap<ResourceKind, f64>,
    efficiency: BTreeMap<ResourceKind, f64>,
    consumption: BTreeMap<ResourceKind, f64>,
    storage: BTreeMap<ResourceKind, f64>,
    pub happiness: f64,
    pub resilience: f64,
}

impl ModifierTotals {
    pub fn stack<'a>(modifiers: impl IntoIterator<Item = &'a ResolvedModifier>) -> Self {
        let mut totals = Self::default();
        for modifier in modifiers {
            totals.add(modifier);
        }
        totals
    }

    pub fn add(&mut self, modifier: &ResolvedModifier) {
        let value = modifier.value;
        match modifier.kind {
            ModifierKind::Production { resource } => {
                *self.production.entry(resource).or_insert(0.0) += value
            }
            ModifierKind::ProductionEfficiency { resource } => {
                *self.efficiency.entry(resource).or_insert(0.0) += value
            }
            ModifierKind::Consumption { resource } => {
                *self.consumption.entry(resource).or_insert(0.0) += value
            }
            ModifierKind::Storage { resource } => {
                *self.storage.entry(resource).or_insert(0.0) += value
            }
            ModifierKind::Happiness => self.happiness += value,
            ModifierKind::Resilience => self.resilience += value,
        }
    }

    /// Additive production for the channel before any multiplier.
    pub fn base_production(&self, resource: ResourceKind) -> f64 {
        self.production.get(&resource).copied().unwrap_or(0.0)
    }

    /// Multiplier from summed efficiency percentages, never below zero.
    pub fn efficiency_multiplier(&self, resource: ResourceKind) -> f64 {
        let percent = self.efficiency.get(&resource).copied().unwrap_or(0.0);
        (1.0 + percent / 100.0).max(0.0)
    }

    pub fn net_production(&self, resource: ResourceKind, biome_multiplier: f64) -> f64 {
        let stacked = self.base_production(resource)
            * self.efficiency_multiplier(resource)
            * biome_multiplier.max(0.0);
        round_value(stacked.max(0.0))
    }

    pub fn consumption(&self, resource: ResourceKind) -> f64 {
        round_value(
            self.consumption
                .get(&resource)
                .copied()
                .unwrap_or(0.0)
                .max(0.0),
        )
    }

    pub fn storage(&self, resource: ResourceKind) -> f64 {
        self.storage.get(&resource).copied().unwrap_or(0.0)
    }
}
