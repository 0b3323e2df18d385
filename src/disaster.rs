//! Probabilistic disasters
//!
//! The engine is stateless: everything it reads comes in through a
//! [`RiskProfile`] and every random draw comes from the caller's generator.
//! Draw order is occurrence, hazard, severity.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::DisasterConfig;
use crate::economy::{round_value, ResourceKind, ResourceLedger, StructureInstance};
use crate::rng::RngExt;
use crate::terrain::Biome;
use crate::world::TickWindow;

pub const MAX_SEVERITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisasterType {
    Flood,
    Drought,
    Wildfire,
    Earthquake,
    Blizzard,
    Plague,
}

impl DisasterType {
    pub fn name(self) -> &'static str {
        match self {
            DisasterType::Flood => "flood",
            DisasterType::Drought => "drought",
            DisasterType::Wildfire => "wildfire",
            DisasterType::Earthquake => "earthquake",
            DisasterType::Blizzard => "blizzard",
            DisasterType::Plague => "plague",
        }
    }
}

impl fmt::Display for DisasterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityLevel {
    Minor,
    Moderate,
    Major,
    Catastrophic,
}

impl SeverityLevel {
    /// 0-24 minor, 25-49 moderate, 50-74 major, 75-100 catastrophic.
    pub fn from_severity(severity: u8) -> Self {
        match severity {
            0..=24 => SeverityLevel::Minor,
            25..=49 => SeverityLevel::Moderate,
            50..=74 => SeverityLevel::Major,
            _ => SeverityLevel::Catastrophic,
        }
    }
}

/// One disaster that struck one settlement. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterEvent {
    pub disaster_type: DisasterType,
    pub severity: u8,
    pub severity_level: SeverityLevel,
    pub casualties: u64,
    pub structures_damaged: u32,
    pub structures_destroyed: u32,
    pub resources_lost: BTreeMap<ResourceKind, f64>,
    pub resilience_gained: f64,
    pub timestamp: DateTime<Utc>,
    pub tick_window: TickWindow,
}

impl DisasterEvent {
    pub fn total_resources_lost(&self) -> f64 {
        self.resources_lost.values().sum()
    }

    /// Lower structure levels: destroyed structures drop to level 0, damaged
    /// ones lose a level. Highest levels are hit first.
    pub fn apply_structure_damage(&self, structures: &mut [StructureInstance]) {
        let mut built: Vec<usize> = (0..structures.len())
            .filter(|&i| structures[i].level > 0)
            .collect();
        built.sort_by(|&a, &b| structures[b].level.cmp(&structures[a].level).then(a.cmp(&b)));

        let destroyed = self.structures_destroyed as usize;
        let damaged = self.structures_damaged as usize;
        for (rank, &index) in built.iter().enumerate() {
            if rank < destroyed {
                structures[index].level = 0;
            } else if rank < destroyed + damaged {
                structures[index].level -= 1;
            } else {
                break;
            }
        }
    }
}

/// What the engine needs to know about a settlement for one roll.
#[derive(Debug, Clone, Copy)]
pub struct RiskProfile<'a> {
    pub biome: &'a Biome,
    pub structures: &'a [StructureInstance],
    pub population: u64,
    pub ledger: &'a ResourceLedger,
    /// Disasters suffered within the configured lookback.
    pub recent_disasters: u32,
    pub resilience: f64,
    pub timestamp: DateTime<Utc>,
    pub tick_window: TickWindow,
}

impl RiskProfile<'_> {
    fn built_count(&self) -> u32 {
        self.structures.iter().filter(|s| s.level > 0).count() as u32
    }
}

#[derive(Debug, Clone, Default)]
pub struct DisasterEngine {
    config: DisasterConfig,
}

impl DisasterEngine {
    pub fn new(config: DisasterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DisasterConfig {
        &self.config
    }

    /// Share of occurrence chance and severity removed by resilience; 0.5 at
    /// the configured half point.
    pub fn resilience_mitigation(&self, resilience: f64) -> f64 {
        let resilience = resilience.max(0.0);
        resilience / (resilience + self.config.resilience_half_point)
    }

    pub fn occurrence_probability(&self, profile: &RiskProfile<'_>) -> f64 {
        if profile.biome.hazards.is_empty() {
            return 0.0;
        }
        let density = profile.built_count() as f64 / self.config.density_reference;
        let probability = profile.biome.disaster_risk
            * (1.0 + self.config.density_weight * density)
            * (1.0 + self.config.history_weight * profile.recent_disasters as f64)
            * (1.0 - self.resilience_mitigation(profile.resilience));
        probability.clamp(0.0, self.config.max_probability)
    }

    pub fn roll_disaster<R: Rng + ?Sized>(
        &self,
        profile: &RiskProfile<'_>,
        rng: &mut R,
    ) -> Option<DisasterEvent> {
        let probability = self.occurrence_probability(profile);
        if !rng.random_bool(probability) {
            return None;
        }

        let weights: Vec<f64> = profile.biome.hazards.iter().map(|h| h.weight).collect();
        let picker = WeightedIndex::new(&weights).ok()?;
        let disaster_type = profile.biome.hazards[picker.sample(rng)].disaster;
        let drawn = rng.gen_range(0..=MAX_SEVERITY);

        Some(self.resolve(disaster_type, drawn, profile))
    }

    /// Build the event for a drawn severity. Deterministic.
    pub fn resolve(
        &self,
        disaster_type: DisasterType,
        drawn_severity: u8,
        profile: &RiskProfile<'_>,
    ) -> DisasterEvent {
        let mitigation = self.resilience_mitigation(profile.resilience);
        let severity = (drawn_severity.min(MAX_SEVERITY) as f64 * (1.0 - mitigation))
            .round()
            .clamp(0.0, MAX_SEVERITY as f64) as u8;
        let severity_level = SeverityLevel::from_severity(severity);
        let intensity = severity as f64 / MAX_SEVERITY as f64;

        let mut resources_lost = BTreeMap::new();
        for (resource, held) in profile.ledger.iter() {
            let lost = round_value(held * intensity * self.config.max_loss_fraction).min(held);
            if lost > 0.0 {
                resources_lost.insert(resource, lost);
            }
        }

        let casualties = ((profile.population as f64 * intensity * self.config.casualty_rate)
            .floor() as u64)
            .min(profile.population);

        let built = profile.built_count();
        let affected = ((built as f64 * intensity * self.config.damage_rate).round() as u32)
            .min(built);
        let structures_destroyed = if severity_level == SeverityLevel::Catastrophic {
            (affected as f64 * self.config.destroy_fraction).floor() as u32
        } else {
            0
        };

        let resilience_gained = round_value(
            self.config.resilience_gain_scale
                * intensity.powf(self.config.resilience_gain_exponent),
        );

        DisasterEvent {
            disaster_type,
            severity,
            severity_level,
            casualties,
            structures_damaged: affected - structures_destroyed,
            structures_destroyed,
            resources_lost,
            resilience_gained,
            timestamp: profile.timestamp,
            tick_window: profile.tick_window,
        }
    }
}
