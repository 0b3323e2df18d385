//! Settlement resource holdings

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Food,
    Water,
    Wood,
    Stone,
    Ore,
    Gold,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Food,
        ResourceKind::Water,
        ResourceKind::Wood,
        ResourceKind::Stone,
        ResourceKind::Ore,
        ResourceKind::Gold,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Food => "food",
            ResourceKind::Water => "water",
            ResourceKind::Wood => "wood",
            ResourceKind::Stone => "stone",
            ResourceKind::Ore => "ore",
            ResourceKind::Gold => "gold",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of adding production to a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Deposit {
    pub stored: f64,
    /// Amount that did not fit under the capacity.
    pub wasted: f64,
}

/// Outcome of drawing consumption from a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Withdrawal {
    pub taken: f64,
    /// Demand the holdings could not cover.
    pub shortfall: f64,
}

/// Non-negative quantity per resource, with an optional storage cap per
/// resource. Resources without a cap are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLedger {
    #[serde(default)]
    holdings: BTreeMap<ResourceKind, f64>,
    #[serde(default)]
    capacity: BTreeMap<ResourceKind, f64>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource: ResourceKind) -> f64 {
        self.holdings.get(&resource).copied().unwrap_or(0.0)
    }

    /// Overwrite a holding; negative or non-finite amounts store as zero.
    pub fn set(&mut self, resource: ResourceKind, amount: f64) {
        let amount = if amount.is_finite() { amount.max(0.0) } else { 0.0 };
        self.holdings.insert(resource, amount);
    }

    pub fn capacity(&self, resource: ResourceKind) -> Option<f64> {
        self.capacity.get(&resource).copied()
    }

    pub fn set_capacity(&mut self, resource: ResourceKind, capacity: f64) {
        self.capacity.insert(resource, capacity.max(0.0));
    }

    pub fn deposit(&mut self, resource: ResourceKind, amount: f64) -> Deposit {
        if amount <= 0.0 || !amount.is_finite() {
            return Deposit::default();
        }
        let current = self.get(resource);
        let space = match self.capacity(resource) {
            Some(cap) => (cap - current).max(0.0),
            None => f64::INFINITY,
        };
        let stored = amount.min(space);
        self.holdings.insert(resource, current + stored);
        Deposit {
            stored,
            wasted: amount - stored,
        }
    }

    pub fn withdraw(&mut self, resource: ResourceKind, amount: f64) -> Withdrawal {
        if amount <= 0.0 || !amount.is_finite() {
            return Withdrawal::default();
        }
        let current = self.get(resource);
        let taken = amount.min(current);
        self.holdings.insert(resource, current - taken);
        Withdrawal {
            taken,
            shortfall: amount - taken,
        }
    }

    /// Drop anything held above the current caps, returning the amount
    /// discarded per resource.
    pub fn enforce_capacity(&mut self) -> BTreeMap<ResourceKind, f64> {
        let mut spilled = BTreeMap::new();
        for (resource, cap) in &self.capacity {
            if let Some(held) = self.holdings.get_mut(resource) {
                if *held > *cap {
                    spilled.insert(*resource, *held - *cap);
                    *held = *cap;
                }
            }
        }
        spilled
    }

    pub fn clamp_non_negative(&mut self) {
        for amount in self.holdings.values_mut() {
            if !(*amount >= 0.0) {
                *amount = 0.0;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, f64)> + '_ {
        self.holdings.iter().map(|(r, a)| (*r, *a))
    }

    pub fn total(&self) -> f64 {
        self.holdings.values().sum()
    }
}
