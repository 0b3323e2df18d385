//! Deterministic random number generation
//!
//! Every random stream is derived from (world seed, stream id, entity id, tick)
//! so a pass can be replayed exactly without any shared generator.

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Root seed of a world. Accepts either an integer or a string in config;
/// strings are hashed with xxh64 so the same text seeds the same world on
/// every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "SeedRepr", into = "u64")]
pub struct WorldSeed(u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedRepr {
    Number(u64),
    Text(String),
}

impl From<SeedRepr> for WorldSeed {
    fn from(value: SeedRepr) -> Self {
        match value {
            SeedRepr::Number(seed) => WorldSeed(seed),
            SeedRepr::Text(text) => WorldSeed::from(text.as_str()),
        }
    }
}

impl From<u64> for WorldSeed {
    fn from(value: u64) -> Self {
        WorldSeed(value)
    }
}

impl From<&str> for WorldSeed {
    fn from(value: &str) -> Self {
        WorldSeed(xxh64(value.as_bytes(), 0))
    }
}

impl From<WorldSeed> for u64 {
    fn from(value: WorldSeed) -> Self {
        value.0
    }
}

impl WorldSeed {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorldSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for a named random stream.
pub fn stream_id(name: &str) -> u64 {
    xxh64(name.as_bytes(), 0)
}

/// Mix the master seed with stream, entity and tick.
pub fn derive_seed(master_seed: u64, stream: u64, entity_id: u64, tick: i64) -> u64 {
    let mut seed = master_seed;
    seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    seed ^= stream.wrapping_mul(1103515245);
    seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    seed ^= entity_id.wrapping_mul(48271);
    seed = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    seed ^= (tick as u64).wrapping_mul(69069);
    seed
}

/// Hands out per-(stream, entity, tick) generators. Holds no mutable state,
/// so it can be shared across worker threads.
#[derive(Debug, Clone, Copy)]
pub struct RngManager {
    master_seed: u64,
}

impl RngManager {
    pub fn new(seed: impl Into<WorldSeed>) -> Self {
        Self {
            master_seed: seed.into().raw(),
        }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn create_entity_rng(&self, stream: &str, entity_id: u64, tick: i64) -> ChaCha8Rng {
        let seed = derive_seed(self.master_seed, stream_id(stream), entity_id, tick);
        ChaCha8Rng::seed_from_u64(seed)
    }
}

impl Default for RngManager {
    fn default() -> Self {
        Self::new(42u64)
    }
}

/// Helper for probability draws
pub trait RngExt {
    fn random_bool(&mut self, probability: f64) -> bool;
}

impl<R: Rng + ?Sized> RngExt for R {
    fn random_bool(&mut self, probability: f64) -> bool {
        self.gen::<f64>() < probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_rng() {
        let rng = RngManager::new(42u64);

        let mut rng1 = rng.create_entity_rng("disaster", 100, 7);
        let mut rng2 = rng.create_entity_rng("disaster", 100, 7);
        let mut rng3 = rng.create_entity_rng("disaster", 101, 7);

        let val1: f64 = rng1.gen();
        let val2: f64 = rng2.gen();
        let val3: f64 = rng3.gen();

        assert_eq!(val1, val2, "Same entity should produce same values");
        assert_ne!(val1, val3, "Different entities should produce different values");
    }

    #[test]
    fn test_tick_changes_stream() {
        let rng = RngManager::new(42u64);
        let a: f64 = rng.create_entity_rng("economy", 1, 10).gen();
        let b: f64 = rng.create_entity_rng("economy", 1, 11).gen();
        assert_ne!(a, b);
    }

    #[test]
    fn test_string_seed_is_stable() {
        let a = WorldSeed::from("ashen-vale");
        let b = WorldSeed::from("ashen-vale");
        assert_eq!(a, b);
        assert_ne!(a, WorldSeed::from("ashen-vale-2"));
    }

    #[test]
    fn test_seed_deserializes_from_text_or_number() {
        let numeric: WorldSeed = serde_yaml::from_str("1234").unwrap();
        assert_eq!(numeric.raw(), 1234);

        let text: WorldSeed = serde_yaml::from_str("\"ashen-vale\"").unwrap();
        assert_eq!(text, WorldSeed::from("ashen-vale"));
    }
}
