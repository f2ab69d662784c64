use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Source of randomness for forced misses, TTL jitter and key variants.
///
/// Seed it in tests to make every random decision reproducible.
#[derive(Debug)]
pub struct Dice {
    rng: Mutex<StdRng>,
}

pub type SharedDice = Arc<Dice>;

impl Dice {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Seeded when a seed is given, entropy otherwise
    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    /// True with probability `p`. Values at or outside the bounds never touch the RNG.
    pub fn chance(&self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.rng.lock().gen_bool(p)
    }

    /// Uniform integer in `-bound..=bound`
    pub fn jitter(&self, bound: u64) -> i64 {
        if bound == 0 {
            return 0;
        }
        let bound = bound.min(i64::MAX as u64) as i64;
        self.rng.lock().gen_range(-bound..=bound)
    }

    /// Uniform integer in `low..=high`
    pub fn between(&self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        self.rng.lock().gen_range(low..=high)
    }
}

impl Default for Dice {
    fn default() -> Self {
        Self::from_entropy()
    }
}
