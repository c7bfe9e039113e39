//! Random number generator abstraction for the zoo engine.
//!
//! Every stochastic decision in the engine (cell selection, direction choice,
//! outcome sampling, Metropolis acceptance) draws from a `ZooRng` so that a
//! board can be replayed exactly from a seed.
//!
//! # Example
//!
//! ```ignore
//! use zoo_core::rng::{StdRandom, ZooRng};
//!
//! let mut rng = StdRandom::from_u64_seed(42);
//! let u = rng.next_double(); // 0.0..1.0
//! let i = rng.next_usize_max(8); // 0..8
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Trait for random number generators used by the engine.
///
/// `Send` so that a board can be moved behind a mutex and driven from worker
/// threads.
pub trait ZooRng: Send {
    /// Returns a random double in [0.0, 1.0).
    fn next_double(&mut self) -> f64;

    /// Returns a random u64.
    fn next_u64(&mut self) -> u64;

    /// Returns a random usize in [0, max).
    /// Returns 0 when `max` is 0.
    fn next_usize_max(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        ((self.next_double() * max as f64) as usize).min(max - 1)
    }

    /// Returns true with probability `p`.
    fn chance(&mut self, p: f64) -> bool {
        self.next_double() < p
    }
}

/// Standard Rust RNG wrapper using `rand::rngs::StdRng`.
#[derive(Clone)]
pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    /// Create from a u64 seed.
    pub fn from_u64_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create from OS entropy (non-reproducible).
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded when `seed` is given, entropy otherwise.
    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_u64_seed(seed),
            None => Self::from_entropy(),
        }
    }
}

impl ZooRng for StdRandom {
    fn next_double(&mut self) -> f64 {
        self.rng.gen()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_random_ranges() {
        let mut rng = StdRandom::from_u64_seed(42);

        for _ in 0..200 {
            let v = rng.next_double();
            assert!((0.0..1.0).contains(&v));
        }

        for _ in 0..200 {
            let v = rng.next_usize_max(7);
            assert!(v < 7);
        }

        assert_eq!(rng.next_usize_max(0), 0);
    }

    #[test]
    fn test_std_random_is_deterministic() {
        let mut rng1 = StdRandom::from_u64_seed(123);
        let mut rng2 = StdRandom::from_u64_seed(123);
        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_chance_extremes() {
        let mut rng = StdRandom::from_u64_seed(7);
        for _ in 0..100 {
            assert!(rng.chance(1.0));
            assert!(!rng.chance(0.0));
        }
    }
}
