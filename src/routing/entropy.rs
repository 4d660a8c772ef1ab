// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Injectable random source for hop counts and timing jitter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shared, optionally seeded random source.
///
/// Cloning shares the underlying generator, so a seeded engine produces one
/// deterministic sequence across all components.
#[derive(Clone)]
pub struct Entropy {
    rng: Arc<Mutex<StdRng>>,
}

impl Entropy {
    /// Seed from the operating system.
    pub fn from_os() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic sequence for reproducible runs and tests.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A poisoned generator is still a valid generator.
        let mut guard = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Uniform hop count in `[min, max]`.
    pub fn hop_count(&self, min: u8, max: u8) -> u8 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        self.with_rng(|rng| rng.gen_range(lo..=hi))
    }

    /// Uniform delay in `[min_ms, max_ms]` milliseconds.
    pub fn jitter(&self, min_ms: u64, max_ms: u64) -> Duration {
        let (lo, hi) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        Duration::from_millis(self.with_rng(|rng| rng.gen_range(lo..=hi)))
    }

    /// Extra 0-10% of `base` added to retry backoff.
    pub fn backoff_jitter(&self, base: Duration) -> Duration {
        let factor: f64 = self.with_rng(|rng| rng.gen_range(0.0..=0.1));
        base.mul_f64(factor)
    }
}

impl std::fmt::Debug for Entropy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entropy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_count_stays_in_range() {
        let entropy = Entropy::seeded(1);
        for _ in 0..1000 {
            let hops = entropy.hop_count(7, 12);
            assert!((7..=12).contains(&hops));
        }
    }

    #[test]
    fn seeded_sources_are_deterministic() {
        let a = Entropy::seeded(42);
        let b = Entropy::seeded(42);
        let seq_a: Vec<u8> = (0..20).map(|_| a.hop_count(7, 12)).collect();
        let seq_b: Vec<u8> = (0..20).map(|_| b.hop_count(7, 12)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn jitter_respects_window() {
        let entropy = Entropy::seeded(3);
        for _ in 0..200 {
            let d = entropy.jitter(500, 3000);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(3000));
        }
        assert_eq!(entropy.jitter(0, 0), Duration::ZERO);
    }

    #[test]
    fn backoff_jitter_is_at_most_ten_percent() {
        let entropy = Entropy::seeded(9);
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            assert!(entropy.backoff_jitter(base) <= Duration::from_millis(100));
        }
    }
}
