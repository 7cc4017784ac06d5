//! Seeded RNG for reproducible fault injection.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe, optionally seeded random source.
pub struct SimRng {
    inner: Mutex<ChaCha8Rng>,
}

impl SimRng {
    /// Create a new RNG. Without a seed the OS entropy source is used.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Decide whether an operation fails at probability `rate` (0.0..=1.0).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform value in `[0, 1)`.
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().gen()
    }
}

impl Default for SimRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for SimRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        let a = SimRng::new(Some(7));
        let b = SimRng::new(Some(7));
        assert_eq!(a.next_f64(), b.next_f64());
    }

    #[test]
    fn extreme_rates() {
        let rng = SimRng::new(Some(42));
        for _ in 0..50 {
            assert!(!rng.should_fail(0.0));
            assert!(rng.should_fail(1.0));
        }
    }

    #[test]
    fn failure_probability_is_roughly_honoured() {
        let rng = SimRng::new(Some(42));
        let failures = (0..10_000).filter(|_| rng.should_fail(0.3)).count();
        assert!(failures > 2_700 && failures < 3_300, "got {failures}");
    }
}
