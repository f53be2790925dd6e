//! Seeded RNG for the simulated SDK.
//!
//! Failure decisions and pixel noise draw from one ChaCha stream so a seeded
//! test replays the same sequence of injected faults.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Seeded when `seed` is given, otherwise seeded from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// `true` with probability `rate` (clamped to 0.0..=1.0).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Sensor read noise in `0..amplitude`.
    pub fn noise(&self, amplitude: u16) -> u16 {
        if amplitude == 0 {
            return 0;
        }
        self.inner.lock().gen_range(0..amplitude)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        let a = MockRng::new(Some(7));
        let b = MockRng::new(Some(7));
        let xs: Vec<u16> = (0..16).map(|_| a.noise(1000)).collect();
        let ys: Vec<u16> = (0..16).map(|_| b.noise(1000)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn rate_bounds() {
        let rng = MockRng::new(Some(1));
        assert!((0..100).all(|_| !rng.should_fail(0.0)));
        assert!((0..100).all(|_| rng.should_fail(1.0)));
    }

    #[test]
    fn zero_amplitude_noise() {
        let rng = MockRng::new(Some(1));
        assert_eq!(rng.noise(0), 0);
    }
}
