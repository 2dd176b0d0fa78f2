//! Thread-safe randomness shared by the balancers and the upstream selector.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A pseudo-random generator behind a mutex.
///
/// One instance is owned by each [`Client`](crate::Client) and shared (via
/// `Arc`) with every balancer it installs. The lock is held only for the
/// generator call itself, never across resolution or network I/O.
///
/// # Examples
///
/// ```
/// use upstream::RandomSource;
///
/// let rng = RandomSource::seeded(7);
/// let mut hosts = vec!["a", "b", "c"];
/// rng.shuffle(&mut hosts);
/// assert_eq!(hosts.len(), 3);
/// assert!(rng.next_index(3) < 3);
/// ```
pub struct RandomSource {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl RandomSource {
    /// Creates a source seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates a deterministic source, for reproducible tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Wraps an arbitrary generator.
    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Shuffles `items` in place. Slices of length 0 or 1 are left untouched
    /// without taking the lock.
    pub fn shuffle<T>(&self, items: &mut [T]) {
        if items.len() <= 1 {
            return;
        }
        items.shuffle(&mut *self.lock());
    }

    /// Permutes `n` logically indexed items through a caller supplied swap.
    ///
    /// Runs a Fisher-Yates pass; `swap(i, j)` is called for each exchange.
    pub fn shuffle_with(&self, n: usize, mut swap: impl FnMut(usize, usize)) {
        if n <= 1 {
            return;
        }
        let mut rng = self.lock();
        for i in (1..n).rev() {
            let j = rng.gen_range(0..=i);
            swap(i, j);
        }
    }

    /// Returns an index drawn uniformly from `[0, n)`. Returns 0 when `n` is 0.
    pub fn next_index(&self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        self.lock().gen_range(0..n)
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn RngCore + Send>> {
        // A panic while shuffling cannot leave the generator in an invalid state.
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSource").finish_non_exhaustive()
    }
}
