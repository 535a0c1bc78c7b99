//! Utilities for adding a bit of jitter to reduce stampeding

/// A type that provides a jitter factor for stretching delays
pub trait JitterSource {
    /// Produces the next jitter factor
    ///
    /// A delay `d` becomes `d * (1 + factor)`. Factors are never negative.
    fn jitter_factor(&mut self) -> f64;
}

/// A jitter source that does not do any jittering
#[derive(Debug, Clone, Copy)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter_factor(&mut self) -> f64 {
        0.0
    }
}

/// A jitter source that always produces the same factor
///
/// Mostly useful for making delays predictable in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    #[inline]
    fn jitter_factor(&mut self) -> f64 {
        self.0.max(0.0)
    }
}

#[cfg(feature = "rand")]
mod random {
    use rand::{Rng, SeedableRng};

    /// The default upper bound (exclusive) of random jitter factors
    pub const DEFAULT_MAX_JITTER: f64 = 0.3;

    /// Stretches delays by a random factor
    ///
    /// Factors produced by this type have a uniform distribution in the
    /// interval `[0, max_factor)`.
    #[derive(Debug)]
    pub struct RandomJitter<R> {
        max_factor: f64,
        rand_source: R,
    }

    impl RandomJitter<rand::rngs::StdRng> {
        /// Constructs a new instance producing factors below `max_factor`
        pub fn new(max_factor: f64) -> Self {
            Self {
                max_factor,
                rand_source: rand::rngs::StdRng::from_entropy(),
            }
        }
    }

    impl Default for RandomJitter<rand::rngs::StdRng> {
        fn default() -> Self {
            Self::new(DEFAULT_MAX_JITTER)
        }
    }

    impl<R: Rng> super::JitterSource for RandomJitter<R> {
        fn jitter_factor(&mut self) -> f64 {
            if self.max_factor <= 0.0 {
                return 0.0;
            }
            self.rand_source.gen_range(0.0..self.max_factor)
        }
    }

}

#[cfg(feature = "rand")]
pub use random::{RandomJitter, DEFAULT_MAX_JITTER};
