//! Partition bucketing
//!
//! Two strategies split one logical index partition into several physical
//! ones:
//!
//! | Strategy | Used by | Bucket | Read side |
//! |----------|---------|--------|-----------|
//! | [`RandomBuckets`] | service-name index, annotation index | uniform in `[0, n)` | scan all `n`, merge by ts |
//! | [`DurationBuckets`] | duration index | `ts / window` | compute exact set from time range |
//!
//! Random buckets spread a hot service (or a popular annotation value) over
//! `n` partitions so no single partition absorbs all its writes. Duration
//! buckets bound how many rows a (service, span) partition accumulates while
//! still letting a time-ranged query name the buckets it must read.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::num::NonZeroU32;

/// Microseconds in one day, the default duration bucket window.
pub const DAY_MICROS: i64 = 24 * 60 * 60 * 1_000_000;

/// Narrowest duration bucket window, about 71.6 minutes.
///
/// The bucket column is a 32-bit int. With windows at least `2^32` µs wide,
/// every i64 timestamp maps to a bucket in `i32` range.
pub const MIN_DURATION_WINDOW_MICROS: i64 = 1 << 32;

/// Uniform random bucket selector shared by all dispatching workers.
pub struct RandomBuckets {
    bucket_count: NonZeroU32,
    rng: Mutex<StdRng>,
}

impl RandomBuckets {
    /// Selector seeded from OS entropy.
    pub fn new(bucket_count: NonZeroU32) -> Self {
        Self::with_rng(bucket_count, StdRng::from_entropy())
    }

    /// Deterministic selector, for tests and reproducible benchmarks.
    pub fn seeded(bucket_count: NonZeroU32, seed: u64) -> Self {
        Self::with_rng(bucket_count, StdRng::seed_from_u64(seed))
    }

    /// Selector backed by the given generator.
    pub fn with_rng(bucket_count: NonZeroU32, rng: StdRng) -> Self {
        Self {
            bucket_count,
            rng: Mutex::new(rng),
        }
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> u32 {
        self.bucket_count.get()
    }

    /// Draw a bucket in `[0, bucket_count)`.
    #[inline]
    pub fn next_bucket(&self) -> i32 {
        self.rng.lock().gen_range(0..self.bucket_count.get()) as i32
    }
}

impl std::fmt::Debug for RandomBuckets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomBuckets")
            .field("bucket_count", &self.bucket_count)
            .finish_non_exhaustive()
    }
}

/// Time-window bucket for the duration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationBuckets {
    window_micros: i64,
}

impl DurationBuckets {
    /// Buckets of the given width. `None` if the window is narrower than
    /// [`MIN_DURATION_WINDOW_MICROS`].
    pub fn new(window_micros: i64) -> Option<Self> {
        (window_micros >= MIN_DURATION_WINDOW_MICROS).then_some(Self { window_micros })
    }

    /// One bucket per day.
    pub fn daily() -> Self {
        Self {
            window_micros: DAY_MICROS,
        }
    }

    /// Window width in microseconds.
    pub fn window_micros(&self) -> i64 {
        self.window_micros
    }

    /// Bucket containing `timestamp`. Depends on nothing else.
    #[inline]
    pub fn bucket(&self, timestamp: i64) -> i32 {
        // In range: window_micros >= 2^32
        timestamp.div_euclid(self.window_micros) as i32
    }

    /// Every bucket a query over `[start, end]` must read.
    pub fn buckets_between(&self, start: i64, end: i64) -> std::ops::RangeInclusive<i32> {
        self.bucket(start.min(end))..=self.bucket(start.max(end))
    }
}

impl Default for DurationBuckets {
    fn default() -> Self {
        Self::daily()
    }
}

/// Both bucketing strategies, as configured for one consumer.
#[derive(Debug)]
pub struct BucketingStrategy {
    /// Random shard selector
    pub random: RandomBuckets,
    /// Duration index time windows
    pub duration: DurationBuckets,
}

impl BucketingStrategy {
    /// Combine the two strategies.
    pub fn new(random: RandomBuckets, duration: DurationBuckets) -> Self {
        Self { random, duration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn count(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn test_random_bucket_in_range() {
        let buckets = RandomBuckets::seeded(count(10), 7);
        for _ in 0..10_000 {
            let b = buckets.next_bucket();
            assert!((0..10).contains(&b));
        }
    }

    #[test]
    fn test_single_bucket_always_zero() {
        let buckets = RandomBuckets::new(count(1));
        assert!((0..100).all(|_| buckets.next_bucket() == 0));
    }

    #[test]
    fn test_random_bucket_uniform_chi_square() {
        const BUCKETS: usize = 10;
        const DRAWS: usize = 100_000;

        let buckets = RandomBuckets::seeded(count(BUCKETS as u32), 0x5eed);
        let mut observed = [0usize; BUCKETS];
        for _ in 0..DRAWS {
            observed[buckets.next_bucket() as usize] += 1;
        }

        let expected = DRAWS as f64 / BUCKETS as f64;
        let chi_square: f64 = observed
            .iter()
            .map(|&o| (o as f64 - expected).powi(2) / expected)
            .sum();

        // Critical value for 9 degrees of freedom at p = 0.001
        assert!(chi_square < 27.877, "chi-square {} too large: {:?}", chi_square, observed);
    }

    #[test]
    fn test_random_buckets_shared_across_threads() {
        let buckets = Arc::new(RandomBuckets::seeded(count(4), 1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buckets = Arc::clone(&buckets);
                std::thread::spawn(move || {
                    (0..1_000).map(|_| buckets.next_bucket()).all(|b| (0..4).contains(&b))
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn test_duration_bucket_daily() {
        let buckets = DurationBuckets::daily();
        assert_eq!(buckets.bucket(0), 0);
        assert_eq!(buckets.bucket(DAY_MICROS - 1), 0);
        assert_eq!(buckets.bucket(DAY_MICROS), 1);
        assert_eq!(buckets.bucket(-1), -1);
    }

    #[test]
    fn test_duration_window_minimum() {
        assert!(DurationBuckets::new(0).is_none());
        assert!(DurationBuckets::new(-5).is_none());
        assert!(DurationBuckets::new(1_000).is_none());
        assert!(DurationBuckets::new(MIN_DURATION_WINDOW_MICROS - 1).is_none());

        let narrowest = DurationBuckets::new(MIN_DURATION_WINDOW_MICROS).unwrap();
        assert_eq!(narrowest.bucket(i64::MAX), i32::MAX);
        assert_eq!(narrowest.bucket(i64::MIN), i32::MIN);
        assert_eq!(narrowest.bucket(2 * MIN_DURATION_WINDOW_MICROS + 1), 2);
    }

    #[test]
    fn test_hourly_buckets_distinct_for_real_timestamps() {
        let hourly = DurationBuckets::new(2 * MIN_DURATION_WINDOW_MICROS).unwrap();
        let ts = 1_500_000_000_000_000;
        let later = ts + 10 * 2 * MIN_DURATION_WINDOW_MICROS;
        assert_eq!(hourly.bucket(later) - hourly.bucket(ts), 10);
    }

    #[test]
    fn test_buckets_between() {
        let buckets = DurationBuckets::daily();
        let range = buckets.buckets_between(3 * DAY_MICROS + 5, DAY_MICROS);
        assert_eq!(range, 1..=3);
    }

    proptest! {
        #[test]
        fn prop_duration_bucket_is_pure(ts in any::<i64>()) {
            let buckets = DurationBuckets::daily();
            prop_assert_eq!(buckets.bucket(ts), buckets.bucket(ts));
            prop_assert_eq!(buckets.bucket(ts), DurationBuckets::daily().bucket(ts));
        }

        #[test]
        fn prop_duration_bucket_is_monotonic(a in any::<i64>(), b in any::<i64>()) {
            let buckets = DurationBuckets::daily();
            if a <= b {
                prop_assert!(buckets.bucket(a) <= buckets.bucket(b));
            }
        }

        #[test]
        fn prop_any_allowed_window_is_monotonic(
            window in MIN_DURATION_WINDOW_MICROS..=DAY_MICROS * 30,
            a in any::<i64>(),
            b in any::<i64>(),
        ) {
            let buckets = DurationBuckets::new(window).unwrap();
            let (lo, hi) = (a.min(b), a.max(b));
            prop_assert!(buckets.bucket(lo) <= buckets.bucket(hi));
            prop_assert_eq!(buckets.bucket(hi) as i64, hi.div_euclid(window));
        }
    }
}
