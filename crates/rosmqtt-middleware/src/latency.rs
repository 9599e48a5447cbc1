//! Message-age tracking.
//!
//! Every forwarded message that carries a `header.stamp` contributes one age
//! sample: the wall-clock time between the stamp and the moment the bridge
//! forwards it.  The last [`AGE_WINDOW_CAPACITY`] samples are kept in an
//! [`AgeWindow`] and their population variance is reported after every
//! insertion.  A growing variance is the signal that the pipeline is backing
//! up or a link has stalled.
//!
//! [`LatencyTracker`] wraps the window in a mutex so both forwarding
//! directions can share one tracker across threads.

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::Mutex;
use rosmqtt_types::Stamp;

/// Number of samples kept in the rolling window.
pub const AGE_WINDOW_CAPACITY: usize = 10;

// ────────────────────────────────────────────────────────────────────────────
// Clock
// ────────────────────────────────────────────────────────────────────────────

/// Source of the current wall-clock time as POSIX seconds.
pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> f64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> f64 {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9
    }
}

/// Age of a message stamped at `stamp`, observed now.
///
/// Negative under clock skew between the publisher and the bridge.
pub fn message_age(stamp: &Stamp, clock: &dyn Clock) -> f64 {
    clock.now_epoch() - stamp.to_epoch()
}

// ────────────────────────────────────────────────────────────────────────────
// AgeWindow
// ────────────────────────────────────────────────────────────────────────────

/// Bounded FIFO of age samples.
///
/// # Example
///
/// ```
/// use rosmqtt_middleware::latency::AgeWindow;
///
/// let mut window = AgeWindow::new(3);
/// window.push(1.0);
/// window.push(3.0);
/// assert_eq!(window.variance(), 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct AgeWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl AgeWindow {
    /// Create an empty window holding at most `capacity` samples.
    ///
    /// A zero capacity is raised to one so that the latest sample is always
    /// retained.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append `sample`, evicting the oldest sample when over capacity, and
    /// return the variance of the resulting window.
    pub fn push(&mut self, sample: f64) -> f64 {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.variance()
    }

    /// Population variance of the current samples; `0.0` when empty.
    pub fn variance(&self) -> f64 {
        let n = self.samples.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.samples.iter().sum::<f64>() / n as f64;
        self.samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for AgeWindow {
    fn default() -> Self {
        Self::new(AGE_WINDOW_CAPACITY)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LatencyTracker
// ────────────────────────────────────────────────────────────────────────────

/// One recorded age together with the window variance after recording it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeSample {
    pub age: f64,
    pub variance: f64,
}

/// Thread-safe rolling age statistic shared by the forwarding adapters.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    window: Mutex<AgeWindow>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sample` (seconds, any sign) and return the variance of the
    /// window including it.  Append, eviction and recomputation happen under
    /// one lock.
    pub fn record_and_get_variance(&self, sample: f64) -> f64 {
        self.window.lock().push(sample)
    }

    /// Compute the age of a message stamped at `stamp` and record it.
    pub fn record_stamp(&self, stamp: &Stamp, clock: &dyn Clock) -> AgeSample {
        let age = message_age(stamp, clock);
        let variance = self.record_and_get_variance(age);
        AgeSample { age, variance }
    }

    /// Current samples, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.window.lock().samples().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedClock;
    use proptest::prelude::*;

    fn reference_variance(samples: &[f64]) -> f64 {
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n
    }

    #[test]
    fn single_sample_has_zero_variance() {
        let tracker = LatencyTracker::new();
        assert_eq!(tracker.record_and_get_variance(0.42), 0.0);
    }

    #[test]
    fn two_samples_population_variance() {
        let tracker = LatencyTracker::new();
        tracker.record_and_get_variance(1.0);
        let variance = tracker.record_and_get_variance(2.0);
        assert!((variance - 0.25).abs() < 1e-12);
    }

    #[test]
    fn full_window_matches_reference() {
        let tracker = LatencyTracker::new();
        let samples: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        let mut variance = 0.0;
        for s in &samples {
            variance = tracker.record_and_get_variance(*s);
        }
        assert!((variance - reference_variance(&samples)).abs() < 1e-12);
        assert_eq!(tracker.snapshot().len(), AGE_WINDOW_CAPACITY);
    }

    #[test]
    fn eleventh_sample_evicts_the_oldest() {
        let tracker = LatencyTracker::new();
        let samples: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let mut variance = 0.0;
        for s in &samples {
            variance = tracker.record_and_get_variance(*s);
        }
        let window = tracker.snapshot();
        assert_eq!(window, samples[1..].to_vec());
        assert!((variance - reference_variance(&samples[1..])).abs() < 1e-12);
    }

    #[test]
    fn negative_ages_are_accepted() {
        let tracker = LatencyTracker::new();
        tracker.record_and_get_variance(-0.5);
        let variance = tracker.record_and_get_variance(0.5);
        assert!((variance - 0.25).abs() < 1e-12);
        assert_eq!(tracker.snapshot(), vec![-0.5, 0.5]);
    }

    #[test]
    fn zero_capacity_window_keeps_latest_sample() {
        let mut window = AgeWindow::new(0);
        window.push(1.0);
        window.push(2.0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.samples().collect::<Vec<_>>(), vec![2.0]);
    }

    #[test]
    fn header_age_uses_stamp_epoch() {
        let clock = FixedClock(1000.75);
        let stamp = Stamp { secs: 1000, nsecs: 500_000_000 };
        assert!((message_age(&stamp, &clock) - 0.25).abs() < 1e-9);

        let tracker = LatencyTracker::new();
        let sample = tracker.record_stamp(&stamp, &clock);
        assert!((sample.age - 0.25).abs() < 1e-9);
        assert_eq!(sample.variance, 0.0);
    }

    #[test]
    fn system_clock_is_close_to_now() {
        let now = SystemClock.now_epoch();
        let reference = Utc::now().timestamp() as f64;
        assert!((now - reference).abs() < 2.0);
    }

    #[test]
    fn concurrent_recording_never_exceeds_capacity() {
        let tracker = std::sync::Arc::new(LatencyTracker::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let tracker = std::sync::Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        tracker.record_and_get_variance((t * 1000 + i) as f64);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.snapshot().len(), AGE_WINDOW_CAPACITY);
    }

    proptest! {
        #[test]
        fn window_is_a_bounded_fifo(samples in proptest::collection::vec(-1.0e3f64..1.0e3, 1..60)) {
            let mut window = AgeWindow::default();
            for (i, s) in samples.iter().enumerate() {
                let variance = window.push(*s);
                prop_assert!(window.len() <= AGE_WINDOW_CAPACITY);

                let start = (i + 1).saturating_sub(AGE_WINDOW_CAPACITY);
                let expected = &samples[start..=i];
                prop_assert_eq!(window.samples().collect::<Vec<_>>(), expected.to_vec());
                prop_assert!((variance - reference_variance(expected)).abs() < 1e-6);
            }
        }
    }
}
