//! CPU percentile tracking
//!
//! Keeps a bounded FIFO window of CPU utilization readings and computes the
//! 95th percentile over it, so floor enforcement reacts to sustained
//! activity rather than a single quiet sample.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Number of samples retained (about 50 minutes at a 30s monitor interval)
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Bounded history of CPU readings behind its own lock
#[derive(Debug)]
pub struct PercentileTracker {
    samples: Mutex<VecDeque<f64>>,
    capacity: usize,
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl PercentileTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest once the window is full
    pub fn add_sample(&self, value: f64) {
        let mut samples = self.samples.lock();
        samples.push_back(value);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// 95th percentile of the window, 0 when no samples were recorded
    pub fn percentile95(&self) -> f64 {
        self.percentile(0.95)
    }

    /// Nearest-rank percentile computed on a sorted copy of the window
    pub fn percentile(&self, quantile: f64) -> f64 {
        let mut sorted: Vec<f64> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }

        sorted.sort_by(f64::total_cmp);

        let rank = (quantile * sorted.len() as f64).ceil() as i64 - 1;
        let index = rank.clamp(0, sorted.len() as i64 - 1) as usize;
        sorted[index]
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the window in insertion order
    pub fn samples(&self) -> Vec<f64> {
        self.samples.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_percentile_is_zero() {
        let tracker = PercentileTracker::default();
        assert_eq!(tracker.percentile95(), 0.0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_percentile95_ten_values() {
        let tracker = PercentileTracker::default();
        for i in 1..=10 {
            tracker.add_sample(i as f64 * 10.0);
        }
        assert_eq!(tracker.percentile95(), 100.0);
    }

    #[test]
    fn test_percentile95_twenty_values() {
        let tracker = PercentileTracker::default();
        for i in 1..=20 {
            tracker.add_sample(i as f64 * 5.0);
        }
        assert_eq!(tracker.percentile95(), 95.0);
    }

    #[test]
    fn test_percentile_does_not_reorder_window() {
        let tracker = PercentileTracker::default();
        for value in [30.0, 10.0, 20.0] {
            tracker.add_sample(value);
        }

        let _ = tracker.percentile95();

        assert_eq!(tracker.samples(), vec![30.0, 10.0, 20.0]);
    }

    #[test]
    fn test_window_is_bounded_with_fifo_eviction() {
        let tracker = PercentileTracker::default();
        for i in 0..150 {
            tracker.add_sample(i as f64);
            assert!(tracker.len() <= DEFAULT_WINDOW_SIZE);
        }

        let samples = tracker.samples();
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[0], 50.0);
        assert_eq!(samples[99], 149.0);
    }

    #[test]
    fn test_single_sample() {
        let tracker = PercentileTracker::new(5);
        tracker.add_sample(42.0);
        assert_eq!(tracker.percentile95(), 42.0);
        assert_eq!(tracker.percentile(0.0), 42.0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let tracker = PercentileTracker::new(0);
        tracker.add_sample(1.0);
        tracker.add_sample(2.0);
        assert_eq!(tracker.capacity(), 1);
        assert_eq!(tracker.samples(), vec![2.0]);
    }
}
