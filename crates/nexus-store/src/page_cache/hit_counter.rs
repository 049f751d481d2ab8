//! Per-page access counters driving allocation and eviction

use std::sync::atomic::{AtomicI32, Ordering};

/// Weight of an access that had to go to the file
const MISS_WEIGHT: i32 = 10;
/// Decay divisor for resident pages
const ALLOCATED_DECAY: f64 = 1.15;
/// Decay divisor for unallocated pages
const UNALLOCATED_DECAY: f64 = 1.25;

/// Saturating, decaying access counter
#[derive(Debug, Default)]
pub struct HitCounter {
    count: AtomicI32,
}

impl HitCounter {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count
    pub fn get(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Record an access
    pub fn record(&self, allocated: bool) {
        let weight = if allocated { 1 } else { MISS_WEIGHT };
        let _ = self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_add(weight))
            });
    }

    /// Age the counter once per sweep
    pub fn decay(&self, allocated: bool) {
        let divisor = if allocated {
            ALLOCATED_DECAY
        } else {
            UNALLOCATED_DECAY
        };
        let _ = self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some((c as f64 / divisor) as i32)
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights() {
        let counter = HitCounter::new();
        counter.record(true);
        assert_eq!(counter.get(), 1);
        counter.record(false);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_decay() {
        let counter = HitCounter::new();
        for _ in 0..100 {
            counter.record(true);
        }
        counter.decay(true);
        assert_eq!(counter.get(), (100.0 / 1.15) as i32);
        counter.decay(false);
        assert_eq!(counter.get(), ((100.0f64 / 1.15) as i32 as f64 / 1.25) as i32);
    }

    #[test]
    fn test_decays_to_zero() {
        let counter = HitCounter::new();
        counter.record(false);
        for _ in 0..20 {
            counter.decay(false);
        }
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_saturates() {
        let counter = HitCounter::new();
        counter.count.store(i32::MAX - 3, Ordering::Relaxed);
        counter.record(false);
        assert_eq!(counter.get(), i32::MAX);
        counter.record(true);
        assert_eq!(counter.get(), i32::MAX);
    }
}
