//! Peak tracker: fast-attack, linear-ring-down envelope follower
//!
//! A rising peak is adopted immediately. A falling peak ramps down with a
//! first-order linear interpolation toward the new value over a fixed
//! 15 ms window: if the new (smaller) peak arrives dt seconds after the
//! previous one, the output is
//! `new + (previous - new) * (RING_DOWN - dt) / RING_DOWN`, reaching the
//! new peak once dt >= RING_DOWN.

use crate::{Sample, Seconds};

pub const RING_DOWN: Seconds = 0.015;
const RING_DOWN_INV: Seconds = 1.0 / RING_DOWN;

#[derive(Debug, Clone)]
pub struct PeakTracker {
    peak: Sample,
    samples_since_previous_peak: usize,
}

impl Default for PeakTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PeakTracker {
    pub fn new() -> Self {
        Self {
            peak: 0.0,
            samples_since_previous_peak: 0,
        }
    }

    pub fn reset(&mut self) {
        self.peak = 0.0;
        self.samples_since_previous_peak = 0;
    }

    pub fn get_peak(&self) -> Sample {
        self.peak
    }

    /// Feed the block's peak (`peak` at sample `peak_index` of a
    /// `sample_count`-sample block rendered with `sampling_period`).
    pub fn update(
        &mut self,
        peak: Sample,
        peak_index: usize,
        sample_count: usize,
        sampling_period: Seconds,
    ) {
        debug_assert!(peak_index <= sample_count);

        if peak < self.peak {
            let samples_since_previous_peak = self.samples_since_previous_peak + peak_index;
            let seconds_since_previous_peak =
                sampling_period * samples_since_previous_peak as Seconds;

            if seconds_since_previous_peak >= RING_DOWN {
                self.peak = peak;
            } else {
                let previous_peak_weight =
                    ((RING_DOWN - seconds_since_previous_peak) * RING_DOWN_INV) as Sample;

                self.peak = previous_peak_weight * (self.peak - peak) + peak;
            }
        } else {
            self.peak = peak;
        }

        self.samples_since_previous_peak = sample_count - peak_index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLING_PERIOD: Seconds = 1.0 / 1000.0;

    #[test]
    fn test_rising_peak_is_adopted_immediately() {
        let mut tracker = PeakTracker::new();

        tracker.update(0.2, 0, 100, SAMPLING_PERIOD);
        assert!((tracker.get_peak() - 0.2).abs() < 1e-9);

        tracker.update(0.9, 50, 100, SAMPLING_PERIOD);
        assert!((tracker.get_peak() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_falling_peak_rings_down_linearly() {
        let mut tracker = PeakTracker::new();

        tracker.update(1.0, 0, 5, SAMPLING_PERIOD);

        // 5 ms later: a third of the 15 ms window elapsed, so the output
        // keeps 2/3 of the difference above the new peak.
        tracker.update(0.1, 0, 5, SAMPLING_PERIOD);
        let expected = 0.1 + (1.0 - 0.1) * (2.0 / 3.0);
        assert!(
            (tracker.get_peak() - expected as Sample).abs() < 1e-6,
            "peak = {}, expected {}",
            tracker.get_peak(),
            expected
        );
    }

    #[test]
    fn test_falling_peak_reached_after_ring_down() {
        let mut tracker = PeakTracker::new();

        tracker.update(1.0, 0, 10, SAMPLING_PERIOD);
        tracker.update(0.1, 10, 20, SAMPLING_PERIOD);

        // 20 ms elapsed, which exceeds the 15 ms window.
        assert!((tracker.get_peak() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_output_never_below_latest_peak() {
        let mut tracker = PeakTracker::new();

        tracker.update(1.0, 0, 4, SAMPLING_PERIOD);

        let mut previous = tracker.get_peak();

        for _ in 0..40 {
            tracker.update(0.25, 0, 4, SAMPLING_PERIOD);
            let current = tracker.get_peak();

            assert!(current >= 0.25 - 1e-9, "below the latest input peak");
            assert!(current <= previous + 1e-9, "non-increasing between peaks");
            previous = current;
        }

        assert!((previous - 0.25).abs() < 1e-3);
    }
}
