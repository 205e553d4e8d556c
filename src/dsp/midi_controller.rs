//! MIDI controllers: per-channel value sources in [0, 1]
//!
//! A controller remembers the most recent value for each of the 16 MIDI
//! channels (pitch bend and channel pressure are per-channel for MPE) and a
//! change index per channel. The synth routes each timestamped change to
//! the parameters assigned to the controller as it arrives, so downstream
//! sample-accurate parameters can schedule ramps toward the new value.

use crate::midi;
use crate::Number;

#[derive(Debug, Clone)]
pub struct MidiController {
    values: [Number; midi::CHANNELS],
    change_indices: [i32; midi::CHANNELS],
    default_value: Number,
    assignments: usize,
}

impl MidiController {
    pub fn new(default_value: Number) -> Self {
        Self {
            values: [default_value; midi::CHANNELS],
            change_indices: [0; midi::CHANNELS],
            default_value,
            assignments: 0,
        }
    }

    /// Record a new value on one channel.
    pub fn change(&mut self, channel: midi::Channel, new_value: Number) {
        if !midi::is_valid_channel(channel) {
            return;
        }

        let clamped = new_value.clamp(0.0, 1.0);
        let slot = channel as usize;

        if clamped != self.values[slot] {
            self.values[slot] = clamped;
            self.change_indices[slot] = (self.change_indices[slot] + 1) & 0x7fffffff;
        }
    }

    /// Record a new value on every channel (non-channel-specific sources
    /// like CC messages routed globally).
    pub fn change_all_channels(&mut self, new_value: Number) {
        for channel in 0..midi::CHANNELS {
            self.change(channel as midi::Channel, new_value);
        }
    }

    pub fn get_value(&self, channel: midi::Channel) -> Number {
        self.values[channel.min(midi::CHANNEL_MAX) as usize]
    }

    pub fn get_change_index(&self, channel: midi::Channel) -> i32 {
        self.change_indices[channel.min(midi::CHANNEL_MAX) as usize]
    }

    pub fn clear(&mut self) {
        self.values = [self.default_value; midi::CHANNELS];

        for index in self.change_indices.iter_mut() {
            *index = (*index + 1) & 0x7fffffff;
        }
    }

    pub fn assigned(&mut self) {
        self.assignments += 1;
    }

    pub fn released(&mut self) {
        self.assignments = self.assignments.saturating_sub(1);
    }

    pub fn is_assigned(&self) -> bool {
        self.assignments > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_clamps_and_bumps_index() {
        let mut controller = MidiController::new(0.0);
        let before = controller.get_change_index(3);

        controller.change(3, 1.5);

        assert!((controller.get_value(3) - 1.0).abs() < 1e-9);
        assert_ne!(controller.get_change_index(3), before);
        assert_eq!(controller.get_value(2), 0.0, "other channels untouched");
    }

    #[test]
    fn test_identical_value_does_not_bump_index() {
        let mut controller = MidiController::new(0.0);

        controller.change(0, 0.5);
        let index = controller.get_change_index(0);

        controller.change(0, 0.5);
        assert_eq!(controller.get_change_index(0), index);
    }

    #[test]
    fn test_change_all_channels() {
        let mut controller = MidiController::new(0.0);

        controller.change_all_channels(0.25);

        for channel in 0..midi::CHANNELS {
            assert!((controller.get_value(channel as midi::Channel) - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_clear_restores_default() {
        let mut controller = MidiController::new(0.5);

        controller.change(0, 0.9);
        controller.clear();

        assert!((controller.get_value(0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_assignment_counting() {
        let mut controller = MidiController::new(0.0);

        assert!(!controller.is_assigned());
        controller.assigned();
        controller.assigned();
        controller.released();
        assert!(controller.is_assigned());
        controller.released();
        assert!(!controller.is_assigned());
    }

    #[test]
    fn test_invalid_channel_is_dropped() {
        let mut controller = MidiController::new(0.0);

        controller.change(16, 0.9);

        for channel in 0..midi::CHANNELS {
            assert_eq!(controller.get_value(channel as midi::Channel), 0.0);
        }
    }
}
