//! Interpolated delay line
//!
//! A power-of-two ring buffer per channel, written a block at a time and
//! read back with fractional-index linear interpolation, so a modulated
//! delay time (chorus, tape wow&flutter) stays click-free. An optional
//! feedback buffer (the previous block of some downstream signal) is mixed
//! into the ring at write time. With tempo sync enabled the delay-time
//! parameter's ratio snaps to a grid of note values instead of mapping
//! linearly to seconds.

use crate::dsp::param::FloatParamS;
use crate::dsp::signal_producer::SignalProducer;
use crate::{Frequency, Number, Sample, Seconds};

/// Default ring size for modulation-style delays.
pub const DELAY_TIME_MAX: Seconds = 0.15;

pub const DELAY_TIME_MIN: Seconds = 0.0001;

/// Note values (fractions of a whole note) the delay time snaps to when
/// tempo-synced: 1/16, dotted 1/16, 1/8 triplet, 1/8, dotted 1/8,
/// 1/4 triplet, 1/4, dotted 1/4, 1/2, 1/1.
pub const TEMPO_GRID: [Number; 10] = [
    1.0 / 16.0,
    3.0 / 32.0,
    1.0 / 12.0,
    1.0 / 8.0,
    3.0 / 16.0,
    1.0 / 6.0,
    1.0 / 4.0,
    3.0 / 8.0,
    1.0 / 2.0,
    1.0,
];

const BEATS_PER_WHOLE_NOTE: Number = 4.0;

pub struct Delay {
    pub time: FloatParamS,
    channels: usize,
    max_time: Seconds,
    tempo_synced: bool,
    ring: Vec<Vec<Sample>>,
    mask: usize,
    write_index: usize,
    sample_rate: Frequency,
    block_size: usize,
    bpm: Number,
}

impl Delay {
    pub fn new(channels: usize, max_time: Seconds, time_default: Seconds) -> Self {
        let mut delay = Self {
            time: FloatParamS::new(DELAY_TIME_MIN, max_time, time_default),
            channels,
            max_time,
            tempo_synced: false,
            ring: (0..channels).map(|_| Vec::new()).collect(),
            mask: 0,
            write_index: 0,
            sample_rate: crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE,
            block_size: crate::dsp::signal_producer::DEFAULT_BLOCK_SIZE,
            bpm: crate::dsp::signal_producer::DEFAULT_BPM,
        };

        delay.reallocate_ring();
        delay
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.sample_rate = sample_rate;
        self.time.set_sample_rate(sample_rate);
        self.reallocate_ring();
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size;
        self.time.set_block_size(block_size);
        self.reallocate_ring();
    }

    pub fn set_bpm(&mut self, bpm: Number) {
        self.bpm = bpm;
    }

    pub fn set_tempo_sync(&mut self, tempo_synced: bool) {
        self.tempo_synced = tempo_synced;
    }

    pub fn reset(&mut self) {
        for channel in self.ring.iter_mut() {
            channel.fill(0.0);
        }

        self.write_index = 0;
        self.time.reset();
    }

    fn reallocate_ring(&mut self) {
        let needed = (self.max_time * self.sample_rate).ceil() as usize + self.block_size + 4;
        let size = needed.next_power_of_two();

        for channel in self.ring.iter_mut() {
            channel.clear();
            channel.resize(size, 0.0);
        }

        self.mask = size - 1;
        self.write_index = 0;
    }

    /// The block-constant delay time in seconds when tempo-synced: the
    /// parameter's ratio indexes the note-value grid at the current tempo.
    fn synced_time(&self) -> Seconds {
        let ratio = self.time.get_ratio();
        let index = ((ratio * (TEMPO_GRID.len() - 1) as Number).round() as usize)
            .min(TEMPO_GRID.len() - 1);
        let beats = TEMPO_GRID[index] * BEATS_PER_WHOLE_NOTE;

        (beats * 60.0 / self.bpm).clamp(DELAY_TIME_MIN, self.max_time)
    }

    /// Write `input` (plus the optional feedback block) into the ring and
    /// read the delayed signal into `output`.
    pub fn process_block(
        &mut self,
        round: u64,
        input: &[Vec<Sample>],
        feedback: Option<&[Vec<Sample>]>,
        output: &mut [Vec<Sample>],
        sample_count: usize,
    ) {
        debug_assert_eq!(input.len(), self.channels);
        debug_assert_eq!(output.len(), self.channels);

        // Fill the ring first; reads then see every sample of the current
        // block, which keeps delays shorter than the block size correct.
        for channel in 0..self.channels {
            let ring = &mut self.ring[channel];
            let input_samples = &input[channel];

            for i in 0..sample_count {
                let mut value = input_samples[i];

                if let Some(feedback) = feedback {
                    value += feedback[channel][i];
                }

                ring[(self.write_index + i) & self.mask] = value;
            }
        }

        // The block-constant fallback; reads must happen before the
        // parameter's buffer is borrowed below.
        let constant_delay = if self.tempo_synced {
            self.synced_time()
        } else {
            self.time.get_value()
        };

        let time_buffer = if self.tempo_synced {
            self.time.skip_round(round, sample_count);
            None
        } else {
            self.time.produce_if_not_constant(round, sample_count)
        };

        let sample_rate = self.sample_rate;
        let mask = self.mask;
        let ring_len = (mask + 1) as Number;

        for channel in 0..self.channels {
            let ring = &self.ring[channel];
            let out = &mut output[channel];

            for i in 0..sample_count {
                let delay_seconds = match time_buffer {
                    Some(buffer) => buffer[i] as Number,
                    None => constant_delay,
                };

                let delay_samples = (delay_seconds * sample_rate).max(1.0);
                let position =
                    (self.write_index + i) as Number - delay_samples + ring_len;

                let floor = position.floor();
                let index = (floor as usize) & mask;
                let next_index = (index + 1) & mask;
                let fraction = (position - floor) as Sample;

                out[i] = ring[index] + fraction * (ring[next_index] - ring[index]);
            }
        }

        self.write_index = (self.write_index + sample_count) & self.mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: Frequency = 1000.0;

    fn delay(time: Seconds) -> Delay {
        let mut delay = Delay::new(1, 1.0, 0.01);
        delay.set_sample_rate(SAMPLE_RATE);
        delay.set_block_size(100);
        delay.time.set_value(time);
        delay
    }

    #[test]
    fn test_impulse_is_delayed_by_time_param() {
        let mut delay = delay(0.010);

        let mut input = vec![vec![0.0; 100]];
        input[0][0] = 1.0;
        let mut output = vec![vec![0.0; 100]];

        delay.process_block(1, &input, None, &mut output, 100);

        assert!(output[0][..10].iter().all(|&sample| sample.abs() < 1e-6));
        assert!((output[0][10] - 1.0).abs() < 1e-6);
        assert!(output[0][11..].iter().all(|&sample| sample.abs() < 1e-6));
    }

    #[test]
    fn test_fractional_delay_interpolates() {
        let mut delay = delay(0.0105);

        let mut input = vec![vec![0.0; 100]];
        input[0][0] = 1.0;
        let mut output = vec![vec![0.0; 100]];

        delay.process_block(1, &input, None, &mut output, 100);

        // 10.5 samples of delay: the impulse energy is split between
        // samples 10 and 11.
        assert!((output[0][10] - 0.5).abs() < 0.01);
        assert!((output[0][11] - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_delay_spans_blocks() {
        let mut delay = delay(0.150);

        let mut input = vec![vec![0.0; 100]];
        input[0][0] = 1.0;
        let mut output = vec![vec![0.0; 100]];

        delay.process_block(1, &input, None, &mut output, 100);
        assert!(output[0].iter().all(|&sample| sample.abs() < 1e-6));

        let silent = vec![vec![0.0; 100]];
        delay.process_block(2, &silent, None, &mut output, 100);
        assert!((output[0][50] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_feedback_buffer_is_mixed_into_ring() {
        let mut delay = delay(0.010);

        let input = vec![vec![0.0; 100]];
        let mut feedback = vec![vec![0.0; 100]];
        feedback[0][0] = 0.5;
        let mut output = vec![vec![0.0; 100]];

        delay.process_block(1, &input, Some(&feedback), &mut output, 100);

        assert!((output[0][10] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_tempo_sync_quantizes_to_grid() {
        let mut delay = delay(0.0);
        delay.set_bpm(120.0);
        delay.set_tempo_sync(true);

        // Ratio 0 → 1/16 note → a quarter beat → 0.125 s at 120 bpm.
        delay.time.set_ratio(0.0);
        assert!((delay.synced_time() - 0.125).abs() < 1e-9);

        // Ratio 1 → whole note → 4 beats → 2 s, clamped to max_time 1 s.
        delay.time.set_ratio(1.0);
        assert!((delay.synced_time() - 1.0).abs() < 1e-9);

        // 1/4 note → 1 beat → 0.5 s.
        let quarter_index = 6;
        delay
            .time
            .set_ratio(quarter_index as Number / (TEMPO_GRID.len() - 1) as Number);
        assert!((delay.synced_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_modulated_time_is_sample_accurate() {
        let mut delay = delay(0.010);

        delay.time.schedule_value(0.0, 0.010);
        delay.time.schedule_value(0.05, 0.020);

        let mut input = vec![vec![0.0; 100]];
        input[0][0] = 1.0;
        input[0][60] = 1.0;
        let mut output = vec![vec![0.0; 100]];

        delay.process_block(1, &input, None, &mut output, 100);

        // First impulse delayed 10 samples, second (after the step) 20.
        assert!((output[0][10] - 1.0).abs() < 1e-6);
        assert!((output[0][80] - 1.0).abs() < 1e-6);
    }
}
