//! Echo: high-shelf-damped stereo ping-pong delay
//!
//! The input passes a high-pass filter, then feeds two comb lines whose
//! feedback paths cross (left feeds right and vice versa), each damped by
//! a high-shelf filter and optionally colored by a soft-clipping
//! waveshaper. The width parameter pans the two lines apart with the
//! constant-power law. Tempo sync snaps the delay time to a grid of note
//! values; the wet signal can be compressed keyed by the dry input before
//! the final wet/dry blend.

use crate::dsp::biquad_filter::{
    compute_coefficients, BiquadFilter, TYPE_HIGH_PASS, TYPE_HIGH_SHELF,
};
use crate::dsp::comb_filter::{pan_gains, CombCore};
use crate::dsp::compressor::Compressor;
use crate::dsp::delay::TEMPO_GRID;
use crate::dsp::distortion::{curve_for, TYPE_HARMONIC_13};
use crate::dsp::effects::mix_wet_dry;
use crate::dsp::param::{FloatParamS, ToggleParam};
use crate::dsp::signal_producer::SignalProducer;
use crate::{Frequency, Number, Sample, Seconds};

pub const DELAY_TIME_MAX: Seconds = 3.0;
pub const DELAY_TIME_MIN: Seconds = 0.001;
pub const DELAY_TIME_DEFAULT: Seconds = 0.3;

const BEATS_PER_WHOLE_NOTE: Number = 4.0;

pub struct Echo {
    pub delay_time: FloatParamS,
    pub feedback: FloatParamS,
    pub damping_frequency: FloatParamS,
    pub damping_gain: FloatParamS,
    pub width: FloatParamS,
    pub high_pass_frequency: FloatParamS,
    pub distortion_level: FloatParamS,
    pub wet: FloatParamS,
    pub dry: FloatParamS,
    pub tempo_sync: ToggleParam,
    pub log_scale_frequencies: ToggleParam,
    pub side_chain: Compressor,
    high_pass: BiquadFilter,
    comb_left: CombCore,
    comb_right: CombCore,
    high_passed: Vec<Vec<Sample>>,
    wet_buffer: Vec<Vec<Sample>>,
    sample_rate: Frequency,
    bpm: Number,
}

impl Echo {
    pub fn new() -> Self {
        let mut high_pass = BiquadFilter::with_frequency_default(2, TYPE_HIGH_PASS, 20.0);
        high_pass.q.set_value(0.7);

        let mut echo = Self {
            delay_time: FloatParamS::new(DELAY_TIME_MIN, DELAY_TIME_MAX, DELAY_TIME_DEFAULT),
            feedback: FloatParamS::new(0.0, 0.99, 0.3),
            damping_frequency: FloatParamS::new(1.0, 24000.0, 6000.0),
            damping_gain: FloatParamS::new(-36.0, 0.0, -6.0),
            width: FloatParamS::new(-1.0, 1.0, 0.0),
            high_pass_frequency: FloatParamS::new(1.0, 24000.0, 20.0),
            distortion_level: FloatParamS::new(0.0, 1.0, 0.0),
            wet: FloatParamS::new(0.0, 1.0, 0.0),
            dry: FloatParamS::new(0.0, 1.0, 1.0),
            tempo_sync: ToggleParam::new(ToggleParam::OFF),
            log_scale_frequencies: ToggleParam::new(ToggleParam::OFF),
            side_chain: Compressor::new(2),
            high_pass,
            comb_left: CombCore::new(),
            comb_right: CombCore::new(),
            high_passed: vec![Vec::new(); 2],
            wet_buffer: vec![Vec::new(); 2],
            sample_rate: crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE,
            bpm: crate::dsp::signal_producer::DEFAULT_BPM,
        };

        // By default the ducking stage is inert (threshold at the top).
        echo.side_chain.threshold.set_value(0.0);
        echo
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.sample_rate = sample_rate;
        self.delay_time.set_sample_rate(sample_rate);
        self.feedback.set_sample_rate(sample_rate);
        self.damping_frequency.set_sample_rate(sample_rate);
        self.damping_gain.set_sample_rate(sample_rate);
        self.width.set_sample_rate(sample_rate);
        self.high_pass_frequency.set_sample_rate(sample_rate);
        self.distortion_level.set_sample_rate(sample_rate);
        self.wet.set_sample_rate(sample_rate);
        self.dry.set_sample_rate(sample_rate);
        self.high_pass.set_sample_rate(sample_rate);
        self.side_chain.set_sample_rate(sample_rate);
        self.comb_left
            .configure(DELAY_TIME_MAX + 0.05, sample_rate);
        self.comb_right
            .configure(DELAY_TIME_MAX + 0.05, sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.delay_time.set_block_size(block_size);
        self.feedback.set_block_size(block_size);
        self.damping_frequency.set_block_size(block_size);
        self.damping_gain.set_block_size(block_size);
        self.width.set_block_size(block_size);
        self.high_pass_frequency.set_block_size(block_size);
        self.distortion_level.set_block_size(block_size);
        self.wet.set_block_size(block_size);
        self.dry.set_block_size(block_size);
        self.high_pass.set_block_size(block_size);
        self.side_chain.set_block_size(block_size);

        for buffer in self
            .high_passed
            .iter_mut()
            .chain(self.wet_buffer.iter_mut())
        {
            buffer.clear();
            buffer.resize(block_size, 0.0);
        }
    }

    pub fn set_bpm(&mut self, bpm: Number) {
        self.bpm = bpm;
    }

    pub fn reset(&mut self) {
        self.delay_time.reset();
        self.feedback.reset();
        self.damping_frequency.reset();
        self.damping_gain.reset();
        self.width.reset();
        self.high_pass_frequency.reset();
        self.distortion_level.reset();
        self.wet.reset();
        self.dry.reset();
        self.high_pass.reset();
        self.side_chain.reset();
        self.comb_left.reset();
        self.comb_right.reset();
    }

    fn is_bypassed(&mut self, round: u64, sample_count: usize) -> bool {
        self.wet.is_constant_in_next_round(round, sample_count)
            && self.dry.is_constant_in_next_round(round, sample_count)
            && self.wet.get_value() < 0.000001
            && (self.dry.get_value() - 1.0).abs() < 0.000001
    }

    /// The effective delay in seconds: grid-quantized when tempo-synced.
    fn delay_seconds(&self) -> Seconds {
        if self.tempo_sync.is_on() {
            let ratio = self.delay_time.get_ratio();
            let index = ((ratio * (TEMPO_GRID.len() - 1) as Number).round() as usize)
                .min(TEMPO_GRID.len() - 1);
            let beats = TEMPO_GRID[index] * BEATS_PER_WHOLE_NOTE;

            (beats * 60.0 / self.bpm).clamp(DELAY_TIME_MIN, DELAY_TIME_MAX)
        } else {
            self.delay_time.get_value()
        }
    }

    pub fn process(&mut self, round: u64, buffer: &mut [Vec<Sample>], sample_count: usize) {
        if self.is_bypassed(round, sample_count) {
            self.wet.skip_round(round, sample_count);
            self.dry.skip_round(round, sample_count);
            return;
        }

        let log_scale = self.log_scale_frequencies.is_on();
        self.damping_frequency.set_logarithmic(log_scale);
        self.high_pass_frequency.set_logarithmic(log_scale);

        self.high_pass
            .frequency
            .set_value(self.high_pass_frequency.get_value());

        for channel in 0..2 {
            self.high_passed[channel][..sample_count]
                .copy_from_slice(&buffer[channel][..sample_count]);
        }
        self.high_pass
            .process_in_place(round, &mut self.high_passed, sample_count);

        let delay_samples = (self.delay_seconds() * self.sample_rate).max(1.0);
        let feedback = self.feedback.get_value();
        let distortion_level = self.distortion_level.get_value();
        let width = self.width.get_value();

        self.delay_time.skip_round(round, sample_count);
        self.feedback.skip_round(round, sample_count);
        self.distortion_level.skip_round(round, sample_count);
        self.width.skip_round(round, sample_count);

        let damping = compute_coefficients(
            TYPE_HIGH_SHELF,
            self.damping_frequency.get_value(),
            0.7,
            self.damping_gain.get_value(),
            self.sample_rate / 2.0,
        );
        self.damping_frequency.skip_round(round, sample_count);
        self.damping_gain.skip_round(round, sample_count);

        let curve = curve_for(TYPE_HARMONIC_13);

        let (left_to_left, left_to_right) = pan_gains(-width, false);
        let (right_to_left, right_to_right) = pan_gains(width, false);

        for i in 0..sample_count {
            let delayed_left = self.comb_left.read(delay_samples);
            let delayed_right = self.comb_right.read(delay_samples);

            let damped_left = self.comb_left.damp(delayed_left, &damping);
            let damped_right = self.comb_right.damp(delayed_right, &damping);

            let colored_left = shape(curve, distortion_level, damped_left);
            let colored_right = shape(curve, distortion_level, damped_right);

            // Ping-pong: each line recirculates the other line's tail.
            self.comb_left
                .write(self.high_passed[0][i] + feedback as Sample * colored_right);
            self.comb_right
                .write(self.high_passed[1][i] + feedback as Sample * colored_left);

            self.wet_buffer[0][i] =
                delayed_left * left_to_left + delayed_right * right_to_left;
            self.wet_buffer[1][i] =
                delayed_left * left_to_right + delayed_right * right_to_right;
        }

        // Duck the wet signal with the dry input as the key.
        self.side_chain
            .process_block(round, buffer, &mut self.wet_buffer, sample_count);

        mix_wet_dry(
            &mut self.wet,
            &mut self.dry,
            round,
            &self.wet_buffer,
            buffer,
            sample_count,
        );
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::new()
    }
}

fn shape(curve: &'static crate::dsp::distortion::Curve, level: Number, sample: Sample) -> Sample {
    if level < 0.000001 {
        return sample;
    }

    crate::dsp::distortion::shape_with(curve, level, sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Echo {
        let mut echo = Echo::new();
        echo.set_sample_rate(1000.0);
        echo.set_block_size(100);
        echo
    }

    fn impulse_blocks(echo: &mut Echo, blocks: usize) -> Vec<Vec<Sample>> {
        let mut left = Vec::new();
        let mut right = Vec::new();

        for round in 0..blocks {
            let mut buffer = vec![vec![0.0; 100], vec![0.0; 100]];

            if round == 0 {
                buffer[0][0] = 1.0;
                buffer[1][0] = 1.0;
            }

            echo.process(round as u64 + 1, &mut buffer, 100);
            left.extend_from_slice(&buffer[0]);
            right.extend_from_slice(&buffer[1]);
        }

        vec![left, right]
    }

    #[test]
    fn test_default_is_bypassed() {
        let mut echo = echo();

        let mut buffer = vec![vec![0.5; 100], vec![-0.5; 100]];
        echo.process(1, &mut buffer, 100);

        assert!(buffer[0].iter().all(|&sample| sample == 0.5));
        assert!(buffer[1].iter().all(|&sample| sample == -0.5));
    }

    #[test]
    fn test_echo_repeats_at_delay_time() {
        let mut echo = echo();
        echo.wet.set_value(1.0);
        echo.delay_time.set_value(0.15);
        echo.feedback.set_value(0.5);
        echo.high_pass_frequency.set_value(1.0);

        let output = impulse_blocks(&mut echo, 5);

        // Dry impulse at 0, first repeat 150 samples later.
        assert!((output[0][0] - 1.0).abs() < 1e-6);
        assert!(output[0][150].abs() > 0.3, "first repeat missing");
        assert!(
            output[0][300].abs() > 0.05,
            "second repeat missing (feedback)"
        );
        assert!(output[0][300].abs() < output[0][150].abs());
    }

    #[test]
    fn test_tempo_sync_quantizes_delay() {
        let mut echo = echo();
        echo.tempo_sync.set_value(ToggleParam::ON);
        echo.set_bpm(120.0);

        // Ratio 0 picks a 1/16 note: 0.125 s at 120 bpm.
        echo.delay_time.set_ratio(0.0);
        assert!((echo.delay_seconds() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_width_pans_lines_apart() {
        let mut echo = echo();
        echo.wet.set_value(1.0);
        echo.dry.set_value(0.0);
        echo.width.set_value(1.0);
        echo.delay_time.set_value(0.05);
        echo.high_pass_frequency.set_value(1.0);

        let mut buffer = vec![vec![0.0; 100], vec![0.0; 100]];
        buffer[0][0] = 1.0; // left-only impulse

        echo.process(1, &mut buffer, 100);

        // With full width the left line lands hard on one side.
        let left_energy: Number = buffer[0].iter().map(|&x| (x as Number).abs()).sum();
        let right_energy: Number = buffer[1].iter().map(|&x| (x as Number).abs()).sum();

        assert!(
            (left_energy - right_energy).abs() > 1e-3,
            "full width should separate the channels: {} vs {}",
            left_energy,
            right_energy
        );
    }
}
