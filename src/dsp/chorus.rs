//! Chorus: three LFO-modulated comb taps
//!
//! The high-passed input feeds three short delays (up to 30 ms), each
//! modulated by its own sine LFO; the LFOs share the chorus rate but run
//! at rotated phases so the taps never line up. The taps are panned
//! across the stereo field by the width parameter, a high-shelf-damped
//! feedback path recirculates the previous block's wet mix, and the
//! result is blended with the dry signal. Tempo sync scales the LFO rate
//! by bpm / 60.

use crate::dsp::biquad_filter::{BiquadFilter, TYPE_HIGH_PASS, TYPE_HIGH_SHELF};
use crate::dsp::comb_filter::pan_gains;
use crate::dsp::delay::Delay;
use crate::dsp::effects::mix_wet_dry;
use crate::dsp::param::{FloatParamS, ModulatedFloatParam, ToggleParam};
use crate::dsp::signal_producer::SignalProducer;
use crate::math;
use crate::{Frequency, Number, Sample};

pub const DELAY_TIME_MAX: Number = 0.03;
pub const DELAY_TIME_DEFAULT: Number = 0.008;

/// Maximum depth: half the longest tap delay, in seconds of swing.
pub const DEPTH_MAX: Number = DELAY_TIME_MAX / 2.0;
pub const DEPTH_DEFAULT: Number = 0.00225;

const TAPS: usize = 3;
const TAP_PHASES: [Number; TAPS] = [0.0, 1.0 / 3.0, 2.0 / 3.0];
const TAP_PANS: [Number; TAPS] = [-1.0, 0.0, 1.0];

pub struct Chorus {
    /// The tap delay time with the per-tap LFO as its modulator; the
    /// modulation level is the chorus depth, in seconds of swing.
    pub delay_time: ModulatedFloatParam,
    pub frequency: FloatParamS,
    pub feedback: FloatParamS,
    pub damping_frequency: FloatParamS,
    pub damping_gain: FloatParamS,
    pub width: FloatParamS,
    pub high_pass_frequency: FloatParamS,
    pub wet: FloatParamS,
    pub dry: FloatParamS,
    pub tempo_sync: ToggleParam,
    pub log_scale_frequencies: ToggleParam,
    high_pass: BiquadFilter,
    taps: [Delay; TAPS],
    lfo_phases: [Number; TAPS],
    damping: BiquadFilter,
    feedback_buffer: Vec<Vec<Sample>>,
    high_passed: Vec<Vec<Sample>>,
    tap_time: Vec<Sample>,
    tap_modulator: Vec<Sample>,
    tap_out: Vec<Vec<Sample>>,
    wet_buffer: Vec<Vec<Sample>>,
    sample_rate: Frequency,
}

impl Chorus {
    pub fn new() -> Self {
        let mut high_pass = BiquadFilter::with_frequency_default(2, TYPE_HIGH_PASS, 20.0);
        high_pass.q.set_value(0.7);

        let mut damping = BiquadFilter::with_frequency_default(2, TYPE_HIGH_SHELF, 6000.0);
        damping.gain.set_value(-6.0);

        Self {
            delay_time: ModulatedFloatParam::new(
                0.0001,
                DELAY_TIME_MAX,
                DELAY_TIME_DEFAULT,
                DEPTH_MAX,
                DEPTH_DEFAULT,
            ),
            frequency: FloatParamS::new(0.01, 20.0, 0.15),
            feedback: FloatParamS::new(0.0, 0.95, 0.0),
            damping_frequency: FloatParamS::new(1.0, 24000.0, 6000.0),
            damping_gain: FloatParamS::new(-36.0, 0.0, -6.0),
            width: FloatParamS::new(0.0, 1.0, 0.66),
            high_pass_frequency: FloatParamS::new(1.0, 24000.0, 20.0),
            wet: FloatParamS::new(0.0, 1.0, 0.0),
            dry: FloatParamS::new(0.0, 1.0, 1.0),
            tempo_sync: ToggleParam::new(ToggleParam::OFF),
            log_scale_frequencies: ToggleParam::new(ToggleParam::OFF),
            high_pass,
            taps: [
                Delay::new(2, DELAY_TIME_MAX, DELAY_TIME_DEFAULT),
                Delay::new(2, DELAY_TIME_MAX, DELAY_TIME_DEFAULT),
                Delay::new(2, DELAY_TIME_MAX, DELAY_TIME_DEFAULT),
            ],
            lfo_phases: TAP_PHASES,
            damping,
            feedback_buffer: vec![Vec::new(); 2],
            high_passed: vec![Vec::new(); 2],
            tap_time: Vec::new(),
            tap_modulator: Vec::new(),
            tap_out: vec![Vec::new(); 2],
            wet_buffer: vec![Vec::new(); 2],
            sample_rate: crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.sample_rate = sample_rate;
        self.delay_time.set_sample_rate(sample_rate);
        self.frequency.set_sample_rate(sample_rate);
        self.feedback.set_sample_rate(sample_rate);
        self.damping_frequency.set_sample_rate(sample_rate);
        self.damping_gain.set_sample_rate(sample_rate);
        self.width.set_sample_rate(sample_rate);
        self.high_pass_frequency.set_sample_rate(sample_rate);
        self.wet.set_sample_rate(sample_rate);
        self.dry.set_sample_rate(sample_rate);
        self.high_pass.set_sample_rate(sample_rate);
        self.damping.set_sample_rate(sample_rate);

        for tap in self.taps.iter_mut() {
            tap.set_sample_rate(sample_rate);
        }
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.delay_time.set_block_size(block_size);
        self.frequency.set_block_size(block_size);
        self.feedback.set_block_size(block_size);
        self.damping_frequency.set_block_size(block_size);
        self.damping_gain.set_block_size(block_size);
        self.width.set_block_size(block_size);
        self.high_pass_frequency.set_block_size(block_size);
        self.wet.set_block_size(block_size);
        self.dry.set_block_size(block_size);
        self.high_pass.set_block_size(block_size);
        self.damping.set_block_size(block_size);

        for tap in self.taps.iter_mut() {
            tap.set_block_size(block_size);
        }

        for buffer in self
            .feedback_buffer
            .iter_mut()
            .chain(self.high_passed.iter_mut())
            .chain(self.tap_out.iter_mut())
            .chain(self.wet_buffer.iter_mut())
        {
            buffer.clear();
            buffer.resize(block_size, 0.0);
        }

        self.tap_time.clear();
        self.tap_time.resize(block_size, 0.0);
        self.tap_modulator.clear();
        self.tap_modulator.resize(block_size, 0.0);
    }

    pub fn set_bpm(&mut self, bpm: Number) {
        for tap in self.taps.iter_mut() {
            tap.set_bpm(bpm);
        }
    }

    pub fn reset(&mut self) {
        self.delay_time.reset();
        self.frequency.reset();
        self.feedback.reset();
        self.damping_frequency.reset();
        self.damping_gain.reset();
        self.width.reset();
        self.high_pass_frequency.reset();
        self.wet.reset();
        self.dry.reset();
        self.high_pass.reset();
        self.damping.reset();
        self.lfo_phases = TAP_PHASES;

        for tap in self.taps.iter_mut() {
            tap.reset();
        }

        for buffer in self
            .feedback_buffer
            .iter_mut()
            .chain(self.wet_buffer.iter_mut())
        {
            buffer.fill(0.0);
        }
    }

    pub fn is_bypassed(&mut self, round: u64, sample_count: usize) -> bool {
        self.wet.is_constant_in_next_round(round, sample_count)
            && self.dry.is_constant_in_next_round(round, sample_count)
            && self.wet.get_value() < 0.000001
            && (self.dry.get_value() - 1.0).abs() < 0.000001
    }

    pub fn process(&mut self, round: u64, buffer: &mut [Vec<Sample>], sample_count: usize, bpm: Number) {
        if self.is_bypassed(round, sample_count) {
            self.wet.skip_round(round, sample_count);
            self.dry.skip_round(round, sample_count);
            return;
        }

        // Keep the filters in sync with the log-scale toggle.
        let log_scale = self.log_scale_frequencies.is_on();
        self.damping_frequency.set_logarithmic(log_scale);
        self.high_pass_frequency.set_logarithmic(log_scale);

        self.high_pass
            .frequency
            .set_value(self.high_pass_frequency.get_value());
        self.damping
            .frequency
            .set_value(self.damping_frequency.get_value());
        self.damping.gain.set_value(self.damping_gain.get_value());

        // High-passed input into a scratch buffer.
        for channel in 0..2 {
            self.high_passed[channel][..sample_count]
                .copy_from_slice(&buffer[channel][..sample_count]);
        }
        self.high_pass
            .process_in_place(round, &mut self.high_passed, sample_count);

        let frequency_scale = if self.tempo_sync.is_on() { bpm / 60.0 } else { 1.0 };

        let frequency = self.frequency.get_value() * frequency_scale;
        self.frequency.skip_round(round, sample_count);

        let modulation_bypassed = self.delay_time.is_modulation_bypassed(round, sample_count);

        if modulation_bypassed {
            // The base still advances (and picks up scheduled changes)
            // even while the modulator path is skipped.
            self.delay_time
                .base_mut()
                .produce_if_not_constant(round, sample_count);
            self.delay_time
                .modulation_level
                .skip_round(round, sample_count);
        }

        for channel in 0..2 {
            self.wet_buffer[channel][..sample_count].fill(0.0);
        }

        let phase_increment = frequency / self.sample_rate;

        for tap in 0..TAPS {
            // Each tap runs its own LFO at a rotated phase; the modulated
            // delay-time parameter swings around the nominal time by the
            // depth.
            let mut phase = self.lfo_phases[tap];

            for slot in self.tap_modulator[..sample_count].iter_mut() {
                *slot = math::sin(math::PI_DOUBLE * phase) as Sample;

                phase += phase_increment;

                if phase >= 1.0 {
                    phase -= phase.floor();
                }
            }

            self.lfo_phases[tap] = phase;

            if modulation_bypassed {
                self.taps[tap]
                    .time
                    .set_value(self.delay_time.base().get_value());
            } else {
                self.delay_time.render_modulated(
                    round,
                    sample_count,
                    &self.tap_modulator,
                    &mut self.tap_time,
                );
                self.taps[tap]
                    .time
                    .set_driven_buffer(round, &self.tap_time[..sample_count]);
            }

            let feedback = if tap == 0 {
                Some(&self.feedback_buffer[..])
            } else {
                None
            };

            self.taps[tap].process_block(
                round,
                &self.high_passed,
                feedback,
                &mut self.tap_out,
                sample_count,
            );

            let (left_gain, right_gain) = pan_gains(
                TAP_PANS[tap] * self.width.get_value(),
                false,
            );

            for i in 0..sample_count {
                let mono = 0.5 * (self.tap_out[0][i] + self.tap_out[1][i]);
                self.wet_buffer[0][i] += left_gain * mono;
                self.wet_buffer[1][i] += right_gain * mono;
            }
        }

        self.width.skip_round(round, sample_count);

        // Damped feedback for the next block.
        self.damping
            .process_in_place(round, &mut self.wet_buffer, sample_count);

        let feedback_gain = self.feedback.get_value() as Sample;
        self.feedback.skip_round(round, sample_count);

        for channel in 0..2 {
            for i in 0..sample_count {
                self.feedback_buffer[channel][i] = feedback_gain * self.wet_buffer[channel][i];
            }
        }

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

impl Default for Chorus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chorus() -> Chorus {
        let mut chorus = Chorus::new();
        chorus.set_sample_rate(44100.0);
        chorus.set_block_size(512);
        chorus
    }

    fn sine_stereo(frequency: Number, length: usize) -> Vec<Vec<Sample>> {
        let samples: Vec<Sample> = (0..length)
            .map(|i| {
                (2.0 * std::f64::consts::PI * frequency * i as Number / 44100.0).sin() as Sample
            })
            .collect();
        vec![samples.clone(), samples]
    }

    #[test]
    fn test_default_is_bypassed() {
        let mut chorus = chorus();

        let original = sine_stereo(440.0, 512);
        let mut buffer = original.clone();
        chorus.process(1, &mut buffer, 512, 60.0);

        assert_eq!(buffer, original);
    }

    #[test]
    fn test_wet_signal_is_added() {
        let mut chorus = chorus();
        chorus.wet.set_value(1.0);
        chorus.dry.set_value(0.0);

        let original = sine_stereo(440.0, 512);
        let mut buffer = original.clone();

        // Run a few blocks so the delay lines fill.
        for round in 1..6 {
            buffer = original.clone();
            chorus.process(round, &mut buffer, 512, 60.0);
        }

        assert!(buffer[0].iter().any(|&sample| sample.abs() > 1e-3));
        assert!(
            buffer[0]
                .iter()
                .zip(original[0].iter())
                .any(|(&a, &b)| (a - b).abs() > 1e-3),
            "wet-only output must differ from the dry input"
        );
    }

    #[test]
    fn test_width_spreads_channels() {
        let mut chorus = chorus();
        chorus.wet.set_value(1.0);
        chorus.dry.set_value(0.0);
        chorus.width.set_value(1.0);
        chorus.delay_time.modulation_level.set_value(0.005);

        let original = sine_stereo(300.0, 512);
        let mut buffer = original.clone();

        for round in 1..6 {
            buffer = original.clone();
            chorus.process(round, &mut buffer, 512, 60.0);
        }

        assert!(
            buffer[0]
                .iter()
                .zip(buffer[1].iter())
                .any(|(&l, &r)| (l - r).abs() > 1e-4),
            "full width should decorrelate the channels"
        );
    }
}
