//! Tape: saturation, color, hiss, and wow & flutter
//!
//! Models the pleasant side of magnetic tape: a high-shelf/low-shelf tilt
//! controlled by the color parameter, tanh saturation, a touch of
//! band-passed hiss from the shared noise stream, and pitch instability
//! from a short delay modulated by a slow wow LFO and a faster flutter
//! LFO, with an optional per-channel phase offset for stereo drift.
//!
//! Two stages share one parameter set: the position toggle selects whether
//! the tape sits before the modulation effects or at the end of the chain,
//! matching a real tape loop inserted at either point.

use crate::dsp::biquad_filter::{BiquadFilter, TYPE_HIGH_SHELF, TYPE_LOW_SHELF};
use crate::dsp::delay::Delay;
use crate::dsp::distortion::{Distortion, TYPE_TANH_5};
use crate::dsp::effects::mix_wet_dry;
use crate::dsp::noise_generator::NoiseGenerator;
use crate::dsp::param::{FloatParamB, FloatParamS, ToggleParam};
use crate::dsp::signal_producer::SignalProducer;
use crate::math::{self, Rng};
use crate::{Frequency, Number, Sample, Seconds};

/// Nominal transport delay the wow/flutter modulation swings around.
const BASE_DELAY: Seconds = 0.005;
const WNF_DELAY_RANGE: Seconds = 0.002;
const DELAY_MAX: Seconds = 0.02;

const WOW_FREQUENCY: Number = 0.8;
const FLUTTER_FREQUENCY: Number = 6.3;

const COLOR_SHELF_HIGH_FREQUENCY: Number = 4000.0;
const COLOR_SHELF_LOW_FREQUENCY: Number = 250.0;

pub struct TapeParams {
    pub saturation: FloatParamS,
    pub color: FloatParamB,
    pub hiss_level: FloatParamB,
    pub wnf_amp: FloatParamS,
    pub wnf_speed: FloatParamB,
    pub stereo_wnf: FloatParamB,
    pub wet: FloatParamS,
    pub dry: FloatParamS,
    /// Off: the tape runs before the modulation effects; on: after the
    /// reverb.
    pub at_end: ToggleParam,
}

impl Default for TapeParams {
    fn default() -> Self {
        Self::new()
    }
}

impl TapeParams {
    pub fn new() -> Self {
        Self {
            saturation: FloatParamS::new(0.0, 1.0, 0.0),
            color: FloatParamB::new(-1.0, 1.0, 0.0),
            hiss_level: FloatParamB::new(0.0, 1.0, 0.0),
            wnf_amp: FloatParamS::new(0.0, 1.0, 0.0),
            wnf_speed: FloatParamB::new(0.0, 1.0, 0.5),
            stereo_wnf: FloatParamB::new(0.0, 1.0, 0.0),
            wet: FloatParamS::new(0.0, 1.0, 0.0),
            dry: FloatParamS::new(0.0, 1.0, 1.0),
            at_end: ToggleParam::new(ToggleParam::OFF),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.saturation.set_sample_rate(sample_rate);
        self.wnf_amp.set_sample_rate(sample_rate);
        self.wet.set_sample_rate(sample_rate);
        self.dry.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.saturation.set_block_size(block_size);
        self.wnf_amp.set_block_size(block_size);
        self.wet.set_block_size(block_size);
        self.dry.set_block_size(block_size);
    }

    pub fn reset(&mut self) {
        self.saturation.reset();
        self.color.reset();
        self.hiss_level.reset();
        self.wnf_amp.reset();
        self.wnf_speed.reset();
        self.stereo_wnf.reset();
        self.wet.reset();
        self.dry.reset();
    }
}

pub struct TapeStage {
    at_end: bool,
    high_shelf: BiquadFilter,
    saturation: Distortion,
    low_shelf: BiquadFilter,
    hiss: NoiseGenerator,
    delays: [Delay; 2],
    wow_phases: [Number; 2],
    flutter_phases: [Number; 2],
    wet_buffer: Vec<Vec<Sample>>,
    delay_out: Vec<Vec<Sample>>,
    time_values: Vec<Sample>,
    sample_rate: Frequency,
}

impl TapeStage {
    pub fn new(at_end: bool) -> Self {
        let mut high_shelf =
            BiquadFilter::with_frequency_default(2, TYPE_HIGH_SHELF, COLOR_SHELF_HIGH_FREQUENCY);
        high_shelf.frequency.set_value(COLOR_SHELF_HIGH_FREQUENCY);

        let mut low_shelf =
            BiquadFilter::with_frequency_default(2, TYPE_LOW_SHELF, COLOR_SHELF_LOW_FREQUENCY);
        low_shelf.frequency.set_value(COLOR_SHELF_LOW_FREQUENCY);

        Self {
            at_end,
            high_shelf,
            saturation: Distortion::new(2, TYPE_TANH_5),
            low_shelf,
            hiss: NoiseGenerator::new(2, 2000.0, 12000.0),
            delays: [
                Delay::new(1, DELAY_MAX, BASE_DELAY),
                Delay::new(1, DELAY_MAX, BASE_DELAY),
            ],
            wow_phases: [0.0, 0.0],
            flutter_phases: [0.0, 0.0],
            wet_buffer: vec![Vec::new(); 2],
            delay_out: vec![Vec::new(); 2],
            time_values: Vec::new(),
            sample_rate: crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.sample_rate = sample_rate;
        self.high_shelf.set_sample_rate(sample_rate);
        self.saturation.set_sample_rate(sample_rate);
        self.low_shelf.set_sample_rate(sample_rate);
        self.hiss.set_sample_rate(sample_rate);

        for delay in self.delays.iter_mut() {
            delay.set_sample_rate(sample_rate);
        }
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.high_shelf.set_block_size(block_size);
        self.saturation.set_block_size(block_size);
        self.low_shelf.set_block_size(block_size);

        for delay in self.delays.iter_mut() {
            delay.set_block_size(block_size);
        }

        for buffer in self
            .wet_buffer
            .iter_mut()
            .chain(self.delay_out.iter_mut())
        {
            buffer.clear();
            buffer.resize(block_size, 0.0);
        }

        self.time_values.clear();
        self.time_values.resize(block_size, 0.0);
    }

    pub fn reset(&mut self) {
        self.high_shelf.reset();
        self.saturation.reset();
        self.low_shelf.reset();
        self.hiss.reset();
        self.wow_phases = [0.0, 0.0];
        self.flutter_phases = [0.0, 0.0];

        for delay in self.delays.iter_mut() {
            delay.reset();
        }
    }

    fn is_bypassed(params: &mut TapeParams, round: u64, sample_count: usize) -> bool {
        params.wet.is_constant_in_next_round(round, sample_count)
            && params.dry.is_constant_in_next_round(round, sample_count)
            && params.wet.get_value() < 0.000001
            && (params.dry.get_value() - 1.0).abs() < 0.000001
    }

    pub fn process(
        &mut self,
        round: u64,
        params: &mut TapeParams,
        buffer: &mut [Vec<Sample>],
        sample_count: usize,
        rng: &mut Rng,
    ) {
        if params.at_end.is_on() != self.at_end
            || Self::is_bypassed(params, round, sample_count)
        {
            return;
        }

        for channel in 0..2 {
            self.wet_buffer[channel][..sample_count]
                .copy_from_slice(&buffer[channel][..sample_count]);
        }

        let color = params.color.get_value();
        self.high_shelf.gain.set_value(-color * 6.0);
        self.low_shelf.gain.set_value(color * 3.0);

        self.high_shelf
            .process_in_place(round, &mut self.wet_buffer, sample_count);

        self.saturation
            .level
            .set_value(params.saturation.get_value());
        params.saturation.skip_round(round, sample_count);
        self.saturation
            .process_in_place(round, &mut self.wet_buffer, sample_count);

        self.low_shelf
            .process_in_place(round, &mut self.wet_buffer, sample_count);

        self.hiss.level.set_value(params.hiss_level.get_value());
        self.hiss
            .add_noise(rng, &mut self.wet_buffer, 0, sample_count);

        let wnf_amp = params.wnf_amp.get_value();
        params.wnf_amp.skip_round(round, sample_count);

        if wnf_amp > 0.000001 {
            let speed_scale = 0.5 + 1.5 * params.wnf_speed.get_value();
            let wow_increment = WOW_FREQUENCY * speed_scale / self.sample_rate;
            let flutter_increment = FLUTTER_FREQUENCY * speed_scale / self.sample_rate;
            let stereo_offset = 0.5 * params.stereo_wnf.get_value();

            for channel in 0..2 {
                let phase_offset = if channel == 1 { stereo_offset } else { 0.0 };
                let mut wow_phase = self.wow_phases[channel];
                let mut flutter_phase = self.flutter_phases[channel];

                for i in 0..sample_count {
                    let modulation = 0.7 * math::sin(math::PI_DOUBLE * (wow_phase + phase_offset))
                        + 0.3 * math::sin(math::PI_DOUBLE * (flutter_phase + phase_offset));

                    self.time_values[i] =
                        (BASE_DELAY + wnf_amp * WNF_DELAY_RANGE * modulation) as Sample;

                    wow_phase += wow_increment;
                    flutter_phase += flutter_increment;

                    if wow_phase >= 1.0 {
                        wow_phase -= wow_phase.floor();
                    }

                    if flutter_phase >= 1.0 {
                        flutter_phase -= flutter_phase.floor();
                    }
                }

                self.wow_phases[channel] = wow_phase;
                self.flutter_phases[channel] = flutter_phase;

                self.delays[channel]
                    .time
                    .set_driven_buffer(round, &self.time_values[..sample_count]);

                self.delays[channel].process_block(
                    round,
                    std::slice::from_ref(&self.wet_buffer[channel]),
                    None,
                    &mut self.delay_out[channel..channel + 1],
                    sample_count,
                );
            }

            for channel in 0..2 {
                self.wet_buffer[channel][..sample_count]
                    .copy_from_slice(&self.delay_out[channel][..sample_count]);
            }
        }

        mix_wet_dry(
            &mut params.wet,
            &mut params.dry,
            round,
            &self.wet_buffer,
            buffer,
            sample_count,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_and_params() -> (TapeStage, TapeParams, Rng) {
        let mut stage = TapeStage::new(false);
        stage.set_sample_rate(44100.0);
        stage.set_block_size(512);

        let mut params = TapeParams::new();
        params.set_sample_rate(44100.0);
        params.set_block_size(512);

        (stage, params, Rng::new(42))
    }

    fn sine_stereo(frequency: Number, length: usize) -> Vec<Vec<Sample>> {
        let samples: Vec<Sample> = (0..length)
            .map(|i| {
                (0.5 * (2.0 * std::f64::consts::PI * frequency * i as Number / 44100.0).sin())
                    as Sample
            })
            .collect();
        vec![samples.clone(), samples]
    }

    #[test]
    fn test_default_is_bypassed() {
        let (mut stage, mut params, mut rng) = stage_and_params();

        let original = sine_stereo(440.0, 512);
        let mut buffer = original.clone();
        stage.process(1, &mut params, &mut buffer, 512, &mut rng);

        assert_eq!(buffer, original);
    }

    #[test]
    fn test_wrong_position_is_bypassed() {
        let (_, mut params, mut rng) = stage_and_params();
        let mut end_stage = TapeStage::new(true);
        end_stage.set_sample_rate(44100.0);
        end_stage.set_block_size(512);

        params.wet.set_value(1.0);
        params.dry.set_value(0.0);
        // at_end is off, so the end stage must not run.

        let original = sine_stereo(440.0, 512);
        let mut buffer = original.clone();
        end_stage.process(1, &mut params, &mut buffer, 512, &mut rng);

        assert_eq!(buffer, original);
    }

    #[test]
    fn test_saturation_clips_peaks() {
        let (mut stage, mut params, mut rng) = stage_and_params();

        params.wet.set_value(1.0);
        params.dry.set_value(0.0);
        params.saturation.set_value(1.0);

        let mut buffer = vec![vec![2.0; 512], vec![2.0; 512]];
        stage.process(1, &mut params, &mut buffer, 512, &mut rng);

        assert!(buffer[0][256] < 1.05, "tanh saturation bounds the signal");
    }

    #[test]
    fn test_hiss_adds_noise() {
        let (mut stage, mut params, mut rng) = stage_and_params();

        params.wet.set_value(1.0);
        params.dry.set_value(0.0);
        params.hiss_level.set_value(1.0);

        let mut buffer = vec![vec![0.0; 512], vec![0.0; 512]];
        stage.process(1, &mut params, &mut buffer, 512, &mut rng);

        assert!(buffer[0].iter().any(|&sample| sample.abs() > 1e-4));
    }

    #[test]
    fn test_wow_flutter_shifts_signal() {
        let (mut stage, mut params, mut rng) = stage_and_params();

        params.wet.set_value(1.0);
        params.dry.set_value(0.0);
        params.wnf_amp.set_value(1.0);

        let original = sine_stereo(440.0, 512);
        let mut buffer = original.clone();

        for round in 1..5u64 {
            buffer = original.clone();
            stage.process(round, &mut params, &mut buffer, 512, &mut rng);
        }

        assert!(
            buffer[0]
                .iter()
                .zip(original[0].iter())
                .any(|(&a, &b)| (a - b).abs() > 1e-3),
            "the modulated delay must displace the signal"
        );
    }
}
