//! Reverb: ten parallel high-shelf-damped comb filters
//!
//! Freeverb-descended: the high-passed input is summed to mono and fed to
//! ten comb filters whose feedback loops carry a high-shelf damping filter
//! and an optional soft-clipping waveshaper. Each comb is panned with the
//! constant-power law, alternating the flip from row to row to spread the
//! taps across the field. Ten type presets pick the tap delays, weights
//! and panning scales; common parameters scale reflectivity, damping,
//! width and coloration. The wet signal can be compressed keyed by the
//! dry input before the final wet/dry blend.

use crate::dsp::biquad_filter::{
    compute_coefficients, BiquadFilter, TYPE_HIGH_PASS, TYPE_HIGH_SHELF,
};
use crate::dsp::comb_filter::{pan_gains, CombCore};
use crate::dsp::compressor::Compressor;
use crate::dsp::distortion::{curve_for, shape_with, TYPE_HARMONIC_13};
use crate::dsp::effects::mix_wet_dry;
use crate::dsp::param::{ByteParam, FloatParamS, ToggleParam};
use crate::dsp::signal_producer::SignalProducer;
use crate::{Frequency, Number, Sample, Seconds};

pub const COMB_FILTERS: usize = 10;
pub const TYPES: usize = 10;

const COMB_DELAY_MAX: Seconds = 0.125;

/// Keeps the summed comb output in the same ballpark as the input.
const WET_SCALE: Sample = 0.25;

#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub delay_time: Seconds,
    pub weight: Number,
    pub panning_scale: Number,
}

const fn t(delay_time: Seconds, weight: Number, panning_scale: Number) -> Tuning {
    Tuning {
        delay_time,
        weight,
        panning_scale,
    }
}

/// One row per comb filter; delays descend from the classic 44.1 kHz comb
/// lengths, scaled per room type.
static TUNINGS: [[Tuning; COMB_FILTERS]; TYPES] = [
    // Room
    [
        t(0.0152, 1.00, 0.20),
        t(0.0162, 0.95, 0.35),
        t(0.0174, 0.90, 0.50),
        t(0.0184, 0.85, 0.60),
        t(0.0193, 0.80, 0.70),
        t(0.0203, 0.75, 0.75),
        t(0.0212, 0.70, 0.80),
        t(0.0220, 0.65, 0.85),
        t(0.0230, 0.55, 0.90),
        t(0.0242, 0.45, 1.00),
    ],
    // Chamber
    [
        t(0.0114, 1.00, 0.30),
        t(0.0121, 0.92, 0.40),
        t(0.0130, 0.86, 0.55),
        t(0.0138, 0.82, 0.60),
        t(0.0145, 0.76, 0.65),
        t(0.0152, 0.70, 0.70),
        t(0.0159, 0.64, 0.80),
        t(0.0165, 0.58, 0.85),
        t(0.0173, 0.50, 0.95),
        t(0.0182, 0.40, 1.00),
    ],
    // Small hall
    [
        t(0.0202, 1.00, 0.25),
        t(0.0216, 0.94, 0.40),
        t(0.0232, 0.90, 0.50),
        t(0.0246, 0.86, 0.60),
        t(0.0258, 0.80, 0.65),
        t(0.0270, 0.76, 0.70),
        t(0.0282, 0.70, 0.80),
        t(0.0293, 0.66, 0.85),
        t(0.0307, 0.58, 0.95),
        t(0.0323, 0.48, 1.00),
    ],
    // Medium hall
    [
        t(0.0253, 1.00, 0.25),
        t(0.0269, 0.95, 0.40),
        t(0.0290, 0.90, 0.50),
        t(0.0307, 0.85, 0.60),
        t(0.0322, 0.80, 0.65),
        t(0.0338, 0.75, 0.70),
        t(0.0353, 0.70, 0.80),
        t(0.0367, 0.65, 0.85),
        t(0.0384, 0.55, 0.95),
        t(0.0404, 0.45, 1.00),
    ],
    // Large hall
    [
        t(0.0329, 1.00, 0.30),
        t(0.0350, 0.96, 0.45),
        t(0.0377, 0.92, 0.55),
        t(0.0399, 0.88, 0.60),
        t(0.0419, 0.82, 0.65),
        t(0.0439, 0.78, 0.70),
        t(0.0459, 0.72, 0.80),
        t(0.0477, 0.68, 0.90),
        t(0.0499, 0.60, 0.95),
        t(0.0525, 0.50, 1.00),
    ],
    // Cathedral
    [
        t(0.0455, 1.00, 0.35),
        t(0.0485, 0.97, 0.50),
        t(0.0521, 0.94, 0.60),
        t(0.0553, 0.91, 0.65),
        t(0.0580, 0.86, 0.70),
        t(0.0608, 0.82, 0.75),
        t(0.0635, 0.77, 0.85),
        t(0.0660, 0.72, 0.90),
        t(0.0691, 0.64, 0.95),
        t(0.0727, 0.54, 1.00),
    ],
    // Plate
    [
        t(0.0089, 1.00, 0.50),
        t(0.0094, 0.98, 0.60),
        t(0.0102, 0.96, 0.65),
        t(0.0108, 0.94, 0.70),
        t(0.0113, 0.92, 0.75),
        t(0.0118, 0.90, 0.80),
        t(0.0124, 0.88, 0.85),
        t(0.0128, 0.86, 0.90),
        t(0.0134, 0.82, 0.95),
        t(0.0141, 0.78, 1.00),
    ],
    // Spring
    [
        t(0.0063, 1.00, 0.10),
        t(0.0091, 0.60, 0.20),
        t(0.0127, 0.90, 0.25),
        t(0.0151, 0.40, 0.30),
        t(0.0189, 0.80, 0.35),
        t(0.0222, 0.30, 0.40),
        t(0.0254, 0.70, 0.45),
        t(0.0287, 0.25, 0.50),
        t(0.0317, 0.60, 0.55),
        t(0.0353, 0.20, 0.60),
    ],
    // Ambience
    [
        t(0.0063, 1.00, 0.40),
        t(0.0067, 0.85, 0.50),
        t(0.0073, 0.72, 0.60),
        t(0.0077, 0.61, 0.70),
        t(0.0081, 0.52, 0.75),
        t(0.0085, 0.44, 0.80),
        t(0.0088, 0.37, 0.85),
        t(0.0092, 0.31, 0.90),
        t(0.0096, 0.26, 0.95),
        t(0.0101, 0.22, 1.00),
    ],
    // Canyon
    [
        t(0.0607, 1.00, 0.40),
        t(0.0646, 0.97, 0.55),
        t(0.0695, 0.94, 0.65),
        t(0.0737, 0.91, 0.70),
        t(0.0773, 0.87, 0.75),
        t(0.0811, 0.83, 0.80),
        t(0.0847, 0.79, 0.85),
        t(0.0880, 0.75, 0.90),
        t(0.0921, 0.68, 0.95),
        t(0.0969, 0.60, 1.00),
    ],
];

pub struct Reverb {
    pub reverb_type: ByteParam,
    pub room_reflectivity: FloatParamS,
    pub damping_frequency: FloatParamS,
    pub damping_gain: FloatParamS,
    pub width: FloatParamS,
    pub high_pass_frequency: FloatParamS,
    pub distortion_level: FloatParamS,
    pub wet: FloatParamS,
    pub dry: FloatParamS,
    pub log_scale_frequencies: ToggleParam,
    pub side_chain: Compressor,
    high_pass: BiquadFilter,
    combs: Vec<CombCore>,
    high_passed: Vec<Vec<Sample>>,
    wet_buffer: Vec<Vec<Sample>>,
    sample_rate: Frequency,
}

impl Reverb {
    pub fn new() -> Self {
        let mut high_pass = BiquadFilter::with_frequency_default(2, TYPE_HIGH_PASS, 20.0);
        high_pass.q.set_value(0.7);

        let mut reverb = Self {
            reverb_type: ByteParam::new(0, (TYPES - 1) as u8, 3),
            room_reflectivity: FloatParamS::new(0.0, 0.999, 0.85),
            damping_frequency: FloatParamS::new(1.0, 24000.0, 6000.0),
            damping_gain: FloatParamS::new(-36.0, 0.0, -6.0),
            width: FloatParamS::new(-1.0, 1.0, 0.0),
            high_pass_frequency: FloatParamS::new(1.0, 24000.0, 20.0),
            distortion_level: FloatParamS::new(0.0, 1.0, 0.0),
            wet: FloatParamS::new(0.0, 1.0, 0.0),
            dry: FloatParamS::new(0.0, 1.0, 1.0),
            log_scale_frequencies: ToggleParam::new(ToggleParam::OFF),
            side_chain: Compressor::new(2),
            high_pass,
            combs: (0..COMB_FILTERS).map(|_| CombCore::new()).collect(),
            high_passed: vec![Vec::new(); 2],
            wet_buffer: vec![Vec::new(); 2],
            sample_rate: crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE,
        };

        reverb.side_chain.threshold.set_value(0.0);
        reverb
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.sample_rate = sample_rate;
        self.room_reflectivity.set_sample_rate(sample_rate);
        self.damping_frequency.set_sample_rate(sample_rate);
        self.damping_gain.set_sample_rate(sample_rate);
        self.width.set_sample_rate(sample_rate);
        self.high_pass_frequency.set_sample_rate(sample_rate);
        self.distortion_level.set_sample_rate(sample_rate);
        self.wet.set_sample_rate(sample_rate);
        self.dry.set_sample_rate(sample_rate);
        self.high_pass.set_sample_rate(sample_rate);
        self.side_chain.set_sample_rate(sample_rate);

        for comb in self.combs.iter_mut() {
            comb.configure(COMB_DELAY_MAX, sample_rate);
        }
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.room_reflectivity.set_block_size(block_size);
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

    pub fn reset(&mut self) {
        self.room_reflectivity.reset();
        self.damping_frequency.reset();
        self.damping_gain.reset();
        self.width.reset();
        self.high_pass_frequency.reset();
        self.distortion_level.reset();
        self.wet.reset();
        self.dry.reset();
        self.high_pass.reset();
        self.side_chain.reset();

        for comb in self.combs.iter_mut() {
            comb.reset();
        }
    }

    fn is_bypassed(&mut self, round: u64, sample_count: usize) -> bool {
        self.wet.is_constant_in_next_round(round, sample_count)
            && self.dry.is_constant_in_next_round(round, sample_count)
            && self.wet.get_value() < 0.000001
            && (self.dry.get_value() - 1.0).abs() < 0.000001
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

        let tunings = &TUNINGS[self.reverb_type.get_value() as usize];

        let reflectivity = self.room_reflectivity.get_value();
        let width = self.width.get_value();
        let distortion_level = self.distortion_level.get_value();

        self.room_reflectivity.skip_round(round, sample_count);
        self.width.skip_round(round, sample_count);
        self.distortion_level.skip_round(round, sample_count);

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

        for channel in 0..2 {
            self.wet_buffer[channel][..sample_count].fill(0.0);
        }

        for (index, (comb, tuning)) in self.combs.iter_mut().zip(tunings.iter()).enumerate() {
            let delay_samples = (tuning.delay_time * self.sample_rate).max(1.0);
            let weight = (tuning.weight * WET_SCALE as Number) as Sample;
            let (left_gain, right_gain) =
                pan_gains(width * tuning.panning_scale, index % 2 == 1);

            for i in 0..sample_count {
                let mono = 0.5 * (self.high_passed[0][i] + self.high_passed[1][i]);

                let delayed = comb.read(delay_samples);
                let damped = comb.damp(delayed, &damping);
                let colored = if distortion_level < 0.000001 {
                    damped
                } else {
                    shape_with(curve, distortion_level, damped)
                };

                comb.write(mono + reflectivity as Sample * colored);

                self.wet_buffer[0][i] += weight * left_gain * delayed;
                self.wet_buffer[1][i] += weight * right_gain * delayed;
            }
        }

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

impl Default for Reverb {
    fn default() -> Self {
        Self::new()
    }
}
