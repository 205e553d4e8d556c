//! Low-frequency oscillators
//!
//! An LFO runs a wavetable oscillator at control frequencies and shapes
//! the raw waveform into [0, 1]: optional deterministic randomization,
//! optional tanh distortion, then a min/max/amount range mapping. Centered
//! mode applies the shaping symmetrically around the midpoint of the range
//! so distortion does not push the average value off center. Stepped
//! sample&hold-style output falls out of full randomness over a square
//! waveform. Tempo sync scales the frequency by bpm / 60.
//!
//! Target parameters consume the rendered [0, 1] buffer through the same
//! modulator routing as any other signal producer.

use crate::dsp::oscillator::Waveform;
use crate::dsp::param::{FloatParamS, ToggleParam};
use crate::dsp::signal_producer::{produce, ProducerState, SignalProducer};
use crate::dsp::wavetable::STANDARD_WAVEFORMS;
use crate::dsp::param::ByteParam;
use crate::math;
use crate::{Number, Sample};

pub const LFOS: usize = 8;

pub const FREQUENCY_MIN: Number = 0.01;
pub const FREQUENCY_MAX: Number = 30.0;
pub const FREQUENCY_DEFAULT: Number = 1.0;

pub struct Lfo {
    state: ProducerState,
    pub waveform: ByteParam,
    pub frequency: FloatParamS,
    pub phase: FloatParamS,
    pub min: FloatParamS,
    pub max: FloatParamS,
    pub amount: FloatParamS,
    pub distortion: FloatParamS,
    pub randomness: FloatParamS,
    pub tempo_sync: ToggleParam,
    pub center: ToggleParam,
    pub freq_log_scale: ToggleParam,
    phase_accumulator: Number,
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new()
    }
}

impl Lfo {
    pub fn new() -> Self {
        Self {
            state: ProducerState::new(1),
            waveform: ByteParam::new(0, crate::dsp::oscillator::WAVEFORMS - 1, 0),
            frequency: FloatParamS::new(FREQUENCY_MIN, FREQUENCY_MAX, FREQUENCY_DEFAULT),
            phase: FloatParamS::new(0.0, 1.0, 0.0),
            min: FloatParamS::new(0.0, 1.0, 0.0),
            max: FloatParamS::new(0.0, 1.0, 1.0),
            amount: FloatParamS::new(0.0, 1.0, 1.0),
            distortion: FloatParamS::new(0.0, 1.0, 0.0),
            randomness: FloatParamS::new(0.0, 1.0, 0.0),
            tempo_sync: ToggleParam::new(ToggleParam::OFF),
            center: ToggleParam::new(ToggleParam::OFF),
            freq_log_scale: ToggleParam::new(ToggleParam::OFF),
            phase_accumulator: 0.0,
        }
    }

    /// Keep the frequency param's ratio mapping in line with the log-scale
    /// toggle; called by the synth when the toggle changes.
    pub fn refresh_log_scale(&mut self) {
        self.frequency.set_logarithmic(self.freq_log_scale.is_on());
    }
}

impl SignalProducer for Lfo {
    fn state(&self) -> &ProducerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProducerState {
        &mut self.state
    }

    fn initialize_rendering(&mut self, round: u64, sample_count: usize) {
        produce(&mut self.frequency, round, sample_count);
        produce(&mut self.phase, round, sample_count);
        produce(&mut self.min, round, sample_count);
        produce(&mut self.max, round, sample_count);
        produce(&mut self.amount, round, sample_count);
        produce(&mut self.distortion, round, sample_count);
        produce(&mut self.randomness, round, sample_count);
    }

    fn render(&mut self, _round: u64, first: usize, last: usize) {
        let sample_rate = self.state.sample_rate();
        let nyquist = self.state.nyquist_frequency();
        let frequency_scale = if self.tempo_sync.is_on() {
            self.state.bpm() / 60.0
        } else {
            1.0
        };
        let is_centered = self.center.is_on();
        let waveform = Waveform::from_byte(self.waveform.get_value());

        let wavetable = match waveform {
            Waveform::Sine | Waveform::Custom => &STANDARD_WAVEFORMS.sine,
            Waveform::Sawtooth => &STANDARD_WAVEFORMS.sawtooth,
            Waveform::SoftSawtooth => &STANDARD_WAVEFORMS.soft_sawtooth,
            Waveform::InverseSawtooth => &STANDARD_WAVEFORMS.inverse_sawtooth,
            Waveform::SoftInverseSawtooth => &STANDARD_WAVEFORMS.soft_inverse_sawtooth,
            Waveform::Triangle => &STANDARD_WAVEFORMS.triangle,
            Waveform::SoftTriangle => &STANDARD_WAVEFORMS.soft_triangle,
            Waveform::Square => &STANDARD_WAVEFORMS.square,
            Waveform::SoftSquare => &STANDARD_WAVEFORMS.soft_square,
        };

        let frequency_buffer = &self.frequency.state().buffer()[0];
        let phase_buffer = &self.phase.state().buffer()[0];
        let min_buffer = &self.min.state().buffer()[0];
        let max_buffer = &self.max.state().buffer()[0];
        let amount_buffer = &self.amount.state().buffer()[0];
        let distortion_buffer = &self.distortion.state().buffer()[0];
        let randomness_buffer = &self.randomness.state().buffer()[0];

        let mut phase_accumulator = self.phase_accumulator;
        let out = &mut self.state.buffer_mut()[0];

        for i in first..last {
            let frequency = frequency_buffer[i] as Number * frequency_scale;
            let phase_offset = phase_buffer[i] as Number;
            let min = min_buffer[i] as Number;
            let max = max_buffer[i] as Number;
            let amount = amount_buffer[i] as Number;
            let distortion = distortion_buffer[i] as Number;
            let randomness = randomness_buffer[i] as Number;

            // Control-rate band-limiting is a non-issue; read the table at
            // full resolution.
            let raw = wavetable.lookup(phase_accumulator + phase_offset, frequency, nyquist)
                as Number;
            let unipolar = 0.5 * (raw + 1.0);

            let value = if is_centered {
                let midpoint = 0.5 * (min + max);
                let shaped = math::distort_centered(
                    distortion,
                    math::randomize_centered(randomness, unipolar - 0.5),
                );

                midpoint + amount * shaped * (max - min)
            } else {
                let shaped = math::distort(distortion, math::randomize(randomness, unipolar));

                min + amount * shaped * (max - min)
            };

            out[i] = value.clamp(0.0, 1.0) as Sample;

            phase_accumulator += frequency / sample_rate;

            if phase_accumulator >= 1.0 {
                phase_accumulator -= phase_accumulator.floor();
            }
        }

        self.phase_accumulator = phase_accumulator;
    }

    fn set_sample_rate(&mut self, sample_rate: crate::Frequency) {
        self.state.set_sample_rate(sample_rate);
        self.frequency.set_sample_rate(sample_rate);
        self.phase.set_sample_rate(sample_rate);
        self.min.set_sample_rate(sample_rate);
        self.max.set_sample_rate(sample_rate);
        self.amount.set_sample_rate(sample_rate);
        self.distortion.set_sample_rate(sample_rate);
        self.randomness.set_sample_rate(sample_rate);
    }

    fn set_block_size(&mut self, block_size: usize) {
        self.state.set_block_size(block_size);
        self.frequency.set_block_size(block_size);
        self.phase.set_block_size(block_size);
        self.min.set_block_size(block_size);
        self.max.set_block_size(block_size);
        self.amount.set_block_size(block_size);
        self.distortion.set_block_size(block_size);
        self.randomness.set_block_size(block_size);
    }

    fn set_bpm(&mut self, bpm: Number) {
        self.state.set_bpm(bpm);
    }

    fn reset(&mut self) {
        self.state.reset();
        self.frequency.reset();
        self.phase.reset();
        self.min.reset();
        self.max.reset();
        self.amount.reset();
        self.distortion.reset();
        self.randomness.reset();
        self.phase_accumulator = 0.0;
    }
}
