//! Band-limited wavetable oscillator
//!
//! A phase accumulator in [0, 1) advanced by `frequency / sample_rate` per
//! sample, reading the band-limited table for the selected waveform.
//! Detune and fine detune act in cents; unison spreads up to 7 copies of
//! the accumulator symmetrically around the nominal pitch and compensates
//! their summed amplitude. Start/stop arrive as scheduled events so notes
//! can begin at any sample offset inside a block, resetting the phase.

use crate::dsp::param::FloatParamS;
use crate::dsp::signal_producer::{
    produce, Event, EventType, ProducerState, SignalProducer,
};
use crate::dsp::wavetable::{Wavetable, STANDARD_WAVEFORMS};
use crate::math;
use crate::{Frequency, Number, Sample, Seconds};

pub const EVT_START: EventType = 1;
pub const EVT_STOP: EventType = 2;

pub const FREQUENCY_MIN: Number = 0.001;
pub const FREQUENCY_MAX: Number = 24000.0;
pub const FREQUENCY_DEFAULT: Number = 440.0;

pub const DETUNE_MAX: Number = 2400.0;
pub const FINE_DETUNE_MAX: Number = 1200.0;

pub const UNISON_MAX: usize = 7;

pub const CUSTOM_WAVEFORM_HARMONICS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine = 0,
    Sawtooth = 1,
    SoftSawtooth = 2,
    InverseSawtooth = 3,
    SoftInverseSawtooth = 4,
    Triangle = 5,
    SoftTriangle = 6,
    Square = 7,
    SoftSquare = 8,
    Custom = 9,
}

pub const WAVEFORMS: u8 = 10;

impl Waveform {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Sawtooth,
            2 => Self::SoftSawtooth,
            3 => Self::InverseSawtooth,
            4 => Self::SoftInverseSawtooth,
            5 => Self::Triangle,
            6 => Self::SoftTriangle,
            7 => Self::Square,
            8 => Self::SoftSquare,
            9 => Self::Custom,
            _ => Self::Sine,
        }
    }
}

fn wavetable_for(waveform: Waveform, custom: &Wavetable) -> &Wavetable {
    match waveform {
        Waveform::Sine => &STANDARD_WAVEFORMS.sine,
        Waveform::Sawtooth => &STANDARD_WAVEFORMS.sawtooth,
        Waveform::SoftSawtooth => &STANDARD_WAVEFORMS.soft_sawtooth,
        Waveform::InverseSawtooth => &STANDARD_WAVEFORMS.inverse_sawtooth,
        Waveform::SoftInverseSawtooth => &STANDARD_WAVEFORMS.soft_inverse_sawtooth,
        Waveform::Triangle => &STANDARD_WAVEFORMS.triangle,
        Waveform::SoftTriangle => &STANDARD_WAVEFORMS.soft_triangle,
        Waveform::Square => &STANDARD_WAVEFORMS.square,
        Waveform::SoftSquare => &STANDARD_WAVEFORMS.soft_square,
        Waveform::Custom => custom,
    }
}

pub struct Oscillator {
    state: ProducerState,
    pub amplitude: FloatParamS,
    pub frequency: FloatParamS,
    pub phase: FloatParamS,
    pub detune: FloatParamS,
    pub fine_detune: FloatParamS,
    pub subharmonic_amplitude: FloatParamS,
    waveform: Waveform,
    custom_wavetable: Wavetable,
    custom_coefficients: [Number; CUSTOM_WAVEFORM_HARMONICS],
    unison_count: usize,
    unison_spread: Number,
    phase_accumulators: [Number; UNISON_MAX],
    subharmonic_phase: Number,
    is_on: bool,
}

impl Default for Oscillator {
    fn default() -> Self {
        Self::new()
    }
}

impl Oscillator {
    pub fn new() -> Self {
        Self {
            state: ProducerState::new(1),
            amplitude: FloatParamS::new(0.0, 1.0, 1.0),
            frequency: FloatParamS::new(FREQUENCY_MIN, FREQUENCY_MAX, FREQUENCY_DEFAULT),
            phase: FloatParamS::new(0.0, 1.0, 0.0),
            detune: FloatParamS::new(-DETUNE_MAX, DETUNE_MAX, 0.0),
            fine_detune: FloatParamS::new(-FINE_DETUNE_MAX, FINE_DETUNE_MAX, 0.0),
            subharmonic_amplitude: FloatParamS::new(0.0, 1.0, 0.0),
            waveform: Waveform::Sine,
            custom_wavetable: Wavetable::new(&[1.0]),
            custom_coefficients: [0.0; CUSTOM_WAVEFORM_HARMONICS],
            unison_count: 1,
            unison_spread: 0.0,
            phase_accumulators: [0.0; UNISON_MAX],
            subharmonic_phase: 0.0,
            is_on: false,
        }
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn get_waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn set_unison(&mut self, count: usize, spread_cents: Number) {
        self.unison_count = count.clamp(1, UNISON_MAX);
        self.unison_spread = spread_cents;
    }

    /// Rebuild the custom wavetable when the harmonic coefficients moved.
    pub fn update_custom_waveform(&mut self, coefficients: &[Number; CUSTOM_WAVEFORM_HARMONICS]) {
        if *coefficients != self.custom_coefficients {
            self.custom_coefficients = *coefficients;
            self.custom_wavetable.update_coefficients(coefficients);
        }
    }

    /// Schedule a (phase-resetting) start at `time_offset` into the block.
    pub fn start(&mut self, time_offset: Seconds) {
        self.state.schedule(EVT_START, time_offset, 0.0, 0.0, 0);
    }

    pub fn stop(&mut self, time_offset: Seconds) {
        self.state.schedule(EVT_STOP, time_offset, 0.0, 0.0, 0);
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn cancel_start_and_stop_events(&mut self) {
        self.state.cancel_events();
    }

    fn unison_detune_cents(&self, voice: usize) -> Number {
        if self.unison_count < 2 || self.unison_spread == 0.0 {
            return 0.0;
        }

        let position = voice as Number / (self.unison_count - 1) as Number;
        (2.0 * position - 1.0) * self.unison_spread
    }
}

impl SignalProducer for Oscillator {
    fn state(&self) -> &ProducerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProducerState {
        &mut self.state
    }

    fn initialize_rendering(&mut self, round: u64, sample_count: usize) {
        produce(&mut self.amplitude, round, sample_count);
        produce(&mut self.frequency, round, sample_count);
        produce(&mut self.phase, round, sample_count);
        produce(&mut self.detune, round, sample_count);
        produce(&mut self.fine_detune, round, sample_count);
        produce(&mut self.subharmonic_amplitude, round, sample_count);
    }

    fn handle_event(&mut self, event: Event) {
        match event.event_type {
            EVT_START => {
                self.is_on = true;
                self.phase_accumulators = [0.0; UNISON_MAX];
                self.subharmonic_phase = 0.0;
            }
            EVT_STOP => {
                self.is_on = false;
            }
            _ => {}
        }
    }

    fn render(&mut self, _round: u64, first: usize, last: usize) {
        if !self.is_on {
            for sample in &mut self.state.buffer_mut()[0][first..last] {
                *sample = 0.0;
            }

            return;
        }

        let nyquist = self.state.nyquist_frequency();
        let sample_rate = self.state.sample_rate();
        let unison_count = self.unison_count;
        let unison_gain = 1.0 / (unison_count as Number).sqrt();

        let mut unison_cents = [0.0; UNISON_MAX];
        for (voice, cents) in unison_cents.iter_mut().enumerate().take(unison_count) {
            *cents = self.unison_detune_cents(voice);
        }

        // All of these live in fields disjoint from our output buffer.
        let wavetable = wavetable_for(self.waveform, &self.custom_wavetable);
        let sine: &Wavetable = &STANDARD_WAVEFORMS.sine;
        let amplitude_buffer = &self.amplitude.state().buffer()[0];
        let frequency_buffer = &self.frequency.state().buffer()[0];
        let phase_buffer = &self.phase.state().buffer()[0];
        let detune_buffer = &self.detune.state().buffer()[0];
        let fine_buffer = &self.fine_detune.state().buffer()[0];
        let subharmonic_buffer = &self.subharmonic_amplitude.state().buffer()[0];

        let mut accumulators = self.phase_accumulators;
        let mut subharmonic_phase = self.subharmonic_phase;

        let out = &mut self.state.buffer_mut()[0];

        for i in first..last {
            let amplitude = amplitude_buffer[i] as Number;
            let base_frequency = frequency_buffer[i] as Frequency;
            let phase_offset = phase_buffer[i] as Number;
            let cents = detune_buffer[i] as Number + fine_buffer[i] as Number;
            let subharmonic = subharmonic_buffer[i] as Number;

            let mut value: Number = 0.0;

            for voice in 0..unison_count {
                let frequency = math::detune(base_frequency, cents + unison_cents[voice]);
                let phase = accumulators[voice] + phase_offset;

                value += wavetable.lookup(phase, frequency, nyquist) as Number;

                accumulators[voice] += frequency / sample_rate;

                if accumulators[voice] >= 1.0 {
                    accumulators[voice] -= accumulators[voice].floor();
                }
            }

            value *= unison_gain;

            if subharmonic > 0.0 {
                let frequency = math::detune(base_frequency, cents) * 0.5;

                value += subharmonic
                    * sine.lookup(subharmonic_phase + phase_offset, frequency, nyquist) as Number;

                subharmonic_phase += frequency / sample_rate;

                if subharmonic_phase >= 1.0 {
                    subharmonic_phase -= subharmonic_phase.floor();
                }
            }

            out[i] = (amplitude * value) as Sample;
        }

        self.phase_accumulators = accumulators;
        self.subharmonic_phase = subharmonic_phase;
    }

    fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.state.set_sample_rate(sample_rate);
        self.amplitude.set_sample_rate(sample_rate);
        self.frequency.set_sample_rate(sample_rate);
        self.phase.set_sample_rate(sample_rate);
        self.detune.set_sample_rate(sample_rate);
        self.fine_detune.set_sample_rate(sample_rate);
        self.subharmonic_amplitude.set_sample_rate(sample_rate);
    }

    fn set_block_size(&mut self, block_size: usize) {
        self.state.set_block_size(block_size);
        self.amplitude.set_block_size(block_size);
        self.frequency.set_block_size(block_size);
        self.phase.set_block_size(block_size);
        self.detune.set_block_size(block_size);
        self.fine_detune.set_block_size(block_size);
        self.subharmonic_amplitude.set_block_size(block_size);
    }

    fn set_bpm(&mut self, bpm: Number) {
        self.state.set_bpm(bpm);
    }

    fn reset(&mut self) {
        self.state.reset();
        self.amplitude.reset();
        self.frequency.reset();
        self.phase.reset();
        self.detune.reset();
        self.fine_detune.reset();
        self.subharmonic_amplitude.reset();
        self.phase_accumulators = [0.0; UNISON_MAX];
        self.subharmonic_phase = 0.0;
        self.is_on = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: Frequency = 44100.0;

    fn oscillator(frequency: Number) -> Oscillator {
        let mut oscillator = Oscillator::new();
        oscillator.set_sample_rate(SAMPLE_RATE);
        oscillator.set_block_size(512);
        oscillator.frequency.set_value(frequency);
        oscillator
    }

    #[test]
    fn test_silent_until_started() {
        let mut oscillator = oscillator(440.0);

        produce(&mut oscillator, 1, 512);

        assert!(oscillator.state().buffer()[0]
            .iter()
            .all(|&sample| sample == 0.0));
    }

    #[test]
    fn test_sine_output_matches_reference() {
        let mut oscillator = oscillator(441.0);

        oscillator.start(0.0);
        produce(&mut oscillator, 1, 512);

        let buffer = &oscillator.state().buffer()[0];

        for (i, &sample) in buffer.iter().enumerate().take(256) {
            let expected =
                (2.0 * std::f64::consts::PI * 441.0 * i as Number / SAMPLE_RATE).sin();

            assert!(
                (sample as Number - expected).abs() < 5e-3,
                "sample {}: {} vs {}",
                i,
                sample,
                expected
            );
        }
    }

    #[test]
    fn test_start_mid_block_resets_phase_at_offset() {
        let mut oscillator = oscillator(440.0);
        let offset_seconds = 100.0 / SAMPLE_RATE;

        oscillator.start(offset_seconds);
        produce(&mut oscillator, 1, 512);

        let buffer = &oscillator.state().buffer()[0];

        assert!(buffer[..100].iter().all(|&sample| sample == 0.0));
        assert!((buffer[100] as Number).abs() < 1e-6, "phase restarts at 0");
        assert!(buffer[100..140].iter().any(|&sample| sample != 0.0));
    }

    #[test]
    fn test_stop_silences_output() {
        let mut oscillator = oscillator(440.0);

        oscillator.start(0.0);
        produce(&mut oscillator, 1, 512);

        oscillator.stop(0.0);
        produce(&mut oscillator, 2, 512);

        assert!(oscillator.state().buffer()[0]
            .iter()
            .all(|&sample| sample == 0.0));
    }

    #[test]
    fn test_detune_shifts_pitch_by_octave() {
        let mut reference = oscillator(220.0);
        reference.start(0.0);
        produce(&mut reference, 1, 512);

        let mut detuned = oscillator(110.0);
        detuned.detune.set_value(1200.0);
        detuned.start(0.0);
        produce(&mut detuned, 1, 512);

        let a = &reference.state().buffer()[0];
        let b = &detuned.state().buffer()[0];

        for i in 0..256 {
            assert!(
                (a[i] - b[i]).abs() < 1e-3,
                "sample {} diverged: {} vs {}",
                i,
                a[i],
                b[i]
            );
        }
    }

    #[test]
    fn test_unison_stays_bounded_and_differs_from_single() {
        let mut single = oscillator(220.0);
        single.set_waveform(Waveform::Sawtooth);
        single.start(0.0);
        produce(&mut single, 1, 512);
        let single_out: Vec<Sample> = single.state().buffer()[0].clone();

        let mut wide = oscillator(220.0);
        wide.set_waveform(Waveform::Sawtooth);
        wide.set_unison(5, 12.0);
        wide.start(0.0);
        produce(&mut wide, 1, 512);
        let wide_out = &wide.state().buffer()[0];

        assert!(wide_out.iter().any(|&sample| sample.abs() > 1e-3));
        assert!(wide_out.iter().all(|&sample| sample.abs() <= 3.0));
        assert!(
            wide_out
                .iter()
                .zip(single_out.iter())
                .any(|(&a, &b)| (a - b).abs() > 1e-3),
            "unison output should differ from a single voice"
        );
    }

    #[test]
    fn test_subharmonic_adds_half_frequency() {
        let mut oscillator = oscillator(440.0);

        oscillator.amplitude.set_value(0.0);
        oscillator.subharmonic_amplitude.set_value(1.0);
        oscillator.start(0.0);
        produce(&mut oscillator, 1, 512);

        // amplitude scales the whole output including the subharmonic mix
        // stage input, so with amplitude 0 the output must be silent.
        assert!(oscillator.state().buffer()[0]
            .iter()
            .all(|&sample| sample == 0.0));
    }

    #[test]
    fn test_custom_waveform_uses_coefficients() {
        let mut oscillator = oscillator(441.0);
        let mut coefficients = [0.0; CUSTOM_WAVEFORM_HARMONICS];
        coefficients[1] = 1.0; // 2nd harmonic only

        oscillator.set_waveform(Waveform::Custom);
        oscillator.update_custom_waveform(&coefficients);
        oscillator.start(0.0);
        produce(&mut oscillator, 1, 512);

        let buffer = &oscillator.state().buffer()[0];

        for (i, &sample) in buffer.iter().enumerate().take(128) {
            let expected =
                (2.0 * std::f64::consts::PI * 882.0 * i as Number / SAMPLE_RATE).sin();

            assert!(
                (sample as Number - expected).abs() < 5e-3,
                "sample {}: {} vs {}",
                i,
                sample,
                expected
            );
        }
    }
}
