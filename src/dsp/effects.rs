//! The effects chain
//!
//! Fixed stage order: volume 1 -> overdrive -> distortion -> filter 1 ->
//! filter 2 -> volume 2 -> tape (pre) -> chorus -> echo -> reverb ->
//! tape (post) -> volume 3. The chain works in place on one stereo
//! buffer; wet/dry stages blend their wet signal into it and skip all
//! work when fully dry.

use crate::dsp::biquad_filter::{BiquadFilter, TYPE_HIGH_PASS, TYPE_LOW_PASS};
use crate::dsp::chorus::Chorus;
use crate::dsp::distortion::{Distortion, TYPE_TANH_10, TYPE_TANH_3};
use crate::dsp::echo::Echo;
use crate::dsp::gain::Gain;
use crate::dsp::param::{FloatParamS, ToggleParam};
use crate::dsp::reverb::Reverb;
use crate::dsp::signal_producer::{produce, SignalProducer};
use crate::dsp::tape::{TapeParams, TapeStage};
use crate::math::Rng;
use crate::{Frequency, Number, Sample};

pub const CHANNELS: usize = 2;

pub struct Effects {
    pub volume_1: Gain,
    pub overdrive: Distortion,
    pub distortion: Distortion,
    pub filter_1: BiquadFilter,
    pub filter_1_log_scale: ToggleParam,
    pub filter_2: BiquadFilter,
    pub filter_2_log_scale: ToggleParam,
    pub volume_2: Gain,
    pub tape_params: TapeParams,
    pub tape_1: TapeStage,
    pub chorus: Chorus,
    pub echo: Echo,
    pub reverb: Reverb,
    pub tape_2: TapeStage,
    pub volume_3: Gain,
    buffer: Vec<Vec<Sample>>,
    bpm: Number,
}

impl Effects {
    pub fn new() -> Self {
        let mut effects = Self {
            volume_1: Gain::new(CHANNELS),
            overdrive: Distortion::new(CHANNELS, TYPE_TANH_3),
            distortion: Distortion::new(CHANNELS, TYPE_TANH_10),
            filter_1: BiquadFilter::new(CHANNELS, TYPE_LOW_PASS),
            filter_1_log_scale: ToggleParam::new(ToggleParam::OFF),
            filter_2: BiquadFilter::with_frequency_default(CHANNELS, TYPE_HIGH_PASS, 1.0),
            filter_2_log_scale: ToggleParam::new(ToggleParam::OFF),
            volume_2: Gain::new(CHANNELS),
            tape_params: TapeParams::new(),
            tape_1: TapeStage::new(false),
            chorus: Chorus::new(),
            echo: Echo::new(),
            reverb: Reverb::new(),
            tape_2: TapeStage::new(true),
            volume_3: Gain::new(CHANNELS),
            buffer: vec![
                vec![0.0; crate::dsp::signal_producer::DEFAULT_BLOCK_SIZE];
                CHANNELS
            ],
            bpm: crate::dsp::signal_producer::DEFAULT_BPM,
        };

        // Scratch buffers and delay rings exist from the start; a host
        // that never reconfigures still gets a working chain.
        effects.set_sample_rate(crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE);
        effects.set_block_size(crate::dsp::signal_producer::DEFAULT_BLOCK_SIZE);

        effects
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.volume_1.set_sample_rate(sample_rate);
        self.overdrive.set_sample_rate(sample_rate);
        self.distortion.set_sample_rate(sample_rate);
        self.filter_1.set_sample_rate(sample_rate);
        self.filter_2.set_sample_rate(sample_rate);
        self.volume_2.set_sample_rate(sample_rate);
        self.tape_params.set_sample_rate(sample_rate);
        self.tape_1.set_sample_rate(sample_rate);
        self.chorus.set_sample_rate(sample_rate);
        self.echo.set_sample_rate(sample_rate);
        self.reverb.set_sample_rate(sample_rate);
        self.tape_2.set_sample_rate(sample_rate);
        self.volume_3.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.volume_1.set_block_size(block_size);
        self.overdrive.set_block_size(block_size);
        self.distortion.set_block_size(block_size);
        self.filter_1.set_block_size(block_size);
        self.filter_2.set_block_size(block_size);
        self.volume_2.set_block_size(block_size);
        self.tape_params.set_block_size(block_size);
        self.tape_1.set_block_size(block_size);
        self.chorus.set_block_size(block_size);
        self.echo.set_block_size(block_size);
        self.reverb.set_block_size(block_size);
        self.tape_2.set_block_size(block_size);
        self.volume_3.set_block_size(block_size);

        for channel in self.buffer.iter_mut() {
            channel.clear();
            channel.resize(block_size, 0.0);
        }
    }

    pub fn set_bpm(&mut self, bpm: Number) {
        self.bpm = bpm;
        self.chorus.set_bpm(bpm);
        self.echo.set_bpm(bpm);
    }

    pub fn reset(&mut self) {
        self.volume_1.reset();
        self.overdrive.reset();
        self.distortion.reset();
        self.filter_1.reset();
        self.filter_2.reset();
        self.volume_2.reset();
        self.tape_params.reset();
        self.tape_1.reset();
        self.chorus.reset();
        self.echo.reset();
        self.reverb.reset();
        self.tape_2.reset();
        self.volume_3.reset();

        for channel in self.buffer.iter_mut() {
            channel.fill(0.0);
        }
    }

    /// Run the whole chain over `input`; the returned slice holds the
    /// processed block.
    pub fn process(
        &mut self,
        round: u64,
        input: &[Vec<Sample>],
        sample_count: usize,
        rng: &mut Rng,
    ) -> &[Vec<Sample>] {
        debug_assert_eq!(input.len(), CHANNELS);

        for (channel, samples) in self.buffer.iter_mut().enumerate() {
            samples[..sample_count].copy_from_slice(&input[channel][..sample_count]);
        }

        self.filter_1
            .set_log_scale(self.filter_1_log_scale.is_on());
        self.filter_2
            .set_log_scale(self.filter_2_log_scale.is_on());

        self.volume_1
            .process_in_place(round, &mut self.buffer, sample_count);
        self.overdrive
            .process_in_place(round, &mut self.buffer, sample_count);
        self.distortion
            .process_in_place(round, &mut self.buffer, sample_count);
        self.filter_1
            .process_in_place(round, &mut self.buffer, sample_count);
        self.filter_2
            .process_in_place(round, &mut self.buffer, sample_count);
        self.volume_2
            .process_in_place(round, &mut self.buffer, sample_count);
        self.tape_1
            .process(round, &mut self.tape_params, &mut self.buffer, sample_count, rng);
        self.chorus
            .process(round, &mut self.buffer, sample_count, self.bpm);
        self.echo.process(round, &mut self.buffer, sample_count);
        self.reverb.process(round, &mut self.buffer, sample_count);
        self.tape_2
            .process(round, &mut self.tape_params, &mut self.buffer, sample_count, rng);
        self.volume_3
            .process_in_place(round, &mut self.buffer, sample_count);

        &self.buffer
    }
}

impl Default for Effects {
    fn default() -> Self {
        Self::new()
    }
}

/// Blend a wet buffer into the in-place chain buffer:
/// `out = dry * out + wet * wet_signal`, sample-accurately.
pub fn mix_wet_dry(
    wet: &mut FloatParamS,
    dry: &mut FloatParamS,
    round: u64,
    wet_signal: &[Vec<Sample>],
    buffer: &mut [Vec<Sample>],
    sample_count: usize,
) {
    produce(wet, round, sample_count);
    produce(dry, round, sample_count);

    let wet_buffer = &wet.state().buffer()[0];
    let dry_buffer = &dry.state().buffer()[0];

    for (channel, samples) in buffer.iter_mut().enumerate() {
        for i in 0..sample_count {
            samples[i] = dry_buffer[i] * samples[i] + wet_buffer[i] * wet_signal[channel][i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effects() -> Effects {
        let mut effects = Effects::new();
        effects.set_sample_rate(44100.0);
        effects.set_block_size(256);
        effects
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
    fn test_default_chain_is_transparent() {
        let mut effects = effects();
        let mut rng = Rng::new(1);

        let input = sine_stereo(440.0, 256);
        let output = effects.process(1, &input, 256, &mut rng);

        for channel in 0..CHANNELS {
            for (a, b) in input[channel].iter().zip(output[channel].iter()) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_volume_stages_multiply() {
        let mut effects = effects();
        let mut rng = Rng::new(1);

        effects.volume_1.volume.set_value(0.5);
        effects.volume_3.volume.set_value(0.5);

        let input = vec![vec![1.0; 256], vec![1.0; 256]];
        let output = effects.process(1, &input, 256, &mut rng);

        assert!((output[0][128] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_filter_1_shapes_the_signal() {
        let mut effects = effects();
        let mut rng = Rng::new(1);

        effects.filter_1.frequency.set_value(500.0);

        let input = sine_stereo(8000.0, 256);
        let mut last = Vec::new();

        for round in 1..5u64 {
            last = effects.process(round, &input, 256, &mut rng)[0].to_vec();
        }

        let energy: Number = last.iter().map(|&x| (x as Number).powi(2)).sum();
        assert!(energy < 0.5, "8 kHz through a 500 Hz lowpass: {}", energy);
    }

    #[test]
    fn test_reverb_tail_rings_after_input_stops() {
        let mut effects = effects();
        let mut rng = Rng::new(1);

        effects.reverb.wet.set_value(0.5);

        let input = sine_stereo(440.0, 256);
        let silence = vec![vec![0.0; 256], vec![0.0; 256]];

        for round in 1..10u64 {
            effects.process(round, &input, 256, &mut rng);
        }

        let output = effects.process(10, &silence, 256, &mut rng);
        let energy: Number = output[0].iter().map(|&x| (x as Number).powi(2)).sum();

        assert!(energy > 1e-9, "tail energy = {}", energy);
    }
}
