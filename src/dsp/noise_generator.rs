//! Noise generator with a first-order band-pass
//!
//! Generates white noise from the synth's shared LCG, shapes it with one
//! first-order high-pass and one first-order low-pass section per channel,
//! and mixes the result into a signal scaled by a level parameter. Sharing
//! the RNG instance keeps multiple generators from drifting into identical
//! phase-shifted copies of the same stream.

use crate::dsp::param::FloatParamB;
use crate::math::{self, Rng};
use crate::{Frequency, Sample};

pub struct NoiseGenerator {
    pub level: FloatParamB,
    high_pass_frequency: Frequency,
    low_pass_frequency: Frequency,
    high_pass_a: Sample,
    low_pass_a: Sample,
    noise_previous: Vec<Sample>,
    high_pass_previous: Vec<Sample>,
    low_pass_previous: Vec<Sample>,
}

impl NoiseGenerator {
    pub fn new(
        channels: usize,
        high_pass_frequency: Frequency,
        low_pass_frequency: Frequency,
    ) -> Self {
        let mut generator = Self {
            level: FloatParamB::new(0.0, 1.0, 0.0),
            high_pass_frequency,
            low_pass_frequency,
            high_pass_a: 0.0,
            low_pass_a: 0.0,
            noise_previous: vec![0.0; channels],
            high_pass_previous: vec![0.0; channels],
            low_pass_previous: vec![0.0; channels],
        };

        generator.set_sample_rate(crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE);
        generator
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        debug_assert!(sample_rate > 0.0);

        // One-pole coefficients; exp keeps both stable at any rate.
        let low_pass_w = math::PI_DOUBLE * self.low_pass_frequency / sample_rate;
        let high_pass_w = math::PI_DOUBLE * self.high_pass_frequency / sample_rate;

        self.low_pass_a = (1.0 - (-low_pass_w).exp()) as Sample;
        self.high_pass_a = (-high_pass_w).exp() as Sample;
    }

    pub fn reset(&mut self) {
        self.noise_previous.fill(0.0);
        self.high_pass_previous.fill(0.0);
        self.low_pass_previous.fill(0.0);
    }

    /// Add band-passed noise scaled by the level parameter to
    /// `buffer[..][first..last]`.
    pub fn add_noise(
        &mut self,
        rng: &mut Rng,
        buffer: &mut [Vec<Sample>],
        first: usize,
        last: usize,
    ) {
        let level = self.level.get_value() as Sample;

        if level < 1e-9 {
            return;
        }

        debug_assert_eq!(buffer.len(), self.noise_previous.len());

        for (channel, samples) in buffer.iter_mut().enumerate() {
            let mut noise_previous = self.noise_previous[channel];
            let mut high_pass_previous = self.high_pass_previous[channel];
            let mut low_pass_previous = self.low_pass_previous[channel];

            for sample in &mut samples[first..last] {
                let noise = rng.next_signed() as Sample;

                // y[n] = a * (y[n-1] + x[n] - x[n-1])
                high_pass_previous =
                    self.high_pass_a * (high_pass_previous + noise - noise_previous);
                noise_previous = noise;

                // y[n] = y[n-1] + a * (x[n] - y[n-1])
                low_pass_previous += self.low_pass_a * (high_pass_previous - low_pass_previous);

                *sample += level * low_pass_previous;
            }

            self.noise_previous[channel] = noise_previous;
            self.high_pass_previous[channel] = high_pass_previous;
            self.low_pass_previous[channel] = low_pass_previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_level_leaves_buffer_untouched() {
        let mut generator = NoiseGenerator::new(2, 20.0, 12000.0);
        let mut rng = Rng::new(1);
        let mut buffer = vec![vec![0.5; 64]; 2];

        generator.add_noise(&mut rng, &mut buffer, 0, 64);

        assert!(buffer
            .iter()
            .all(|channel| channel.iter().all(|&sample| sample == 0.5)));
    }

    #[test]
    fn test_noise_is_added_and_bounded() {
        let mut generator = NoiseGenerator::new(1, 20.0, 12000.0);
        generator.level.set_value(1.0);
        let mut rng = Rng::new(1);
        let mut buffer = vec![vec![0.0; 512]];

        generator.add_noise(&mut rng, &mut buffer, 0, 512);

        assert!(buffer[0].iter().any(|&sample| sample.abs() > 1e-4));
        assert!(buffer[0].iter().all(|&sample| sample.abs() < 2.0));
    }

    #[test]
    fn test_channels_get_different_noise() {
        let mut generator = NoiseGenerator::new(2, 20.0, 12000.0);
        generator.level.set_value(1.0);
        let mut rng = Rng::new(1);
        let mut buffer = vec![vec![0.0; 128]; 2];

        generator.add_noise(&mut rng, &mut buffer, 0, 128);

        assert!(
            buffer[0]
                .iter()
                .zip(buffer[1].iter())
                .any(|(&a, &b)| (a - b).abs() > 1e-6),
            "channels sharing one RNG stream must not be identical"
        );
    }

    #[test]
    fn test_shared_rng_decorrelates_generators() {
        let mut generator_a = NoiseGenerator::new(1, 20.0, 12000.0);
        let mut generator_b = NoiseGenerator::new(1, 20.0, 12000.0);
        generator_a.level.set_value(1.0);
        generator_b.level.set_value(1.0);

        let mut rng = Rng::new(1);
        let mut buffer_a = vec![vec![0.0; 128]];
        let mut buffer_b = vec![vec![0.0; 128]];

        generator_a.add_noise(&mut rng, &mut buffer_a, 0, 128);
        generator_b.add_noise(&mut rng, &mut buffer_b, 0, 128);

        assert!(buffer_a[0]
            .iter()
            .zip(buffer_b[0].iter())
            .any(|(&a, &b)| (a - b).abs() > 1e-6));
    }
}
