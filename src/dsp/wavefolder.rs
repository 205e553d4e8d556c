//! Sine wavefolder
//!
//! Folds the signal back on itself by driving it through a sine shaper;
//! the folding parameter both raises the drive and blends the folded
//! signal in, so at zero the stage is a strict passthrough (and skips all
//! work below a small threshold).

use crate::dsp::param::FloatParamS;
use crate::dsp::signal_producer::SignalProducer;
use crate::math;
use crate::{Number, Sample};

pub const FOLDING_MAX: Number = 1.0;

/// Below this level the folder does not touch the signal at all.
const BYPASS_THRESHOLD: Number = 0.000001;

/// Extra drive at full folding; a full-scale input then traverses two
/// whole folds of the sine shaper.
const DRIVE_MAX: Number = 3.0;

pub struct Wavefolder {
    pub folding: FloatParamS,
    channels: usize,
}

impl Wavefolder {
    pub fn new(channels: usize) -> Self {
        Self {
            folding: FloatParamS::new(0.0, FOLDING_MAX, 0.0),
            channels,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: crate::Frequency) {
        self.folding.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.folding.set_block_size(block_size);
    }

    pub fn reset(&mut self) {
        self.folding.reset();
    }

    pub fn process_in_place(
        &mut self,
        round: u64,
        buffer: &mut [Vec<Sample>],
        sample_count: usize,
    ) {
        debug_assert_eq!(buffer.len(), self.channels);

        let folding_value = self.folding.get_value();
        let folding_buffer = self.folding.produce_if_not_constant(round, sample_count);

        if folding_buffer.is_none() && folding_value < BYPASS_THRESHOLD {
            return;
        }

        for samples in buffer.iter_mut() {
            for (i, sample) in samples[..sample_count].iter_mut().enumerate() {
                let folding = match folding_buffer {
                    Some(buffer) => buffer[i] as Number,
                    None => folding_value,
                };

                if folding < BYPASS_THRESHOLD {
                    continue;
                }

                let x = *sample as Number;
                let drive = 1.0 + folding * DRIVE_MAX;
                let folded = math::sin(math::PI_HALF * drive * x);

                *sample = math::combine(folding, folded, x) as Sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_folding_is_passthrough() {
        let mut folder = Wavefolder::new(1);
        folder.set_block_size(256);

        let original: Vec<Sample> = (0..256).map(|i| (i as Sample / 128.0) - 1.0).collect();
        let mut buffer = vec![original.clone()];

        folder.process_in_place(1, &mut buffer, 256);

        assert_eq!(buffer[0], original);
    }

    #[test]
    fn test_full_folding_folds_peaks_back() {
        let mut folder = Wavefolder::new(1);
        folder.set_block_size(4);
        folder.folding.set_value(1.0);

        // At drive 4, a full-scale input lands on sin(2*pi) = 0, far from
        // the clean value.
        let mut buffer = vec![vec![0.0, 0.25, 0.5, 1.0]];
        folder.process_in_place(1, &mut buffer, 4);

        assert!(buffer[0][0].abs() < 1e-6, "zero stays zero");
        assert!(
            (buffer[0][3] as Number - 1.0).abs() > 0.5,
            "full-scale input folds away from 1.0, got {}",
            buffer[0][3]
        );
    }

    #[test]
    fn test_output_bounded_at_any_folding() {
        let mut folder = Wavefolder::new(1);
        folder.set_block_size(512);
        folder.folding.set_value(0.7);

        let mut buffer =
            vec![(0..512).map(|i| ((i as Sample) / 256.0) - 1.0).collect::<Vec<_>>()];
        folder.process_in_place(1, &mut buffer, 512);

        assert!(buffer[0].iter().all(|&sample| sample.abs() <= 1.001));
    }
}
