//! Gain stage
//!
//! Multiplies a signal by a sample-accurate volume parameter. Used for
//! the three volume stages of the effects chain and anywhere a signal
//! needs a controllable level in front of another stage.

use crate::dsp::param::FloatParamS;
use crate::dsp::signal_producer::SignalProducer;
use crate::{Number, Sample};

pub const VOLUME_MIN: Number = 0.0;
pub const VOLUME_MAX: Number = 2.0;
pub const VOLUME_DEFAULT: Number = 1.0;

pub struct Gain {
    pub volume: FloatParamS,
    channels: usize,
}

impl Gain {
    pub fn new(channels: usize) -> Self {
        Self {
            volume: FloatParamS::new(VOLUME_MIN, VOLUME_MAX, VOLUME_DEFAULT),
            channels,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: crate::Frequency) {
        self.volume.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.volume.set_block_size(block_size);
    }

    pub fn reset(&mut self) {
        self.volume.reset();
    }

    pub fn process_in_place(
        &mut self,
        round: u64,
        buffer: &mut [Vec<Sample>],
        sample_count: usize,
    ) {
        debug_assert_eq!(buffer.len(), self.channels);

        match self.volume.produce_if_not_constant(round, sample_count) {
            Some(volume_buffer) => {
                for samples in buffer.iter_mut() {
                    for (sample, &volume) in
                        samples[..sample_count].iter_mut().zip(volume_buffer.iter())
                    {
                        *sample *= volume;
                    }
                }
            }
            None => {
                let volume = self.volume.get_value() as Sample;

                if (volume - 1.0).abs() < 1e-9 {
                    return;
                }

                for samples in buffer.iter_mut() {
                    for sample in samples[..sample_count].iter_mut() {
                        *sample *= volume;
                    }
                }
            }
        }
    }
}
