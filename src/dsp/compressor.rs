//! Dynamics processing: compressor / expander with side-chain input
//!
//! A peak tracker (fast attack, 15 ms linear ring-down) follows the
//! side-chain signal; the tracked peak drives a gain parameter through
//! attack/release ramps. The gain response works in the dB domain: above
//! the threshold a compressor reduces by `overshoot / ratio` dB (an
//! expander does the same below the threshold). The knee is either a hard
//! corner or a C1-continuous quadratic rounded over a fixed +/-3 dB
//! window. Makeup gain is applied after the curve.
//!
//! The side-chain variant simply reads its peak from a different signal
//! than the one it scales; the echo and reverb compress their wet signal
//! keyed by their dry input.

use crate::dsp::param::{ByteParam, FloatParamB, FloatParamS};
use crate::dsp::peak_tracker::PeakTracker;
use crate::dsp::signal_producer::{find_peak, SignalProducer};
use crate::math;
use crate::{Number, Sample, Seconds};

pub const MODE_COMPRESSOR: u8 = 0;
pub const MODE_EXPANDER: u8 = 1;

pub const CURVE_LINEAR: u8 = 0;
pub const CURVE_SMOOTH: u8 = 1;

pub const THRESHOLD_MIN: Number = -60.0;
pub const THRESHOLD_MAX: Number = 0.0;
pub const THRESHOLD_DEFAULT: Number = -18.0;

pub const RATIO_MIN: Number = 1.0;
pub const RATIO_MAX: Number = 120.0;
pub const RATIO_DEFAULT: Number = 4.0;

/// Full knee width in dB (+/-3 dB around the threshold).
const KNEE_WIDTH: Number = 6.0;

/// The expander never reduces more than this.
const GAIN_REDUCTION_FLOOR_DB: Number = -60.0;

pub struct Compressor {
    pub threshold: FloatParamB,
    pub ratio: FloatParamB,
    pub attack_time: FloatParamB,
    pub release_time: FloatParamB,
    pub makeup_gain: FloatParamB,
    pub mode: ByteParam,
    pub curve: ByteParam,
    gain: FloatParamS,
    peak_tracker: PeakTracker,
    channels: usize,
    sampling_period: Seconds,
}

impl Compressor {
    pub fn new(channels: usize) -> Self {
        Self {
            threshold: FloatParamB::new(THRESHOLD_MIN, THRESHOLD_MAX, THRESHOLD_DEFAULT),
            ratio: FloatParamB::new(RATIO_MIN, RATIO_MAX, RATIO_DEFAULT),
            attack_time: FloatParamB::new(0.0001, 3.0, 0.02),
            release_time: FloatParamB::new(0.0001, 6.0, 0.20),
            makeup_gain: FloatParamB::new(-12.0, 12.0, 0.0),
            mode: ByteParam::new(MODE_COMPRESSOR, MODE_EXPANDER, MODE_COMPRESSOR),
            curve: ByteParam::new(CURVE_LINEAR, CURVE_SMOOTH, CURVE_LINEAR),
            gain: FloatParamS::new(0.0, 4.0, 1.0),
            peak_tracker: PeakTracker::new(),
            channels,
            sampling_period: 1.0 / crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: crate::Frequency) {
        self.sampling_period = 1.0 / sample_rate;
        self.gain.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.gain.set_block_size(block_size);
    }

    pub fn reset(&mut self) {
        self.gain.reset();
        self.peak_tracker.reset();
    }

    /// Gain (in dB, before makeup) for a tracked peak level.
    fn gain_db_for_peak(&self, peak: Sample) -> Number {
        let peak_db = math::gain_to_db(peak as Number);
        let threshold = self.threshold.get_value();
        let ratio = self.ratio.get_value();
        let half_knee = KNEE_WIDTH / 2.0;

        // Positive distance into the region the mode acts on.
        let overshoot = match self.mode.get_value() {
            MODE_EXPANDER => threshold - peak_db,
            _ => peak_db - threshold,
        };

        let reduction = match self.curve.get_value() {
            CURVE_SMOOTH => {
                if overshoot <= -half_knee {
                    0.0
                } else if overshoot >= half_knee {
                    overshoot / ratio
                } else {
                    (overshoot + half_knee).powi(2) / (2.0 * KNEE_WIDTH * ratio)
                }
            }
            _ => {
                if overshoot <= 0.0 {
                    0.0
                } else {
                    overshoot / ratio
                }
            }
        };

        (-reduction).max(GAIN_REDUCTION_FLOOR_DB)
    }

    /// Track the side-chain peak and scale `buffer` by the resulting gain.
    pub fn process_block(
        &mut self,
        round: u64,
        side_chain: &[Vec<Sample>],
        buffer: &mut [Vec<Sample>],
        sample_count: usize,
    ) {
        debug_assert_eq!(buffer.len(), self.channels);

        let (peak, peak_index) = find_peak(side_chain, sample_count);
        self.peak_tracker
            .update(peak, peak_index, sample_count, self.sampling_period);

        let gain_db = self.gain_db_for_peak(self.peak_tracker.get_peak())
            + self.makeup_gain.get_value();
        let target = self.gain.clamp(math::db_to_gain(gain_db));

        if (target - self.gain.get_value()).abs() > 1e-6 {
            let duration = if target < self.gain.get_value() {
                self.attack_time.get_value()
            } else {
                self.release_time.get_value()
            };

            self.gain.cancel_events_at(0.0);
            self.gain.schedule_linear_ramp(duration, target);
        }

        match self.gain.produce_if_not_constant(round, sample_count) {
            Some(gain_buffer) => {
                for samples in buffer.iter_mut() {
                    for (sample, &gain) in
                        samples[..sample_count].iter_mut().zip(gain_buffer.iter())
                    {
                        *sample *= gain;
                    }
                }
            }
            None => {
                let gain = self.gain.get_value() as Sample;

                if (gain - 1.0).abs() < 1e-9 {
                    return;
                }

                for samples in buffer.iter_mut() {
                    for sample in samples[..sample_count].iter_mut() {
                        *sample *= gain;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: Number = 44100.0;

    fn sine(amplitude: Number, length: usize) -> Vec<Sample> {
        (0..length)
            .map(|i| {
                (amplitude
                    * (2.0 * std::f64::consts::PI * 997.0 * i as Number / SAMPLE_RATE).sin())
                    as Sample
            })
            .collect()
    }

    fn rms_db(samples: &[Sample]) -> Number {
        let sum: Number = samples
            .iter()
            .map(|&sample| (sample as Number).powi(2))
            .sum();
        let rms = (sum / samples.len() as Number).sqrt();

        // Convert RMS back to the peak-equivalent dBFS of a sine.
        math::gain_to_db(rms * (2.0 as Number).sqrt())
    }

    fn run_blocks(compressor: &mut Compressor, input: &[Sample], block: usize) -> Vec<Sample> {
        let mut output = Vec::with_capacity(input.len());
        let mut round = 0;

        for chunk in input.chunks(block) {
            round += 1;
            let side = vec![chunk.to_vec()];
            let mut buffer = vec![chunk.to_vec()];
            compressor.process_block(round, &side, &mut buffer, chunk.len());
            output.extend_from_slice(&buffer[0]);
        }

        output
    }

    #[test]
    fn test_signal_below_threshold_is_untouched() {
        let mut compressor = Compressor::new(1);
        compressor.set_sample_rate(SAMPLE_RATE);
        compressor.set_block_size(256);
        compressor.threshold.set_value(-12.0);

        let input = sine(0.1, 8192); // -20 dBFS
        let output = run_blocks(&mut compressor, &input, 256);

        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_compressor_steady_state_gain_reduction() {
        let mut compressor = Compressor::new(1);
        compressor.set_sample_rate(SAMPLE_RATE);
        compressor.set_block_size(256);
        compressor.threshold.set_value(-12.0);
        compressor.ratio.set_value(4.0);
        compressor.attack_time.set_value(0.005);

        // -6 dBFS input, 6 dB over the threshold, 4:1 => 1.5 dB reduction,
        // steady state at -7.5 dBFS.
        let input = sine(math::db_to_gain(-6.0), 44100);
        let output = run_blocks(&mut compressor, &input, 256);

        let steady = rms_db(&output[22050..]);
        assert!(
            (steady - (-7.5)).abs() < 0.3,
            "steady state at {} dB",
            steady
        );
    }

    #[test]
    fn test_expander_reduces_below_threshold() {
        let mut compressor = Compressor::new(1);
        compressor.set_sample_rate(SAMPLE_RATE);
        compressor.set_block_size(256);
        compressor.mode.set_value(MODE_EXPANDER);
        compressor.threshold.set_value(-12.0);
        compressor.ratio.set_value(2.0);

        // -24 dBFS input, 12 dB below the threshold, 2:1 => 6 dB further
        // down.
        let input = sine(math::db_to_gain(-24.0), 44100);
        let output = run_blocks(&mut compressor, &input, 256);

        let steady = rms_db(&output[22050..]);
        assert!(
            (steady - (-30.0)).abs() < 0.5,
            "steady state at {} dB",
            steady
        );
    }

    #[test]
    fn test_makeup_gain_is_applied() {
        let mut compressor = Compressor::new(1);
        compressor.set_sample_rate(SAMPLE_RATE);
        compressor.set_block_size(256);
        compressor.threshold.set_value(0.0);
        compressor.makeup_gain.set_value(6.0);

        let input = sine(0.25, 44100);
        let output = run_blocks(&mut compressor, &input, 256);

        let gain = output[30000] as Number / input[30000] as Number;
        assert!((math::gain_to_db(gain) - 6.0).abs() < 0.2);
    }

    #[test]
    fn test_smooth_knee_is_gentler_at_threshold() {
        let mut hard = Compressor::new(1);
        hard.threshold.set_value(-12.0);
        hard.ratio.set_value(4.0);

        let mut smooth = Compressor::new(1);
        smooth.threshold.set_value(-12.0);
        smooth.ratio.set_value(4.0);
        smooth.curve.set_value(CURVE_SMOOTH);

        // Just above the threshold the smooth curve reduces less than
        // half-knee/ratio; well above they coincide.
        let just_above = math::db_to_gain(-11.0) as Sample;
        let far_above = math::db_to_gain(0.0) as Sample;

        let hard_near = hard.gain_db_for_peak(just_above);
        let smooth_near = smooth.gain_db_for_peak(just_above);
        assert!(smooth_near > hard_near - 0.75 && smooth_near < 0.0);

        let hard_far = hard.gain_db_for_peak(far_above);
        let smooth_far = smooth.gain_db_for_peak(far_above);
        assert!((hard_far - smooth_far).abs() < 1e-6);
    }

    #[test]
    fn test_side_chain_keys_a_different_signal() {
        let mut compressor = Compressor::new(1);
        compressor.set_sample_rate(SAMPLE_RATE);
        compressor.set_block_size(256);
        compressor.threshold.set_value(-24.0);
        compressor.ratio.set_value(1.0);
        compressor.attack_time.set_value(0.001);

        // Loud side chain, quiet program: the program gets ducked even
        // though it is far below the threshold itself.
        let side = vec![vec![1.0; 256]];
        let mut buffer = vec![vec![0.01; 256]];

        for round in 1..80 {
            let mut block = buffer.clone();
            compressor.process_block(round, &side, &mut block, 256);

            if round > 60 {
                assert!(block[0][255] < 0.009, "program should be ducked");
            }
        }

        let _ = &mut buffer;
    }
}
