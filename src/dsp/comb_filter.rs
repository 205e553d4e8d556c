//! Comb filter building blocks
//!
//! A feedback comb is a delay line with a gain (and optionally a
//! high-shelf damping filter and a waveshaper) in its feedback loop. The
//! pieces are exposed per sample (read, damp, write) so the reverb and
//! echo can assemble Freeverb-style loops with the feedback path they
//! need. The stereo panning helper implements the constant-power law; the
//! flipped variant negates the angle to emulate Freeverb's alternating
//! left/right taps.

use crate::dsp::biquad_filter::Coefficients;
use crate::{Number, Sample, Seconds};

pub struct CombCore {
    ring: Vec<Sample>,
    mask: usize,
    write_index: usize,
    x1: Number,
    x2: Number,
    y1: Number,
    y2: Number,
}

impl CombCore {
    pub fn new() -> Self {
        Self {
            ring: vec![0.0; 2],
            mask: 1,
            write_index: 0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Size the ring for `max_time` seconds at `sample_rate`.
    pub fn configure(&mut self, max_time: Seconds, sample_rate: Number) {
        let needed = (max_time * sample_rate).ceil() as usize + 4;
        let size = needed.next_power_of_two();

        self.ring.clear();
        self.ring.resize(size, 0.0);
        self.mask = size - 1;
        self.write_index = 0;
        self.reset_filter();
    }

    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.write_index = 0;
        self.reset_filter();
    }

    fn reset_filter(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// Interpolated read `delay_samples` behind the write head.
    pub fn read(&self, delay_samples: Number) -> Sample {
        let ring_len = (self.mask + 1) as Number;
        let position = self.write_index as Number - delay_samples.max(1.0) + ring_len;

        let floor = position.floor();
        let index = (floor as usize) & self.mask;
        let next_index = (index + 1) & self.mask;
        let fraction = (position - floor) as Sample;

        self.ring[index] + fraction * (self.ring[next_index] - self.ring[index])
    }

    /// One tick of the embedded damping filter.
    pub fn damp(&mut self, sample: Sample, coefficients: &Coefficients) -> Sample {
        let x0 = sample as Number;
        let y0 = coefficients.b0 * x0 + coefficients.b1 * self.x1 + coefficients.b2 * self.x2
            - coefficients.a1 * self.y1
            - coefficients.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;

        y0 as Sample
    }

    /// Store the next input (+ feedback) sample and advance the write head.
    pub fn write(&mut self, sample: Sample) {
        self.ring[self.write_index] = sample;
        self.write_index = (self.write_index + 1) & self.mask;
    }
}

impl Default for CombCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Constant-power stereo gains for a pan position in [-1, 1]; `flipped`
/// negates the angle.
pub fn pan_gains(pan: Number, flipped: bool) -> (Sample, Sample) {
    let pan = if flipped { -pan } else { pan }.clamp(-1.0, 1.0);
    let angle = std::f64::consts::FRAC_PI_4 * (pan + 1.0);

    (angle.cos() as Sample, angle.sin() as Sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::biquad_filter::{compute_coefficients, TYPE_HIGH_SHELF};

    #[test]
    fn test_comb_repeats_at_delay_interval() {
        let mut comb = CombCore::new();
        comb.configure(0.1, 1000.0);

        let identity = Coefficients {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        };

        let mut output = Vec::new();

        for i in 0..100 {
            let input: Sample = if i == 0 { 1.0 } else { 0.0 };
            let delayed = comb.read(20.0);
            let damped = comb.damp(delayed, &identity);
            comb.write(input + 0.5 * damped);
            output.push(delayed);
        }

        assert!((output[20] - 1.0).abs() < 1e-6);
        assert!((output[40] - 0.5).abs() < 1e-6);
        assert!((output[60] - 0.25).abs() < 1e-6);
        assert!(output[21].abs() < 1e-6);
    }

    #[test]
    fn test_damping_attenuates_repeats() {
        let mut comb = CombCore::new();
        comb.configure(0.1, 44100.0);

        let damping = compute_coefficients(TYPE_HIGH_SHELF, 2000.0, 1.0, -12.0, 22050.0);

        // Alternating-sign input represents the highest representable
        // frequency; the shelf in the loop bleeds it off repeat by repeat.
        let mut first_repeat_energy: Number = 0.0;
        let mut second_repeat_energy: Number = 0.0;

        for i in 0..300 {
            let input: Sample = if i < 50 {
                if i % 2 == 0 {
                    1.0
                } else {
                    -1.0
                }
            } else {
                0.0
            };

            let delayed = comb.read(100.0);
            let damped = comb.damp(delayed, &damping);
            comb.write(input + 0.9 * damped);

            if (100..150).contains(&i) {
                first_repeat_energy += (delayed as Number).powi(2);
            } else if (200..250).contains(&i) {
                second_repeat_energy += (delayed as Number).powi(2);
            }
        }

        assert!(first_repeat_energy > 0.0);
        assert!(
            second_repeat_energy < first_repeat_energy * 0.5,
            "first {} second {}",
            first_repeat_energy,
            second_repeat_energy
        );
    }

    #[test]
    fn test_pan_gains_constant_power() {
        for pan in [-1.0, -0.5, 0.0, 0.3, 1.0] {
            let (left, right) = pan_gains(pan, false);
            let power = (left * left + right * right) as Number;

            assert!((power - 1.0).abs() < 1e-6, "pan {}: power {}", pan, power);
        }
    }

    #[test]
    fn test_pan_extremes_and_flip() {
        let (left, right) = pan_gains(-1.0, false);
        assert!((left - 1.0).abs() < 1e-6 && right.abs() < 1e-6);

        let (left, right) = pan_gains(1.0, false);
        assert!(left.abs() < 1e-6 && (right - 1.0).abs() < 1e-6);

        let (left, right) = pan_gains(0.7, true);
        let (flipped_left, flipped_right) = pan_gains(-0.7, false);
        assert!((left - flipped_left).abs() < 1e-9);
        assert!((right - flipped_right).abs() < 1e-9);
    }
}
