//! Band-limited wavetables
//!
//! Each waveform is rendered additively into one 2048-sample table per
//! octave band; a band's table only contains the partials that stay below
//! the Nyquist frequency when the band's lowest playable pitch is doubled.
//! Playback picks the band pair for the current fundamental and
//! cross-fades between them, so aliasing stays below audibility at any
//! pitch while sweeps remain free of band-switching steps.
//!
//! The nine standard waveforms are built once per process and shared
//! immutably by every oscillator; custom waveforms own a table that is
//! recomputed in place when their harmonic coefficients change.

use lazy_static::lazy_static;

use crate::{Frequency, Number, Sample};

pub const SIZE: usize = 2048;
const MASK: usize = SIZE - 1;
const SIZE_FLOAT: Number = SIZE as Number;

/// With 384 partials a sawtooth keeps its full spectrum down to roughly
/// 62.5 Hz at a 48 kHz sample rate, so only notes below B1 start to lose
/// (inaudible) highs.
pub const PARTIALS: usize = 384;
pub const SOFT_PARTIALS: usize = PARTIALS / 2;

/// 384, 192, 96, 48, 24, 12, 6, 3, 1, 1 partials per band.
pub const BANDS: usize = 10;

fn partials_in_band(band: usize) -> usize {
    (PARTIALS >> band).max(1)
}

pub struct Wavetable {
    samples: Vec<Vec<Sample>>,
}

impl Wavetable {
    /// Build a table set from harmonic amplitudes; `coefficients[k]` is the
    /// amplitude of partial `k + 1`.
    pub fn new(coefficients: &[Number]) -> Self {
        let mut wavetable = Self {
            samples: (0..BANDS).map(|_| vec![0.0; SIZE]).collect(),
        };

        wavetable.update_coefficients(coefficients);
        wavetable
    }

    /// Recompute every band in place (no allocation, so custom waveforms
    /// may be updated from the audio thread).
    pub fn update_coefficients(&mut self, coefficients: &[Number]) {
        let mut peak: Number = 0.0;

        for band in 0..BANDS {
            let partials = partials_in_band(band).min(coefficients.len());
            let table = &mut self.samples[band];

            for (i, sample) in table.iter_mut().enumerate() {
                let phase = 2.0 * std::f64::consts::PI * i as Number / SIZE_FLOAT;
                let mut value = 0.0;

                for (k, &amplitude) in coefficients[..partials].iter().enumerate() {
                    if amplitude != 0.0 {
                        value += amplitude * ((k + 1) as Number * phase).sin();
                    }
                }

                *sample = value as Sample;

                if band == 0 {
                    peak = peak.max(value.abs());
                }
            }
        }

        // One scale for all bands, taken from the fullest band, keeps the
        // cross-fade between bands free of amplitude steps.
        if peak > 1e-9 && (peak - 1.0).abs() > 1e-9 {
            let scale = (1.0 / peak) as Sample;

            for table in self.samples.iter_mut() {
                for sample in table.iter_mut() {
                    *sample *= scale;
                }
            }
        }
    }

    /// Read the waveform at `phase` (in [0, 1), wrapping) for a fundamental
    /// of `frequency` Hz, band-limited against `nyquist_frequency`.
    pub fn lookup(&self, phase: Number, frequency: Frequency, nyquist_frequency: Frequency) -> Sample {
        let (band, weight) = self.band_for(frequency, nyquist_frequency);
        let index = phase * SIZE_FLOAT;
        let more = Self::interpolate(&self.samples[band], index);

        if weight <= 0.0 || band + 1 >= BANDS {
            return more;
        }

        let fewer = Self::interpolate(&self.samples[band + 1], index);

        more + weight as Sample * (fewer - more)
    }

    fn band_for(&self, frequency: Frequency, nyquist_frequency: Frequency) -> (usize, Number) {
        let frequency = frequency.abs().max(1e-6);
        let playable = nyquist_frequency / frequency;

        if playable >= PARTIALS as Number {
            return (0, 0.0);
        }

        let band_float = (PARTIALS as Number / playable).log2().max(0.0);
        let band = band_float as usize;

        if band >= BANDS - 1 {
            return (BANDS - 1, 0.0);
        }

        (band, band_float - band as Number)
    }

    fn interpolate(table: &[Sample], index: Number) -> Sample {
        let floor = index.floor();
        let int_index = (floor as isize as usize) & MASK;
        let next_index = (int_index + 1) & MASK;
        let frac = (index - floor) as Sample;

        table[int_index] + frac * (table[next_index] - table[int_index])
    }
}

fn sine_coefficients() -> Vec<Number> {
    vec![1.0]
}

fn sawtooth_coefficients(partials: usize, scale: Number) -> Vec<Number> {
    (1..=partials)
        .map(|k| scale * 2.0 / (std::f64::consts::PI * k as Number))
        .collect()
}

fn triangle_coefficients(partials: usize) -> Vec<Number> {
    (1..=partials)
        .map(|k| {
            if k % 2 == 1 {
                let sign = if (k / 2) % 2 == 0 { 1.0 } else { -1.0 };
                sign * 8.0 / (std::f64::consts::PI.powi(2) * (k * k) as Number)
            } else {
                0.0
            }
        })
        .collect()
}

fn square_coefficients(partials: usize) -> Vec<Number> {
    (1..=partials)
        .map(|k| {
            if k % 2 == 1 {
                4.0 / (std::f64::consts::PI * k as Number)
            } else {
                0.0
            }
        })
        .collect()
}

pub struct StandardWaveforms {
    pub sine: Wavetable,
    pub sawtooth: Wavetable,
    pub soft_sawtooth: Wavetable,
    pub inverse_sawtooth: Wavetable,
    pub soft_inverse_sawtooth: Wavetable,
    pub triangle: Wavetable,
    pub soft_triangle: Wavetable,
    pub square: Wavetable,
    pub soft_square: Wavetable,
}

lazy_static! {
    pub static ref STANDARD_WAVEFORMS: StandardWaveforms = StandardWaveforms {
        sine: Wavetable::new(&sine_coefficients()),
        sawtooth: Wavetable::new(&sawtooth_coefficients(PARTIALS, 1.0)),
        soft_sawtooth: Wavetable::new(&sawtooth_coefficients(SOFT_PARTIALS, 1.0)),
        inverse_sawtooth: Wavetable::new(&sawtooth_coefficients(PARTIALS, -1.0)),
        soft_inverse_sawtooth: Wavetable::new(&sawtooth_coefficients(SOFT_PARTIALS, -1.0)),
        triangle: Wavetable::new(&triangle_coefficients(PARTIALS)),
        soft_triangle: Wavetable::new(&triangle_coefficients(SOFT_PARTIALS)),
        square: Wavetable::new(&square_coefficients(PARTIALS)),
        soft_square: Wavetable::new(&square_coefficients(SOFT_PARTIALS)),
    };
}

/// Force the shared tables to be built; called from
/// [`crate::math::initialize_tables`] so the first audio block does not pay
/// the cost.
pub fn initialize() {
    lazy_static::initialize(&STANDARD_WAVEFORMS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_table_matches_reference() {
        let wavetable = Wavetable::new(&sine_coefficients());

        for i in 0..16 {
            let phase = i as Number / 16.0;
            let expected = (2.0 * std::f64::consts::PI * phase).sin();
            let actual = wavetable.lookup(phase, 100.0, 22050.0) as Number;

            assert!(
                (actual - expected).abs() < 1e-3,
                "phase {}: {} vs {}",
                phase,
                actual,
                expected
            );
        }
    }

    #[test]
    fn test_tables_are_normalized() {
        let waveforms = &*STANDARD_WAVEFORMS;

        for (name, wavetable) in [
            ("sawtooth", &waveforms.sawtooth),
            ("square", &waveforms.square),
            ("triangle", &waveforms.triangle),
        ] {
            let peak = wavetable.samples[0]
                .iter()
                .fold(0.0f32, |acc, &sample| acc.max(sample.abs()));

            assert!(
                peak <= 1.0 + 1e-6,
                "{} band 0 peak is {}",
                name,
                peak
            );
            assert!(peak > 0.9, "{} should reach close to full scale", name);
        }
    }

    #[test]
    fn test_high_pitch_uses_fewer_partials() {
        let wavetable = &STANDARD_WAVEFORMS.sawtooth;

        // At 10 kHz fundamental with 22.05 kHz Nyquist only 2 partials are
        // playable; the selected band must not contain more than 3.
        let (band, _) = wavetable.band_for(10_000.0, 22_050.0);
        assert!(partials_in_band(band + 1) <= 3);

        // At 30 Hz the full table is in use.
        let (band, weight) = wavetable.band_for(30.0, 22_050.0);
        assert_eq!(band, 0);
        assert_eq!(weight, 0.0);
    }

    #[test]
    fn test_lookup_wraps_phase() {
        let wavetable = Wavetable::new(&sine_coefficients());

        let a = wavetable.lookup(0.25, 100.0, 22050.0);
        let b = wavetable.lookup(1.25, 100.0, 22050.0);

        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_update_coefficients_in_place() {
        let mut wavetable = Wavetable::new(&[1.0]);

        wavetable.update_coefficients(&[0.0, 1.0]);

        // Now the table holds the 2nd harmonic only.
        let value = wavetable.lookup(0.125, 100.0, 22050.0) as Number;
        assert!((value - 1.0).abs() < 1e-3, "sin(2 * 2pi/8) = 1, got {}", value);
    }
}
