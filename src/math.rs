//! Table-backed math utilities shared across the DSP graph
//!
//! Frequently evaluated shapes (sine, the macro/LFO distortion curve, the
//! deterministic randomization curve) are precomputed once per process and
//! looked up with linear interpolation. The pseudo-random generator is a
//! plain 64-bit LCG so that every component that needs noise can share one
//! deterministic stream.

use lazy_static::lazy_static;

use crate::{Frequency, Number};

pub const PI: Number = std::f64::consts::PI;
pub const PI_DOUBLE: Number = 2.0 * PI;
pub const PI_HALF: Number = PI / 2.0;

const SIN_TABLE_SIZE: usize = 0x1000;
const SIN_TABLE_MASK: usize = SIN_TABLE_SIZE - 1;
const SINE_SCALE: Number = SIN_TABLE_SIZE as Number / PI_DOUBLE;

const DISTORTION_TABLE_SIZE: usize = 0x0800;
const DISTORTION_TABLE_MAX_INDEX: usize = DISTORTION_TABLE_SIZE - 1;
const DISTORTION_STEEPNESS: Number = 5.0;

const RANDOMS: usize = 0x0200;
const RANDOMS_MAX_INDEX: usize = RANDOMS - 1;
const RANDOM_SEED: u64 = 0x853c49e6748fea9b;

const DETUNE_CENTS_TO_POWER_OF_2_SCALE: Number = 1.0 / 1200.0;

lazy_static! {
    static ref SINES: Vec<Number> = {
        let mut table = Vec::with_capacity(SIN_TABLE_SIZE);
        for i in 0..SIN_TABLE_SIZE {
            table.push((PI_DOUBLE * i as Number / SIN_TABLE_SIZE as Number).sin());
        }
        table
    };
    static ref DISTORTION: Vec<Number> = {
        // Steep, tanh() based S-curve over [0, 1], fixed so that 0, 0.5 and
        // 1 map to themselves.
        let norm = (DISTORTION_STEEPNESS).tanh();
        let mut table = Vec::with_capacity(DISTORTION_TABLE_SIZE);
        for i in 0..DISTORTION_TABLE_SIZE {
            let x = i as Number / DISTORTION_TABLE_MAX_INDEX as Number;
            let y = ((DISTORTION_STEEPNESS * (2.0 * x - 1.0)).tanh() / norm) * 0.5 + 0.5;
            table.push(y.clamp(0.0, 1.0));
        }
        table
    };
    static ref RANDOMS_TABLE: Vec<Number> = {
        let mut rng = Rng::new(RANDOM_SEED);
        (0..RANDOMS).map(|_| rng.next()).collect()
    };
}

/// Force the lazily built tables; call once before the audio thread starts
/// so the first rendered block does not pay for table construction.
pub fn initialize_tables() {
    lazy_static::initialize(&SINES);
    lazy_static::initialize(&DISTORTION);
    lazy_static::initialize(&RANDOMS_TABLE);
    crate::dsp::wavetable::initialize();
}

/// Table-based sine. Accuracy is fine for audio purposes; callers that need
/// exact values (e.g. tests building reference signals) should use
/// `f64::sin` directly.
pub fn sin(x: Number) -> Number {
    lookup_periodic(&SINES, x * SINE_SCALE)
}

pub fn cos(x: Number) -> Number {
    sin(x + PI_HALF)
}

/// Compute `a_weight * a + (1.0 - a_weight) * b`.
pub fn combine(a_weight: Number, a: Number, b: Number) -> Number {
    a_weight * (a - b) + b
}

/// Apply a steep, tanh() based distortion to a value in [0, 1], blended in
/// by `level` (0 = pass through, 1 = full curve).
pub fn distort(level: Number, number: Number) -> Number {
    combine(
        level,
        lookup(
            &DISTORTION,
            DISTORTION_TABLE_MAX_INDEX,
            number * DISTORTION_TABLE_MAX_INDEX as Number,
        ),
        number,
    )
}

/// Same as [`distort`] but for values in [-0.5, 0.5], preserving the center.
pub fn distort_centered(level: Number, number: Number) -> Number {
    distort(level, number + 0.5) - 0.5
}

/// Map a value in [0, 1] to a deterministic pseudo-random value in [0, 1],
/// blended in by `level`. The same input always produces the same output.
pub fn randomize(level: Number, number: Number) -> Number {
    combine(
        level,
        lookup(
            &RANDOMS_TABLE,
            RANDOMS_MAX_INDEX,
            number * RANDOMS_MAX_INDEX as Number,
        ),
        number,
    )
}

/// Same as [`randomize`] but for values in [-0.5, 0.5], preserving the center.
pub fn randomize_centered(level: Number, number: Number) -> Number {
    randomize(level, number + 0.5) - 0.5
}

/// Detune a frequency by the given amount of cents.
pub fn detune(frequency: Frequency, cents: Number) -> Frequency {
    frequency * (cents * DETUNE_CENTS_TO_POWER_OF_2_SCALE).exp2()
}

/// Decibels to linear gain (20 dB / decade).
pub fn db_to_gain(db: Number) -> Number {
    (10.0 as Number).powf(db / 20.0)
}

/// Linear gain to decibels; silence lands on a -240 dB floor instead of -inf.
pub fn gain_to_db(gain: Number) -> Number {
    20.0 * gain.abs().max(1e-12).log10()
}

/// Look up a non-negative floating point index with linear interpolation;
/// indices at or above `max_index` return the last element.
pub fn lookup(table: &[Number], max_index: usize, index: Number) -> Number {
    let int_index = index as usize;

    if int_index >= max_index {
        return table[max_index];
    }

    let frac = index - int_index as Number;

    table[int_index] + frac * (table[int_index + 1] - table[int_index])
}

/// Look up a floating point index with linear interpolation, wrapping around
/// the table boundary in both directions. The table size must be a power of
/// two.
pub fn lookup_periodic(table: &[Number], index: Number) -> Number {
    let mask = table.len() - 1;
    debug_assert!(table.len().is_power_of_two());

    let floor = index.floor();
    let int_index = (floor as isize as usize) & mask;
    let next_index = (int_index + 1) & mask;
    let frac = index - floor;

    table[int_index] + frac * (table[next_index] - table[int_index])
}

/// Plain 64-bit linear congruential generator (Knuth's MMIX constants).
///
/// One instance is shared by all noise generators of a synth so that
/// parallel noise sources do not collapse into phase-shifted copies of the
/// same stream.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_mul(2862933555777941757).wrapping_add(3037000493),
        }
    }

    /// Next value in [0.0, 1.0).
    pub fn next(&mut self) -> Number {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);

        (self.state >> 11) as Number / (1u64 << 53) as Number
    }

    /// Next value in [-1.0, 1.0).
    pub fn next_signed(&mut self) -> Number {
        2.0 * self.next() - 1.0
    }
}
