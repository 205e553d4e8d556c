//! Biquad filter with RBJ Audio EQ Cookbook coefficients
//!
//! Direct-form I with per-channel history. Seven types: lowpass, highpass,
//! bandpass (constant 0 dB peak), notch, peaking, low shelf, high shelf.
//! Frequency clamps to [Nyquist/100000, Nyquist/2], Q to [0.001, 30], gain
//! to +/-48 dB; the frequency and Q parameters switch to a logarithmic
//! ratio mapping when the owning module's log-scale toggle is on.
//!
//! Coefficients are recomputed only when a parameter's change index moves;
//! when any parameter is automated within the block, they are evaluated
//! per sample from the parameter buffers. A no-op configuration (wide-open
//! lowpass, floor-frequency highpass, 0 dB shelf/peak) skips processing
//! entirely.

use crate::dsp::param::{ByteParam, FloatParamS};
use crate::dsp::signal_producer::{produce, SignalProducer};
use crate::{Frequency, Number, Sample};

pub const TYPE_LOW_PASS: u8 = 0;
pub const TYPE_HIGH_PASS: u8 = 1;
pub const TYPE_BAND_PASS: u8 = 2;
pub const TYPE_NOTCH: u8 = 3;
pub const TYPE_PEAKING: u8 = 4;
pub const TYPE_LOW_SHELF: u8 = 5;
pub const TYPE_HIGH_SHELF: u8 = 6;

pub const FREQUENCY_MIN: Number = 1.0;
pub const FREQUENCY_MAX: Number = 24000.0;
pub const FREQUENCY_DEFAULT: Number = 24000.0;

pub const Q_MIN: Number = 0.001;
pub const Q_MAX: Number = 30.0;
pub const Q_DEFAULT: Number = 1.0;

pub const GAIN_MIN: Number = -48.0;
pub const GAIN_MAX: Number = 48.0;
pub const GAIN_DEFAULT: Number = 0.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Coefficients {
    pub(crate) b0: Number,
    pub(crate) b1: Number,
    pub(crate) b2: Number,
    pub(crate) a1: Number,
    pub(crate) a2: Number,
}

const IDENTITY: Coefficients = Coefficients {
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
    a1: 0.0,
    a2: 0.0,
};

pub(crate) fn compute_coefficients(
    filter_type: u8,
    frequency: Number,
    q: Number,
    gain_db: Number,
    nyquist: Frequency,
) -> Coefficients {
    let frequency = frequency.clamp(nyquist / 100_000.0, nyquist / 2.0);
    let q = q.clamp(Q_MIN, Q_MAX);

    let w0 = std::f64::consts::PI * frequency / nyquist;
    let cos_w0 = w0.cos();
    let sin_w0 = w0.sin();
    let alpha = sin_w0 / (2.0 * q);
    let a = (10.0 as Number).powf(gain_db / 40.0);

    let (b0, b1, b2, a0, a1, a2) = match filter_type {
        TYPE_LOW_PASS => {
            let b1 = 1.0 - cos_w0;
            let b0 = b1 / 2.0;
            (b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
        }
        TYPE_HIGH_PASS => {
            let b1 = -(1.0 + cos_w0);
            let b0 = -b1 / 2.0;
            (b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
        }
        TYPE_BAND_PASS => (
            alpha,
            0.0,
            -alpha,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        ),
        TYPE_NOTCH => (
            1.0,
            -2.0 * cos_w0,
            1.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        ),
        TYPE_PEAKING => (
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        ),
        TYPE_LOW_SHELF => {
            let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
            (
                a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            )
        }
        TYPE_HIGH_SHELF => {
            let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
            (
                a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            )
        }
        _ => (1.0, 0.0, 0.0, 1.0, 0.0, 0.0),
    };

    Coefficients {
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
        a1: a1 / a0,
        a2: a2 / a0,
    }
}

pub struct BiquadFilter {
    pub filter_type: ByteParam,
    pub frequency: FloatParamS,
    pub q: FloatParamS,
    pub gain: FloatParamS,
    channels: usize,
    x1: Vec<Sample>,
    x2: Vec<Sample>,
    y1: Vec<Sample>,
    y2: Vec<Sample>,
    coefficients: Coefficients,
    coefficient_change_indices: Option<(i32, i32, i32, i32)>,
    nyquist: Frequency,
}

impl BiquadFilter {
    pub fn new(channels: usize, filter_type: u8) -> Self {
        Self::with_frequency_default(channels, filter_type, FREQUENCY_DEFAULT)
    }

    pub fn with_frequency_default(
        channels: usize,
        filter_type: u8,
        frequency_default: Number,
    ) -> Self {
        Self {
            filter_type: ByteParam::new(TYPE_LOW_PASS, TYPE_HIGH_SHELF, filter_type),
            frequency: FloatParamS::new(FREQUENCY_MIN, FREQUENCY_MAX, frequency_default),
            q: FloatParamS::new(Q_MIN, Q_MAX, Q_DEFAULT),
            gain: FloatParamS::new(GAIN_MIN, GAIN_MAX, GAIN_DEFAULT),
            channels,
            x1: vec![0.0; channels],
            x2: vec![0.0; channels],
            y1: vec![0.0; channels],
            y2: vec![0.0; channels],
            coefficients: IDENTITY,
            coefficient_change_indices: None,
            nyquist: crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE / 2.0,
        }
    }

    /// Switch the frequency and Q ratio mappings; driven by the owning
    /// module's log-scale toggle.
    pub fn set_log_scale(&mut self, is_logarithmic: bool) {
        self.frequency.set_logarithmic(is_logarithmic);
        self.q.set_logarithmic(is_logarithmic);
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.nyquist = sample_rate / 2.0;
        self.coefficient_change_indices = None;
        self.frequency.set_sample_rate(sample_rate);
        self.q.set_sample_rate(sample_rate);
        self.gain.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.frequency.set_block_size(block_size);
        self.q.set_block_size(block_size);
        self.gain.set_block_size(block_size);
    }

    pub fn reset(&mut self) {
        self.x1.fill(0.0);
        self.x2.fill(0.0);
        self.y1.fill(0.0);
        self.y2.fill(0.0);
        self.frequency.reset();
        self.q.reset();
        self.gain.reset();
        self.coefficient_change_indices = None;
    }

    /// A configuration that cannot alter the signal.
    fn is_no_op(&self, filter_type: u8, frequency: Number, gain_db: Number) -> bool {
        match filter_type {
            TYPE_LOW_PASS => frequency >= FREQUENCY_MAX.min(self.nyquist / 2.0),
            TYPE_HIGH_PASS => frequency <= FREQUENCY_MIN,
            TYPE_PEAKING | TYPE_LOW_SHELF | TYPE_HIGH_SHELF => gain_db.abs() < 0.000001,
            _ => false,
        }
    }

    /// Filter `buffer[..][..sample_count]` in place.
    pub fn process_in_place(
        &mut self,
        round: u64,
        buffer: &mut [Vec<Sample>],
        sample_count: usize,
    ) {
        debug_assert_eq!(buffer.len(), self.channels);

        let filter_type = self.filter_type.get_value();

        let frequency_constant = self.frequency.is_constant_in_next_round(round, sample_count);
        let q_constant = self.q.is_constant_in_next_round(round, sample_count);
        let gain_constant = self.gain.is_constant_in_next_round(round, sample_count);

        if frequency_constant && q_constant && gain_constant {
            self.frequency.skip_round(round, sample_count);
            self.q.skip_round(round, sample_count);
            self.gain.skip_round(round, sample_count);

            let frequency = self.frequency.get_value();
            let gain_db = self.gain.get_value();

            if self.is_no_op(filter_type, frequency, gain_db) {
                // The signal passes through but the filter keeps tracking
                // it so re-enabling does not click.
                self.prime_history(buffer, sample_count);
                return;
            }

            let indices = (
                self.filter_type.get_change_index(),
                self.frequency.get_change_index(),
                self.q.get_change_index(),
                self.gain.get_change_index(),
            );

            if self.coefficient_change_indices != Some(indices) {
                self.coefficient_change_indices = Some(indices);
                self.coefficients = compute_coefficients(
                    filter_type,
                    frequency,
                    self.q.get_value(),
                    gain_db,
                    self.nyquist,
                );
            }

            let coefficients = self.coefficients;

            for (channel, samples) in buffer.iter_mut().enumerate() {
                self.apply_constant(channel, &coefficients, &mut samples[..sample_count]);
            }

            return;
        }

        // Sample-accurate coefficients: evaluate the automated parameters
        // per sample.
        produce(&mut self.frequency, round, sample_count);
        produce(&mut self.q, round, sample_count);
        produce(&mut self.gain, round, sample_count);

        self.coefficient_change_indices = None;

        for channel in 0..self.channels {
            let mut x1 = self.x1[channel];
            let mut x2 = self.x2[channel];
            let mut y1 = self.y1[channel];
            let mut y2 = self.y2[channel];

            let frequency_buffer = &self.frequency.state().buffer()[0];
            let q_buffer = &self.q.state().buffer()[0];
            let gain_buffer = &self.gain.state().buffer()[0];

            for i in 0..sample_count {
                let coefficients = compute_coefficients(
                    filter_type,
                    frequency_buffer[i] as Number,
                    q_buffer[i] as Number,
                    gain_buffer[i] as Number,
                    self.nyquist,
                );

                let x0 = buffer[channel][i];
                let y0 = coefficients.b0 * x0 as Number
                    + coefficients.b1 * x1 as Number
                    + coefficients.b2 * x2 as Number
                    - coefficients.a1 * y1 as Number
                    - coefficients.a2 * y2 as Number;

                x2 = x1;
                x1 = x0;
                y2 = y1;
                y1 = y0 as Sample;
                buffer[channel][i] = y0 as Sample;
            }

            self.x1[channel] = x1;
            self.x2[channel] = x2;
            self.y1[channel] = y1;
            self.y2[channel] = y2;
        }
    }

    fn apply_constant(
        &mut self,
        channel: usize,
        coefficients: &Coefficients,
        samples: &mut [Sample],
    ) {
        let mut x1 = self.x1[channel] as Number;
        let mut x2 = self.x2[channel] as Number;
        let mut y1 = self.y1[channel] as Number;
        let mut y2 = self.y2[channel] as Number;

        for sample in samples.iter_mut() {
            let x0 = *sample as Number;
            let y0 = coefficients.b0 * x0 + coefficients.b1 * x1 + coefficients.b2 * x2
                - coefficients.a1 * y1
                - coefficients.a2 * y2;

            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            *sample = y0 as Sample;
        }

        self.x1[channel] = x1 as Sample;
        self.x2[channel] = x2 as Sample;
        self.y1[channel] = y1 as Sample;
        self.y2[channel] = y2 as Sample;
    }

    fn prime_history(&mut self, buffer: &[Vec<Sample>], sample_count: usize) {
        if sample_count < 2 {
            return;
        }

        for (channel, samples) in buffer.iter().enumerate() {
            self.x1[channel] = samples[sample_count - 1];
            self.x2[channel] = samples[sample_count - 2];
            self.y1[channel] = samples[sample_count - 1];
            self.y2[channel] = samples[sample_count - 2];
        }
    }
}
