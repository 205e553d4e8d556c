//! The synthesis engine: signal producers, parameters, and DSP nodes
//!
//! Dependency order is leaves-first: parameter and controller sources
//! render before the oscillators and modulators that read them, voices
//! render into their own buffers, the bus mixes the voices, and the
//! effects chain processes the bus.

pub mod biquad_filter;
pub mod chorus;
pub mod comb_filter;
pub mod compressor;
pub mod delay;
pub mod distortion;
pub mod echo;
pub mod effects;
pub mod envelope;
pub mod gain;
pub mod lfo;
pub mod macros;
pub mod midi_controller;
pub mod noise_generator;
pub mod oscillator;
pub mod param;
pub mod peak_tracker;
pub mod reverb;
pub mod signal_producer;
pub mod tape;
pub mod voice;
pub mod wavefolder;
pub mod wavetable;
