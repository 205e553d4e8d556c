//! # JS80P
//!
//! A real-time polyphonic synthesizer engine. The core is a tree of
//! signal producers (oscillators, filters, envelopes, modulators,
//! effects) driven by MIDI, rendering stereo sample blocks with
//! sample-accurate parameter automation.
//!
//! The engine consumes already-decoded MIDI and configuration events and
//! produces sample buffers; plugin ABI glue, windowing and widget drawing
//! live above this crate.
//!
//! ## Quick start
//!
//! ```rust
//! use js80p::synth::Synth;
//!
//! let mut synth = Synth::new();
//! synth.note_on(0.0, 0, 69, 0.8);
//!
//! let round = 1;
//! let buffer = synth.generate_samples(round, 256);
//! assert_eq!(buffer.len(), 2);
//! ```
//!
//! ## Threads
//!
//! Exactly two threads matter: the audio thread calls
//! [`synth::Synth::generate_samples`] and never blocks or allocates; the
//! GUI/control thread enqueues [`synth::Message`] values through the
//! lock-free [`synth::MessageSender`] and reads change-index-guarded
//! parameter snapshots.

pub mod bank;
pub mod dsp;
pub mod math;
pub mod midi;
pub mod note_stack;
pub mod serializer;
pub mod synth;

/// A single audio sample.
pub type Sample = f32;

/// Parameter and coefficient math runs in double precision.
pub type Number = f64;

pub type Seconds = f64;
pub type Frequency = f64;
