//! A synthesizer voice
//!
//! Signal path: wavetable oscillator (plus noise) -> biquad filter 1 ->
//! wavefolder -> biquad filter 2 -> velocity/volume -> stereo panning.
//! Per-voice parameters follow the shared leader parameters unless an
//! envelope is assigned to them, in which case the voice schedules the
//! envelope's segments on its own copy with sample accuracy.
//!
//! The phase machine runs Off -> Started -> Decaying -> Sustained ->
//! Releasing -> Off; a note-on for a voice that is still sounding
//! retriggers it, replacing the scheduled envelope segments with a short
//! crossfade ramp (the old release time) into the new attack so the edit
//! is click-free.

use crate::dsp::biquad_filter::BiquadFilter;
use crate::dsp::comb_filter::pan_gains;
use crate::dsp::envelope::{
    Envelope, EnvelopeSnapshot, ENVELOPES, UPDATE_MODE_DYNAMIC, UPDATE_MODE_STATIC,
};
use crate::dsp::noise_generator::NoiseGenerator;
use crate::dsp::oscillator::{Oscillator, Waveform, CUSTOM_WAVEFORM_HARMONICS};
use crate::dsp::param::{ByteParam, FloatParamB, FloatParamS, ToggleParam};
use crate::dsp::signal_producer::{produce, SignalProducer};
use crate::dsp::wavefolder::Wavefolder;
use crate::math::{self, Rng};
use crate::midi::{self, Channel, Note};
use crate::{Frequency, Number, Sample, Seconds};

pub const CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePhase {
    Off,
    Started,
    Decaying,
    Sustained,
    Releasing,
}

/// The shared ("leader") voice parameters; every voice reads these unless
/// an envelope takes a parameter over.
pub struct VoiceParams {
    pub waveform: ByteParam,
    pub amplitude: FloatParamS,
    pub velocity_sensitivity: FloatParamB,
    pub folding: FloatParamS,
    pub portamento_length: FloatParamB,
    pub portamento_depth: FloatParamB,
    pub detune: FloatParamS,
    pub fine_detune: FloatParamS,
    pub subharmonic: FloatParamS,
    pub unison_count: ByteParam,
    pub unison_spread: FloatParamB,
    pub noise_level: FloatParamB,
    pub panning: FloatParamS,
    pub volume: FloatParamS,
    pub harmonics: [FloatParamB; CUSTOM_WAVEFORM_HARMONICS],
    pub filter_1_type: ByteParam,
    pub filter_1_log_scale: ToggleParam,
    pub filter_1_frequency: FloatParamS,
    pub filter_1_q: FloatParamS,
    pub filter_1_gain: FloatParamS,
    pub filter_2_type: ByteParam,
    pub filter_2_log_scale: ToggleParam,
    pub filter_2_frequency: FloatParamS,
    pub filter_2_q: FloatParamS,
    pub filter_2_gain: FloatParamS,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceParams {
    pub fn new() -> Self {
        Self {
            waveform: ByteParam::new(0, crate::dsp::oscillator::WAVEFORMS - 1, 0),
            amplitude: FloatParamS::new(0.0, 1.0, 0.75),
            velocity_sensitivity: FloatParamB::new(0.0, 2.0, 1.0),
            folding: FloatParamS::new(0.0, 1.0, 0.0),
            portamento_length: FloatParamB::new(0.0, 3.0, 0.0),
            portamento_depth: FloatParamB::new(-1200.0, 1200.0, 0.0),
            detune: FloatParamS::new(-2400.0, 2400.0, 0.0),
            fine_detune: FloatParamS::new(-1200.0, 1200.0, 0.0),
            subharmonic: FloatParamS::new(0.0, 1.0, 0.0),
            unison_count: ByteParam::new(1, 7, 1),
            unison_spread: FloatParamB::new(0.0, 100.0, 0.0),
            noise_level: FloatParamB::new(0.0, 1.0, 0.0),
            panning: FloatParamS::new(-1.0, 1.0, 0.0),
            volume: FloatParamS::new(0.0, 1.0, 1.0),
            harmonics: std::array::from_fn(|_| FloatParamB::new(-1.0, 1.0, 0.0)),
            filter_1_type: ByteParam::new(0, 6, crate::dsp::biquad_filter::TYPE_LOW_PASS),
            filter_1_log_scale: ToggleParam::new(ToggleParam::OFF),
            filter_1_frequency: FloatParamS::new(1.0, 24000.0, 24000.0),
            filter_1_q: FloatParamS::new(0.001, 30.0, 1.0),
            filter_1_gain: FloatParamS::new(-48.0, 48.0, 0.0),
            filter_2_type: ByteParam::new(0, 6, crate::dsp::biquad_filter::TYPE_HIGH_PASS),
            filter_2_log_scale: ToggleParam::new(ToggleParam::OFF),
            filter_2_frequency: FloatParamS::new(1.0, 24000.0, 1.0),
            filter_2_q: FloatParamS::new(0.001, 30.0, 1.0),
            filter_2_gain: FloatParamS::new(-48.0, 48.0, 0.0),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        for param in self.sample_accurate_params_mut() {
            param.set_sample_rate(sample_rate);
        }
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        for param in self.sample_accurate_params_mut() {
            param.set_block_size(block_size);
        }
    }

    /// Advance every sample-accurate leader through the round so voices
    /// can read their buffers (or block-constant values).
    pub fn render_leaders(&mut self, round: u64, sample_count: usize) {
        for param in self.sample_accurate_params_mut() {
            param.produce_if_not_constant(round, sample_count);
        }
    }

    fn sample_accurate_params_mut(&mut self) -> [&mut FloatParamS; 12] {
        [
            &mut self.amplitude,
            &mut self.folding,
            &mut self.detune,
            &mut self.fine_detune,
            &mut self.subharmonic,
            &mut self.panning,
            &mut self.volume,
            &mut self.filter_1_frequency,
            &mut self.filter_1_q,
            &mut self.filter_1_gain,
            &mut self.filter_2_frequency,
            &mut self.filter_2_q,
        ]
    }
}

/// Which envelope (by index) drives which envelope-capable parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeTargets {
    pub amplitude: Option<u8>,
    pub volume: Option<u8>,
    pub folding: Option<u8>,
    pub filter_1_frequency: Option<u8>,
    pub filter_1_q: Option<u8>,
    pub filter_2_frequency: Option<u8>,
    pub filter_2_q: Option<u8>,
}

/// One (channel, note) worth of synthesis state.
pub struct Voice {
    oscillator: Oscillator,
    noise: NoiseGenerator,
    filter_1: BiquadFilter,
    wavefolder: Wavefolder,
    filter_2: BiquadFilter,
    volume: FloatParamS,
    buffer: Vec<Vec<Sample>>,
    mono: Vec<Vec<Sample>>,
    phase: VoicePhase,
    channel: Channel,
    note: Note,
    velocity: Number,
    age: u64,
    elapsed: Seconds,
    sustain_start: Seconds,
    decay_start: Seconds,
    off_after: Seconds,
    targets: EnvelopeTargets,
    snapshots: [Option<EnvelopeSnapshot>; ENVELOPES],
    sample_rate: Frequency,
}

impl Voice {
    pub fn new() -> Self {
        Self {
            oscillator: Oscillator::new(),
            noise: NoiseGenerator::new(1, 20.0, 12000.0),
            filter_1: BiquadFilter::new(1, crate::dsp::biquad_filter::TYPE_LOW_PASS),
            wavefolder: Wavefolder::new(1),
            filter_2: BiquadFilter::with_frequency_default(
                1,
                crate::dsp::biquad_filter::TYPE_HIGH_PASS,
                1.0,
            ),
            volume: FloatParamS::new(0.0, 1.0, 1.0),
            buffer: vec![vec![0.0; crate::dsp::signal_producer::DEFAULT_BLOCK_SIZE]; CHANNELS],
            mono: vec![vec![0.0; crate::dsp::signal_producer::DEFAULT_BLOCK_SIZE]],
            phase: VoicePhase::Off,
            channel: 0,
            note: 0,
            velocity: 0.0,
            age: 0,
            elapsed: 0.0,
            sustain_start: 0.0,
            decay_start: 0.0,
            off_after: 0.0,
            targets: EnvelopeTargets::default(),
            snapshots: [None; ENVELOPES],
            sample_rate: crate::dsp::signal_producer::DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.sample_rate = sample_rate;
        self.oscillator.set_sample_rate(sample_rate);
        self.noise.set_sample_rate(sample_rate);
        self.filter_1.set_sample_rate(sample_rate);
        self.wavefolder.set_sample_rate(sample_rate);
        self.filter_2.set_sample_rate(sample_rate);
        self.volume.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.oscillator.set_block_size(block_size);
        self.filter_1.set_block_size(block_size);
        self.wavefolder.set_block_size(block_size);
        self.filter_2.set_block_size(block_size);
        self.volume.set_block_size(block_size);

        for channel in self.buffer.iter_mut().chain(self.mono.iter_mut()) {
            channel.clear();
            channel.resize(block_size, 0.0);
        }
    }

    pub fn reset(&mut self) {
        self.oscillator.reset();
        self.noise.reset();
        self.filter_1.reset();
        self.wavefolder.reset();
        self.filter_2.reset();
        self.volume.reset();
        self.phase = VoicePhase::Off;
        self.elapsed = 0.0;
        self.snapshots = [None; ENVELOPES];

        for channel in self.buffer.iter_mut() {
            channel.fill(0.0);
        }
    }

    pub fn phase(&self) -> VoicePhase {
        self.phase
    }

    pub fn is_on(&self) -> bool {
        self.phase != VoicePhase::Off
    }

    pub fn is_released(&self) -> bool {
        self.phase == VoicePhase::Releasing
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn note(&self) -> Note {
        self.note
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn buffer(&self) -> &[Vec<Sample>] {
        &self.buffer
    }

    /// Start (or retrigger) the voice.
    #[allow(clippy::too_many_arguments)]
    pub fn note_on(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        note: Note,
        velocity: Number,
        age: u64,
        params: &VoiceParams,
        envelopes: &[Envelope; ENVELOPES],
        targets: EnvelopeTargets,
        frequencies: &[Frequency; midi::NOTES],
        previous_note: Option<Note>,
    ) {
        let was_on = self.is_on();
        let old_release = self.release_time_of_current_envelopes();

        self.channel = channel;
        self.note = note;
        self.velocity = velocity;
        self.age = age;
        self.targets = targets;
        self.elapsed = -time_offset;
        self.phase = VoicePhase::Started;

        // Snapshot every envelope that drives one of our targets.
        self.snapshots = [None; ENVELOPES];

        for index in self.target_envelope_indices().into_iter().flatten() {
            self.snapshots[index as usize] = Some(envelopes[index as usize].make_snapshot());
        }

        let transition = if was_on { old_release.max(0.002) } else { 0.0 };

        self.start_envelopes(time_offset, transition);

        // Pitch: portamento ramps from the previous note (or from the
        // configured depth offset) when a length is set.
        let target_frequency = frequencies[note as usize];
        let portamento_length = params.portamento_length.get_value();

        self.oscillator.cancel_start_and_stop_events();

        if portamento_length > 0.000001 {
            let start_frequency = match previous_note {
                Some(previous) => frequencies[previous as usize],
                None => math::detune(target_frequency, params.portamento_depth.get_value()),
            };

            self.oscillator
                .frequency
                .cancel_events_at(time_offset);
            self.oscillator
                .frequency
                .schedule_value(time_offset, start_frequency);
            self.oscillator
                .frequency
                .schedule_linear_ramp(portamento_length, target_frequency);
        } else {
            self.oscillator.frequency.cancel_events_at(time_offset);
            self.oscillator
                .frequency
                .schedule_value(time_offset, target_frequency);
        }

        // A sounding oscillator keeps its phase (click-free retrigger); a
        // stopped one restarts. The pending stop of a releasing voice was
        // cancelled above, so is_on reflects the actual state.
        if !was_on || !self.oscillator.is_on() {
            self.oscillator.start(time_offset);
        }

        // Segment boundaries for the phase machine, taken from the
        // amplitude-gate envelope if there is one.
        if let Some(snapshot) = self.gate_snapshot() {
            self.decay_start =
                time_offset + snapshot.delay_time + snapshot.attack_time + snapshot.hold_time;
            self.sustain_start = self.decay_start + snapshot.decay_time;
        } else {
            self.decay_start = time_offset;
            self.sustain_start = time_offset;
        }
    }

    /// Legato pitch change: steal the pitch without restarting the
    /// envelopes (monophonic modes).
    pub fn change_note(
        &mut self,
        time_offset: Seconds,
        note: Note,
        frequency: Frequency,
        portamento_length: Seconds,
    ) {
        self.note = note;
        self.oscillator.frequency.cancel_events_at(time_offset);

        if portamento_length > 0.000001 {
            self.oscillator
                .frequency
                .schedule_linear_ramp(portamento_length, frequency);
        } else {
            self.oscillator
                .frequency
                .schedule_value(time_offset, frequency);
        }
    }

    /// Release the voice; returns the release duration.
    pub fn note_off(
        &mut self,
        time_offset: Seconds,
        envelopes: &[Envelope; ENVELOPES],
    ) -> Seconds {
        if !self.is_on() || self.phase == VoicePhase::Releasing {
            return 0.0;
        }

        let mut release: Seconds = 0.0;

        for index in self.target_envelope_indices().into_iter().flatten() {
            let slot = index as usize;

            // End-updated and dynamic envelopes re-read their parameters
            // at the release boundary.
            let snapshot = match self.snapshots[slot] {
                Some(snapshot) if snapshot.update_mode == UPDATE_MODE_STATIC => snapshot,
                _ => envelopes[slot].make_snapshot(),
            };

            self.snapshots[slot] = Some(snapshot);
            release = release.max(snapshot.release_time);
        }

        self.end_envelopes(time_offset);

        self.phase = VoicePhase::Releasing;
        self.off_after = self.elapsed + time_offset + release + 0.005;
        self.oscillator.stop(time_offset + release + 0.005);

        release
    }

    /// Render one block into the voice's stereo buffer.
    pub fn render(
        &mut self,
        round: u64,
        sample_count: usize,
        params: &VoiceParams,
        envelopes: &[Envelope; ENVELOPES],
        rng: &mut Rng,
    ) {
        debug_assert!(self.is_on());

        self.sync_configuration(params);
        self.follow_leaders(round, params);
        self.update_dynamic_sustain(envelopes);

        produce(&mut self.oscillator, round, sample_count);

        self.mono[0][..sample_count]
            .copy_from_slice(&self.oscillator.state().buffer()[0][..sample_count]);

        self.noise.level.set_value(params.noise_level.get_value());
        self.noise.add_noise(rng, &mut self.mono, 0, sample_count);

        self.filter_1.process_in_place(round, &mut self.mono, sample_count);
        self.wavefolder.process_in_place(round, &mut self.mono, sample_count);
        self.filter_2.process_in_place(round, &mut self.mono, sample_count);

        // Velocity response: blend between full level and the raw
        // velocity by the sensitivity parameter.
        let sensitivity = params.velocity_sensitivity.get_value();
        let velocity_gain = if sensitivity <= 1.0 {
            math::combine(sensitivity, self.velocity, 1.0)
        } else {
            self.velocity.powf(sensitivity)
        };

        let volume_value = self.volume.get_value();
        let volume_buffer = self.volume.produce_if_not_constant(round, sample_count);

        let panning = params
            .panning
            .round_buffer(round)
            .map(|buffer| buffer[sample_count - 1] as Number)
            .unwrap_or_else(|| params.panning.get_value());
        let (left_gain, right_gain) = pan_gains(panning, false);

        let mono = &self.mono[0];

        for i in 0..sample_count {
            let volume = match volume_buffer {
                Some(buffer) => buffer[i] as Number,
                None => volume_value,
            };

            let sample = mono[i] as Number * volume * velocity_gain;

            self.buffer[0][i] = sample as Sample * left_gain;
            self.buffer[1][i] = sample as Sample * right_gain;
        }

        self.advance_phase(sample_count);
    }

    fn advance_phase(&mut self, sample_count: usize) {
        self.elapsed += sample_count as Seconds / self.sample_rate;

        match self.phase {
            VoicePhase::Started if self.elapsed >= self.decay_start => {
                self.phase = VoicePhase::Decaying;
            }
            VoicePhase::Decaying if self.elapsed >= self.sustain_start => {
                self.phase = VoicePhase::Sustained;
            }
            VoicePhase::Releasing if self.elapsed >= self.off_after => {
                self.phase = VoicePhase::Off;
            }
            _ => {}
        }

        if self.phase == VoicePhase::Started && self.elapsed >= self.sustain_start {
            self.phase = VoicePhase::Sustained;
        }
    }

    fn gate_snapshot(&self) -> Option<EnvelopeSnapshot> {
        let index = self.targets.volume.or(self.targets.amplitude)?;
        self.snapshots[index as usize]
    }

    fn release_time_of_current_envelopes(&self) -> Seconds {
        self.gate_snapshot()
            .map(|snapshot| snapshot.release_time)
            .unwrap_or(0.0)
    }

    fn target_envelope_indices(&self) -> [Option<u8>; 7] {
        [
            self.targets.amplitude,
            self.targets.volume,
            self.targets.folding,
            self.targets.filter_1_frequency,
            self.targets.filter_1_q,
            self.targets.filter_2_frequency,
            self.targets.filter_2_q,
        ]
    }

    fn start_envelopes(&mut self, time_offset: Seconds, transition: Seconds) {
        let targets = self.targets;

        for (envelope, param) in [
            (targets.amplitude, &mut self.oscillator.amplitude),
            (targets.volume, &mut self.volume),
            (targets.folding, &mut self.wavefolder.folding),
            (targets.filter_1_frequency, &mut self.filter_1.frequency),
            (targets.filter_1_q, &mut self.filter_1.q),
            (targets.filter_2_frequency, &mut self.filter_2.frequency),
            (targets.filter_2_q, &mut self.filter_2.q),
        ] {
            let Some(index) = envelope else { continue };
            let Some(snapshot) = self.snapshots[index as usize] else {
                continue;
            };

            if transition > 0.0 {
                // Retrigger: glide from the current level to the new
                // initial value instead of snapping.
                let initial = param.ratio_to_value(snapshot.amount * snapshot.initial_value);

                param.cancel_events_at(time_offset);
                param.schedule_linear_ramp(transition, initial);

                let base = time_offset + transition;
                let peak = param.ratio_to_value(snapshot.amount * snapshot.peak_value);
                let sustain = param.ratio_to_value(snapshot.amount * snapshot.sustain_value);

                param.schedule_value(base + snapshot.delay_time, initial);
                param.schedule_linear_ramp(snapshot.attack_time, peak);
                param.schedule_value(
                    base + snapshot.delay_time + snapshot.attack_time + snapshot.hold_time,
                    peak,
                );
                param.schedule_linear_ramp(snapshot.decay_time, sustain);
            } else {
                snapshot.start(param, time_offset);
            }
        }
    }

    fn end_envelopes(&mut self, time_offset: Seconds) {
        let targets = self.targets;

        for (envelope, param) in [
            (targets.amplitude, &mut self.oscillator.amplitude),
            (targets.volume, &mut self.volume),
            (targets.folding, &mut self.wavefolder.folding),
            (targets.filter_1_frequency, &mut self.filter_1.frequency),
            (targets.filter_1_q, &mut self.filter_1.q),
            (targets.filter_2_frequency, &mut self.filter_2.frequency),
            (targets.filter_2_q, &mut self.filter_2.q),
        ] {
            let Some(index) = envelope else { continue };

            if let Some(snapshot) = self.snapshots[index as usize] {
                snapshot.end(param, time_offset);
            }
        }
    }

    /// Copy the discrete/config leaders into the per-voice components.
    fn sync_configuration(&mut self, params: &VoiceParams) {
        self.oscillator
            .set_waveform(Waveform::from_byte(params.waveform.get_value()));
        self.oscillator.set_unison(
            params.unison_count.get_value() as usize,
            params.unison_spread.get_value(),
        );

        if Waveform::from_byte(params.waveform.get_value()) == Waveform::Custom {
            let mut coefficients = [0.0; CUSTOM_WAVEFORM_HARMONICS];

            for (coefficient, param) in coefficients.iter_mut().zip(params.harmonics.iter()) {
                *coefficient = param.get_value();
            }

            self.oscillator.update_custom_waveform(&coefficients);
        }

        self.filter_1
            .filter_type
            .set_value(params.filter_1_type.get_value());
        self.filter_1
            .set_log_scale(params.filter_1_log_scale.is_on());
        self.filter_2
            .filter_type
            .set_value(params.filter_2_type.get_value());
        self.filter_2
            .set_log_scale(params.filter_2_log_scale.is_on());
    }

    /// Per-voice parameters without an envelope mirror the leader: the
    /// leader's rendered buffer when it moves within the block, its value
    /// otherwise.
    fn follow_leaders(&mut self, round: u64, params: &VoiceParams) {
        let targets = self.targets;

        follow(&mut self.oscillator.amplitude, &params.amplitude, round, targets.amplitude);
        follow(&mut self.volume, &params.volume, round, targets.volume);
        follow(
            &mut self.wavefolder.folding,
            &params.folding,
            round,
            targets.folding,
        );
        follow(
            &mut self.filter_1.frequency,
            &params.filter_1_frequency,
            round,
            targets.filter_1_frequency,
        );
        follow(&mut self.filter_1.q, &params.filter_1_q, round, targets.filter_1_q);
        follow(
            &mut self.filter_2.frequency,
            &params.filter_2_frequency,
            round,
            targets.filter_2_frequency,
        );
        follow(&mut self.filter_2.q, &params.filter_2_q, round, targets.filter_2_q);

        follow(&mut self.oscillator.detune, &params.detune, round, None);
        follow(&mut self.oscillator.fine_detune, &params.fine_detune, round, None);
        follow(
            &mut self.oscillator.subharmonic_amplitude,
            &params.subharmonic,
            round,
            None,
        );
        follow(&mut self.filter_1.gain, &params.filter_1_gain, round, None);
        follow(&mut self.filter_2.gain, &params.filter_2_gain, round, None);
    }

    /// Dynamic-update envelopes keep tracking their sustain level while
    /// the voice sustains.
    fn update_dynamic_sustain(&mut self, envelopes: &[Envelope; ENVELOPES]) {
        if self.phase != VoicePhase::Sustained {
            return;
        }

        let targets = self.targets;

        for (envelope, param) in [
            (targets.amplitude, &mut self.oscillator.amplitude),
            (targets.volume, &mut self.volume),
            (targets.folding, &mut self.wavefolder.folding),
            (targets.filter_1_frequency, &mut self.filter_1.frequency),
            (targets.filter_1_q, &mut self.filter_1.q),
            (targets.filter_2_frequency, &mut self.filter_2.frequency),
            (targets.filter_2_q, &mut self.filter_2.q),
        ] {
            let Some(index) = envelope else { continue };
            let slot = index as usize;

            let Some(previous) = self.snapshots[slot] else {
                continue;
            };

            if previous.update_mode != UPDATE_MODE_DYNAMIC {
                continue;
            }

            let current = envelopes[slot].make_snapshot();

            if current != previous {
                self.snapshots[slot] = Some(current);
                current.update_sustain(param, 0.0);
            }
        }
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}

fn follow(param: &mut FloatParamS, leader: &FloatParamS, round: u64, envelope: Option<u8>) {
    if envelope.is_some() {
        return;
    }

    match leader.round_buffer(round) {
        Some(buffer) => param.set_driven_buffer(round, buffer),
        None => {
            if (param.get_value() - leader.get_value()).abs() > 1e-12 {
                param.set_value(leader.get_value());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: Frequency = 44100.0;
    const BLOCK: usize = 512;

    fn setup() -> (Voice, VoiceParams, [Envelope; ENVELOPES], [Frequency; midi::NOTES]) {
        let mut voice = Voice::new();
        voice.set_sample_rate(SAMPLE_RATE);
        voice.set_block_size(BLOCK);

        let mut params = VoiceParams::new();
        params.set_sample_rate(SAMPLE_RATE);
        params.set_block_size(BLOCK);

        let envelopes: [Envelope; ENVELOPES] = std::array::from_fn(|_| Envelope::new());

        (voice, params, envelopes, midi::note_frequencies())
    }

    fn gate_targets() -> EnvelopeTargets {
        EnvelopeTargets {
            volume: Some(0),
            ..EnvelopeTargets::default()
        }
    }

    fn render_blocks(
        voice: &mut Voice,
        params: &mut VoiceParams,
        envelopes: &[Envelope; ENVELOPES],
        rounds: std::ops::Range<u64>,
    ) -> Vec<Sample> {
        let mut rng = Rng::new(7);
        let mut output = Vec::new();

        for round in rounds {
            params.render_leaders(round, BLOCK);
            voice.render(round, BLOCK, params, envelopes, &mut rng);
            output.extend_from_slice(&voice.buffer()[0][..BLOCK]);
        }

        output
    }

    #[test]
    fn test_note_on_produces_audio() {
        let (mut voice, mut params, envelopes, frequencies) = setup();

        voice.note_on(
            0.0,
            0,
            midi::NOTE_A_4,
            1.0,
            1,
            &params,
            &envelopes,
            gate_targets(),
            &frequencies,
            None,
        );

        let output = render_blocks(&mut voice, &mut params, &envelopes, 1..5);

        assert!(output.iter().any(|&sample| sample.abs() > 0.01));
        assert_eq!(voice.note(), midi::NOTE_A_4);
        assert!(voice.is_on());
    }

    #[test]
    fn test_release_fades_to_silence_and_turns_off() {
        let (mut voice, mut params, envelopes, frequencies) = setup();

        voice.note_on(
            0.0,
            0,
            69,
            1.0,
            1,
            &params,
            &envelopes,
            gate_targets(),
            &frequencies,
            None,
        );

        render_blocks(&mut voice, &mut params, &envelopes, 1..10);

        let release = voice.note_off(0.0, &envelopes);
        assert!((release - 0.1).abs() < 1e-9, "default release is 100 ms");

        // 0.105 s of release at 44.1 kHz is just over 9 blocks of 512.
        let output = render_blocks(&mut voice, &mut params, &envelopes, 10..25);

        assert!(!voice.is_on(), "voice must turn off after the release");
        assert!(
            output[output.len() - BLOCK..]
                .iter()
                .all(|&sample| sample.abs() < 1e-4),
            "tail must be silent"
        );
    }

    #[test]
    fn test_velocity_scales_level() {
        let (mut voice, mut params, envelopes, frequencies) = setup();

        voice.note_on(
            0.0,
            0,
            69,
            1.0,
            1,
            &params,
            &envelopes,
            gate_targets(),
            &frequencies,
            None,
        );
        let loud = render_blocks(&mut voice, &mut params, &envelopes, 1..6);
        let loud_peak = loud.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));

        let (mut soft_voice, mut soft_params, soft_envelopes, frequencies) = setup();
        soft_voice.note_on(
            0.0,
            0,
            69,
            0.25,
            1,
            &soft_params,
            &soft_envelopes,
            gate_targets(),
            &frequencies,
            None,
        );
        let soft = render_blocks(&mut soft_voice, &mut soft_params, &soft_envelopes, 1..6);
        let soft_peak = soft.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));

        assert!(loud_peak > soft_peak * 2.0);
    }

    #[test]
    fn test_phase_machine_progression() {
        let (mut voice, mut params, mut envelopes, frequencies) = setup();

        envelopes[0].attack_time.set_value(0.01);
        envelopes[0].decay_time.set_value(0.01);
        envelopes[0].update();

        voice.note_on(
            0.0,
            0,
            60,
            1.0,
            1,
            &params,
            &envelopes,
            gate_targets(),
            &frequencies,
            None,
        );

        assert_eq!(voice.phase(), VoicePhase::Started);

        render_blocks(&mut voice, &mut params, &envelopes, 1..6);
        assert_eq!(voice.phase(), VoicePhase::Sustained);

        voice.note_off(0.0, &envelopes);
        assert_eq!(voice.phase(), VoicePhase::Releasing);

        render_blocks(&mut voice, &mut params, &envelopes, 6..20);
        assert_eq!(voice.phase(), VoicePhase::Off);
    }

    #[test]
    fn test_retrigger_does_not_snap_to_zero() {
        let (mut voice, mut params, envelopes, frequencies) = setup();

        voice.note_on(
            0.0,
            0,
            60,
            1.0,
            1,
            &params,
            &envelopes,
            gate_targets(),
            &frequencies,
            None,
        );
        render_blocks(&mut voice, &mut params, &envelopes, 1..10);

        // Retrigger with a different note while fully sounding.
        voice.note_on(
            0.0,
            0,
            72,
            1.0,
            2,
            &params,
            &envelopes,
            gate_targets(),
            &frequencies,
            Some(60),
        );

        let mut rng = Rng::new(7);
        params.render_leaders(10, BLOCK);
        voice.render(10, BLOCK, &params, &envelopes, &mut rng);

        // The first sample after the retrigger stays near the sustain
        // level rather than jumping to the envelope's initial 0.
        let first = voice.buffer()[0][0].abs();
        let sustain_level = 0.7 * 0.75; // envelope sustain x amplitude default

        assert!(
            first < sustain_level + 0.2,
            "no spike on retrigger: {}",
            first
        );
        assert_eq!(voice.note(), 72);
    }

    #[test]
    fn test_portamento_glides_between_notes() {
        let (mut voice, mut params, envelopes, frequencies) = setup();

        params.portamento_length.set_value(0.05);

        voice.note_on(
            0.0,
            0,
            81, // A5
            1.0,
            1,
            &params,
            &envelopes,
            gate_targets(),
            &frequencies,
            Some(midi::NOTE_A_4),
        );

        let mut rng = Rng::new(7);
        params.render_leaders(1, BLOCK);
        voice.render(1, BLOCK, &params, &envelopes, &mut rng);

        let early = voice.oscillator.frequency.get_value();

        for round in 2..8u64 {
            params.render_leaders(round, BLOCK);
            voice.render(round, BLOCK, &params, &envelopes, &mut rng);
        }

        let late = voice.oscillator.frequency.get_value();

        assert!(early < 880.0 - 1.0, "glide still in progress: {}", early);
        assert!((late - 880.0).abs() < 1.0, "glide settles on A5: {}", late);
    }
}
