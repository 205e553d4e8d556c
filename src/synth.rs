//! The synthesizer façade
//!
//! Owns the whole signal tree: the shared voice parameter leaders, the
//! envelopes, LFOs and macros, the voice pool, the note stack and the
//! effects chain. MIDI events arrive through the `note_on` /
//! `control_change` family with a sample offset into the next block;
//! configuration changes arrive as [`Message`] values over a lock-free
//! SPSC ring from the GUI thread and are drained at the start of every
//! rendered block. `generate_samples` runs the master pass: messages,
//! macros, LFO routing, leader parameters, voices, bus, effects chain.
//!
//! Every parameter is addressed by a [`ParamId`] issued by the registry
//! built at construction time; names are the 1-7 uppercase ASCII
//! identifiers used by the preset format.

use std::collections::HashMap;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::debug;

use crate::dsp::envelope::{Envelope, ENVELOPES};
use crate::dsp::effects::Effects;
use crate::dsp::lfo::{Lfo, LFOS};
use crate::dsp::macros::{Macro, MACROS};
use crate::dsp::midi_controller::MidiController;
use crate::dsp::oscillator;
use crate::dsp::param::{ByteParam, FloatParamS};
use crate::dsp::signal_producer::{
    produce, SignalProducer, DEFAULT_BLOCK_SIZE, DEFAULT_BPM, DEFAULT_SAMPLE_RATE,
};
use crate::dsp::voice::{EnvelopeTargets, Voice, VoiceParams};
use crate::math::{self, Rng};
use crate::midi::{self, Channel, Note};
use crate::note_stack::NoteStack;
use crate::{Frequency, Number, Sample, Seconds};

pub const VOICES: usize = 16;

pub const NOTE_HANDLING_MONOPHONIC: u8 = 0;
pub const NOTE_HANDLING_MONOPHONIC_HOLD: u8 = 1;
pub const NOTE_HANDLING_POLYPHONIC: u8 = 2;
pub const NOTE_HANDLING_POLYPHONIC_HOLD: u8 = 3;

const MESSAGE_QUEUE_CAPACITY: usize = 1024;
const RNG_SEED: u64 = 0x5e3a;

// ---------------------------------------------------------------------------
// Controller ids
// ---------------------------------------------------------------------------

/// A controller source id: 0 is none, 1-119 are MIDI CCs, the rest are
/// synth-internal sources. Serialized as `id / 256` with the `ctl`
/// suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(pub u8);

impl ControllerId {
    pub const NONE: Self = Self(0);
    pub const PITCH_WHEEL: Self = Self(128);
    pub const NOTE: Self = Self(129);
    pub const VELOCITY: Self = Self(130);
    pub const CHANNEL_PRESSURE: Self = Self(155);

    pub const MACRO_FIRST: u8 = 131;
    pub const LFO_FIRST: u8 = 141;
    pub const ENVELOPE_FIRST: u8 = 149;
    pub const MAX_CONTROLLER_ID: u8 = 155;

    pub fn cc(controller: midi::Controller) -> Self {
        debug_assert!((1..=midi::CC_MAX).contains(&controller));
        Self(controller)
    }

    pub fn macro_(index: usize) -> Self {
        debug_assert!(index < MACROS);
        Self(Self::MACRO_FIRST + index as u8)
    }

    pub fn lfo(index: usize) -> Self {
        debug_assert!(index < LFOS);
        Self(Self::LFO_FIRST + index as u8)
    }

    pub fn envelope(index: usize) -> Self {
        debug_assert!(index < ENVELOPES);
        Self(Self::ENVELOPE_FIRST + index as u8)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn as_midi_cc(self) -> Option<midi::Controller> {
        (1..=midi::CC_MAX).contains(&self.0).then_some(self.0)
    }

    pub fn as_macro(self) -> Option<usize> {
        let index = self.0.wrapping_sub(Self::MACRO_FIRST) as usize;
        (index < MACROS).then_some(index)
    }

    pub fn as_lfo(self) -> Option<usize> {
        let index = self.0.wrapping_sub(Self::LFO_FIRST) as usize;
        (index < LFOS).then_some(index)
    }

    pub fn as_envelope(self) -> Option<usize> {
        let index = self.0.wrapping_sub(Self::ENVELOPE_FIRST) as usize;
        (index < ENVELOPES).then_some(index)
    }

    pub fn is_valid(self) -> bool {
        self.is_none()
            || self.tracks_values()
            || self.as_macro().is_some()
            || self.as_lfo().is_some()
            || self.as_envelope().is_some()
    }

    /// Value-backed controllers the synth tracks per channel.
    fn tracks_values(self) -> bool {
        self.as_midi_cc().is_some()
            || self == Self::PITCH_WHEEL
            || self == Self::NOTE
            || self == Self::VELOCITY
            || self == Self::CHANNEL_PRESSURE
    }
}

const TRACKED_CONTROLLERS: usize = 156;

// ---------------------------------------------------------------------------
// Parameter registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Byte,
    Toggle,
}

impl ParamKind {
    pub fn is_discrete(self) -> bool {
        !matches!(self, Self::Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceField {
    Waveform,
    Amplitude,
    VelocitySensitivity,
    Folding,
    PortamentoLength,
    PortamentoDepth,
    Detune,
    FineDetune,
    Subharmonic,
    UnisonCount,
    UnisonSpread,
    NoiseLevel,
    Panning,
    Volume,
    Harmonic(u8),
    Filter1Type,
    Filter1LogScale,
    Filter1Frequency,
    Filter1Q,
    Filter1Gain,
    Filter2Type,
    Filter2LogScale,
    Filter2Frequency,
    Filter2Q,
    Filter2Gain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeField {
    Amount,
    Initial,
    Delay,
    Attack,
    Peak,
    Hold,
    Decay,
    Sustain,
    Release,
    Final,
    UpdateMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LfoField {
    Waveform,
    Frequency,
    Phase,
    Min,
    Max,
    Amount,
    Distortion,
    Randomness,
    TempoSync,
    Center,
    FreqLogScale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacroField {
    Input,
    Min,
    Max,
    Amount,
    Distortion,
    Randomness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideChainField {
    Threshold,
    Ratio,
    Attack,
    Release,
    Mode,
    MakeupGain,
    Curve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectsField {
    Volume1,
    Volume2,
    Volume3,
    OverdriveLevel,
    DistortionLevel,
    Filter1Type,
    Filter1LogScale,
    Filter1Frequency,
    Filter1Q,
    Filter1Gain,
    Filter2Type,
    Filter2LogScale,
    Filter2Frequency,
    Filter2Q,
    Filter2Gain,
    ChorusDelayTime,
    ChorusFrequency,
    ChorusDepth,
    ChorusFeedback,
    ChorusDampingFrequency,
    ChorusDampingGain,
    ChorusWidth,
    ChorusHighPassFrequency,
    ChorusWet,
    ChorusDry,
    ChorusTempoSync,
    ChorusLogScale,
    EchoDelayTime,
    EchoFeedback,
    EchoDampingFrequency,
    EchoDampingGain,
    EchoWidth,
    EchoHighPassFrequency,
    EchoDistortion,
    EchoWet,
    EchoDry,
    EchoTempoSync,
    EchoLogScale,
    EchoSideChain(SideChainField),
    ReverbType,
    ReverbRoomReflectivity,
    ReverbDampingFrequency,
    ReverbDampingGain,
    ReverbWidth,
    ReverbHighPassFrequency,
    ReverbDistortion,
    ReverbWet,
    ReverbDry,
    ReverbLogScale,
    ReverbSideChain(SideChainField),
    TapeSaturation,
    TapeColor,
    TapeHiss,
    TapeWnfAmp,
    TapeWnfSpeed,
    TapeStereoWnf,
    TapeWet,
    TapeDry,
    TapeAtEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamTarget {
    NoteHandling,
    Voice(VoiceField),
    Envelope(u8, EnvelopeField),
    Lfo(u8, LfoField),
    Macro(u8, MacroField),
    Effects(EffectsField),
}

struct ParamDef {
    name: String,
    kind: ParamKind,
    target: ParamTarget,
}

fn build_registry() -> Vec<ParamDef> {
    use EffectsField as E;
    use EnvelopeField as N;
    use LfoField as L;
    use MacroField as M;
    use ParamKind::{Byte, Float, Toggle};
    use ParamTarget as T;
    use SideChainField as S;
    use VoiceField as V;

    let mut defs: Vec<ParamDef> = Vec::with_capacity(330);

    {
        let mut def = |name: String, kind: ParamKind, target: ParamTarget| {
            debug_assert!(
                !name.is_empty()
                    && name.len() <= 7
                    && name
                        .bytes()
                        .all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit()),
                "invalid param name: {}",
                name
            );
            defs.push(ParamDef { name, kind, target });
        };

        def("NH".into(), Byte, T::NoteHandling);

        for (name, kind, field) in [
            ("WAV", Byte, V::Waveform),
            ("AMP", Float, V::Amplitude),
            ("VS", Float, V::VelocitySensitivity),
            ("FLD", Float, V::Folding),
            ("PRT", Float, V::PortamentoLength),
            ("PRD", Float, V::PortamentoDepth),
            ("DTN", Float, V::Detune),
            ("FIN", Float, V::FineDetune),
            ("SUB", Float, V::Subharmonic),
            ("UNI", Byte, V::UnisonCount),
            ("UNW", Float, V::UnisonSpread),
            ("NOI", Float, V::NoiseLevel),
            ("PAN", Float, V::Panning),
            ("VOL", Float, V::Volume),
        ] {
            def(name.into(), kind, T::Voice(field));
        }

        for harmonic in 0..oscillator::CUSTOM_WAVEFORM_HARMONICS {
            def(
                format!("C{}", harmonic + 1),
                Float,
                T::Voice(V::Harmonic(harmonic as u8)),
            );
        }

        for (name, kind, field) in [
            ("F1TYP", Byte, V::Filter1Type),
            ("F1LOG", Toggle, V::Filter1LogScale),
            ("F1FRQ", Float, V::Filter1Frequency),
            ("F1Q", Float, V::Filter1Q),
            ("F1G", Float, V::Filter1Gain),
            ("F2TYP", Byte, V::Filter2Type),
            ("F2LOG", Toggle, V::Filter2LogScale),
            ("F2FRQ", Float, V::Filter2Frequency),
            ("F2Q", Float, V::Filter2Q),
            ("F2G", Float, V::Filter2Gain),
        ] {
            def(name.into(), kind, T::Voice(field));
        }

        for envelope in 0..ENVELOPES {
            let index = envelope as u8;
            let n = envelope + 1;

            for (suffix, kind, field) in [
                ("AMT", Float, N::Amount),
                ("INI", Float, N::Initial),
                ("DEL", Float, N::Delay),
                ("ATK", Float, N::Attack),
                ("PK", Float, N::Peak),
                ("HLD", Float, N::Hold),
                ("DEC", Float, N::Decay),
                ("SUS", Float, N::Sustain),
                ("REL", Float, N::Release),
                ("FIN", Float, N::Final),
                ("UPD", Byte, N::UpdateMode),
            ] {
                def(format!("N{}{}", n, suffix), kind, T::Envelope(index, field));
            }
        }

        for lfo in 0..LFOS {
            let index = lfo as u8;
            let n = lfo + 1;

            for (suffix, kind, field) in [
                ("WAV", Byte, L::Waveform),
                ("FRQ", Float, L::Frequency),
                ("PHS", Float, L::Phase),
                ("MIN", Float, L::Min),
                ("MAX", Float, L::Max),
                ("AMT", Float, L::Amount),
                ("DST", Float, L::Distortion),
                ("RND", Float, L::Randomness),
                ("SYN", Toggle, L::TempoSync),
                ("CEN", Toggle, L::Center),
                ("LOG", Toggle, L::FreqLogScale),
            ] {
                def(format!("L{}{}", n, suffix), kind, T::Lfo(index, field));
            }
        }

        for macro_index in 0..MACROS {
            let index = macro_index as u8;
            let n = macro_index + 1;

            for (suffix, field) in [
                ("IN", M::Input),
                ("MIN", M::Min),
                ("MAX", M::Max),
                ("AMT", M::Amount),
                ("DST", M::Distortion),
                ("RND", M::Randomness),
            ] {
                def(format!("M{}{}", n, suffix), Float, T::Macro(index, field));
            }
        }

        for (name, kind, field) in [
            ("EV1V", Float, E::Volume1),
            ("EV2V", Float, E::Volume2),
            ("EV3V", Float, E::Volume3),
            ("EOG", Float, E::OverdriveLevel),
            ("EDG", Float, E::DistortionLevel),
            ("EF1TYP", Byte, E::Filter1Type),
            ("EF1LOG", Toggle, E::Filter1LogScale),
            ("EF1FRQ", Float, E::Filter1Frequency),
            ("EF1Q", Float, E::Filter1Q),
            ("EF1G", Float, E::Filter1Gain),
            ("EF2TYP", Byte, E::Filter2Type),
            ("EF2LOG", Toggle, E::Filter2LogScale),
            ("EF2FRQ", Float, E::Filter2Frequency),
            ("EF2Q", Float, E::Filter2Q),
            ("EF2G", Float, E::Filter2Gain),
            ("ECDEL", Float, E::ChorusDelayTime),
            ("ECFRQ", Float, E::ChorusFrequency),
            ("ECDPT", Float, E::ChorusDepth),
            ("ECFB", Float, E::ChorusFeedback),
            ("ECDF", Float, E::ChorusDampingFrequency),
            ("ECDG", Float, E::ChorusDampingGain),
            ("ECWID", Float, E::ChorusWidth),
            ("ECHPF", Float, E::ChorusHighPassFrequency),
            ("ECWET", Float, E::ChorusWet),
            ("ECDRY", Float, E::ChorusDry),
            ("ECSYN", Toggle, E::ChorusTempoSync),
            ("ECLOG", Toggle, E::ChorusLogScale),
            ("EEDEL", Float, E::EchoDelayTime),
            ("EEFB", Float, E::EchoFeedback),
            ("EEDF", Float, E::EchoDampingFrequency),
            ("EEDG", Float, E::EchoDampingGain),
            ("EEWID", Float, E::EchoWidth),
            ("EEHPF", Float, E::EchoHighPassFrequency),
            ("EEDST", Float, E::EchoDistortion),
            ("EEWET", Float, E::EchoWet),
            ("EEDRY", Float, E::EchoDry),
            ("EESYN", Toggle, E::EchoTempoSync),
            ("EELOG", Toggle, E::EchoLogScale),
            ("EECTH", Float, E::EchoSideChain(S::Threshold)),
            ("EECRS", Float, E::EchoSideChain(S::Ratio)),
            ("EECAT", Float, E::EchoSideChain(S::Attack)),
            ("EECRL", Float, E::EchoSideChain(S::Release)),
            ("EECMD", Byte, E::EchoSideChain(S::Mode)),
            ("EECMG", Float, E::EchoSideChain(S::MakeupGain)),
            ("EECCV", Byte, E::EchoSideChain(S::Curve)),
            ("ERTYP", Byte, E::ReverbType),
            ("ERRS", Float, E::ReverbRoomReflectivity),
            ("ERDF", Float, E::ReverbDampingFrequency),
            ("ERDG", Float, E::ReverbDampingGain),
            ("ERWID", Float, E::ReverbWidth),
            ("ERHPF", Float, E::ReverbHighPassFrequency),
            ("ERDST", Float, E::ReverbDistortion),
            ("ERWET", Float, E::ReverbWet),
            ("ERDRY", Float, E::ReverbDry),
            ("ERLOG", Toggle, E::ReverbLogScale),
            ("ERCTH", Float, E::ReverbSideChain(S::Threshold)),
            ("ERCRS", Float, E::ReverbSideChain(S::Ratio)),
            ("ERCAT", Float, E::ReverbSideChain(S::Attack)),
            ("ERCRL", Float, E::ReverbSideChain(S::Release)),
            ("ERCMD", Byte, E::ReverbSideChain(S::Mode)),
            ("ERCMG", Float, E::ReverbSideChain(S::MakeupGain)),
            ("ERCCV", Byte, E::ReverbSideChain(S::Curve)),
            ("ETSAT", Float, E::TapeSaturation),
            ("ETCLR", Float, E::TapeColor),
            ("ETHSS", Float, E::TapeHiss),
            ("ETWFA", Float, E::TapeWnfAmp),
            ("ETWFS", Float, E::TapeWnfSpeed),
            ("ETSWF", Float, E::TapeStereoWnf),
            ("ETWET", Float, E::TapeWet),
            ("ETDRY", Float, E::TapeDry),
            ("ETEND", Toggle, E::TapeAtEnd),
        ] {
            def(name.into(), kind, T::Effects(field));
        }
    }

    defs
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// GUI-to-audio messages; processed before rendering each block. The
/// audio thread never allocates while handling them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    SetParam { param: ParamId, ratio: Number },
    AssignController { param: ParamId, controller: ControllerId },
    RefreshParam { param: ParamId },
    Clear,
}

/// The GUI-thread half of the message ring. Pushing never blocks; a full
/// ring drops the message and reports `false` so the caller can retry on
/// the next frame.
pub struct MessageSender {
    producer: HeapProd<Message>,
}

impl MessageSender {
    pub fn push(&mut self, message: Message) -> bool {
        self.producer.try_push(message).is_ok()
    }
}

// ---------------------------------------------------------------------------
// The synth
// ---------------------------------------------------------------------------

pub struct Synth {
    sample_rate: Frequency,
    block_size: usize,
    bpm: Number,
    suspended: bool,
    registry: Vec<ParamDef>,
    name_to_param: HashMap<String, ParamId>,
    default_ratios: Vec<Number>,
    controller_assignments: Vec<ControllerId>,
    envelope_targets: EnvelopeTargets,
    macro_input_params: [ParamId; MACROS],
    note_handling: ByteParam,
    voice_params: VoiceParams,
    envelopes: [Envelope; ENVELOPES],
    lfos: [Lfo; LFOS],
    macros: [Macro; MACROS],
    effects: Effects,
    voices: Vec<Voice>,
    note_stack: NoteStack,
    frequencies: [Frequency; midi::NOTES],
    midi_controllers: Vec<MidiController>,
    previous_controller_message: Vec<(Channel, Number)>,
    messages: HeapCons<Message>,
    sender: Option<HeapProd<Message>>,
    bus: Vec<Vec<Sample>>,
    lfo_scratch: Vec<Sample>,
    macro_routed_values: Vec<Number>,
    rng: Rng,
    next_voice_age: u64,
    requested_program: Option<u8>,
}

impl Default for Synth {
    fn default() -> Self {
        Self::new()
    }
}

impl Synth {
    pub fn new() -> Self {
        math::initialize_tables();

        let registry = build_registry();
        let name_to_param: HashMap<String, ParamId> = registry
            .iter()
            .enumerate()
            .map(|(index, def)| (def.name.clone(), ParamId(index as u16)))
            .collect();

        let macro_input_params = std::array::from_fn(|index| {
            name_to_param
                .get(&format!("M{}IN", index + 1))
                .copied()
                .expect("macro input param registered")
        });

        let (sender, messages) = HeapRb::<Message>::new(MESSAGE_QUEUE_CAPACITY).split();

        let mut synth = Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            bpm: DEFAULT_BPM,
            suspended: false,
            controller_assignments: vec![ControllerId::NONE; registry.len()],
            default_ratios: Vec::new(),
            registry,
            name_to_param,
            envelope_targets: EnvelopeTargets::default(),
            macro_input_params,
            note_handling: ByteParam::new(
                NOTE_HANDLING_MONOPHONIC,
                NOTE_HANDLING_POLYPHONIC_HOLD,
                NOTE_HANDLING_POLYPHONIC,
            ),
            voice_params: VoiceParams::new(),
            envelopes: std::array::from_fn(|_| Envelope::new()),
            lfos: std::array::from_fn(|_| Lfo::new()),
            macros: std::array::from_fn(|_| Macro::new()),
            effects: Effects::new(),
            voices: (0..VOICES).map(|_| Voice::new()).collect(),
            note_stack: NoteStack::new(),
            frequencies: midi::note_frequencies(),
            midi_controllers: (0..TRACKED_CONTROLLERS)
                .map(|_| MidiController::new(0.0))
                .collect(),
            previous_controller_message: vec![
                (midi::CHANNEL_MAX + 1, -1.0);
                TRACKED_CONTROLLERS
            ],
            messages,
            sender: Some(sender),
            bus: vec![vec![0.0; DEFAULT_BLOCK_SIZE]; 2],
            lfo_scratch: vec![0.0; DEFAULT_BLOCK_SIZE],
            macro_routed_values: Vec::new(),
            rng: Rng::new(RNG_SEED),
            next_voice_age: 0,
            requested_program: None,
        };

        // Everything is still pristine: capture the default ratios the
        // serializer normalizes against.
        synth.default_ratios = (0..synth.registry.len())
            .map(|index| synth.get_param_ratio(ParamId(index as u16)))
            .collect();
        synth.macro_routed_values = vec![-1.0; synth.registry.len()];

        synth.apply_default_assignments();
        synth
    }

    /// The default patch gates voice volume with envelope 1, so notes
    /// attack and release instead of droning.
    fn apply_default_assignments(&mut self) {
        if let Some(volume) = self.param_id_by_name("VOL") {
            self.assign_controller(volume, ControllerId::envelope(0));
        }
    }

    /// The GUI-thread message producer; can be taken exactly once.
    pub fn take_message_sender(&mut self) -> Option<MessageSender> {
        self.sender
            .take()
            .map(|producer| MessageSender { producer })
    }

    // -- registry ----------------------------------------------------------

    pub fn param_count(&self) -> usize {
        self.registry.len()
    }

    pub fn param_name(&self, param: ParamId) -> &str {
        &self.registry[param.0 as usize].name
    }

    pub fn param_kind(&self, param: ParamId) -> ParamKind {
        self.registry[param.0 as usize].kind
    }

    pub fn param_id_by_name(&self, name: &str) -> Option<ParamId> {
        self.name_to_param.get(name).copied()
    }

    pub fn get_param_controller(&self, param: ParamId) -> ControllerId {
        self.controller_assignments[param.0 as usize]
    }

    pub fn get_param_default_ratio(&self, param: ParamId) -> Number {
        self.default_ratios[param.0 as usize]
    }

    // -- suspension & configuration ---------------------------------------

    pub fn suspend(&mut self) {
        self.all_sounds_off();
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Only legal while suspended.
    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        debug_assert!(self.suspended, "sample rate change while running");
        debug_assert!(sample_rate > 0.0);

        self.sample_rate = sample_rate;
        self.voice_params.set_sample_rate(sample_rate);
        self.effects.set_sample_rate(sample_rate);

        for lfo in self.lfos.iter_mut() {
            lfo.set_sample_rate(sample_rate);
        }

        for voice in self.voices.iter_mut() {
            voice.set_sample_rate(sample_rate);
        }
    }

    /// Only legal while suspended.
    pub fn set_block_size(&mut self, block_size: usize) {
        debug_assert!(self.suspended, "block size change while running");
        debug_assert!(block_size > 0);

        self.block_size = block_size;
        self.voice_params.set_block_size(block_size);
        self.effects.set_block_size(block_size);

        for lfo in self.lfos.iter_mut() {
            lfo.set_block_size(block_size);
        }

        for voice in self.voices.iter_mut() {
            voice.set_block_size(block_size);
        }

        for channel in self.bus.iter_mut() {
            channel.clear();
            channel.resize(block_size, 0.0);
        }

        self.lfo_scratch.clear();
        self.lfo_scratch.resize(block_size, 0.0);
    }

    pub fn get_sample_rate(&self) -> Frequency {
        self.sample_rate
    }

    pub fn get_block_size(&self) -> usize {
        self.block_size
    }

    pub fn set_bpm(&mut self, bpm: Number) {
        debug_assert!(bpm > 0.0);

        self.bpm = bpm;
        self.effects.set_bpm(bpm);

        for lfo in self.lfos.iter_mut() {
            lfo.set_bpm(bpm);
        }
    }

    // -- MIDI input --------------------------------------------------------

    pub fn note_on(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        note: Note,
        velocity: Number,
    ) {
        if !midi::is_valid_channel(channel) || !midi::is_valid_note(note) {
            return;
        }

        let previous_top = self.note_stack.top().map(|(_, top_note, _)| top_note);
        self.note_stack.push(channel, note, velocity);

        self.route_controller_event(
            ControllerId::NOTE,
            channel,
            time_offset,
            note as Number * midi::BYTE_SCALE,
        );
        self.route_controller_event(ControllerId::VELOCITY, channel, time_offset, velocity);

        match self.note_handling.get_value() {
            NOTE_HANDLING_MONOPHONIC | NOTE_HANDLING_MONOPHONIC_HOLD => {
                self.mono_note_on(time_offset, channel, note, velocity, previous_top);
            }
            _ => {
                self.poly_note_on(time_offset, channel, note, velocity, previous_top);
            }
        }
    }

    pub fn note_off(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        note: Note,
        _velocity: Number,
    ) {
        if !midi::is_valid_channel(channel) || !midi::is_valid_note(note) {
            return;
        }

        let was_top = self.note_stack.is_top(channel, note);
        self.note_stack.remove(channel, note);

        match self.note_handling.get_value() {
            NOTE_HANDLING_MONOPHONIC => {
                if was_top {
                    self.release_voice_at(0, time_offset);
                }
            }
            NOTE_HANDLING_MONOPHONIC_HOLD => {
                if was_top {
                    match self.note_stack.top() {
                        Some((_, unmasked_note, _)) => {
                            let frequency = self.frequencies[unmasked_note as usize];
                            let portamento =
                                self.voice_params.portamento_length.get_value();
                            self.voices[0].change_note(
                                time_offset,
                                unmasked_note,
                                frequency,
                                portamento,
                            );
                        }
                        None => self.release_voice_at(0, time_offset),
                    }
                }
            }
            NOTE_HANDLING_POLYPHONIC_HOLD => {
                if self.note_stack.is_empty() {
                    for index in 0..self.voices.len() {
                        self.release_voice_at(index, time_offset);
                    }
                }
            }
            _ => {
                for index in 0..self.voices.len() {
                    let voice = &self.voices[index];

                    if voice.is_on()
                        && !voice.is_released()
                        && voice.channel() == channel
                        && voice.note() == note
                    {
                        self.release_voice_at(index, time_offset);
                    }
                }
            }
        }
    }

    fn mono_note_on(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        note: Note,
        velocity: Number,
        previous_top: Option<Note>,
    ) {
        if self.voices[0].is_on() && !self.voices[0].is_released() {
            // Legato: steal the pitch without restarting the envelopes.
            let frequency = self.frequencies[note as usize];
            let portamento = self.voice_params.portamento_length.get_value();
            self.voices[0].change_note(time_offset, note, frequency, portamento);
            return;
        }

        let age = self.next_voice_age;
        self.next_voice_age += 1;

        self.voices[0].note_on(
            time_offset,
            channel,
            note,
            velocity,
            age,
            &self.voice_params,
            &self.envelopes,
            self.envelope_targets,
            &self.frequencies,
            previous_top,
        );
    }

    fn poly_note_on(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        note: Note,
        velocity: Number,
        previous_top: Option<Note>,
    ) {
        let index = self.allocate_voice(channel, note);
        let age = self.next_voice_age;
        self.next_voice_age += 1;

        self.voices[index].note_on(
            time_offset,
            channel,
            note,
            velocity,
            age,
            &self.voice_params,
            &self.envelopes,
            self.envelope_targets,
            &self.frequencies,
            previous_top,
        );
    }

    /// Voice allocation: retrigger a releasing voice holding the same
    /// (channel, note); otherwise take a free voice; otherwise steal the
    /// oldest sounding one.
    fn allocate_voice(&mut self, channel: Channel, note: Note) -> usize {
        if let Some(index) = self.voices.iter().position(|voice| {
            voice.is_released() && voice.channel() == channel && voice.note() == note
        }) {
            return index;
        }

        if let Some(index) = self.voices.iter().position(|voice| !voice.is_on()) {
            return index;
        }

        self.voices
            .iter()
            .enumerate()
            .min_by_key(|(_, voice)| voice.age())
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    fn release_voice_at(&mut self, index: usize, time_offset: Seconds) {
        if self.voices[index].is_on() && !self.voices[index].is_released() {
            self.voices[index].note_off(time_offset, &self.envelopes);
        }
    }

    pub fn control_change(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        controller: midi::Controller,
        value: midi::Byte,
    ) {
        if !midi::is_valid_channel(channel) || value > 127 {
            return;
        }

        match controller {
            120 => self.all_sounds_off(),
            123 => self.all_notes_off(),
            1..=119 => {
                self.route_controller_event(
                    ControllerId::cc(controller),
                    channel,
                    time_offset,
                    value as Number * midi::BYTE_SCALE,
                );
            }
            _ => {}
        }
    }

    pub fn pitch_wheel_change(&mut self, time_offset: Seconds, channel: Channel, value: u16) {
        if !midi::is_valid_channel(channel) || value >= 16384 {
            return;
        }

        self.route_controller_event(
            ControllerId::PITCH_WHEEL,
            channel,
            time_offset,
            value as Number * midi::WORD_SCALE,
        );
    }

    pub fn channel_pressure(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        pressure: midi::Byte,
    ) {
        if !midi::is_valid_channel(channel) || pressure > 127 {
            return;
        }

        self.route_controller_event(
            ControllerId::CHANNEL_PRESSURE,
            channel,
            time_offset,
            pressure as Number * midi::BYTE_SCALE,
        );
    }

    /// Polyphonic aftertouch folds into the channel pressure controller
    /// of the note's channel.
    pub fn aftertouch(
        &mut self,
        time_offset: Seconds,
        channel: Channel,
        note: Note,
        pressure: midi::Byte,
    ) {
        if !midi::is_valid_note(note) {
            return;
        }

        self.channel_pressure(time_offset, channel, pressure);
    }

    /// Program changes are recorded for the host (which owns the bank) to
    /// pick up after the block.
    pub fn program_change(&mut self, _time_offset: Seconds, program: midi::Byte) {
        if program <= 127 {
            self.requested_program = Some(program);
        }
    }

    pub fn take_requested_program(&mut self) -> Option<u8> {
        self.requested_program.take()
    }

    pub fn all_notes_off(&mut self) {
        for index in 0..self.voices.len() {
            self.release_voice_at(index, 0.0);
        }

        self.note_stack.clear();
    }

    pub fn all_sounds_off(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.reset();
        }

        self.note_stack.clear();
    }

    pub fn reset_all_controllers(&mut self) {
        for controller in self.midi_controllers.iter_mut() {
            controller.clear();
        }

        self.previous_controller_message
            .fill((midi::CHANNEL_MAX + 1, -1.0));
    }

    fn route_controller_event(
        &mut self,
        controller: ControllerId,
        channel: Channel,
        time_offset: Seconds,
        value: Number,
    ) {
        let slot = controller.0 as usize;

        if controller.tracks_values() {
            // Some devices send the same message several times with the
            // same timestamp; drop duplicates.
            if self.previous_controller_message[slot] == (channel, value) {
                return;
            }

            self.previous_controller_message[slot] = (channel, value);
            self.midi_controllers[slot].change(channel, value);
        }

        for index in 0..self.controller_assignments.len() {
            if self.controller_assignments[index] == controller {
                self.set_param_ratio_at(ParamId(index as u16), time_offset, value, true);
            }
        }
    }

    // -- messages ----------------------------------------------------------

    pub fn process_message(&mut self, message: Message) {
        match message {
            Message::SetParam { param, ratio } => {
                if (param.0 as usize) < self.registry.len() {
                    self.set_param_ratio(param, ratio.clamp(0.0, 1.0));
                }
            }
            Message::AssignController { param, controller } => {
                if (param.0 as usize) < self.registry.len() && controller.is_valid() {
                    self.assign_controller(param, controller);
                }
            }
            Message::RefreshParam { param } => {
                // Values are pulled on read; kept for protocol symmetry.
                let _ = param;
            }
            Message::Clear => self.clear(),
        }
    }

    /// Reset every parameter to its default and drop all controller
    /// assignments. A fresh synth re-applies the default envelope gate on
    /// top of this; a preset import does not, so patches that removed the
    /// gate survive a round trip.
    pub fn clear(&mut self) {
        debug!("clearing synth state");

        self.note_handling.reset();

        self.voice_params = VoiceParams::new();
        self.voice_params.set_sample_rate(self.sample_rate);
        self.voice_params.set_block_size(self.block_size);

        for envelope in self.envelopes.iter_mut() {
            envelope.reset();
        }

        for lfo in self.lfos.iter_mut() {
            lfo.reset();
        }

        for macro_ in self.macros.iter_mut() {
            macro_.reset();
        }

        self.effects.reset();
        self.all_sounds_off();
        self.reset_all_controllers();

        for assignment in self.controller_assignments.iter_mut() {
            *assignment = ControllerId::NONE;
        }

        self.envelope_targets = EnvelopeTargets::default();
        self.macro_routed_values.fill(-1.0);
    }

    pub fn assign_controller(&mut self, param: ParamId, controller: ControllerId) {
        let slot = param.0 as usize;

        if slot >= self.controller_assignments.len() {
            return;
        }

        let old = self.controller_assignments[slot];

        if old.tracks_values() {
            self.midi_controllers[old.0 as usize].released();
        }

        self.controller_assignments[slot] = controller;

        if controller.tracks_values() {
            self.midi_controllers[controller.0 as usize].assigned();
        }

        self.refresh_envelope_targets();
    }

    /// Envelopes act on the envelope-capable per-voice parameters; the
    /// assignment table is folded into one lookup for the voices.
    fn refresh_envelope_targets(&mut self) {
        let mut targets = EnvelopeTargets::default();

        for (index, assignment) in self.controller_assignments.iter().enumerate() {
            let Some(envelope) = assignment.as_envelope() else {
                continue;
            };
            let envelope = envelope as u8;

            if let ParamTarget::Voice(field) = self.registry[index].target {
                match field {
                    VoiceField::Amplitude => targets.amplitude = Some(envelope),
                    VoiceField::Volume => targets.volume = Some(envelope),
                    VoiceField::Folding => targets.folding = Some(envelope),
                    VoiceField::Filter1Frequency => targets.filter_1_frequency = Some(envelope),
                    VoiceField::Filter1Q => targets.filter_1_q = Some(envelope),
                    VoiceField::Filter2Frequency => targets.filter_2_frequency = Some(envelope),
                    VoiceField::Filter2Q => targets.filter_2_q = Some(envelope),
                    _ => {}
                }
            }
        }

        self.envelope_targets = targets;
    }

    // -- rendering ---------------------------------------------------------

    /// Render one stereo block: drain messages, update the modulation
    /// sources, render every sounding voice into the bus, and run the
    /// effects chain over it.
    pub fn generate_samples(&mut self, round: u64, sample_count: usize) -> &[Vec<Sample>] {
        debug_assert!(!self.suspended, "rendering while suspended");
        debug_assert!(sample_count <= self.block_size);

        while let Some(message) = self.messages.try_pop() {
            self.process_message(message);
        }

        self.update_macros();
        self.route_lfos(round, sample_count);

        for envelope in self.envelopes.iter_mut() {
            envelope.update();
        }

        self.voice_params.render_leaders(round, sample_count);

        for channel in self.bus.iter_mut() {
            channel[..sample_count].fill(0.0);
        }

        for voice in self.voices.iter_mut() {
            if !voice.is_on() {
                continue;
            }

            voice.render(
                round,
                sample_count,
                &self.voice_params,
                &self.envelopes,
                &mut self.rng,
            );

            for (channel, samples) in self.bus.iter_mut().enumerate() {
                for (mixed, &rendered) in samples[..sample_count]
                    .iter_mut()
                    .zip(voice.buffer()[channel][..sample_count].iter())
                {
                    *mixed += rendered;
                }
            }
        }

        self.effects
            .process(round, &self.bus, sample_count, &mut self.rng)
    }

    /// Macros are evaluated in index order; cyclic routings read the
    /// value a macro produced in the previous block.
    fn update_macros(&mut self) {
        for index in 0..MACROS {
            // Feed the macro's input from whatever controller drives it.
            let input_param = self.macro_input_params[index];
            let assignment = self.controller_assignments[input_param.0 as usize];

            if let Some(value) = self.controller_value(assignment) {
                self.macros[index].input.set_ratio(value);
            }

            self.macros[index].update();
        }

        // Push macro outputs into the parameters they drive; only a
        // changed output re-targets the parameter, so in-flight ramps run
        // to completion instead of being restarted every block.
        for index in 0..self.controller_assignments.len() {
            let assignment = self.controller_assignments[index];

            let Some(macro_index) = assignment.as_macro() else {
                continue;
            };

            let value = self.macros[macro_index].get_value();

            if (self.macro_routed_values[index] - value).abs() > 1e-12 {
                self.macro_routed_values[index] = value;
                self.set_param_ratio_at(ParamId(index as u16), 0.0, value, true);
            }
        }
    }

    /// The current value of a value-backed controller (channel 0 view) or
    /// a macro; LFOs and envelopes have no single block value.
    fn controller_value(&self, controller: ControllerId) -> Option<Number> {
        if controller.tracks_values() {
            return Some(self.midi_controllers[controller.0 as usize].get_value(0));
        }

        controller
            .as_macro()
            .map(|index| self.macros[index].get_value())
    }

    /// Render the LFOs and copy their output into the sample-accurate
    /// parameters they drive, mapped through each parameter's ratio
    /// scaling.
    fn route_lfos(&mut self, round: u64, sample_count: usize) {
        for lfo in self.lfos.iter_mut() {
            lfo.refresh_log_scale();
            produce(lfo, round, sample_count);
        }

        for index in 0..self.controller_assignments.len() {
            let assignment = self.controller_assignments[index];

            let Some(lfo_index) = assignment.as_lfo() else {
                continue;
            };

            let param = ParamId(index as u16);
            let mut scratch = std::mem::take(&mut self.lfo_scratch);

            for (i, slot) in scratch[..sample_count].iter_mut().enumerate() {
                let ratio = self.lfos[lfo_index].state().buffer()[0][i] as Number;
                *slot = self.param_ratio_to_value(param, ratio) as Sample;
            }

            if let Some(target) = self.sample_accurate_param_mut(param) {
                target.set_driven_buffer(round, &scratch[..sample_count]);
            }

            self.lfo_scratch = scratch;
        }
    }

    // -- parameter dispatch ------------------------------------------------

    pub fn get_param_ratio(&self, param: ParamId) -> Number {
        if let Some(target) = self.sample_accurate_param(param) {
            return target.get_ratio();
        }

        self.discrete_param_ratio(param)
    }

    pub fn set_param_ratio(&mut self, param: ParamId, ratio: Number) {
        self.set_param_ratio_at(param, 0.0, ratio, false);
    }

    fn param_ratio_to_value(&self, param: ParamId, ratio: Number) -> Number {
        match self.sample_accurate_param(param) {
            Some(target) => target.ratio_to_value(ratio),
            None => ratio,
        }
    }

    /// Set a parameter's ratio; sample-accurate parameters take a smooth
    /// ramp starting at `time_offset` when `smooth` is set (controller
    /// movements), or an immediate snap otherwise (preset loads).
    fn set_param_ratio_at(
        &mut self,
        param: ParamId,
        time_offset: Seconds,
        ratio: Number,
        smooth: bool,
    ) {
        if let Some(target) = self.sample_accurate_param_mut(param) {
            if smooth {
                target.handle_controller_change(time_offset, ratio);
            } else {
                target.set_ratio(ratio);
            }

            return;
        }

        self.set_discrete_param_ratio(param, ratio);
    }

    /// The sample-accurate (`FloatParamS`) backing of a parameter, if it
    /// has one.
    fn sample_accurate_param(&self, param: ParamId) -> Option<&FloatParamS> {
        use EffectsField as E;
        use LfoField as L;
        use ParamTarget as T;
        use VoiceField as V;

        let this = self;

        Some(match self.registry[param.0 as usize].target {
            T::Voice(V::Amplitude) => &this.voice_params.amplitude,
            T::Voice(V::Folding) => &this.voice_params.folding,
            T::Voice(V::Detune) => &this.voice_params.detune,
            T::Voice(V::FineDetune) => &this.voice_params.fine_detune,
            T::Voice(V::Subharmonic) => &this.voice_params.subharmonic,
            T::Voice(V::Panning) => &this.voice_params.panning,
            T::Voice(V::Volume) => &this.voice_params.volume,
            T::Voice(V::Filter1Frequency) => &this.voice_params.filter_1_frequency,
            T::Voice(V::Filter1Q) => &this.voice_params.filter_1_q,
            T::Voice(V::Filter1Gain) => &this.voice_params.filter_1_gain,
            T::Voice(V::Filter2Frequency) => &this.voice_params.filter_2_frequency,
            T::Voice(V::Filter2Q) => &this.voice_params.filter_2_q,
            T::Voice(V::Filter2Gain) => &this.voice_params.filter_2_gain,
            T::Lfo(index, L::Frequency) => &this.lfos[index as usize].frequency,
            T::Lfo(index, L::Phase) => &this.lfos[index as usize].phase,
            T::Lfo(index, L::Min) => &this.lfos[index as usize].min,
            T::Lfo(index, L::Max) => &this.lfos[index as usize].max,
            T::Lfo(index, L::Amount) => &this.lfos[index as usize].amount,
            T::Lfo(index, L::Distortion) => &this.lfos[index as usize].distortion,
            T::Lfo(index, L::Randomness) => &this.lfos[index as usize].randomness,
            T::Effects(E::Volume1) => &this.effects.volume_1.volume,
            T::Effects(E::Volume2) => &this.effects.volume_2.volume,
            T::Effects(E::Volume3) => &this.effects.volume_3.volume,
            T::Effects(E::OverdriveLevel) => &this.effects.overdrive.level,
            T::Effects(E::DistortionLevel) => &this.effects.distortion.level,
            T::Effects(E::Filter1Frequency) => &this.effects.filter_1.frequency,
            T::Effects(E::Filter1Q) => &this.effects.filter_1.q,
            T::Effects(E::Filter1Gain) => &this.effects.filter_1.gain,
            T::Effects(E::Filter2Frequency) => &this.effects.filter_2.frequency,
            T::Effects(E::Filter2Q) => &this.effects.filter_2.q,
            T::Effects(E::Filter2Gain) => &this.effects.filter_2.gain,
            T::Effects(E::ChorusDelayTime) => this.effects.chorus.delay_time.base(),
            T::Effects(E::ChorusFrequency) => &this.effects.chorus.frequency,
            T::Effects(E::ChorusDepth) => &this.effects.chorus.delay_time.modulation_level,
            T::Effects(E::ChorusFeedback) => &this.effects.chorus.feedback,
            T::Effects(E::ChorusDampingFrequency) => &this.effects.chorus.damping_frequency,
            T::Effects(E::ChorusDampingGain) => &this.effects.chorus.damping_gain,
            T::Effects(E::ChorusWidth) => &this.effects.chorus.width,
            T::Effects(E::ChorusHighPassFrequency) => &this.effects.chorus.high_pass_frequency,
            T::Effects(E::ChorusWet) => &this.effects.chorus.wet,
            T::Effects(E::ChorusDry) => &this.effects.chorus.dry,
            T::Effects(E::EchoDelayTime) => &this.effects.echo.delay_time,
            T::Effects(E::EchoFeedback) => &this.effects.echo.feedback,
            T::Effects(E::EchoDampingFrequency) => &this.effects.echo.damping_frequency,
            T::Effects(E::EchoDampingGain) => &this.effects.echo.damping_gain,
            T::Effects(E::EchoWidth) => &this.effects.echo.width,
            T::Effects(E::EchoHighPassFrequency) => &this.effects.echo.high_pass_frequency,
            T::Effects(E::EchoDistortion) => &this.effects.echo.distortion_level,
            T::Effects(E::EchoWet) => &this.effects.echo.wet,
            T::Effects(E::EchoDry) => &this.effects.echo.dry,
            T::Effects(E::ReverbRoomReflectivity) => &this.effects.reverb.room_reflectivity,
            T::Effects(E::ReverbDampingFrequency) => &this.effects.reverb.damping_frequency,
            T::Effects(E::ReverbDampingGain) => &this.effects.reverb.damping_gain,
            T::Effects(E::ReverbWidth) => &this.effects.reverb.width,
            T::Effects(E::ReverbHighPassFrequency) => &this.effects.reverb.high_pass_frequency,
            T::Effects(E::ReverbDistortion) => &this.effects.reverb.distortion_level,
            T::Effects(E::ReverbWet) => &this.effects.reverb.wet,
            T::Effects(E::ReverbDry) => &this.effects.reverb.dry,
            T::Effects(E::TapeSaturation) => &this.effects.tape_params.saturation,
            T::Effects(E::TapeWnfAmp) => &this.effects.tape_params.wnf_amp,
            T::Effects(E::TapeWet) => &this.effects.tape_params.wet,
            T::Effects(E::TapeDry) => &this.effects.tape_params.dry,
            _ => return None,
        })
    }

    fn sample_accurate_param_mut(&mut self, param: ParamId) -> Option<&mut FloatParamS> {
        use EffectsField as E;
        use LfoField as L;
        use ParamTarget as T;
        use VoiceField as V;

        let this = self;

        Some(match this.registry[param.0 as usize].target {
            T::Voice(V::Amplitude) => &mut this.voice_params.amplitude,
            T::Voice(V::Folding) => &mut this.voice_params.folding,
            T::Voice(V::Detune) => &mut this.voice_params.detune,
            T::Voice(V::FineDetune) => &mut this.voice_params.fine_detune,
            T::Voice(V::Subharmonic) => &mut this.voice_params.subharmonic,
            T::Voice(V::Panning) => &mut this.voice_params.panning,
            T::Voice(V::Volume) => &mut this.voice_params.volume,
            T::Voice(V::Filter1Frequency) => &mut this.voice_params.filter_1_frequency,
            T::Voice(V::Filter1Q) => &mut this.voice_params.filter_1_q,
            T::Voice(V::Filter1Gain) => &mut this.voice_params.filter_1_gain,
            T::Voice(V::Filter2Frequency) => &mut this.voice_params.filter_2_frequency,
            T::Voice(V::Filter2Q) => &mut this.voice_params.filter_2_q,
            T::Voice(V::Filter2Gain) => &mut this.voice_params.filter_2_gain,
            T::Lfo(index, L::Frequency) => &mut this.lfos[index as usize].frequency,
            T::Lfo(index, L::Phase) => &mut this.lfos[index as usize].phase,
            T::Lfo(index, L::Min) => &mut this.lfos[index as usize].min,
            T::Lfo(index, L::Max) => &mut this.lfos[index as usize].max,
            T::Lfo(index, L::Amount) => &mut this.lfos[index as usize].amount,
            T::Lfo(index, L::Distortion) => &mut this.lfos[index as usize].distortion,
            T::Lfo(index, L::Randomness) => &mut this.lfos[index as usize].randomness,
            T::Effects(E::Volume1) => &mut this.effects.volume_1.volume,
            T::Effects(E::Volume2) => &mut this.effects.volume_2.volume,
            T::Effects(E::Volume3) => &mut this.effects.volume_3.volume,
            T::Effects(E::OverdriveLevel) => &mut this.effects.overdrive.level,
            T::Effects(E::DistortionLevel) => &mut this.effects.distortion.level,
            T::Effects(E::Filter1Frequency) => &mut this.effects.filter_1.frequency,
            T::Effects(E::Filter1Q) => &mut this.effects.filter_1.q,
            T::Effects(E::Filter1Gain) => &mut this.effects.filter_1.gain,
            T::Effects(E::Filter2Frequency) => &mut this.effects.filter_2.frequency,
            T::Effects(E::Filter2Q) => &mut this.effects.filter_2.q,
            T::Effects(E::Filter2Gain) => &mut this.effects.filter_2.gain,
            T::Effects(E::ChorusDelayTime) => this.effects.chorus.delay_time.base_mut(),
            T::Effects(E::ChorusFrequency) => &mut this.effects.chorus.frequency,
            T::Effects(E::ChorusDepth) => &mut this.effects.chorus.delay_time.modulation_level,
            T::Effects(E::ChorusFeedback) => &mut this.effects.chorus.feedback,
            T::Effects(E::ChorusDampingFrequency) => {
                &mut this.effects.chorus.damping_frequency
            }
            T::Effects(E::ChorusDampingGain) => &mut this.effects.chorus.damping_gain,
            T::Effects(E::ChorusWidth) => &mut this.effects.chorus.width,
            T::Effects(E::ChorusHighPassFrequency) => {
                &mut this.effects.chorus.high_pass_frequency
            }
            T::Effects(E::ChorusWet) => &mut this.effects.chorus.wet,
            T::Effects(E::ChorusDry) => &mut this.effects.chorus.dry,
            T::Effects(E::EchoDelayTime) => &mut this.effects.echo.delay_time,
            T::Effects(E::EchoFeedback) => &mut this.effects.echo.feedback,
            T::Effects(E::EchoDampingFrequency) => &mut this.effects.echo.damping_frequency,
            T::Effects(E::EchoDampingGain) => &mut this.effects.echo.damping_gain,
            T::Effects(E::EchoWidth) => &mut this.effects.echo.width,
            T::Effects(E::EchoHighPassFrequency) => {
                &mut this.effects.echo.high_pass_frequency
            }
            T::Effects(E::EchoDistortion) => &mut this.effects.echo.distortion_level,
            T::Effects(E::EchoWet) => &mut this.effects.echo.wet,
            T::Effects(E::EchoDry) => &mut this.effects.echo.dry,
            T::Effects(E::ReverbRoomReflectivity) => {
                &mut this.effects.reverb.room_reflectivity
            }
            T::Effects(E::ReverbDampingFrequency) => {
                &mut this.effects.reverb.damping_frequency
            }
            T::Effects(E::ReverbDampingGain) => &mut this.effects.reverb.damping_gain,
            T::Effects(E::ReverbWidth) => &mut this.effects.reverb.width,
            T::Effects(E::ReverbHighPassFrequency) => {
                &mut this.effects.reverb.high_pass_frequency
            }
            T::Effects(E::ReverbDistortion) => &mut this.effects.reverb.distortion_level,
            T::Effects(E::ReverbWet) => &mut this.effects.reverb.wet,
            T::Effects(E::ReverbDry) => &mut this.effects.reverb.dry,
            T::Effects(E::TapeSaturation) => &mut this.effects.tape_params.saturation,
            T::Effects(E::TapeWnfAmp) => &mut this.effects.tape_params.wnf_amp,
            T::Effects(E::TapeWet) => &mut this.effects.tape_params.wet,
            T::Effects(E::TapeDry) => &mut this.effects.tape_params.dry,
            _ => return None,
        })
    }

    fn discrete_param_ratio(&self, param: ParamId) -> Number {
        use EffectsField as E;
        use EnvelopeField as N;
        use LfoField as L;
        use MacroField as M;
        use ParamTarget as T;
        use SideChainField as S;
        use VoiceField as V;

        match self.registry[param.0 as usize].target {
            T::NoteHandling => self.note_handling.get_ratio(),
            T::Voice(V::Waveform) => self.voice_params.waveform.get_ratio(),
            T::Voice(V::VelocitySensitivity) => {
                self.voice_params.velocity_sensitivity.get_ratio()
            }
            T::Voice(V::PortamentoLength) => self.voice_params.portamento_length.get_ratio(),
            T::Voice(V::PortamentoDepth) => self.voice_params.portamento_depth.get_ratio(),
            T::Voice(V::UnisonCount) => self.voice_params.unison_count.get_ratio(),
            T::Voice(V::UnisonSpread) => self.voice_params.unison_spread.get_ratio(),
            T::Voice(V::NoiseLevel) => self.voice_params.noise_level.get_ratio(),
            T::Voice(V::Harmonic(index)) => {
                self.voice_params.harmonics[index as usize].get_ratio()
            }
            T::Voice(V::Filter1Type) => self.voice_params.filter_1_type.get_ratio(),
            T::Voice(V::Filter1LogScale) => self.voice_params.filter_1_log_scale.get_ratio(),
            T::Voice(V::Filter2Type) => self.voice_params.filter_2_type.get_ratio(),
            T::Voice(V::Filter2LogScale) => self.voice_params.filter_2_log_scale.get_ratio(),
            T::Voice(_) => unreachable!("sample-accurate voice param in discrete dispatch"),
            T::Envelope(index, field) => {
                let envelope = &self.envelopes[index as usize];

                match field {
                    N::Amount => envelope.amount.get_ratio(),
                    N::Initial => envelope.initial_value.get_ratio(),
                    N::Delay => envelope.delay_time.get_ratio(),
                    N::Attack => envelope.attack_time.get_ratio(),
                    N::Peak => envelope.peak_value.get_ratio(),
                    N::Hold => envelope.hold_time.get_ratio(),
                    N::Decay => envelope.decay_time.get_ratio(),
                    N::Sustain => envelope.sustain_value.get_ratio(),
                    N::Release => envelope.release_time.get_ratio(),
                    N::Final => envelope.final_value.get_ratio(),
                    N::UpdateMode => envelope.update_mode.get_ratio(),
                }
            }
            T::Lfo(index, field) => {
                let lfo = &self.lfos[index as usize];

                match field {
                    L::Waveform => lfo.waveform.get_ratio(),
                    L::TempoSync => lfo.tempo_sync.get_ratio(),
                    L::Center => lfo.center.get_ratio(),
                    L::FreqLogScale => lfo.freq_log_scale.get_ratio(),
                    _ => unreachable!("sample-accurate lfo param in discrete dispatch"),
                }
            }
            T::Macro(index, field) => {
                let macro_ = &self.macros[index as usize];

                match field {
                    M::Input => macro_.input.get_ratio(),
                    M::Min => macro_.min.get_ratio(),
                    M::Max => macro_.max.get_ratio(),
                    M::Amount => macro_.amount.get_ratio(),
                    M::Distortion => macro_.distortion.get_ratio(),
                    M::Randomness => macro_.randomness.get_ratio(),
                }
            }
            T::Effects(field) => match field {
                E::Filter1Type => self.effects.filter_1.filter_type.get_ratio(),
                E::Filter1LogScale => self.effects.filter_1_log_scale.get_ratio(),
                E::Filter2Type => self.effects.filter_2.filter_type.get_ratio(),
                E::Filter2LogScale => self.effects.filter_2_log_scale.get_ratio(),
                E::ChorusTempoSync => self.effects.chorus.tempo_sync.get_ratio(),
                E::ChorusLogScale => self.effects.chorus.log_scale_frequencies.get_ratio(),
                E::EchoTempoSync => self.effects.echo.tempo_sync.get_ratio(),
                E::EchoLogScale => self.effects.echo.log_scale_frequencies.get_ratio(),
                E::EchoSideChain(side) => {
                    side_chain_ratio(&self.effects.echo.side_chain, side)
                }
                E::ReverbType => self.effects.reverb.reverb_type.get_ratio(),
                E::ReverbLogScale => self.effects.reverb.log_scale_frequencies.get_ratio(),
                E::ReverbSideChain(side) => {
                    side_chain_ratio(&self.effects.reverb.side_chain, side)
                }
                E::TapeColor => self.effects.tape_params.color.get_ratio(),
                E::TapeHiss => self.effects.tape_params.hiss_level.get_ratio(),
                E::TapeWnfSpeed => self.effects.tape_params.wnf_speed.get_ratio(),
                E::TapeStereoWnf => self.effects.tape_params.stereo_wnf.get_ratio(),
                E::TapeAtEnd => self.effects.tape_params.at_end.get_ratio(),
                _ => unreachable!("sample-accurate effects param in discrete dispatch"),
            },
        }
    }

    fn set_discrete_param_ratio(&mut self, param: ParamId, ratio: Number) {
        use EffectsField as E;
        use EnvelopeField as N;
        use LfoField as L;
        use MacroField as M;
        use ParamTarget as T;
        use VoiceField as V;

        match self.registry[param.0 as usize].target {
            T::NoteHandling => self.note_handling.set_ratio(ratio),
            T::Voice(V::Waveform) => self.voice_params.waveform.set_ratio(ratio),
            T::Voice(V::VelocitySensitivity) => {
                self.voice_params.velocity_sensitivity.set_ratio(ratio)
            }
            T::Voice(V::PortamentoLength) => {
                self.voice_params.portamento_length.set_ratio(ratio)
            }
            T::Voice(V::PortamentoDepth) => {
                self.voice_params.portamento_depth.set_ratio(ratio)
            }
            T::Voice(V::UnisonCount) => self.voice_params.unison_count.set_ratio(ratio),
            T::Voice(V::UnisonSpread) => self.voice_params.unison_spread.set_ratio(ratio),
            T::Voice(V::NoiseLevel) => self.voice_params.noise_level.set_ratio(ratio),
            T::Voice(V::Harmonic(index)) => {
                self.voice_params.harmonics[index as usize].set_ratio(ratio)
            }
            T::Voice(V::Filter1Type) => self.voice_params.filter_1_type.set_ratio(ratio),
            T::Voice(V::Filter1LogScale) => {
                self.voice_params.filter_1_log_scale.set_ratio(ratio);
                let log = self.voice_params.filter_1_log_scale.is_on();
                self.voice_params.filter_1_frequency.set_logarithmic(log);
                self.voice_params.filter_1_q.set_logarithmic(log);
            }
            T::Voice(V::Filter2Type) => self.voice_params.filter_2_type.set_ratio(ratio),
            T::Voice(V::Filter2LogScale) => {
                self.voice_params.filter_2_log_scale.set_ratio(ratio);
                let log = self.voice_params.filter_2_log_scale.is_on();
                self.voice_params.filter_2_frequency.set_logarithmic(log);
                self.voice_params.filter_2_q.set_logarithmic(log);
            }
            T::Voice(_) => unreachable!("sample-accurate voice param in discrete dispatch"),
            T::Envelope(index, field) => {
                let envelope = &mut self.envelopes[index as usize];

                match field {
                    N::Amount => envelope.amount.set_ratio(ratio),
                    N::Initial => envelope.initial_value.set_ratio(ratio),
                    N::Delay => envelope.delay_time.set_ratio(ratio),
                    N::Attack => envelope.attack_time.set_ratio(ratio),
                    N::Peak => envelope.peak_value.set_ratio(ratio),
                    N::Hold => envelope.hold_time.set_ratio(ratio),
                    N::Decay => envelope.decay_time.set_ratio(ratio),
                    N::Sustain => envelope.sustain_value.set_ratio(ratio),
                    N::Release => envelope.release_time.set_ratio(ratio),
                    N::Final => envelope.final_value.set_ratio(ratio),
                    N::UpdateMode => envelope.update_mode.set_ratio(ratio),
                }

                envelope.update();
            }
            T::Lfo(index, field) => {
                let lfo = &mut self.lfos[index as usize];

                match field {
                    L::Waveform => lfo.waveform.set_ratio(ratio),
                    L::TempoSync => lfo.tempo_sync.set_ratio(ratio),
                    L::Center => lfo.center.set_ratio(ratio),
                    L::FreqLogScale => {
                        lfo.freq_log_scale.set_ratio(ratio);
                        lfo.refresh_log_scale();
                    }
                    _ => unreachable!("sample-accurate lfo param in discrete dispatch"),
                }
            }
            T::Macro(index, field) => {
                let macro_ = &mut self.macros[index as usize];

                match field {
                    M::Input => macro_.input.set_ratio(ratio),
                    M::Min => macro_.min.set_ratio(ratio),
                    M::Max => macro_.max.set_ratio(ratio),
                    M::Amount => macro_.amount.set_ratio(ratio),
                    M::Distortion => macro_.distortion.set_ratio(ratio),
                    M::Randomness => macro_.randomness.set_ratio(ratio),
                }
            }
            T::Effects(field) => match field {
                E::Filter1Type => self.effects.filter_1.filter_type.set_ratio(ratio),
                E::Filter1LogScale => self.effects.filter_1_log_scale.set_ratio(ratio),
                E::Filter2Type => self.effects.filter_2.filter_type.set_ratio(ratio),
                E::Filter2LogScale => self.effects.filter_2_log_scale.set_ratio(ratio),
                E::ChorusTempoSync => self.effects.chorus.tempo_sync.set_ratio(ratio),
                E::ChorusLogScale => {
                    self.effects.chorus.log_scale_frequencies.set_ratio(ratio)
                }
                E::EchoTempoSync => self.effects.echo.tempo_sync.set_ratio(ratio),
                E::EchoLogScale => self.effects.echo.log_scale_frequencies.set_ratio(ratio),
                E::EchoSideChain(side) => {
                    set_side_chain_ratio(&mut self.effects.echo.side_chain, side, ratio)
                }
                E::ReverbType => self.effects.reverb.reverb_type.set_ratio(ratio),
                E::ReverbLogScale => {
                    self.effects.reverb.log_scale_frequencies.set_ratio(ratio)
                }
                E::ReverbSideChain(side) => {
                    set_side_chain_ratio(&mut self.effects.reverb.side_chain, side, ratio)
                }
                E::TapeColor => self.effects.tape_params.color.set_ratio(ratio),
                E::TapeHiss => self.effects.tape_params.hiss_level.set_ratio(ratio),
                E::TapeWnfSpeed => self.effects.tape_params.wnf_speed.set_ratio(ratio),
                E::TapeStereoWnf => self.effects.tape_params.stereo_wnf.set_ratio(ratio),
                E::TapeAtEnd => self.effects.tape_params.at_end.set_ratio(ratio),
                _ => unreachable!("sample-accurate effects param in discrete dispatch"),
            },
        }
    }

    // -- inspection hooks used by integration tests and the host ----------

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|voice| voice.is_on()).count()
    }

    pub fn held_note_count(&self) -> usize {
        self.note_stack.len()
    }
}

fn side_chain_ratio(
    compressor: &crate::dsp::compressor::Compressor,
    field: SideChainField,
) -> Number {
    use SideChainField as S;

    match field {
        S::Threshold => compressor.threshold.get_ratio(),
        S::Ratio => compressor.ratio.get_ratio(),
        S::Attack => compressor.attack_time.get_ratio(),
        S::Release => compressor.release_time.get_ratio(),
        S::Mode => compressor.mode.get_ratio(),
        S::MakeupGain => compressor.makeup_gain.get_ratio(),
        S::Curve => compressor.curve.get_ratio(),
    }
}

fn set_side_chain_ratio(
    compressor: &mut crate::dsp::compressor::Compressor,
    field: SideChainField,
    ratio: Number,
) {
    use SideChainField as S;

    match field {
        S::Threshold => compressor.threshold.set_ratio(ratio),
        S::Ratio => compressor.ratio.set_ratio(ratio),
        S::Attack => compressor.attack_time.set_ratio(ratio),
        S::Release => compressor.release_time.set_ratio(ratio),
        S::Mode => compressor.mode.set_ratio(ratio),
        S::MakeupGain => compressor.makeup_gain.set_ratio(ratio),
        S::Curve => compressor.curve.set_ratio(ratio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth() -> Synth {
        let mut synth = Synth::new();
        synth.suspend();
        synth.set_block_size(512);
        synth.resume();
        synth
    }

    #[test]
    fn test_param_names_are_unique_and_well_formed() {
        let synth = synth();

        for index in 0..synth.param_count() {
            let name = synth.param_name(ParamId(index as u16));

            assert!(!name.is_empty() && name.len() <= 7, "bad name {}", name);
            assert_eq!(
                synth.param_id_by_name(name),
                Some(ParamId(index as u16)),
                "lookup by name round-trips"
            );
        }
    }

    #[test]
    fn test_silence_passthrough() {
        let mut synth = synth();

        for round in 1..=10u64 {
            let buffer = synth.generate_samples(round, 512);

            assert!(buffer[0].iter().all(|&sample| sample == 0.0));
            assert!(buffer[1].iter().all(|&sample| sample == 0.0));
        }
    }

    #[test]
    fn test_note_on_produces_sound_and_note_off_fades() {
        let mut synth = synth();

        synth.note_on(0.0, 0, 69, 0.9);

        let mut peak: Sample = 0.0;

        for round in 1..=20u64 {
            let buffer = synth.generate_samples(round, 512);
            peak = buffer[0].iter().fold(peak, |acc, &x| acc.max(x.abs()));
        }

        assert!(peak > 0.05, "note should be audible, peak {}", peak);

        synth.note_off(0.0, 0, 69, 0.0);

        // Render past the default release time.
        let mut tail_peak: Sample = 0.0;

        for round in 21..=60u64 {
            let buffer = synth.generate_samples(round, 512);

            if round > 40 {
                tail_peak = buffer[0].iter().fold(tail_peak, |acc, &x| acc.max(x.abs()));
            }
        }

        assert!(tail_peak < 1e-4, "note should fade out, tail {}", tail_peak);
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_generate_samples_is_idempotent_per_round() {
        let mut synth = synth();

        synth.note_on(0.0, 0, 60, 1.0);

        let first: Vec<Sample> = synth.generate_samples(1, 256)[0].clone();
        let second: Vec<Sample> = synth.generate_samples(1, 256)[0].clone();

        assert_eq!(first, second);
    }

    #[test]
    fn test_polyphonic_chord_uses_multiple_voices() {
        let mut synth = synth();

        synth.note_on(0.0, 0, 60, 0.8);
        synth.note_on(0.0, 0, 64, 0.8);
        synth.note_on(0.0, 0, 67, 0.8);

        synth.generate_samples(1, 256);

        assert_eq!(synth.active_voice_count(), 3);
    }

    #[test]
    fn test_monophonic_mode_uses_one_voice() {
        let mut synth = synth();

        let nh = synth.param_id_by_name("NH").unwrap();
        synth.set_param_ratio(nh, 0.0); // Monophonic

        synth.note_on(0.0, 0, 60, 0.8);
        synth.note_on(0.0, 0, 64, 0.8);

        synth.generate_samples(1, 256);

        assert_eq!(synth.active_voice_count(), 1);
    }

    #[test]
    fn test_voice_stealing_when_pool_is_exhausted() {
        let mut synth = synth();

        for note in 0..(VOICES as u8 + 4) {
            synth.note_on(0.0, 0, 40 + note, 0.8);
        }

        synth.generate_samples(1, 256);

        assert_eq!(synth.active_voice_count(), VOICES);
    }

    #[test]
    fn test_set_param_clamps_ratio() {
        let mut synth = synth();

        let param = synth.param_id_by_name("AMP").unwrap();
        synth.process_message(Message::SetParam {
            param,
            ratio: 7.5,
        });

        assert!((synth.get_param_ratio(param) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_message_queue_applies_before_rendering() {
        let mut synth = synth();
        let mut sender = synth.take_message_sender().unwrap();

        let param = synth.param_id_by_name("EV3V").unwrap();
        assert!(sender.push(Message::SetParam { param, ratio: 0.25 }));

        synth.generate_samples(1, 64);

        assert!((synth.get_param_ratio(param) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_message_queue_overflow_drops_latest() {
        let mut synth = synth();
        let mut sender = synth.take_message_sender().unwrap();
        let param = synth.param_id_by_name("EV3V").unwrap();

        for _ in 0..MESSAGE_QUEUE_CAPACITY {
            assert!(sender.push(Message::SetParam { param, ratio: 0.5 }));
        }

        assert!(
            !sender.push(Message::SetParam { param, ratio: 0.5 }),
            "a full ring reports failure instead of blocking"
        );
    }

    #[test]
    fn test_assign_and_route_midi_controller() {
        let mut synth = synth();

        let param = synth.param_id_by_name("F1FRQ").unwrap();
        synth.assign_controller(param, ControllerId::cc(midi::CC_MODULATION_WHEEL));

        synth.control_change(0.0, 0, midi::CC_MODULATION_WHEEL, 127);

        // The change schedules a ramp; render some blocks to let it land.
        for round in 1..=40u64 {
            synth.generate_samples(round, 256);
        }

        assert!(
            synth.get_param_ratio(param) > 0.95,
            "param follows the controller, ratio {}",
            synth.get_param_ratio(param)
        );
    }

    #[test]
    fn test_macro_drives_assigned_param(){
        let mut synth = synth();

        let target = synth.param_id_by_name("ECWET").unwrap();
        synth.assign_controller(target, ControllerId::macro_(0));

        let macro_input = synth.param_id_by_name("M1IN").unwrap();
        synth.set_param_ratio(macro_input, 0.8);

        for round in 1..=40u64 {
            synth.generate_samples(round, 256);
        }

        assert!((synth.get_param_ratio(target) - 0.8).abs() < 0.01);
    }

    #[test]
    fn test_lfo_modulates_assigned_param() {
        let mut synth = synth();

        let target = synth.param_id_by_name("PAN").unwrap();
        synth.assign_controller(target, ControllerId::lfo(0));

        let mut values = Vec::new();

        for round in 1..=20u64 {
            synth.generate_samples(round, 256);
            values.push(synth.get_param_ratio(target));
        }

        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        assert!(max - min > 0.1, "LFO should move the parameter");
    }

    #[test]
    fn test_invalid_midi_is_dropped() {
        let mut synth = synth();

        synth.note_on(0.0, 16, 60, 0.8);
        synth.note_on(0.0, 0, 128, 0.8);

        synth.generate_samples(1, 64);

        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_clear_restores_defaults() {
        let mut synth = synth();

        let param = synth.param_id_by_name("ERWET").unwrap();
        synth.set_param_ratio(param, 0.9);
        synth.process_message(Message::Clear);

        assert!(
            (synth.get_param_ratio(param) - synth.get_param_default_ratio(param)).abs() < 1e-9
        );

        // Clear drops every controller assignment, including the default
        // envelope gate (presets re-assign it explicitly).
        let volume = synth.param_id_by_name("VOL").unwrap();
        assert_eq!(synth.get_param_controller(volume), ControllerId::NONE);
    }

    #[test]
    fn test_suspend_gates_reconfiguration() {
        let mut synth = synth();

        synth.suspend();
        synth.set_sample_rate(96000.0);
        synth.set_block_size(1024);
        synth.resume();

        assert_eq!(synth.get_sample_rate(), 96000.0);
        assert_eq!(synth.get_block_size(), 1024);

        let buffer = synth.generate_samples(1, 1024);
        assert_eq!(buffer[0].len(), 1024);
    }

    #[test]
    fn test_program_change_is_recorded_for_the_host() {
        let mut synth = synth();

        synth.program_change(0.0, 42);
        assert_eq!(synth.take_requested_program(), Some(42));
        assert_eq!(synth.take_requested_program(), None);
    }
}
