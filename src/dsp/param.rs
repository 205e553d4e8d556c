//! Parameters: discrete values, block-constant scalars, and sample-accurate
//! automation sources
//!
//! Three flavors, mirroring how much resolution a consumer needs:
//!
//! - [`ByteParam`] / [`ToggleParam`]: an integer in a finite range.
//! - [`FloatParamB`]: a scalar that may change between blocks but never
//!   within one.
//! - [`FloatParamS`]: a full signal producer with a scheduled event queue
//!   (immediate set, linear ramp, cancel) whose rendered buffer holds the
//!   parameter's value for every sample of the block.
//!
//! Every parameter clamps on assignment, exposes its value both in its
//! native range and as a ratio in [0, 1], and bumps a change index (wrapping
//! at 2^31) whenever the stored value changes so consumers can cache
//! derived data.

use crate::dsp::signal_producer::{
    produce, Event, EventType, ProducerState, SignalProducer, EVT_CANCEL,
};
use crate::{Number, Sample, Seconds};

pub const EVT_SET_VALUE: EventType = 1;
pub const EVT_LINEAR_RAMP: EventType = 2;

/// Some MIDI controllers send multiple changes of the same value with the
/// same timestamp; gradual ramps with a duration correlated to the change
/// magnitude merge those without zipper noise.
pub const MIDI_CTL_BIG_CHANGE_DURATION: Seconds = 0.20;
pub const MIDI_CTL_SMALL_CHANGE_DURATION: Seconds = MIDI_CTL_BIG_CHANGE_DURATION / 2.5;
const MIDI_CTL_BIG_CHANGE: Number = 0.30;

const CHANGE_INDEX_MASK: i32 = 0x7fffffff;

/// The floor used for logarithmic ratio mapping when a range starts at or
/// below zero.
const LOG_SCALE_MIN: Number = 1e-4;

fn next_change_index(change_index: i32) -> i32 {
    (change_index + 1) & CHANGE_INDEX_MASK
}

// ---------------------------------------------------------------------------
// Discrete parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ByteParam {
    min_value: u8,
    max_value: u8,
    default_value: u8,
    value: u8,
    change_index: i32,
}

impl ByteParam {
    pub fn new(min_value: u8, max_value: u8, default_value: u8) -> Self {
        debug_assert!(min_value <= default_value && default_value <= max_value);

        Self {
            min_value,
            max_value,
            default_value,
            value: default_value,
            change_index: 0,
        }
    }

    pub fn get_value(&self) -> u8 {
        self.value
    }

    pub fn set_value(&mut self, new_value: u8) {
        let clamped = new_value.clamp(self.min_value, self.max_value);

        if clamped != self.value {
            self.value = clamped;
            self.change_index = next_change_index(self.change_index);
        }
    }

    pub fn get_min_value(&self) -> u8 {
        self.min_value
    }

    pub fn get_max_value(&self) -> u8 {
        self.max_value
    }

    pub fn get_default_value(&self) -> u8 {
        self.default_value
    }

    pub fn get_ratio(&self) -> Number {
        self.value_to_ratio(self.value)
    }

    pub fn get_default_ratio(&self) -> Number {
        self.value_to_ratio(self.default_value)
    }

    pub fn set_ratio(&mut self, ratio: Number) {
        self.set_value(self.ratio_to_value(ratio));
    }

    pub fn ratio_to_value(&self, ratio: Number) -> u8 {
        let range = (self.max_value - self.min_value) as Number;
        let scaled = (ratio.clamp(0.0, 1.0) * range).round();

        self.min_value + scaled as u8
    }

    pub fn value_to_ratio(&self, value: u8) -> Number {
        if self.max_value == self.min_value {
            return 0.0;
        }

        (value.clamp(self.min_value, self.max_value) - self.min_value) as Number
            / (self.max_value - self.min_value) as Number
    }

    pub fn get_change_index(&self) -> i32 {
        self.change_index
    }

    pub fn reset(&mut self) {
        self.set_value(self.default_value);
    }
}

#[derive(Debug, Clone)]
pub struct ToggleParam {
    param: ByteParam,
}

impl ToggleParam {
    pub const OFF: u8 = 0;
    pub const ON: u8 = 1;

    pub fn new(default_value: u8) -> Self {
        Self {
            param: ByteParam::new(Self::OFF, Self::ON, default_value),
        }
    }

    pub fn is_on(&self) -> bool {
        self.param.get_value() == Self::ON
    }

    pub fn get_value(&self) -> u8 {
        self.param.get_value()
    }

    pub fn set_value(&mut self, new_value: u8) {
        self.param.set_value(new_value);
    }

    pub fn get_ratio(&self) -> Number {
        self.param.get_ratio()
    }

    pub fn get_default_ratio(&self) -> Number {
        self.param.get_default_ratio()
    }

    pub fn set_ratio(&mut self, ratio: Number) {
        self.param.set_ratio(ratio);
    }

    pub fn get_change_index(&self) -> i32 {
        self.param.get_change_index()
    }

    pub fn reset(&mut self) {
        self.param.reset();
    }
}

// ---------------------------------------------------------------------------
// Block-constant float parameter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FloatParamB {
    min_value: Number,
    max_value: Number,
    default_value: Number,
    value: Number,
    change_index: i32,
    is_logarithmic: bool,
}

impl FloatParamB {
    pub fn new(min_value: Number, max_value: Number, default_value: Number) -> Self {
        debug_assert!(min_value < max_value);
        debug_assert!((min_value..=max_value).contains(&default_value));

        Self {
            min_value,
            max_value,
            default_value,
            value: default_value,
            change_index: 0,
            is_logarithmic: false,
        }
    }

    pub fn get_value(&self) -> Number {
        self.value
    }

    pub fn set_value(&mut self, new_value: Number) {
        let clamped = self.clamp(new_value);

        if clamped != self.value {
            self.value = clamped;
            self.change_index = next_change_index(self.change_index);
        }
    }

    pub fn get_min_value(&self) -> Number {
        self.min_value
    }

    pub fn get_max_value(&self) -> Number {
        self.max_value
    }

    pub fn get_default_value(&self) -> Number {
        self.default_value
    }

    pub fn clamp(&self, value: Number) -> Number {
        value.clamp(self.min_value, self.max_value)
    }

    /// Switch between linear and logarithmic ratio mapping (frequency and Q
    /// parameters carry a log-scale toggle).
    pub fn set_logarithmic(&mut self, is_logarithmic: bool) {
        if self.is_logarithmic != is_logarithmic {
            self.is_logarithmic = is_logarithmic;
            self.change_index = next_change_index(self.change_index);
        }
    }

    pub fn is_logarithmic(&self) -> bool {
        self.is_logarithmic
    }

    pub fn get_ratio(&self) -> Number {
        self.value_to_ratio(self.value)
    }

    pub fn get_default_ratio(&self) -> Number {
        self.value_to_ratio(self.default_value)
    }

    pub fn set_ratio(&mut self, ratio: Number) {
        self.set_value(self.ratio_to_value(ratio));
    }

    pub fn ratio_to_value(&self, ratio: Number) -> Number {
        let ratio = ratio.clamp(0.0, 1.0);

        if self.is_logarithmic {
            let log_min = self.min_value.max(LOG_SCALE_MIN);
            log_min * (self.max_value / log_min).powf(ratio)
        } else {
            self.min_value + ratio * (self.max_value - self.min_value)
        }
    }

    pub fn value_to_ratio(&self, value: Number) -> Number {
        let value = self.clamp(value);

        if self.is_logarithmic {
            let log_min = self.min_value.max(LOG_SCALE_MIN);
            (value.max(log_min) / log_min).ln() / (self.max_value / log_min).ln()
        } else {
            (value - self.min_value) / (self.max_value - self.min_value)
        }
    }

    pub fn get_change_index(&self) -> i32 {
        self.change_index
    }

    pub fn reset(&mut self) {
        self.set_value(self.default_value);
    }
}

// ---------------------------------------------------------------------------
// Sample-accurate float parameter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct LinearRamp {
    start_time: Seconds,
    start_value: Number,
    target_value: Number,
    duration: Seconds,
}

impl LinearRamp {
    fn value_at(&self, time: Seconds) -> Number {
        if self.duration <= 0.0 {
            return self.target_value;
        }

        let progress = ((time - self.start_time) / self.duration).clamp(0.0, 1.0);
        self.start_value + progress * (self.target_value - self.start_value)
    }

    fn is_done_at(&self, time: Seconds) -> bool {
        time >= self.start_time + self.duration
    }
}

/// A float parameter whose value can be scheduled at time offsets or
/// approached linearly over a duration; rendering produces one channel
/// holding the value at every sample of the block.
pub struct FloatParamS {
    state: ProducerState,
    min_value: Number,
    max_value: Number,
    default_value: Number,
    value: Number,
    change_index: i32,
    is_logarithmic: bool,
    ramp: Option<LinearRamp>,
    constantness: Option<(u64, bool)>,
}

impl FloatParamS {
    pub fn new(min_value: Number, max_value: Number, default_value: Number) -> Self {
        debug_assert!(min_value < max_value);
        debug_assert!((min_value..=max_value).contains(&default_value));

        Self {
            state: ProducerState::new(1),
            min_value,
            max_value,
            default_value,
            value: default_value,
            change_index: 0,
            is_logarithmic: false,
            ramp: None,
            constantness: None,
        }
    }

    pub fn get_value(&self) -> Number {
        self.value
    }

    pub fn get_min_value(&self) -> Number {
        self.min_value
    }

    pub fn get_max_value(&self) -> Number {
        self.max_value
    }

    pub fn get_default_value(&self) -> Number {
        self.default_value
    }

    /// Drop every scheduled event and snap to the given value.
    pub fn set_value(&mut self, new_value: Number) {
        self.state.cancel_events();
        self.ramp = None;
        self.store(self.clamp(new_value));
    }

    pub fn clamp(&self, value: Number) -> Number {
        value.clamp(self.min_value, self.max_value)
    }

    pub fn set_logarithmic(&mut self, is_logarithmic: bool) {
        if self.is_logarithmic != is_logarithmic {
            self.is_logarithmic = is_logarithmic;
            self.change_index = next_change_index(self.change_index);
        }
    }

    pub fn is_logarithmic(&self) -> bool {
        self.is_logarithmic
    }

    pub fn get_ratio(&self) -> Number {
        self.value_to_ratio(self.value)
    }

    pub fn get_default_ratio(&self) -> Number {
        self.value_to_ratio(self.default_value)
    }

    pub fn set_ratio(&mut self, ratio: Number) {
        self.set_value(self.ratio_to_value(ratio));
    }

    pub fn ratio_to_value(&self, ratio: Number) -> Number {
        let ratio = ratio.clamp(0.0, 1.0);

        if self.is_logarithmic {
            let log_min = self.min_value.max(LOG_SCALE_MIN);
            log_min * (self.max_value / log_min).powf(ratio)
        } else {
            self.min_value + ratio * (self.max_value - self.min_value)
        }
    }

    pub fn value_to_ratio(&self, value: Number) -> Number {
        let value = self.clamp(value);

        if self.is_logarithmic {
            let log_min = self.min_value.max(LOG_SCALE_MIN);
            (value.max(log_min) / log_min).ln() / (self.max_value / log_min).ln()
        } else {
            (value - self.min_value) / (self.max_value - self.min_value)
        }
    }

    pub fn get_change_index(&self) -> i32 {
        self.change_index
    }

    /// Snap to `new_value` at `time_offset` seconds into the current block.
    pub fn schedule_value(&mut self, time_offset: Seconds, new_value: Number) {
        self.state
            .schedule(EVT_SET_VALUE, time_offset, new_value, 0.0, 0);
        self.constantness = None;
    }

    /// Starting when the previously scheduled event ends, ramp linearly to
    /// `target_value` over `duration`. Targets outside the valid range clip
    /// both the duration and the target proportionally so the ramp ends
    /// exactly at the bound.
    pub fn schedule_linear_ramp(&mut self, duration: Seconds, target_value: Number) {
        let start_offset = self.state.last_event_time_offset();

        self.state.schedule(
            EVT_LINEAR_RAMP,
            start_offset,
            duration.max(0.0),
            target_value,
            0,
        );
        self.constantness = None;
    }

    /// Freeze the value the interrupted schedule would have produced at
    /// `time_offset` and drop everything scheduled after it.
    pub fn cancel_events_at(&mut self, time_offset: Seconds) {
        self.state.cancel_events_at(time_offset);
        self.constantness = None;
    }

    pub fn has_events(&self) -> bool {
        self.state.has_events()
    }

    /// React to a MIDI controller movement: ramp toward the value encoded
    /// by `new_ratio`, starting at `time_offset`.
    pub fn handle_controller_change(&mut self, time_offset: Seconds, new_ratio: Number) {
        let new_value = self.ratio_to_value(new_ratio);
        let magnitude = (self.value_to_ratio(self.value) - new_ratio).abs();

        let duration = if magnitude > MIDI_CTL_BIG_CHANGE {
            MIDI_CTL_BIG_CHANGE_DURATION
        } else {
            MIDI_CTL_SMALL_CHANGE_DURATION
        };

        self.cancel_events_at(time_offset);
        self.schedule_linear_ramp(duration, new_value);
    }

    /// True when nothing (event, ramp, controller change) will move the
    /// value during the next `sample_count` samples of `round`; the caller
    /// may then use [`FloatParamS::get_value`] as a block constant after
    /// calling [`FloatParamS::skip_round`].
    pub fn is_constant_in_next_round(&mut self, round: u64, sample_count: usize) -> bool {
        if let Some((cached_round, is_constant)) = self.constantness {
            if cached_round == round {
                return is_constant;
            }
        }

        let is_constant = self.ramp.is_none() && !self.state.has_upcoming_events(sample_count);
        self.constantness = Some((round, is_constant));

        is_constant
    }

    /// Mark the round rendered without touching the buffer; the parameter's
    /// clock still advances.
    pub fn skip_round(&mut self, round: u64, sample_count: usize) {
        if self.state.cached_round() == Some(round) {
            return;
        }

        self.state.mark_round(round, sample_count);
        self.state.advance_clock_by(sample_count);
    }

    /// Render the parameter for the round if it is not constant; `None`
    /// means the block-constant [`FloatParamS::get_value`] is valid for the
    /// whole block.
    pub fn produce_if_not_constant(
        &mut self,
        round: u64,
        sample_count: usize,
    ) -> Option<&[Sample]> {
        if self.is_constant_in_next_round(round, sample_count) {
            self.skip_round(round, sample_count);
            return None;
        }

        produce(self, round, sample_count);
        Some(&self.state.buffer()[0][..sample_count])
    }

    /// The buffer rendered for `round`, if the parameter was non-constant
    /// in it. Lets followers and shared consumers read a leader that the
    /// synth already rendered this round.
    pub fn round_buffer(&self, round: u64) -> Option<&[Sample]> {
        match (self.state.cached_round(), self.constantness) {
            (Some(cached), Some((constant_round, is_constant)))
                if cached == round && constant_round == round && !is_constant =>
            {
                Some(&self.state.buffer()[0][..self.state.last_sample_count()])
            }
            _ => None,
        }
    }

    /// Fill the round's buffer from an external driver (an LFO or another
    /// producer routed into this parameter by the synth).
    pub fn set_driven_buffer(&mut self, round: u64, values: &[Sample]) {
        let sample_count = values.len();

        self.state.mark_round(round, sample_count);
        self.constantness = Some((round, false));
        self.state.buffer_mut()[0][..sample_count].copy_from_slice(values);
        self.state.advance_clock_by(sample_count);

        if let Some(&last) = values.last() {
            self.store(self.clamp(last as Number));
        }
    }

    pub fn reset_value(&mut self) {
        self.set_value(self.default_value);
    }

    fn store(&mut self, new_value: Number) {
        if new_value != self.value {
            self.value = new_value;
            self.change_index = next_change_index(self.change_index);
        }
    }
}

impl SignalProducer for FloatParamS {
    fn state(&self) -> &ProducerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProducerState {
        &mut self.state
    }

    fn handle_event(&mut self, event: Event) {
        match event.event_type {
            EVT_SET_VALUE => {
                self.ramp = None;
                self.store(self.clamp(event.number_param_1));
            }
            EVT_LINEAR_RAMP => {
                let start_value = self.current_ramp_value();
                let requested_target = event.number_param_2;
                let mut duration = event.number_param_1;
                let mut target = self.clamp(requested_target);

                if target != requested_target {
                    let requested_delta = requested_target - start_value;

                    if requested_delta.abs() > 1e-12 {
                        duration *= ((target - start_value) / requested_delta).clamp(0.0, 1.0);
                    }
                }

                if duration <= self.state.sampling_period() {
                    self.ramp = None;
                    self.store(target);
                } else {
                    self.ramp = Some(LinearRamp {
                        start_time: self.state.current_time(),
                        start_value,
                        target_value: target,
                        duration,
                    });
                }
            }
            EVT_CANCEL => {
                let frozen = self.current_ramp_value();
                self.ramp = None;
                self.store(frozen);
            }
            _ => {}
        }
    }

    fn render(&mut self, _round: u64, first: usize, last: usize) {
        match self.ramp {
            Some(ramp) => {
                let start_time = self.state.current_time();
                let period = self.state.sampling_period();

                {
                    let buffer = &mut self.state.buffer_mut()[0];

                    for i in first..last {
                        let time = start_time + (i - first) as Seconds * period;
                        buffer[i] = ramp.value_at(time) as Sample;
                    }
                }

                let end_time = start_time + (last - first) as Seconds * period;
                self.store(ramp.value_at(end_time));

                if ramp.is_done_at(end_time) {
                    self.ramp = None;
                }
            }
            None => {
                let value = self.value as Sample;

                for sample in &mut self.state.buffer_mut()[0][first..last] {
                    *sample = value;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state.reset();
        self.ramp = None;
        self.constantness = None;
        self.store(self.default_value);
    }
}

impl FloatParamS {
    fn current_ramp_value(&self) -> Number {
        match self.ramp {
            Some(ramp) => ramp.value_at(self.state.current_time()),
            None => self.value,
        }
    }
}

// ---------------------------------------------------------------------------
// Modulated float parameter
// ---------------------------------------------------------------------------

/// Below this modulation level the modulator path is skipped entirely, so
/// consumers can treat the parameter as its plain base and save the
/// multiply-add pass.
pub const MODULATION_BYPASS_THRESHOLD: Number = 0.000001;

/// A sample-accurate parameter paired with a modulation input: the
/// effective value is `base + modulation_level * modulator_sample`,
/// clamped into the base parameter's range. The level is itself a
/// sample-accurate parameter.
pub struct ModulatedFloatParam {
    base: FloatParamS,
    pub modulation_level: FloatParamS,
}

impl ModulatedFloatParam {
    pub fn new(
        min_value: Number,
        max_value: Number,
        default_value: Number,
        level_max: Number,
        level_default: Number,
    ) -> Self {
        Self {
            base: FloatParamS::new(min_value, max_value, default_value),
            modulation_level: FloatParamS::new(0.0, level_max, level_default),
        }
    }

    pub fn base(&self) -> &FloatParamS {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut FloatParamS {
        &mut self.base
    }

    /// True when the level cannot rise above the bypass threshold during
    /// the round; the caller may then read the base parameter alone.
    pub fn is_modulation_bypassed(&mut self, round: u64, sample_count: usize) -> bool {
        self.modulation_level
            .is_constant_in_next_round(round, sample_count)
            && self.modulation_level.get_value() < MODULATION_BYPASS_THRESHOLD
    }

    /// Fill `out` with `base + level * modulator`, sample-accurately,
    /// clamped into the base range.
    pub fn render_modulated(
        &mut self,
        round: u64,
        sample_count: usize,
        modulator: &[Sample],
        out: &mut [Sample],
    ) {
        debug_assert!(modulator.len() >= sample_count);
        debug_assert!(out.len() >= sample_count);

        let base_value = self.base.get_value();
        let level_value = self.modulation_level.get_value();
        let min = self.base.get_min_value() as Sample;
        let max = self.base.get_max_value() as Sample;

        let base_buffer = self.base.produce_if_not_constant(round, sample_count);
        let level_buffer = self
            .modulation_level
            .produce_if_not_constant(round, sample_count);

        for i in 0..sample_count {
            let base = match base_buffer {
                Some(buffer) => buffer[i],
                None => base_value as Sample,
            };
            let level = match level_buffer {
                Some(buffer) => buffer[i],
                None => level_value as Sample,
            };

            out[i] = (base + level * modulator[i]).clamp(min, max);
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: crate::Frequency) {
        self.base.set_sample_rate(sample_rate);
        self.modulation_level.set_sample_rate(sample_rate);
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        self.base.set_block_size(block_size);
        self.modulation_level.set_block_size(block_size);
    }

    pub fn reset(&mut self) {
        self.base.reset();
        self.modulation_level.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::signal_producer::produce;

    const SAMPLE_RATE: Number = 1000.0;

    fn sample_accurate_param() -> FloatParamS {
        let mut param = FloatParamS::new(0.0, 10.0, 0.0);
        param.set_sample_rate(SAMPLE_RATE);
        param.set_block_size(100);
        param
    }

    #[test]
    fn test_byte_param_clamps_and_counts_changes() {
        let mut param = ByteParam::new(1, 9, 3);

        assert_eq!(param.get_value(), 3);
        let before = param.get_change_index();

        param.set_value(200);
        assert_eq!(param.get_value(), 9);
        assert_ne!(param.get_change_index(), before);

        let after = param.get_change_index();
        param.set_value(9);
        assert_eq!(param.get_change_index(), after, "same value, same index");
    }

    #[test]
    fn test_byte_param_ratio_round_trip() {
        let mut param = ByteParam::new(0, 6, 0);

        param.set_ratio(0.5);
        assert_eq!(param.get_value(), 3);
        assert!((param.get_ratio() - 0.5).abs() < 1e-9);

        param.set_ratio(2.0);
        assert_eq!(param.get_value(), 6);
    }

    #[test]
    fn test_toggle_param() {
        let mut toggle = ToggleParam::new(ToggleParam::OFF);

        assert!(!toggle.is_on());
        toggle.set_ratio(1.0);
        assert!(toggle.is_on());
    }

    #[test]
    fn test_float_param_b_log_scale_mapping() {
        let mut param = FloatParamB::new(1.0, 24000.0, 24000.0);

        param.set_ratio(0.5);
        let linear_midpoint = param.get_value();

        param.set_logarithmic(true);
        param.set_ratio(0.5);
        let log_midpoint = param.get_value();

        assert!((linear_midpoint - 12000.5).abs() < 1.0);
        assert!((log_midpoint - (24000.0f64).sqrt()).abs() < 1.0);

        let ratio = param.value_to_ratio(log_midpoint);
        assert!((ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_ratio_is_idempotent() {
        let param = FloatParamB::new(-1.0, 1.0, 0.0);

        for raw in [-3.0, -1.0, 0.2, 1.0, 7.5] {
            let once = param.clamp(raw);
            assert_eq!(param.clamp(once), once);
            assert!((param.get_min_value()..=param.get_max_value()).contains(&once));
        }
    }

    #[test]
    fn test_scheduled_value_applies_at_offset() {
        let mut param = sample_accurate_param();

        param.schedule_value(0.02, 5.0);
        produce(&mut param, 1, 100);

        let buffer = &param.state().buffer()[0];
        assert!(buffer[..20].iter().all(|&sample| sample == 0.0));
        assert!(buffer[20..100].iter().all(|&sample| sample == 5.0));
        assert!((param.get_value() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_ramp_reaches_target() {
        let mut param = sample_accurate_param();

        param.schedule_value(0.0, 0.0);
        param.schedule_linear_ramp(0.05, 10.0);
        produce(&mut param, 1, 100);

        let buffer = &param.state().buffer()[0];

        // 50 ms ramp at 1 kHz: half way after 25 samples, done at 50.
        assert!((buffer[25] - 5.0).abs() < 0.3);
        assert!((buffer[50] - 10.0).abs() < 0.3);
        assert!(buffer[60..100].iter().all(|&sample| sample == 10.0));
        assert!((param.get_value() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_ramp_clips_duration_and_target() {
        let mut param = sample_accurate_param();

        param.schedule_value(0.0, 0.0);
        // Requesting twice the max: the ramp should reach 10.0 in half the
        // requested duration and then hold.
        param.schedule_linear_ramp(0.08, 20.0);
        produce(&mut param, 1, 100);

        let buffer = &param.state().buffer()[0];
        assert!((buffer[40] - 10.0).abs() < 0.3);
        assert!(buffer[45..100].iter().all(|&sample| sample >= 9.99));
    }

    #[test]
    fn test_cancel_freezes_ramp_value() {
        let mut param = sample_accurate_param();

        param.schedule_value(0.0, 0.0);
        param.schedule_linear_ramp(0.1, 10.0);
        param.cancel_events_at(0.05);
        produce(&mut param, 1, 100);

        let buffer = &param.state().buffer()[0];

        // Frozen half way through the 100 ms ramp.
        assert!((buffer[99] - 5.0).abs() < 0.3);
        assert!((param.get_value() - 5.0).abs() < 0.3);
    }

    #[test]
    fn test_constant_param_skips_rendering() {
        let mut param = sample_accurate_param();

        assert!(param.is_constant_in_next_round(1, 100));
        assert!(param.produce_if_not_constant(1, 100).is_none());

        param.schedule_value(0.01, 3.0);
        assert!(!param.is_constant_in_next_round(2, 100));
        assert!(param.produce_if_not_constant(2, 100).is_some());
    }

    #[test]
    fn test_skip_round_advances_the_clock() {
        let mut param = sample_accurate_param();

        param.skip_round(1, 100);

        // An event scheduled "0.05 s from now" lands mid-way into the
        // second 100-sample block.
        param.schedule_value(0.05, 7.0);
        produce(&mut param, 2, 100);

        let buffer = &param.state().buffer()[0];
        assert!(buffer[..50].iter().all(|&sample| sample == 0.0));
        assert!(buffer[50..100].iter().all(|&sample| sample == 7.0));
    }

    #[test]
    fn test_ramp_continues_across_blocks() {
        let mut param = sample_accurate_param();

        param.schedule_value(0.0, 0.0);
        param.schedule_linear_ramp(0.2, 10.0);

        produce(&mut param, 1, 100);
        let end_of_first: Sample = param.state().buffer()[0][99];

        produce(&mut param, 2, 100);
        let buffer = &param.state().buffer()[0];

        assert!(buffer[0] >= end_of_first);
        assert!((buffer[99] - 10.0).abs() < 0.2);
    }

    #[test]
    fn test_driven_buffer_marks_round_non_constant() {
        let mut param = sample_accurate_param();
        let values: Vec<Sample> = (0..100).map(|i| i as Sample * 0.01).collect();

        param.set_driven_buffer(1, &values);

        assert!(param.round_buffer(1).is_some());
        assert!(!param.is_constant_in_next_round(1, 100));
        assert!((param.get_value() - 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_controller_change_ramps_to_new_value() {
        let mut param = sample_accurate_param();

        param.handle_controller_change(0.0, 1.0);

        produce(&mut param, 1, 100);
        produce(&mut param, 2, 100);
        produce(&mut param, 3, 100);

        // 0.2 s big-change ramp completes within 200 samples at 1 kHz.
        assert!((param.get_value() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_modulated_param_bypass_below_threshold() {
        let mut param = ModulatedFloatParam::new(0.0, 10.0, 5.0, 1.0, 0.0);

        assert!(param.is_modulation_bypassed(1, 100));

        param.modulation_level.set_value(0.5);
        assert!(!param.is_modulation_bypassed(2, 100));
    }

    #[test]
    fn test_modulated_param_applies_modulator() {
        let mut param = ModulatedFloatParam::new(0.0, 10.0, 5.0, 2.0, 1.0);
        param.set_sample_rate(SAMPLE_RATE);
        param.set_block_size(4);

        let modulator = [1.0, -1.0, 0.5, 0.0];
        let mut out = [0.0; 4];

        param.render_modulated(1, 4, &modulator, &mut out);

        assert_eq!(out, [6.0, 4.0, 5.5, 5.0]);
    }

    #[test]
    fn test_modulated_param_clamps_to_base_range() {
        let mut param = ModulatedFloatParam::new(0.0, 10.0, 9.0, 4.0, 4.0);
        param.set_sample_rate(SAMPLE_RATE);
        param.set_block_size(2);

        let modulator = [1.0, -4.0];
        let mut out = [0.0; 2];

        param.render_modulated(1, 2, &modulator, &mut out);

        assert_eq!(out, [10.0, 0.0]);
    }

    #[test]
    fn test_change_index_wraps_positive() {
        let mut param = ByteParam::new(0, 1, 0);

        for _ in 0..5 {
            let value = param.get_value();
            param.set_value(1 - value);
            assert!(param.get_change_index() >= 0);
        }
    }
}
