//! DAHDSR envelopes
//!
//! An [`Envelope`] is a collection of parameters describing the shape
//! (delay, attack, hold, decay, sustain, release); it does not render
//! anything itself. Starting an envelope schedules value/ramp events on a
//! target sample-accurate parameter, scaled into the target's native range
//! through its ratio mapping, so the parameter's own event machinery
//! produces the envelope with sample accuracy.

use crate::dsp::param::{ByteParam, FloatParamB, FloatParamS};
use crate::{Number, Seconds};

pub const ENVELOPES: usize = 6;

pub const UPDATE_MODE_STATIC: u8 = 0;
pub const UPDATE_MODE_END: u8 = 1;
pub const UPDATE_MODE_DYNAMIC: u8 = 2;

pub struct Envelope {
    /// Static: snapshot at note-on only. End: re-read when a segment
    /// boundary is scheduled (note-off). Dynamic: re-read while sustaining.
    pub update_mode: ByteParam,
    pub amount: FloatParamB,
    pub initial_value: FloatParamB,
    pub delay_time: FloatParamB,
    pub attack_time: FloatParamB,
    pub peak_value: FloatParamB,
    pub hold_time: FloatParamB,
    pub decay_time: FloatParamB,
    pub sustain_value: FloatParamB,
    pub release_time: FloatParamB,
    pub final_value: FloatParamB,
    change_index: i32,
    param_change_indices: [i32; 11],
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Envelope {
    pub fn new() -> Self {
        let mut envelope = Self {
            update_mode: ByteParam::new(UPDATE_MODE_STATIC, UPDATE_MODE_DYNAMIC, UPDATE_MODE_STATIC),
            amount: FloatParamB::new(0.0, 1.0, 1.0),
            initial_value: FloatParamB::new(0.0, 1.0, 0.0),
            delay_time: FloatParamB::new(0.0, 6.0, 0.0),
            attack_time: FloatParamB::new(0.0, 6.0, 0.02),
            peak_value: FloatParamB::new(0.0, 1.0, 1.0),
            hold_time: FloatParamB::new(0.0, 12.0, 0.0),
            decay_time: FloatParamB::new(0.0, 15.0, 0.3),
            sustain_value: FloatParamB::new(0.0, 1.0, 0.7),
            release_time: FloatParamB::new(0.0, 6.0, 0.1),
            final_value: FloatParamB::new(0.0, 1.0, 0.0),
            change_index: 0,
            param_change_indices: [-1; 11],
        };

        envelope.update();
        envelope
    }

    /// Bump the aggregated change index if any constituent parameter moved
    /// since the previous update.
    pub fn update(&mut self) {
        let current = [
            self.update_mode.get_change_index(),
            self.amount.get_change_index(),
            self.initial_value.get_change_index(),
            self.delay_time.get_change_index(),
            self.attack_time.get_change_index(),
            self.peak_value.get_change_index(),
            self.hold_time.get_change_index(),
            self.decay_time.get_change_index(),
            self.sustain_value.get_change_index(),
            self.release_time.get_change_index(),
            self.final_value.get_change_index(),
        ];

        if current != self.param_change_indices {
            self.param_change_indices = current;
            self.change_index = (self.change_index + 1) & 0x7fffffff;
        }
    }

    pub fn get_change_index(&self) -> i32 {
        self.change_index
    }

    pub fn is_dynamic(&self) -> bool {
        self.update_mode.get_value() == UPDATE_MODE_DYNAMIC
    }

    pub fn make_snapshot(&self) -> EnvelopeSnapshot {
        EnvelopeSnapshot {
            update_mode: self.update_mode.get_value(),
            amount: self.amount.get_value(),
            initial_value: self.initial_value.get_value(),
            delay_time: self.delay_time.get_value(),
            attack_time: self.attack_time.get_value(),
            peak_value: self.peak_value.get_value(),
            hold_time: self.hold_time.get_value(),
            decay_time: self.decay_time.get_value(),
            sustain_value: self.sustain_value.get_value(),
            release_time: self.release_time.get_value(),
            final_value: self.final_value.get_value(),
        }
    }

    pub fn reset(&mut self) {
        self.update_mode.reset();
        self.amount.reset();
        self.initial_value.reset();
        self.delay_time.reset();
        self.attack_time.reset();
        self.peak_value.reset();
        self.hold_time.reset();
        self.decay_time.reset();
        self.sustain_value.reset();
        self.release_time.reset();
        self.final_value.reset();
        self.update();
    }
}

/// The envelope parameters captured at note-on (or re-captured, depending
/// on the update mode).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeSnapshot {
    pub update_mode: u8,
    pub amount: Number,
    pub initial_value: Number,
    pub delay_time: Seconds,
    pub attack_time: Seconds,
    pub peak_value: Number,
    pub hold_time: Seconds,
    pub decay_time: Seconds,
    pub sustain_value: Number,
    pub release_time: Seconds,
    pub final_value: Number,
}

impl EnvelopeSnapshot {
    /// Schedule the delay/attack/hold/decay/sustain sequence on `param`,
    /// starting `time_offset` seconds into the current block. Cancels
    /// whatever was scheduled before.
    pub fn start(&self, param: &mut FloatParamS, time_offset: Seconds) {
        let initial = param.ratio_to_value(self.amount * self.initial_value);
        let peak = param.ratio_to_value(self.amount * self.peak_value);
        let sustain = param.ratio_to_value(self.amount * self.sustain_value);

        param.cancel_events_at(time_offset);
        param.schedule_value(time_offset, initial);
        param.schedule_value(time_offset + self.delay_time, initial);
        param.schedule_linear_ramp(self.attack_time, peak);
        param.schedule_value(
            time_offset + self.delay_time + self.attack_time + self.hold_time,
            peak,
        );
        param.schedule_linear_ramp(self.decay_time, sustain);
    }

    /// Cancel the pending schedule at `time_offset` and ramp to the final
    /// value over the release time; returns the release duration so the
    /// caller knows when the target has faded out.
    pub fn end(&self, param: &mut FloatParamS, time_offset: Seconds) -> Seconds {
        let final_value = param.ratio_to_value(self.amount * self.final_value);

        param.cancel_events_at(time_offset);
        param.schedule_linear_ramp(self.release_time, final_value);

        self.release_time
    }

    /// Re-target the sustain level without restarting the envelope; used by
    /// dynamic-update envelopes while a voice is sustaining.
    pub fn update_sustain(&self, param: &mut FloatParamS, time_offset: Seconds) {
        let sustain = param.ratio_to_value(self.amount * self.sustain_value);

        if (param.get_value() - sustain).abs() > 1e-9 && !param.has_events() {
            param.cancel_events_at(time_offset);
            param.schedule_linear_ramp(0.05, sustain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::signal_producer::{produce, SignalProducer};
    use crate::Sample;

    const SAMPLE_RATE: Number = 1000.0;

    fn target_param() -> FloatParamS {
        let mut param = FloatParamS::new(0.0, 1.0, 0.0);
        param.set_sample_rate(SAMPLE_RATE);
        param.set_block_size(1000);
        param
    }

    fn snapshot() -> EnvelopeSnapshot {
        let mut envelope = Envelope::new();
        envelope.delay_time.set_value(0.05);
        envelope.attack_time.set_value(0.1);
        envelope.hold_time.set_value(0.05);
        envelope.decay_time.set_value(0.2);
        envelope.sustain_value.set_value(0.5);
        envelope.release_time.set_value(0.1);
        envelope.make_snapshot()
    }

    #[test]
    fn test_dahds_sequence_shape() {
        let snapshot = snapshot();
        let mut param = target_param();

        snapshot.start(&mut param, 0.0);
        produce(&mut param, 1, 1000);

        let buffer: Vec<Sample> = param.state().buffer()[0].clone();

        // Delay: flat at the initial value for 50 ms.
        assert!(buffer[..50].iter().all(|&sample| sample.abs() < 1e-6));
        // Attack: half way up at 100 ms.
        assert!((buffer[100] - 0.5).abs() < 0.05);
        // Peak reached at 150 ms, held until 200 ms.
        assert!((buffer[155] - 1.0).abs() < 0.02);
        assert!((buffer[199] - 1.0).abs() < 0.02);
        // Decay: down to sustain at 400 ms.
        assert!((buffer[400] - 0.5).abs() < 0.02);
        assert!((buffer[900] - 0.5).abs() < 0.02);
    }

    #[test]
    fn test_amount_scales_all_levels() {
        let mut envelope = Envelope::new();
        envelope.amount.set_value(0.5);
        envelope.attack_time.set_value(0.01);
        envelope.decay_time.set_value(0.01);
        envelope.sustain_value.set_value(1.0);
        let snapshot = envelope.make_snapshot();

        let mut param = target_param();
        snapshot.start(&mut param, 0.0);
        produce(&mut param, 1, 1000);

        assert!((param.get_value() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_end_ramps_to_final_value() {
        let snapshot = snapshot();
        let mut param = target_param();

        snapshot.start(&mut param, 0.0);
        produce(&mut param, 1, 1000);

        let release = snapshot.end(&mut param, 0.0);
        assert!((release - 0.1).abs() < 1e-9);

        produce(&mut param, 2, 1000);
        let buffer = &param.state().buffer()[0];

        // Released from 0.5 toward 0.0 over 100 ms.
        assert!((buffer[50] - 0.25).abs() < 0.03);
        assert!(buffer[200..].iter().all(|&sample| sample.abs() < 1e-6));
    }

    #[test]
    fn test_end_interrupts_attack_without_jump() {
        let snapshot = snapshot();
        let mut param = target_param();

        snapshot.start(&mut param, 0.0);
        produce(&mut param, 1, 100); // 100 ms: 50 delay + 50 of the attack

        let mid_attack = param.get_value();
        assert!(mid_attack > 0.1 && mid_attack < 0.9);

        snapshot.end(&mut param, 0.0);
        produce(&mut param, 2, 100);

        let buffer = &param.state().buffer()[0];
        assert!(
            (buffer[0] as Number - mid_attack).abs() < 0.1,
            "release starts from the interrupted level"
        );
    }

    #[test]
    fn test_change_index_tracks_param_edits() {
        let mut envelope = Envelope::new();
        let before = envelope.get_change_index();

        envelope.update();
        assert_eq!(envelope.get_change_index(), before);

        envelope.decay_time.set_value(1.0);
        envelope.update();
        assert_ne!(envelope.get_change_index(), before);
    }

    #[test]
    fn test_snapshot_reflects_update_mode() {
        let mut envelope = Envelope::new();
        envelope.update_mode.set_value(UPDATE_MODE_DYNAMIC);

        assert!(envelope.is_dynamic());
        assert_eq!(envelope.make_snapshot().update_mode, UPDATE_MODE_DYNAMIC);
    }
}
