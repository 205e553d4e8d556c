//! Round-scheduled block rendering with per-node event queues
//!
//! Every node in the signal graph owns a [`ProducerState`]: its output
//! buffer, timing information and a FIFO of scheduled events. Rendering is
//! driven by [`produce`]: a node rendered in round R caches that round and
//! returns the same buffer contents for any later read in the same round,
//! so producers shared by several consumers do the work only once.
//!
//! Within a block, `render` is called for each maximal run of samples
//! between adjacent event boundaries, and `handle_event` fires at each
//! boundary. Events at equal offsets retain insertion order; events at or
//! past the end of the block stay queued for a later block.

use std::collections::VecDeque;

use crate::{Frequency, Number, Sample, Seconds};

pub const DEFAULT_BLOCK_SIZE: usize = 256;
pub const DEFAULT_SAMPLE_RATE: Frequency = 44100.0;

/// 1 beat = 1 second by default, which turns tempo-sync toggles into no-ops
/// when no host tempo is available.
pub const DEFAULT_BPM: Number = 60.0;

/// Linear amplitude below which a signal counts as silent (-150 dB).
pub const SILENCE_THRESHOLD: Number = 2.98e-8;

const EVENT_QUEUE_RESERVED: usize = 32;

pub type EventType = u8;

/// Reserved across all producers: freeze the interrupted state and drop
/// whatever was scheduled after the cancellation point.
pub const EVT_CANCEL: EventType = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    /// Absolute time on the owning producer's timeline.
    pub time_offset: Seconds,
    pub number_param_1: Number,
    pub number_param_2: Number,
    pub byte_param: u8,
}

impl Event {
    pub fn new(event_type: EventType, time_offset: Seconds) -> Self {
        Self {
            event_type,
            time_offset,
            number_param_1: 0.0,
            number_param_2: 0.0,
            byte_param: 0,
        }
    }
}

pub struct ProducerState {
    channels: usize,
    block_size: usize,
    sample_rate: Frequency,
    sampling_period: Seconds,
    nyquist_frequency: Frequency,
    bpm: Number,
    current_time: Seconds,
    cached_round: Option<u64>,
    last_sample_count: usize,
    buffer: Vec<Vec<Sample>>,
    events: VecDeque<Event>,
}

impl ProducerState {
    pub fn new(channels: usize) -> Self {
        let mut state = Self {
            channels,
            block_size: 0,
            sample_rate: 0.0,
            sampling_period: 0.0,
            nyquist_frequency: 0.0,
            bpm: DEFAULT_BPM,
            current_time: 0.0,
            cached_round: None,
            last_sample_count: 0,
            buffer: (0..channels).map(|_| Vec::new()).collect(),
            events: VecDeque::with_capacity(EVENT_QUEUE_RESERVED),
        };

        state.set_sample_rate(DEFAULT_SAMPLE_RATE);
        state.set_block_size(DEFAULT_BLOCK_SIZE);

        state
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sample_rate(&self) -> Frequency {
        self.sample_rate
    }

    pub fn sampling_period(&self) -> Seconds {
        self.sampling_period
    }

    pub fn nyquist_frequency(&self) -> Frequency {
        self.nyquist_frequency
    }

    pub fn bpm(&self) -> Number {
        self.bpm
    }

    pub fn current_time(&self) -> Seconds {
        self.current_time
    }

    pub fn cached_round(&self) -> Option<u64> {
        self.cached_round
    }

    pub fn last_sample_count(&self) -> usize {
        self.last_sample_count
    }

    pub fn buffer(&self) -> &[Vec<Sample>] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [Vec<Sample>] {
        &mut self.buffer
    }

    pub fn set_sample_rate(&mut self, sample_rate: Frequency) {
        debug_assert!(sample_rate > 0.0);

        self.sample_rate = sample_rate;
        self.sampling_period = 1.0 / sample_rate;
        self.nyquist_frequency = sample_rate / 2.0;
        self.cached_round = None;
    }

    pub fn set_block_size(&mut self, block_size: usize) {
        debug_assert!(block_size > 0);

        if block_size != self.block_size {
            self.block_size = block_size;

            for channel in self.buffer.iter_mut() {
                channel.clear();
                channel.resize(block_size, 0.0);
            }

            self.cached_round = None;
        }
    }

    pub fn set_bpm(&mut self, bpm: Number) {
        debug_assert!(bpm > 0.0);
        self.bpm = bpm;
    }

    pub fn reset(&mut self) {
        self.current_time = 0.0;
        self.cached_round = None;
        self.events.clear();

        for channel in self.buffer.iter_mut() {
            channel.fill(0.0);
        }
    }

    /// Convert a sample count into seconds on this producer's timeline.
    pub fn sample_count_to_time_offset(&self, sample_count: usize) -> Seconds {
        sample_count as Seconds * self.sampling_period
    }

    /// Append an event `time_offset` seconds from the current block start.
    pub fn schedule(
        &mut self,
        event_type: EventType,
        time_offset: Seconds,
        number_param_1: Number,
        number_param_2: Number,
        byte_param: u8,
    ) {
        self.events.push_back(Event {
            event_type,
            time_offset: self.current_time + time_offset.max(0.0),
            number_param_1,
            number_param_2,
            byte_param,
        });
    }

    /// Drop events scheduled at or after `time_offset` (seconds from the
    /// current block start) and queue a cancel marker there instead.
    pub fn cancel_events_at(&mut self, time_offset: Seconds) {
        let cancel_time = self.current_time + time_offset.max(0.0);

        while let Some(last) = self.events.back() {
            if last.time_offset >= cancel_time - 1e-12 {
                self.events.pop_back();
            } else {
                break;
            }
        }

        self.events
            .push_back(Event::new(EVT_CANCEL, cancel_time));
    }

    pub fn cancel_events(&mut self) {
        self.events.clear();
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Seconds (from the current block start) of the last scheduled event.
    pub fn last_event_time_offset(&self) -> Seconds {
        self.events
            .back()
            .map(|event| (event.time_offset - self.current_time).max(0.0))
            .unwrap_or(0.0)
    }

    pub fn has_upcoming_events(&self, sample_count: usize) -> bool {
        self.events
            .front()
            .map(|event| self.is_due(event.time_offset, sample_count))
            .unwrap_or(false)
    }

    fn is_due(&self, event_time: Seconds, sample_count: usize) -> bool {
        self.event_sample_index(event_time) < sample_count
    }

    /// Sample index of an (absolute) event time within the current block.
    fn event_sample_index(&self, event_time: Seconds) -> usize {
        let offset = (event_time - self.current_time).max(0.0);
        (offset * self.sample_rate).floor() as usize
    }

    pub(crate) fn events(&self) -> &VecDeque<Event> {
        &self.events
    }

    pub(crate) fn mark_round(&mut self, round: u64, sample_count: usize) {
        self.cached_round = Some(round);
        self.last_sample_count = sample_count;
    }

    /// Move the clock forward by a whole block without rendering; used when
    /// a producer's round is skipped or driven externally.
    pub(crate) fn advance_clock_by(&mut self, sample_count: usize) {
        self.current_time += sample_count as Seconds * self.sampling_period;
    }
}

/// The interface every node of the signal graph implements.
///
/// Configuration entry points (`set_sample_rate`, `set_block_size`,
/// `reset`) must recurse into every owned sub-node; they are only legal
/// while the engine is suspended.
pub trait SignalProducer {
    fn state(&self) -> &ProducerState;
    fn state_mut(&mut self) -> &mut ProducerState;

    /// Called once when a round begins, before events are drained.
    /// Typically renders the producers this node reads from.
    fn initialize_rendering(&mut self, _round: u64, _sample_count: usize) {}

    fn handle_event(&mut self, _event: Event) {}

    /// Fill this node's own buffer channels over `[first, last)`.
    fn render(&mut self, round: u64, first: usize, last: usize);

    fn set_sample_rate(&mut self, sample_rate: Frequency) {
        self.state_mut().set_sample_rate(sample_rate);
    }

    fn set_block_size(&mut self, block_size: usize) {
        self.state_mut().set_block_size(block_size);
    }

    fn set_bpm(&mut self, bpm: Number) {
        self.state_mut().set_bpm(bpm);
    }

    fn reset(&mut self) {
        self.state_mut().reset();
    }
}

/// Render `producer` for `round` unless it has already rendered it.
///
/// Drains the events that fall inside the block, calling
/// `render(round, first, last)` over the interval between adjacent event
/// boundaries and `handle_event` at each boundary, then advances the
/// producer's clock by the block duration.
pub fn produce<P: SignalProducer + ?Sized>(producer: &mut P, round: u64, sample_count: usize) {
    debug_assert!(sample_count <= producer.state().block_size());

    if producer.state().cached_round() == Some(round) {
        return;
    }

    producer.state_mut().mark_round(round, sample_count);
    producer.initialize_rendering(round, sample_count);

    let block_start = producer.state().current_time();
    let period = producer.state().sampling_period();
    let sample_rate = producer.state().sample_rate();
    let mut current = 0;

    loop {
        // Event boundaries are sample indices relative to the block
        // start, regardless of how far the clock advanced while handling
        // earlier events.
        let boundary = match producer.state().events().front() {
            Some(event) => {
                let index =
                    ((event.time_offset - block_start).max(0.0) * sample_rate).floor() as usize;

                if index >= sample_count {
                    break;
                }

                index.clamp(current, sample_count)
            }
            None => break,
        };

        if boundary > current {
            producer.render(round, current, boundary);
            current = boundary;
        }

        let event = producer
            .state_mut()
            .events
            .pop_front()
            .expect("peeked event vanished");

        // Handlers see the clock at the event boundary so that follow-up
        // scheduling computes offsets from the right base.
        producer.state_mut().current_time = block_start + boundary as Seconds * period;
        producer.handle_event(event);
    }

    if current < sample_count {
        producer.render(round, current, sample_count);
    }

    producer.state_mut().current_time = block_start + sample_count as Seconds * period;
}

/// Largest absolute sample across all channels, with the index where it
/// occurred (ties keep the earliest index).
pub fn find_peak(buffer: &[Vec<Sample>], sample_count: usize) -> (Sample, usize) {
    let mut peak: Sample = 0.0;
    let mut peak_index = 0;

    for channel in buffer.iter() {
        for (i, sample) in channel[..sample_count].iter().enumerate() {
            let magnitude = sample.abs();

            if magnitude > peak {
                peak = magnitude;
                peak_index = i;
            }
        }
    }

    (peak, peak_index)
}

pub fn is_buffer_silent(buffer: &[Vec<Sample>], sample_count: usize) -> bool {
    let (peak, _) = find_peak(buffer, sample_count);
    (peak as Number) < SILENCE_THRESHOLD
}
