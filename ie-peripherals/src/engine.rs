//! Shared chip-engine machinery: the event list register writes are
//! captured into for playback, and the trait every register front end
//! implements (§4.3 "Chip engines").

use ie_audio::synth::SoundChip;

/// One recorded register write, timestamped in samples since playback
/// start (§4.3 "Event list").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipEvent {
    pub sample_index: u64,
    pub reg: u8,
    pub value: u8,
}

/// A register-write trace, sorted by `sample_index`, played back with
/// binary-search loop wrap.
#[derive(Clone, Debug, Default)]
pub struct EventList {
    events: Vec<ChipEvent>,
}

impl EventList {
    pub fn new() -> Self {
        EventList { events: Vec::new() }
    }

    pub fn push(&mut self, event: ChipEvent) {
        self.events.push(event);
    }

    /// Restores sample-index order; must be called before querying
    /// ranges if events were appended out of order.
    pub fn sort(&mut self) {
        self.events.sort_by_key(|e| e.sample_index);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_sample_index(&self) -> u64 {
        self.events.last().map(|e| e.sample_index).unwrap_or(0)
    }

    /// Events whose `sample_index` falls in `[from, to)`, located via
    /// binary search over the sorted list.
    pub fn events_in_range(&self, from: u64, to: u64) -> &[ChipEvent] {
        let start = self.events.partition_point(|e| e.sample_index < from);
        let end = self.events.partition_point(|e| e.sample_index < to);
        &self.events[start..end]
    }

    /// Index bounds of `events_in_range(from, to)`, for callers that
    /// need to walk the range by index rather than hold a slice
    /// borrow (§4.4 "allocation-free" `tick_sample`).
    pub fn range_indices(&self, from: u64, to: u64) -> (usize, usize) {
        let start = self.events.partition_point(|e| e.sample_index < from);
        let end = self.events.partition_point(|e| e.sample_index < to);
        (start, end)
    }

    /// Index of the first event at or after `sample_index`, via binary
    /// search (used to resume at `loop_sample` on wrap, §4.4).
    pub fn index_at_or_after(&self, sample_index: u64) -> usize {
        self.events.partition_point(|e| e.sample_index < sample_index)
    }

    /// Copies the event at `index` out (cheap: [ChipEvent] is `Copy`),
    /// so callers can drop the borrow before mutating anything else.
    pub fn get(&self, index: usize) -> ChipEvent {
        self.events[index]
    }
}

/// Frequencies above 20 kHz are inaudible on real hardware and every
/// engine silences them the same way (§4.3 "Frequency").
pub const AUDIBLE_CEILING_HZ: f32 = 20_000.0;

/// Applies the shared 20 kHz ceiling: returns `0.0` (silence) when
/// `freq_hz` exceeds it, otherwise `freq_hz` unchanged.
pub fn clamp_audible(freq_hz: f32) -> f32 {
    if freq_hz > AUDIBLE_CEILING_HZ || freq_hz.is_nan() {
        0.0
    } else {
        freq_hz
    }
}

/// Shared contract for every legacy chip register front end: takes raw
/// register writes and translates them into [ie_audio::synth::SoundChip]
/// channel state, and advances any chip-internal state machine the
/// legacy chip has of its own (SID rate counters, POKEY polynomial
/// counters, and so on).
pub trait ChipEngine {
    fn handle_write(&mut self, chip: &mut SoundChip, reg: u8, value: u8);

    fn handle_read(&self, reg: u8) -> u8 {
        let _ = reg;
        0
    }

    fn set_clock_hz(&mut self, clock_hz: f64);

    fn reset(&mut self, chip: &mut SoundChip);

    /// Per-sample chip-internal advance that happens regardless of
    /// register writes (noise LFSR clocking, envelope rate counters
    /// already driven by [ie_audio::envelope::Envelope], filter sweep).
    fn tick_sample(&mut self, chip: &mut SoundChip) {
        let _ = chip;
    }
}

/// Wraps any [ChipEngine] with an event list and playback cursor, giving
/// it the event-driven playback behavior the Music Player drives SID,
/// POKEY and TED engines through (§4.3 "Event-driven playback", §4.4
/// "Playback").
///
/// `tick_sample` replays every event at the current cursor, then
/// advances the cursor by one sample; reaching `total_samples` either
/// rewinds to `loop_sample` (loop enabled) or clears `playing` (§8
/// universal invariant: "the (T+1)-th tick leaves `playing = false`").
pub struct EventDrivenEngine<E> {
    pub inner: E,
    events: EventList,
    cursor: u64,
    total_samples: u64,
    loop_enabled: bool,
    loop_sample: u64,
    playing: bool,
}

impl<E: ChipEngine> EventDrivenEngine<E> {
    pub fn new(inner: E) -> Self {
        EventDrivenEngine {
            inner,
            events: EventList::new(),
            cursor: 0,
            total_samples: 0,
            loop_enabled: false,
            loop_sample: 0,
            playing: false,
        }
    }

    /// Installs a new rendered event list and starts playback from
    /// sample 0 (§4.4 "The rendered event list is handed to the target
    /// chip engine via `set_events`").
    pub fn set_events(&mut self, mut events: EventList, total_samples: u64, loop_enabled: bool, loop_sample: u64) {
        events.sort();
        self.events = events;
        self.total_samples = total_samples;
        self.loop_enabled = loop_enabled;
        self.loop_sample = loop_sample;
        self.cursor = 0;
        self.playing = total_samples > 0;
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Replays events due at the current cursor against `chip`, then
    /// advances the cursor (or wraps/stops at the end of the track).
    pub fn tick_sample(&mut self, chip: &mut SoundChip) {
        if !self.playing {
            return;
        }
        if self.cursor >= self.total_samples {
            if self.loop_enabled {
                self.cursor = self.loop_sample;
            } else {
                self.playing = false;
                return;
            }
        }

        let (start, end) = self.events.range_indices(self.cursor, self.cursor + 1);
        for i in start..end {
            let event = self.events.get(i);
            self.inner.handle_write(chip, event.reg, event.value);
        }
        self.inner.tick_sample(chip);
        self.cursor += 1;
    }
}
