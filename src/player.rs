//! Music Player & Renderer (§4.4): drives a guest CPU through a
//! chiptune's INIT/PLAY routine, captures the register writes it
//! produces, schedules them against the audio sample clock, and hands
//! the resulting event list to a [ChipEngine] for sample-accurate
//! playback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use ie_core::chip::GuestCpu;
use ie_core::clock::CycleToSampleRate;
use ie_formats::chiptune::{ChiptuneFormat, ChiptuneHeader, FormatError};
use ie_formats::parse_chiptune;
use ie_peripherals::engine::{ChipEngine, ChipEvent, EventDrivenEngine, EventList};
use ie_audio::synth::SoundChip;

/// Cycle budget for both the INIT and PLAY synthetic calls (§4.4, §5
/// "Timeouts").
pub const CYCLE_BUDGET: u32 = 1_000_000;

/// Return address staged for every synthetic call. Chosen outside the
/// guest's addressable RAM in [CaptureBus] so a runaway routine that
/// falls through cannot alias it by accident.
pub const SYNTHETIC_RETURN_ADDR: u32 = 0xFFFF_FFFF;

/// Derives a per-event channel hint from a register offset, so
/// downstream tooling can visualize per-voice activity without
/// re-decoding the register map (§4.4 SUPPLEMENT). 7 registers per SID
/// voice is the default; callers targeting a different register
/// layout (POKEY, TED) supply their own [ChannelHintFn].
pub type ChannelHintFn = fn(u8) -> u8;

pub fn sid_channel_hint(reg: u8) -> u8 {
    (reg / 7).min(2)
}

/// One register write captured during a render, before conversion to
/// sample-domain [ChipEvent]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapturedWrite {
    pub cycle: u64,
    pub register: u8,
    pub value: u8,
    pub channel: u8,
}

/// A private bus a guest CPU is driven against while rendering a
/// chiptune: RAM for the embedded binary plus one intercepted register
/// range, isolated from the main [ie_core::bus::MachineBus] (§4.4
/// "Capture bus").
pub struct CaptureBus {
    ram: Vec<u8>,
    register_base: u32,
    register_end: u32,
    channel_hint: ChannelHintFn,
    cycle_counter: u64,
    frame_start_cycle: u64,
    writes: Vec<CapturedWrite>,
}

impl CaptureBus {
    /// `ram_size` should be 64 KiB or 256 KiB per the chiptune family
    /// being rendered (§4.4).
    pub fn new(ram_size: usize, register_base: u32, register_end: u32, channel_hint: ChannelHintFn) -> Self {
        CaptureBus {
            ram: vec![0u8; ram_size],
            register_base,
            register_end,
            channel_hint,
            cycle_counter: 0,
            frame_start_cycle: 0,
            writes: Vec::with_capacity(512),
        }
    }

    pub fn load_bytes(&mut self, addr: u16, data: &[u8]) {
        let start = addr as usize;
        if start >= self.ram.len() {
            return;
        }
        let end = (start + data.len()).min(self.ram.len());
        self.ram[start..end].copy_from_slice(&data[..end - start]);
    }

    pub fn read8(&self, addr: u16) -> u8 {
        self.ram.get(addr as usize).copied().unwrap_or(0)
    }

    pub fn write8(&mut self, addr: u16, value: u8) {
        let addr32 = addr as u32;
        if addr32 >= self.register_base && addr32 < self.register_end {
            let reg = (addr32 - self.register_base) as u8;
            self.writes.push(CapturedWrite {
                cycle: self.cycle_counter,
                register: reg,
                value,
                channel: (self.channel_hint)(reg),
            });
            return;
        }
        if let Some(slot) = self.ram.get_mut(addr as usize) {
            *slot = value;
        }
    }

    /// Advances the cycle counter by `n`, driven by the guest CPU's own
    /// per-instruction cycle return (§4.4 "`bus.add_cycles(n)` after
    /// each step").
    pub fn add_cycles(&mut self, n: u32) {
        self.cycle_counter = self.cycle_counter.wrapping_add(n as u64);
    }

    pub fn cycle_counter(&self) -> u64 {
        self.cycle_counter
    }

    pub fn mark_frame_start(&mut self) {
        self.frame_start_cycle = self.cycle_counter;
    }

    pub fn frame_start_cycle(&self) -> u64 {
        self.frame_start_cycle
    }

    /// Drains every write captured since the last call.
    pub fn take_writes(&mut self) -> Vec<CapturedWrite> {
        std::mem::take(&mut self.writes)
    }
}

/// Builds a fresh [GuestCpu] bound to `bus` for the duration of one
/// render. A real decoder closes over `bus` to service its own
/// load/store instructions against it; this crate only specifies the
/// seam (§1 Out of scope: CPU decoders are external collaborators).
pub type PlayerCpuBuilder = Arc<dyn Fn(Arc<Mutex<CaptureBus>>) -> Box<dyn GuestCpu + Send> + Send + Sync>;

/// Failures surfaced by the Music Player's load/render path (§4.4
/// "Failure model").
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("chiptune file could not be parsed: {0}")]
    InvalidFile(#[from] FormatError),
    #[error("render target pointer/length is out of bounds for the capture bus")]
    OutOfBounds,
    #[error("render was superseded by a newer request")]
    Superseded,
}

/// The render result handed to [EventDrivenEngine::set_events].
pub struct RenderResult {
    pub events: EventList,
    pub total_samples: u64,
    pub loop_sample: u64,
    /// Per-event channel hints, parallel in spirit to `events` but kept
    /// separate since [ChipEvent] itself carries no channel field (§4.4
    /// SUPPLEMENT).
    pub channel_hints: Vec<(u64, u8)>,
}

/// Renders `header`/`data` for `render_seconds` of wall-clock audio at
/// `sample_rate`, driving a fresh guest CPU built by `cpu_builder`
/// against a private [CaptureBus] (§4.4 "INIT phase" / "Render loop").
///
/// `render_seconds` is an explicit parameter rather than a derived
/// value: chiptune headers in this format family carry no authoritative
/// track length (Design Notes §9 "do not guess; expose as
/// configuration").
pub fn render(
    header: &ChiptuneHeader,
    data: &[u8],
    sample_rate: u32,
    cpu_builder: &PlayerCpuBuilder,
    channel_hint: ChannelHintFn,
    render_seconds: f64,
) -> Result<RenderResult, PlayerError> {
    if header.data_offset > data.len() {
        return Err(PlayerError::OutOfBounds);
    }
    let payload = &data[header.data_offset..];

    let ram_size = match header.format {
        ChiptuneFormat::Sndh => 256 * 1024,
        _ => 64 * 1024,
    };
    let capture = Arc::new(Mutex::new(CaptureBus::new(ram_size, register_base_for(header.format), register_end_for(header.format), channel_hint)));
    capture.lock().unwrap().load_bytes(header.load_address, payload);

    let mut cpu = cpu_builder(Arc::clone(&capture));
    cpu.reset();

    // INIT phase: set subsong, stage a synthetic call, run to completion
    // or the cycle budget (§4.4 "INIT phase").
    cpu.set_accumulator(header.start_song.min(u8::MAX as u16) as u8);
    cpu.synthetic_call(header.init_address as u32, SYNTHETIC_RETURN_ADDR);
    cpu.set_running(true);
    run_to_return(cpu.as_mut(), &capture, CYCLE_BUDGET);
    capture.lock().unwrap().take_writes(); // INIT's own writes do not play back; discard.

    let tick_hz = header.tick_rate.hz();
    let clock_hz = clock_hz_for(header.format);
    let cycles_per_tick = (clock_hz / tick_hz).round() as u32;
    let converter = CycleToSampleRate::new(sample_rate, clock_hz);

    let mut events = EventList::new();
    let mut channel_hints = Vec::new();
    let mut global_cycle_counter: u64 = 0;
    let mut global_sample_counter: u64 = 0;
    let render_samples = (render_seconds * sample_rate as f64).round() as u64;

    while global_sample_counter < render_samples {
        capture.lock().unwrap().mark_frame_start();
        let frame_start_cycle = capture.lock().unwrap().frame_start_cycle();

        if header.play_address != 0 {
            cpu.synthetic_call(header.play_address as u32, SYNTHETIC_RETURN_ADDR);
            cpu.set_running(true);
            run_to_return(cpu.as_mut(), &capture, CYCLE_BUDGET);
        } else {
            run_for_cycles(cpu.as_mut(), &capture, cycles_per_tick);
        }

        let writes = capture.lock().unwrap().take_writes();
        for w in writes {
            let sample_index = converter.cycles_to_samples(
                global_cycle_counter + (w.cycle - frame_start_cycle),
            );
            events.push(ChipEvent { sample_index, reg: w.register, value: w.value });
            channel_hints.push((sample_index, w.channel));
        }

        global_cycle_counter += cycles_per_tick as u64;
        global_sample_counter = converter.cycles_to_samples(global_cycle_counter);
    }

    events.sort();
    Ok(RenderResult { events, total_samples: global_sample_counter, loop_sample: 0, channel_hints })
}

fn run_to_return(cpu: &mut dyn GuestCpu, capture: &Arc<Mutex<CaptureBus>>, budget: u32) {
    let mut spent = 0u32;
    while cpu.pc() != SYNTHETIC_RETURN_ADDR && spent < budget {
        let cycles = cpu.step();
        capture.lock().unwrap().add_cycles(cycles);
        spent = spent.saturating_add(cycles);
    }
}

fn run_for_cycles(cpu: &mut dyn GuestCpu, capture: &Arc<Mutex<CaptureBus>>, cycles: u32) {
    let mut spent = 0u32;
    while spent < cycles {
        let c = cpu.step();
        capture.lock().unwrap().add_cycles(c);
        spent = spent.saturating_add(c);
    }
}

/// Where a format's hardware registers sit in the guest address space
/// it was originally written against (C64's `$D400` SID page, etc.) —
/// unrelated to this crate's own MMIO map in [crate::mmio], which only
/// matters on the *main* bus.
fn register_base_for(format: ChiptuneFormat) -> u32 {
    match format {
        ChiptuneFormat::Sid => 0xD400,
        ChiptuneFormat::Sap => 0xD200,
        ChiptuneFormat::Ted => 0xFF0E,
        ChiptuneFormat::Ahx => 0xDFF0,
        ChiptuneFormat::Sndh => 0xFFFF00,
    }
}

fn register_end_for(format: ChiptuneFormat) -> u32 {
    match format {
        ChiptuneFormat::Sid => 0xD400 + 0x1D,
        ChiptuneFormat::Sap => 0xD200 + 0x0A,
        ChiptuneFormat::Ted => 0xFF0E + 0x06,
        ChiptuneFormat::Ahx => 0xDFF0 + 0x20,
        ChiptuneFormat::Sndh => 0xFFFF00 + 0x20,
    }
}

/// The guest clock a format's chip engine runs at. PAL/NTSC only
/// changes the *tick* rate (§9 "CIA timer in SID"); the chip clock
/// itself is fixed per format.
fn clock_hz_for(format: ChiptuneFormat) -> f64 {
    match format {
        ChiptuneFormat::Sid => 985_248.0,
        ChiptuneFormat::Sap => 1_789_772.5,
        ChiptuneFormat::Ted => 17_734_475.0 / 4.0,
        ChiptuneFormat::Ahx => 3_546_895.0,
        ChiptuneFormat::Sndh => 2_000_000.0,
    }
}

/// Snapshot of a [MusicPlayer]'s state for UI polling (§4.6 SUPPLEMENT
/// applies the same shape to the player as to the worker).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Rendering,
    Ready,
    Error,
}

struct PlayerShared<E: ChipEngine + Send + 'static> {
    engine: EventDrivenEngine<E>,
    status: PlayerStatus,
    last_error: Option<String>,
}

/// Facade wrapping an [EventDrivenEngine] with load/render lifecycle,
/// generation-gated async rendering, and the mutex discipline described
/// in §4.4 "Concurrency".
pub struct MusicPlayer<E: ChipEngine + Send + 'static> {
    shared: Arc<Mutex<PlayerShared<E>>>,
    generation: Arc<AtomicU64>,
    sample_rate: u32,
    cpu_builder: PlayerCpuBuilder,
    channel_hint: ChannelHintFn,
}

/// Every field is an `Arc` clone, a `Copy` scalar, or a function
/// pointer, so cloning a [MusicPlayer] is cheap and shares the same
/// underlying engine/generation -- the shape [crate::Machine]'s MMIO
/// handlers need to close over a player without wrapping it in an
/// extra `Arc` of their own.
impl<E: ChipEngine + Send + 'static> Clone for MusicPlayer<E> {
    fn clone(&self) -> Self {
        MusicPlayer {
            shared: Arc::clone(&self.shared),
            generation: Arc::clone(&self.generation),
            sample_rate: self.sample_rate,
            cpu_builder: Arc::clone(&self.cpu_builder),
            channel_hint: self.channel_hint,
        }
    }
}

impl<E: ChipEngine + Send + 'static> MusicPlayer<E> {
    pub fn new(sample_rate: u32, engine: E, cpu_builder: PlayerCpuBuilder, channel_hint: ChannelHintFn) -> Self {
        MusicPlayer {
            shared: Arc::new(Mutex::new(PlayerShared {
                engine: EventDrivenEngine::new(engine),
                status: PlayerStatus::Idle,
                last_error: None,
            })),
            generation: Arc::new(AtomicU64::new(0)),
            sample_rate,
            cpu_builder,
            channel_hint,
        }
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.lock().unwrap().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().unwrap().last_error.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn playing(&self) -> bool {
        self.shared.lock().unwrap().engine.playing()
    }

    /// Parses and renders `data` synchronously, then installs the
    /// result immediately. Used by tests and non-MMIO callers; the MMIO
    /// control path instead goes through
    /// [MusicPlayer::spawn_async_render] (§4.4 "Load path").
    pub fn load_and_render_sync(&self, data: &[u8], render_seconds: f64, loop_enabled: bool) -> Result<(), PlayerError> {
        let header = parse_chiptune(data)?;
        let result = render(&header, data, self.sample_rate, &self.cpu_builder, self.channel_hint, render_seconds)?;
        let mut shared = self.shared.lock().unwrap();
        shared.engine.set_events(result.events, result.total_samples, loop_enabled, result.loop_sample);
        shared.status = PlayerStatus::Ready;
        shared.last_error = None;
        Ok(())
    }

    /// Stages a start request: bumps the generation, spawns a
    /// background render thread, and installs the result only if this
    /// request is still current when it finishes (§4.4 "Generation
    /// check").
    pub fn spawn_async_render(&self, data: Vec<u8>, render_seconds: f64, loop_enabled: bool) {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut shared = self.shared.lock().unwrap();
            shared.status = PlayerStatus::Rendering;
        }

        let shared = Arc::clone(&self.shared);
        let generation = Arc::clone(&self.generation);
        let sample_rate = self.sample_rate;
        let cpu_builder = Arc::clone(&self.cpu_builder);
        let channel_hint = self.channel_hint;

        thread::spawn(move || {
            let outcome = parse_chiptune(&data)
                .map_err(PlayerError::from)
                .and_then(|header| render(&header, &data, sample_rate, &cpu_builder, channel_hint, render_seconds));

            let mut shared = shared.lock().unwrap();
            if generation.load(Ordering::SeqCst) != my_generation {
                log::debug!("music player: render superseded, dropping result");
                return;
            }
            match outcome {
                Ok(result) => {
                    shared.engine.set_events(result.events, result.total_samples, loop_enabled, result.loop_sample);
                    shared.status = PlayerStatus::Ready;
                    shared.last_error = None;
                }
                Err(err) => {
                    log::warn!("music player: render failed: {}", err);
                    shared.status = PlayerStatus::Error;
                    shared.last_error = Some(err.to_string());
                }
            }
        });
    }

    /// Bumps the generation (superseding any in-flight render) and
    /// requests the underlying engine stop.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.lock().unwrap().engine.stop();
    }

    /// Reports a validation failure that occurred before a render was
    /// even attempted (e.g. an MMIO-staged pointer/length pair that
    /// does not fit the bus), without bumping the generation -- there
    /// is no in-flight render to supersede (§4.6 "Synchronous gate").
    pub fn fail(&self, message: impl Into<String>) {
        let mut shared = self.shared.lock().unwrap();
        shared.status = PlayerStatus::Error;
        shared.last_error = Some(message.into());
    }

    /// Replays events due at the current sample against `chip`. Called
    /// once per sample by the owning driver loop, not through
    /// [ie_core::clock::SampleTicker] — [ie_audio::synth::SoundChip]'s
    /// ticker slot cannot grant this call a `&mut SoundChip`, since the
    /// chip is what's invoking it.
    pub fn tick_sample(&self, chip: &mut SoundChip) {
        self.shared.lock().unwrap().engine.tick_sample(chip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_core::chip::StubCpu;

    fn stub_builder() -> PlayerCpuBuilder {
        Arc::new(|_capture| Box::new(StubCpu::new()))
    }

    const HEADER_LEN_V1: usize = 0x76;

    /// Mirrors `ie_formats::sid_file`'s own test fixture: a v2 PSID
    /// header with no embedded binary beyond the header itself.
    fn minimal_psid(init: u16, play: u16) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_LEN_V1];
        data[0..4].copy_from_slice(b"PSID");
        data[4..6].copy_from_slice(&2u16.to_be_bytes()); // version
        data[6..8].copy_from_slice(&(HEADER_LEN_V1 as u16).to_be_bytes()); // data offset
        data[8..10].copy_from_slice(&0xA800u16.to_be_bytes()); // load address
        data[10..12].copy_from_slice(&init.to_be_bytes());
        data[12..14].copy_from_slice(&play.to_be_bytes());
        data[14..16].copy_from_slice(&1u16.to_be_bytes()); // songs
        data[16..18].copy_from_slice(&1u16.to_be_bytes()); // start song
        data
    }

    #[test]
    fn render_is_deterministic_across_independent_calls() {
        let data = minimal_psid(0xA000, 0);
        let header = parse_chiptune(&data).unwrap();
        let builder = stub_builder();

        let a = render(&header, &data, 44_100, &builder, sid_channel_hint, 0.05).unwrap();
        let b = render(&header, &data, 44_100, &builder, sid_channel_hint, 0.05).unwrap();
        assert_eq!(a.total_samples, b.total_samples);
        assert_eq!(a.events.len(), b.events.len());
    }

    #[test]
    fn stop_bumps_generation_and_drops_a_superseded_render() {
        use ie_peripherals::sid::SidEngine;

        let player = MusicPlayer::new(44_100, SidEngine::new(44_100), stub_builder(), sid_channel_hint);
        let before = player.generation();
        player.stop();
        assert!(player.generation() > before);
    }
}
