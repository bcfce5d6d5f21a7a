//! The sound chip: four [SoundChannel] voices feeding a shared global
//! filter, reverb and overdrive pipeline (§4.2 "Signal pipeline").
//!
//! `SoundChip` itself is not `Send`/`Sync`-aware beyond what its fields
//! already provide; callers sharing it across the audio callback and a
//! register-writing thread are expected to wrap it in a `Mutex`, as
//! the root crate's music player and machine do.

use crate::channel::SoundChannel;
use crate::filter::{soft_clip, FilterCurve, FilterRouting, StateVariableFilter};
use crate::reverb::Reverb;
use ie_core::clock::SampleTicker;

pub const CHANNEL_COUNT: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct GlobalFilterConfig {
    pub enabled: bool,
    pub cutoff: f32,
    pub resonance: f32,
    pub routing: FilterRouting,
    pub curve: FilterCurve,
}

impl Default for GlobalFilterConfig {
    fn default() -> Self {
        GlobalFilterConfig {
            enabled: false,
            cutoff: 0.45,
            resonance: 0.7,
            routing: FilterRouting::LOW_PASS,
            curve: FilterCurve::Mos8580,
        }
    }
}

pub struct SoundChip {
    pub channels: [SoundChannel; CHANNEL_COUNT],
    pub global_filter: GlobalFilterConfig,
    filter_state: StateVariableFilter,
    pub reverb: Option<Reverb>,
    pub overdrive_drive: f32,
    pub overdrive_curve: FilterCurve,
    pub master_enabled: bool,
    sample_rate: u32,
    /// Invoked once per generated sample, before any channel advances
    /// (§4.2 step 1). Music players attach themselves here to advance
    /// their event cursor in lockstep with the audio clock.
    ticker: Option<Box<dyn SampleTicker>>,
}

impl SoundChip {
    pub fn new(sample_rate: u32) -> Self {
        SoundChip {
            channels: [
                SoundChannel::new(sample_rate),
                SoundChannel::new(sample_rate),
                SoundChannel::new(sample_rate),
                SoundChannel::new(sample_rate),
            ],
            global_filter: GlobalFilterConfig::default(),
            filter_state: StateVariableFilter::new(),
            reverb: None,
            overdrive_drive: 0.0,
            overdrive_curve: FilterCurve::Mos8580,
            master_enabled: true,
            sample_rate,
            ticker: None,
        }
    }

    /// Attaches a [SampleTicker] to be invoked once per sample, ahead of
    /// every channel's advance. Passing `None` detaches it.
    pub fn set_sample_ticker(&mut self, ticker: Option<Box<dyn SampleTicker>>) {
        self.ticker = ticker;
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        for ch in self.channels.iter_mut() {
            ch.set_sample_rate(sample_rate);
        }
    }

    pub fn enable_reverb(&mut self, pre_delay_ms: f32, room_size: f32, damp: f32) {
        self.reverb = Some(Reverb::new(self.sample_rate, pre_delay_ms, room_size, damp));
    }

    pub fn disable_reverb(&mut self) {
        self.reverb = None;
    }

    /// Runs the five-step signal pipeline for one sample: mix channels,
    /// apply the global filter, apply reverb, apply overdrive, then
    /// clamp to the output range (§4.2).
    pub fn generate_sample(&mut self) -> f32 {
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.tick_sample();
        }

        if !self.master_enabled {
            return 0.0;
        }

        // Snapshot each channel's previous-sample oscillator state before
        // any channel advances this tick, so hard sync / ring mod (§4.3)
        // can read a neighboring voice without two channels ever being
        // borrowed mutably at once.
        let prev_wrapped = [
            self.channels[0].wrapped_this_sample,
            self.channels[1].wrapped_this_sample,
            self.channels[2].wrapped_this_sample,
            self.channels[3].wrapped_this_sample,
        ];
        let prev_raw = [
            self.channels[0].last_raw,
            self.channels[1].last_raw,
            self.channels[2].last_raw,
            self.channels[3].last_raw,
        ];

        let mut mixed = 0.0;
        for i in 0..CHANNEL_COUNT {
            let sync_reset = self.channels[i].sync_source.map(|src| prev_wrapped[src]).unwrap_or(false);
            let ring_raw = self.channels[i].ring_mod_source.map(|src| prev_raw[src]);
            mixed += self.channels[i].generate_sample_coupled(sync_reset, ring_raw);
        }
        mixed /= CHANNEL_COUNT as f32;

        if self.global_filter.enabled {
            mixed = self.filter_state.process_routed(
                mixed,
                self.global_filter.cutoff,
                self.global_filter.resonance,
                self.global_filter.routing,
            );
        }

        if let Some(reverb) = self.reverb.as_mut() {
            mixed = reverb.process(mixed);
        }

        if self.overdrive_drive > 0.0 {
            mixed = soft_clip(mixed, self.overdrive_drive, self.overdrive_curve);
        }

        mixed.clamp(-1.0, 1.0)
    }

    /// Fills `out` with consecutive mono samples.
    pub fn generate_block(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.generate_sample();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muted_chip_produces_silence() {
        let mut chip = SoundChip::new(44100);
        chip.master_enabled = false;
        chip.channels[0].frequency_hz = 440.0;
        chip.channels[0].gate_on();
        for _ in 0..100 {
            assert_eq!(chip.generate_sample(), 0.0);
        }
    }

    #[test]
    fn output_stays_in_range_with_every_stage_enabled() {
        let mut chip = SoundChip::new(44100);
        chip.global_filter.enabled = true;
        chip.enable_reverb(10.0, 0.6, 0.4);
        chip.overdrive_drive = 2.0;
        for ch in chip.channels.iter_mut() {
            ch.frequency_hz = 300.0;
            ch.envelope.attack_samples = 5;
            ch.envelope.decay_samples = 5;
            ch.envelope.sustain_level = 1.0;
            ch.gate_on();
        }
        let mut buf = vec![0.0f32; 4000];
        chip.generate_block(&mut buf);
        for s in buf {
            assert!((-1.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn silence_without_reverb_stays_exactly_silent() {
        let mut chip = SoundChip::new(44100);
        let mut buf = vec![1.0f32; 50];
        chip.generate_block(&mut buf);
        for s in buf {
            assert_eq!(s, 0.0);
        }
    }

    #[test]
    fn attached_ticker_fires_once_per_sample_even_when_muted() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        struct CountingTicker(Arc<AtomicU32>);
        impl ie_core::clock::SampleTicker for CountingTicker {
            fn tick_sample(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let mut chip = SoundChip::new(44100);
        chip.master_enabled = false;
        chip.set_sample_ticker(Some(Box::new(CountingTicker(Arc::clone(&count)))));
        let mut buf = vec![0.0f32; 37];
        chip.generate_block(&mut buf);
        assert_eq!(count.load(Ordering::SeqCst), 37);
    }

    fn chip_with_voices_0_and_2(ring_mod: bool) -> SoundChip {
        use crate::wave::WaveType;
        let mut chip = SoundChip::new(44_100);
        for &(i, wave_type, freq) in &[(0usize, WaveType::Triangle, 110.0f32), (2, WaveType::Square, 4_000.0)] {
            let ch = &mut chip.channels[i];
            ch.wave_type = wave_type;
            ch.frequency_hz = freq;
            ch.envelope.attack_samples = 1;
            ch.envelope.decay_samples = 1;
            ch.envelope.sustain_level = 1.0;
            ch.gate_on();
        }
        if ring_mod {
            chip.channels[0].ring_mod_source = Some((0 + 2) % 3);
        }
        chip
    }

    #[test]
    fn ring_mod_source_changes_the_mixed_output_relative_to_an_unmodulated_chip() {
        let mut plain = chip_with_voices_0_and_2(false);
        let mut ring_modulated = chip_with_voices_0_and_2(true);

        let mut saw_difference = false;
        for _ in 0..500 {
            let p = plain.generate_sample();
            let r = ring_modulated.generate_sample();
            if (p - r).abs() > 1e-4 {
                saw_difference = true;
            }
        }
        assert!(saw_difference);
    }

    #[test]
    fn sync_source_channel_still_produces_output_within_range() {
        let mut chip = chip_with_voices_0_and_2(false);
        chip.channels[0].sync_source = Some((0 + 2) % 3);
        let mut buf = vec![0.0f32; 2000];
        chip.generate_block(&mut buf);
        for s in buf {
            assert!((-1.0..=1.0).contains(&s));
        }
    }
}
