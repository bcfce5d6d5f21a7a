//! A single polyphonic voice: oscillator, envelope, PWM LFO and an
//! optional per-channel filter (§3 SoundChannel, §4.2).

use crate::envelope::{Envelope, EnvelopeMode};
use crate::filter::{FilterCurve, FilterRouting, StateVariableFilter};
use crate::wave::{self, dac12_to_signed, quantize_dac12, NoiseGenerator, NoiseMode, WaveMix, WaveType};

/// Sub-audio LFO that sweeps a square wave's duty cycle (§4.2 "PWM").
#[derive(Clone, Copy, Debug)]
pub struct PwmLfo {
    pub enabled: bool,
    pub rate_hz: f32,
    pub depth: f32,
    phase: f32,
}

impl Default for PwmLfo {
    fn default() -> Self {
        PwmLfo { enabled: false, rate_hz: 0.0, depth: 0.0, phase: 0.0 }
    }
}

impl PwmLfo {
    fn advance(&mut self, base_duty: f32, sample_rate: u32) -> f32 {
        if !self.enabled || sample_rate == 0 {
            return base_duty;
        }
        self.phase = (self.phase + self.rate_hz / sample_rate as f32).fract();
        let sweep = wave::sine(self.phase) * self.depth;
        (base_duty + sweep).clamp(0.01, 0.99)
    }
}

/// One of the four voices in a [crate::synth::SoundChip].
pub struct SoundChannel {
    pub wave_type: WaveType,
    /// When non-empty, overrides `wave_type`: the channel's raw output is
    /// the AND, in 12-bit DAC space, of every selected waveform (§4.3
    /// "combined waveforms"), matching the SID's multi-bit control
    /// register writes instead of collapsing them to one waveform.
    pub wave_mix: WaveMix,
    pub frequency_hz: f32,
    pub duty_cycle: f32,
    pub volume: f32,
    pub envelope: Envelope,
    pub pwm: PwmLfo,
    pub noise: NoiseGenerator,
    pub filter: StateVariableFilter,
    pub filter_cutoff: f32,
    pub filter_resonance: f32,
    pub filter_routing: FilterRouting,
    pub filter_enabled: bool,
    /// True when this channel's register semantics follow the SID's
    /// (rate-counter envelope, gate-bit-driven ADSR) rather than the
    /// time-based defaults.
    pub sid_compat: bool,
    /// When set, the final sample is snapped to the SID's 12-bit DAC
    /// grid (§8 scenario 4) instead of the full-precision float output.
    pub sid_dac_enabled: bool,
    /// Index of the channel whose oscillator wrap drives this channel's
    /// hard sync (§4.3 "SID ring mod and hard sync"), `voice + 2 mod 3`.
    pub sync_source: Option<usize>,
    /// Index of the channel whose raw waveform ring-modulates this one.
    pub ring_mod_source: Option<usize>,
    /// This channel's raw (pre-envelope) oscillator sample from the most
    /// recent [SoundChannel::generate_sample] call, read by another
    /// channel's ring modulation.
    pub last_raw: f32,
    /// Whether this channel's oscillator phase wrapped during the most
    /// recent [SoundChannel::generate_sample] call, read by another
    /// channel's hard sync.
    pub wrapped_this_sample: bool,
    phase: f32,
    sample_rate: u32,
}

/// Snaps `value` to the nearest SID 12-bit DAC grid point.
pub fn quantize_sid_dac(value: f32) -> f32 {
    dac12_to_signed(quantize_dac12(value))
}

impl SoundChannel {
    pub fn new(sample_rate: u32) -> Self {
        SoundChannel {
            wave_type: WaveType::Square,
            wave_mix: WaveMix::empty(),
            frequency_hz: 0.0,
            duty_cycle: 0.5,
            volume: 1.0,
            envelope: Envelope::new(),
            pwm: PwmLfo::default(),
            noise: NoiseGenerator::default(),
            filter: StateVariableFilter::new(),
            filter_cutoff: 0.45,
            filter_resonance: 0.7,
            filter_routing: FilterRouting::LOW_PASS,
            filter_enabled: false,
            sid_compat: false,
            sid_dac_enabled: false,
            sync_source: None,
            ring_mod_source: None,
            last_raw: 0.0,
            wrapped_this_sample: false,
            phase: 0.0,
            sample_rate,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn gate_on(&mut self) {
        self.envelope.set_gate(true);
    }

    pub fn gate_off(&mut self) {
        self.envelope.set_gate(false);
    }

    pub fn set_noise_mode(&mut self, mode: NoiseMode) {
        self.noise.set_mode(mode);
    }

    pub fn set_envelope_mode(&mut self, mode: EnvelopeMode) {
        self.envelope.mode = mode;
    }

    /// Generates one sample: advances the oscillator, applies the
    /// envelope and volume, then the per-channel filter when enabled.
    pub fn generate_sample(&mut self) -> f32 {
        self.generate_sample_coupled(false, None)
    }

    /// Like [SoundChannel::generate_sample], but additionally applies the
    /// SID-style hard sync / ring modulation a [crate::synth::SoundChip]
    /// wires in from a neighboring voice (§4.3 "Modulation"). `sync_reset`
    /// forces an immediate phase reset; `ring_raw`, when set, is the
    /// modulation source's raw waveform sample from its previous tick.
    pub fn generate_sample_coupled(&mut self, sync_reset: bool, ring_raw: Option<f32>) -> f32 {
        if sync_reset {
            self.phase = 0.0;
        }

        let dt = if self.sample_rate > 0 { self.frequency_hz / self.sample_rate as f32 } else { 0.0 };
        let duty = self.pwm.advance(self.duty_cycle, self.sample_rate);
        let advances_phase = !matches!(self.wave_type, WaveType::Noise) || !self.wave_mix.is_empty();

        let mut raw = if self.wave_mix.is_empty() {
            match self.wave_type {
                WaveType::Sine => wave::sine(self.phase),
                WaveType::Square => wave::square(self.phase, duty, dt),
                WaveType::Sawtooth => wave::sawtooth(self.phase, dt),
                WaveType::Triangle => wave::triangle(self.phase),
                WaveType::Noise => self.noise.step(dt),
            }
        } else {
            self.combined_waveform_sample(duty, dt)
        };

        self.wrapped_this_sample = advances_phase && dt > 0.0 && self.phase + dt >= 1.0;
        if advances_phase {
            self.phase = (self.phase + dt).rem_euclid(1.0);
        }

        if let Some(modulator) = ring_raw {
            // SID ring modulation: the sign of this channel's output is
            // replaced by the modulation source's sign.
            raw = raw.abs() * if modulator >= 0.0 { 1.0 } else { -1.0 };
        }
        self.last_raw = raw;

        let env_level = self.envelope.advance();
        let mut sample = raw * env_level * self.volume;

        if self.filter_enabled {
            sample = self.filter.process_routed(sample, self.filter_cutoff, self.filter_resonance, self.filter_routing);
        }

        sample = sample.clamp(-1.0, 1.0);
        if self.sid_dac_enabled {
            sample = quantize_sid_dac(sample);
        }
        sample
    }

    /// ANDs every waveform selected by `wave_mix` in 12-bit DAC space
    /// (§4.3 "combined waveforms"): each selected waveform is rendered at
    /// the channel's current phase, converted to its unsigned DAC code,
    /// bitwise-ANDed together, then converted back to a signed sample.
    fn combined_waveform_sample(&mut self, duty: f32, dt: f32) -> f32 {
        let mut code = 0xFFFu16;
        let mut any = false;
        if self.wave_mix.contains(WaveMix::TRIANGLE) {
            code &= quantize_dac12(wave::triangle(self.phase));
            any = true;
        }
        if self.wave_mix.contains(WaveMix::SAWTOOTH) {
            code &= quantize_dac12(wave::sawtooth(self.phase, dt));
            any = true;
        }
        if self.wave_mix.contains(WaveMix::PULSE) {
            code &= quantize_dac12(wave::square(self.phase, duty, dt));
            any = true;
        }
        if self.wave_mix.contains(WaveMix::NOISE) {
            code &= quantize_dac12(self.noise.step(dt));
            any = true;
        }
        if !any {
            return 0.0;
        }
        dac12_to_signed(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_channel_stays_silent_with_gate_off() {
        let mut ch = SoundChannel::new(44100);
        ch.frequency_hz = 440.0;
        for _ in 0..200 {
            assert_eq!(ch.generate_sample(), 0.0);
        }
    }

    #[test]
    fn gated_channel_produces_nonzero_output_during_sustain() {
        let mut ch = SoundChannel::new(44100);
        ch.frequency_hz = 440.0;
        ch.envelope.attack_samples = 10;
        ch.envelope.decay_samples = 10;
        ch.envelope.sustain_level = 1.0;
        ch.gate_on();
        let mut saw_nonzero = false;
        for _ in 0..2000 {
            if ch.generate_sample().abs() > 0.01 {
                saw_nonzero = true;
            }
        }
        assert!(saw_nonzero);
    }

    #[test]
    fn pwm_lfo_sweeps_duty_cycle_over_time() {
        let mut pwm = PwmLfo { enabled: true, rate_hz: 5.0, depth: 0.3, phase: 0.0 };
        let first = pwm.advance(0.5, 44100);
        for _ in 0..4000 {
            pwm.advance(0.5, 44100);
        }
        let later = pwm.advance(0.5, 44100);
        assert!((first - later).abs() > 0.001);
    }

    #[test]
    fn dac_quantized_output_lands_on_twelve_bit_grid_points() {
        let mut ch = SoundChannel::new(44_100);
        ch.wave_type = WaveType::Triangle;
        ch.frequency_hz = 440.0;
        ch.sid_dac_enabled = true;
        ch.envelope.attack_samples = 1;
        ch.envelope.decay_samples = 1;
        ch.envelope.sustain_level = 1.0;
        ch.gate_on();
        let mut on_grid = 0;
        let total = 2000;
        for _ in 0..total {
            let s = ch.generate_sample();
            let k = ((s + 1.0) * 0.5 * 4095.0).round();
            let grid_point = (2.0 / 4095.0) * k - 1.0;
            if (s - grid_point).abs() < 1e-6 {
                on_grid += 1;
            }
        }
        assert!(on_grid as f32 / total as f32 >= 0.90);
    }

    #[test]
    fn output_is_always_within_unit_range() {
        let mut ch = SoundChannel::new(44100);
        ch.frequency_hz = 220.0;
        ch.filter_enabled = true;
        ch.envelope.attack_samples = 5;
        ch.envelope.decay_samples = 5;
        ch.envelope.sustain_level = 1.0;
        ch.gate_on();
        for _ in 0..5000 {
            let s = ch.generate_sample();
            assert!((-1.0..=1.0).contains(&s));
        }
    }

    fn sustained_channel(wave_mix: WaveMix, frequency_hz: f32) -> SoundChannel {
        let mut ch = SoundChannel::new(44_100);
        ch.wave_mix = wave_mix;
        ch.frequency_hz = frequency_hz;
        ch.envelope.attack_samples = 1;
        ch.envelope.decay_samples = 1;
        ch.envelope.sustain_level = 1.0;
        ch.gate_on();
        ch
    }

    #[test]
    fn combined_waveform_mix_ands_in_dac_space_and_differs_from_either_pure_wave() {
        let mut triangle_only = sustained_channel(WaveMix::TRIANGLE, 440.0);
        let mut sawtooth_only = sustained_channel(WaveMix::SAWTOOTH, 440.0);
        let mut combined = sustained_channel(WaveMix::TRIANGLE | WaveMix::SAWTOOTH, 440.0);

        let mut saw_difference_from_triangle = false;
        let mut saw_difference_from_sawtooth = false;
        for _ in 0..500 {
            let t = triangle_only.generate_sample();
            let s = sawtooth_only.generate_sample();
            let c = combined.generate_sample();
            if (c - t).abs() > 1e-6 {
                saw_difference_from_triangle = true;
            }
            if (c - s).abs() > 1e-6 {
                saw_difference_from_sawtooth = true;
            }
        }
        assert!(saw_difference_from_triangle);
        assert!(saw_difference_from_sawtooth);
    }

    #[test]
    fn hard_sync_forces_an_immediate_phase_reset() {
        let mut baseline = sustained_channel(WaveMix::empty(), 110.0);
        baseline.wave_type = WaveType::Sawtooth;
        let mut synced = sustained_channel(WaveMix::empty(), 110.0);
        synced.wave_type = WaveType::Sawtooth;
        for _ in 0..30 {
            baseline.generate_sample();
            synced.generate_sample();
        }
        let free_running = baseline.generate_sample_coupled(false, None);
        let reset = synced.generate_sample_coupled(true, None);
        // A sync reset discontinuously restarts the oscillator; the
        // resulting sample diverges from what the same channel would
        // have produced without the reset.
        assert!((free_running - reset).abs() > 0.05);
    }

    #[test]
    fn ring_modulation_replaces_sign_with_the_modulator() {
        let mut neg = sustained_channel(WaveMix::empty(), 220.0);
        neg.wave_type = WaveType::Triangle;
        let mut pos = sustained_channel(WaveMix::empty(), 220.0);
        pos.wave_type = WaveType::Triangle;

        // Same phase (forced to 0 via sync_reset), same envelope state:
        // only the ring-mod source's sign differs.
        let modulated_negative = neg.generate_sample_coupled(true, Some(-1.0));
        let modulated_positive = pos.generate_sample_coupled(true, Some(1.0));

        assert!(modulated_negative <= 0.0);
        assert!(modulated_positive >= 0.0);
        assert_eq!(modulated_positive.abs(), modulated_negative.abs());
    }
}
