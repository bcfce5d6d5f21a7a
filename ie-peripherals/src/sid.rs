//! SID (MOS 6581/8580) register front end, driving `SoundChip` channels
//! 0-2 (§4.3). Register map follows the real $D400-$D41C layout: three
//! 7-register voices, then filter cutoff/routing/volume.

use ie_audio::envelope::{decay_release_ms, ms_to_samples, EnvelopeMode};
use ie_audio::filter::{lookup_cutoff_resonance, FilterCurve, FilterRouting};
use ie_audio::synth::SoundChip;
use ie_audio::wave::{NoiseMode, WaveMix, WaveType};

use crate::engine::{clamp_audible, ChipEngine};

const VOICE_REGISTER_COUNT: usize = 7;
const REGISTER_COUNT: usize = 29;

bitflags::bitflags! {
    struct ControlBits: u8 {
        const GATE      = 0b0000_0001;
        const SYNC      = 0b0000_0010;
        const RING_MOD  = 0b0000_0100;
        const TEST      = 0b0000_1000;
        const TRIANGLE  = 0b0001_0000;
        const SAWTOOTH  = 0b0010_0000;
        const PULSE     = 0b0100_0000;
        const NOISE     = 0b1000_0000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SidModel {
    Mos6581,
    Mos8580,
}

pub struct SidEngine {
    registers: [u8; REGISTER_COUNT],
    clock_hz: f64,
    model: SidModel,
    enhanced: bool,
    sample_rate: u32,
}

impl SidEngine {
    pub fn new(sample_rate: u32) -> Self {
        SidEngine {
            registers: [0; REGISTER_COUNT],
            clock_hz: 985_248.0,
            model: SidModel::Mos6581,
            enhanced: false,
            sample_rate,
        }
    }

    pub fn set_model(&mut self, model: SidModel) {
        self.model = model;
    }

    pub fn model(&self) -> SidModel {
        self.model
    }

    pub fn set_enhanced(&mut self, enhanced: bool) {
        self.enhanced = enhanced;
    }

    fn voice_registers(&self, voice: usize) -> &[u8] {
        let base = voice * VOICE_REGISTER_COUNT;
        &self.registers[base..base + VOICE_REGISTER_COUNT]
    }

    fn apply_voice(&mut self, chip: &mut SoundChip, voice: usize) {
        let regs = self.voice_registers(voice).to_vec();
        let freq_reg = (regs[0] as u16) | ((regs[1] as u16) << 8);
        let control = ControlBits::from_bits_truncate(regs[4]);
        let ad = regs[5];
        let sr = regs[6];

        let ch = &mut chip.channels[voice];

        if control.contains(ControlBits::TEST) {
            ch.envelope.force_release();
            ch.gate_off();
            return;
        }

        let freq_hz = (freq_reg as f64) * self.clock_hz / 16_777_216.0;

        // Multiple waveform bits set at once select the SID's combined-
        // waveform mode: the channel ANDs every selected wave in 12-bit
        // DAC space instead of picking just one (§4.3).
        let mut wave_mix = WaveMix::empty();
        if control.contains(ControlBits::TRIANGLE) {
            wave_mix |= WaveMix::TRIANGLE;
        }
        if control.contains(ControlBits::SAWTOOTH) {
            wave_mix |= WaveMix::SAWTOOTH;
        }
        if control.contains(ControlBits::PULSE) {
            wave_mix |= WaveMix::PULSE;
        }
        if control.contains(ControlBits::NOISE) {
            ch.set_noise_mode(NoiseMode::White);
            wave_mix |= WaveMix::NOISE;
        }
        ch.wave_mix = if wave_mix.bits().count_ones() > 1 { wave_mix } else { WaveMix::empty() };
        ch.wave_type = if control.contains(ControlBits::NOISE) {
            WaveType::Noise
        } else if control.contains(ControlBits::PULSE) {
            WaveType::Square
        } else if control.contains(ControlBits::SAWTOOTH) {
            WaveType::Sawtooth
        } else {
            WaveType::Triangle
        };
        ch.frequency_hz = clamp_audible(freq_hz as f32);

        let modulator = (voice + 2) % 3;
        ch.sync_source = control.contains(ControlBits::SYNC).then_some(modulator);
        ch.ring_mod_source = control.contains(ControlBits::RING_MOD).then_some(modulator);

        let pulse_width = ((regs[2] as u16) | (((regs[3] as u16) << 8) & 0x0F00)) as f32 / 4095.0;
        ch.duty_cycle = pulse_width.clamp(0.01, 0.99);

        ch.sid_compat = true;
        ch.set_envelope_mode(EnvelopeMode::RateCounter);
        let attack = (ad >> 4) & 0x0F;
        let decay = ad & 0x0F;
        let sustain = (sr >> 4) & 0x0F;
        let release = sr & 0x0F;
        ch.envelope.attack_samples = ms_to_samples(
            ie_audio::envelope::ATTACK_MS_TABLE[attack as usize],
            self.sample_rate,
        );
        ch.envelope.decay_samples = ms_to_samples(decay_release_ms(decay), self.sample_rate);
        ch.envelope.release_samples = ms_to_samples(decay_release_ms(release), self.sample_rate);
        ch.envelope.sustain_level = sustain as f32 / 15.0;

        if control.contains(ControlBits::GATE) {
            ch.gate_on();
        } else {
            ch.gate_off();
        }
    }

    fn apply_filter(&mut self, chip: &mut SoundChip) {
        let cutoff_lo = self.registers[21];
        let cutoff_hi = self.registers[22];
        let cutoff_reg = ((cutoff_lo as u16) & 0x07) | ((cutoff_hi as u16) << 3);
        let routing_byte = self.registers[23];
        let resonance = (routing_byte >> 4) & 0x0F;
        let curve = match self.model {
            SidModel::Mos6581 => FilterCurve::Mos6581,
            SidModel::Mos8580 => FilterCurve::Mos8580,
        };
        let (cutoff, q) = lookup_cutoff_resonance(cutoff_reg, resonance, curve);

        let mode_byte = self.registers[24];
        let mut routing = FilterRouting::empty();
        if mode_byte & 0x10 != 0 {
            routing |= FilterRouting::LOW_PASS;
        }
        if mode_byte & 0x20 != 0 {
            routing |= FilterRouting::BAND_PASS;
        }
        if mode_byte & 0x40 != 0 {
            routing |= FilterRouting::HIGH_PASS;
        }
        let filter_enabled = routing_byte & 0x0F != 0;

        for voice in 0..3 {
            let routed = (routing_byte & (1 << voice)) != 0;
            chip.channels[voice].filter_enabled = filter_enabled && routed;
            chip.channels[voice].filter_cutoff = cutoff;
            chip.channels[voice].filter_resonance = q;
            chip.channels[voice].filter_routing = routing;
        }
    }
}

impl ChipEngine for SidEngine {
    fn handle_write(&mut self, chip: &mut SoundChip, reg: u8, value: u8) {
        let idx = (reg as usize).min(REGISTER_COUNT - 1);
        self.registers[idx] = value;
        if idx < 21 {
            self.apply_voice(chip, idx / VOICE_REGISTER_COUNT);
        } else if (21..25).contains(&idx) {
            self.apply_filter(chip);
        }
    }

    fn handle_read(&self, reg: u8) -> u8 {
        self.registers[(reg as usize).min(REGISTER_COUNT - 1)]
    }

    fn set_clock_hz(&mut self, clock_hz: f64) {
        self.clock_hz = clock_hz;
    }

    fn reset(&mut self, chip: &mut SoundChip) {
        self.registers = [0; REGISTER_COUNT];
        for voice in 0..3 {
            chip.channels[voice].gate_off();
            chip.channels[voice].filter_enabled = false;
        }
    }
}
