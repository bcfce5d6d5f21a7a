//! AHX (Hively Tracker-family) register front end, driving all four
//! `SoundChip` channels internally (§4.3). Five bytes per channel:
//! frequency lo/hi, waveform+volume, attack/decay, sustain/release.

use ie_audio::envelope::{decay_release_ms, ms_to_samples, EnvelopeMode, ATTACK_MS_TABLE};
use ie_audio::synth::SoundChip;
use ie_audio::wave::{NoiseMode, WaveType};

use crate::engine::{clamp_audible, ChipEngine};

const CHANNEL_REGISTER_COUNT: usize = 5;
const REGISTER_COUNT: usize = CHANNEL_REGISTER_COUNT * 4;

pub struct AhxEngine {
    registers: [u8; REGISTER_COUNT],
    clock_hz: f64,
    sample_rate: u32,
    enhanced: bool,
}

impl AhxEngine {
    pub fn new(sample_rate: u32) -> Self {
        AhxEngine { registers: [0; REGISTER_COUNT], clock_hz: 3_546_895.0, sample_rate, enhanced: false }
    }

    pub fn set_enhanced(&mut self, enhanced: bool) {
        self.enhanced = enhanced;
    }

    fn channel_registers(&self, channel: usize) -> &[u8] {
        let base = channel * CHANNEL_REGISTER_COUNT;
        &self.registers[base..base + CHANNEL_REGISTER_COUNT]
    }

    fn apply_channel(&mut self, chip: &mut SoundChip, channel: usize) {
        let regs = self.channel_registers(channel).to_vec();
        let freq_reg = (regs[0] as u16) | ((regs[1] as u16) << 8);
        let wave_vol = regs[2];
        let ad = regs[3];
        let sr = regs[4];

        let freq = (freq_reg as f64) * self.clock_hz / 16_777_216.0;
        let wave_select = wave_vol >> 6;
        let volume = (wave_vol & 0x3F) as f32 / 63.0;

        let ch = &mut chip.channels[channel];
        ch.wave_type = match wave_select {
            0 => WaveType::Triangle,
            1 => WaveType::Sawtooth,
            2 => WaveType::Square,
            _ => {
                ch.set_noise_mode(NoiseMode::Periodic);
                WaveType::Noise
            }
        };
        ch.duty_cycle = 0.5;
        ch.volume = volume;
        ch.frequency_hz = clamp_audible(freq as f32);

        ch.set_envelope_mode(EnvelopeMode::RateCounter);
        let attack = (ad >> 4) & 0x0F;
        let decay = ad & 0x0F;
        let sustain = (sr >> 4) & 0x0F;
        let release = sr & 0x0F;
        ch.envelope.attack_samples = ms_to_samples(ATTACK_MS_TABLE[attack as usize], self.sample_rate);
        ch.envelope.decay_samples = ms_to_samples(decay_release_ms(decay), self.sample_rate);
        ch.envelope.release_samples = ms_to_samples(decay_release_ms(release), self.sample_rate);
        ch.envelope.sustain_level = sustain as f32 / 15.0;

        if volume > 0.0 {
            ch.gate_on();
        } else {
            ch.gate_off();
        }
    }
}

impl ChipEngine for AhxEngine {
    fn handle_write(&mut self, chip: &mut SoundChip, reg: u8, value: u8) {
        let idx = (reg as usize).min(REGISTER_COUNT - 1);
        self.registers[idx] = value;
        self.apply_channel(chip, idx / CHANNEL_REGISTER_COUNT);
    }

    fn handle_read(&self, reg: u8) -> u8 {
        self.registers[(reg as usize).min(REGISTER_COUNT - 1)]
    }

    fn set_clock_hz(&mut self, clock_hz: f64) {
        self.clock_hz = clock_hz;
    }

    fn reset(&mut self, chip: &mut SoundChip) {
        self.registers = [0; REGISTER_COUNT];
        for channel in 0..4 {
            chip.channels[channel].gate_off();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waveform_select_bits_pick_expected_wave_type() {
        let mut engine = AhxEngine::new(44_100);
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 2, 0b11_010000);
        assert_eq!(chip.channels[0].wave_type, WaveType::Noise);
    }

    #[test]
    fn adsr_indices_translate_through_shared_tables() {
        let mut engine = AhxEngine::new(44_100);
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 3, 0x00);
        engine.handle_write(&mut chip, 4, 0xF0);
        let expected_attack = ms_to_samples(ATTACK_MS_TABLE[0], 44_100);
        assert_eq!(chip.channels[0].envelope.attack_samples, expected_attack);
    }

    #[test]
    fn second_channel_registers_are_independent_of_first() {
        let mut engine = AhxEngine::new(44_100);
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 0, 0x00);
        engine.handle_write(&mut chip, 5, 0xFF);
        engine.handle_write(&mut chip, 6, 0x0F);
        assert_ne!(chip.channels[0].frequency_hz, chip.channels[1].frequency_hz);
    }
}
