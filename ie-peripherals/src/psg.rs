//! PSG/YM2149 register front end, driving `SoundChip` channels 0-2
//! (§4.3 "Chip Engines").
//!
//! Register layout follows the AY-3-8910 family: 0/1, 2/3, 4/5 are the
//! three tone period lo/hi pairs, 6 is the noise period, 7 is the mixer
//! control, 8/9/10 are the channel volume/envelope-enable bytes, 11/12
//! are the envelope period, 13 is the envelope shape.

use ie_audio::channel::SoundChannel;
use ie_audio::synth::SoundChip;
use ie_audio::wave::{NoiseMode, WaveType};

use crate::engine::{clamp_audible, ChipEngine};

const REGISTER_COUNT: usize = 16;
const VOLUME_TABLE: [f32; 16] = [
    0.0, 0.0075, 0.0115, 0.0175, 0.0275, 0.0425, 0.0625, 0.1, 0.15, 0.225, 0.325, 0.475, 0.65,
    0.85, 0.95, 1.0,
];

pub struct PsgEngine {
    registers: [u8; REGISTER_COUNT],
    clock_hz: f64,
    enhanced: bool,
}

impl PsgEngine {
    pub fn new() -> Self {
        PsgEngine { registers: [0; REGISTER_COUNT], clock_hz: 2_000_000.0, enhanced: false }
    }

    pub fn set_enhanced(&mut self, enhanced: bool) {
        self.enhanced = enhanced;
    }

    fn tone_period(&self, channel: usize) -> u16 {
        let lo = self.registers[channel * 2] as u16;
        let hi = (self.registers[channel * 2 + 1] & 0x0F) as u16;
        ((hi << 8) | lo).max(1)
    }

    fn apply_channel(&self, chip: &mut SoundChip, channel: usize) {
        let period = self.tone_period(channel);
        let freq = (self.clock_hz / (16.0 * period as f64)) as f32;
        let mixer = self.registers[7];
        let tone_enabled = (mixer >> channel) & 1 == 0;
        let noise_enabled = (mixer >> (channel + 3)) & 1 == 0;
        let vol_byte = self.registers[8 + channel];
        let use_envelope = vol_byte & 0x10 != 0;
        let volume = if use_envelope { 1.0 } else { VOLUME_TABLE[(vol_byte & 0x0F) as usize] };

        let ch: &mut SoundChannel = &mut chip.channels[channel];
        ch.volume = volume;
        if !tone_enabled && !noise_enabled {
            ch.gate_off();
            return;
        }
        if noise_enabled {
            ch.wave_type = WaveType::Noise;
            ch.set_noise_mode(NoiseMode::White);
            let noise_period = (self.registers[6] & 0x1F).max(1) as f64;
            ch.frequency_hz = clamp_audible((self.clock_hz / (16.0 * noise_period)) as f32);
        } else {
            ch.wave_type = WaveType::Square;
            ch.duty_cycle = 0.5;
            ch.frequency_hz = clamp_audible(freq);
        }
        if use_envelope {
            ch.envelope.attack_samples = 0;
            ch.envelope.decay_samples = 0;
            ch.envelope.sustain_level = 1.0;
        }
        ch.gate_on();
    }
}

impl Default for PsgEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipEngine for PsgEngine {
    fn handle_write(&mut self, chip: &mut SoundChip, reg: u8, value: u8) {
        let idx = (reg as usize) & 0x0F;
        self.registers[idx] = value;
        match idx {
            0..=5 => self.apply_channel(chip, idx / 2),
            6 | 7 => {
                for channel in 0..3 {
                    self.apply_channel(chip, channel);
                }
            }
            8..=10 => self.apply_channel(chip, idx - 8),
            11..=13 => {
                for channel in 0..3 {
                    if self.registers[8 + channel] & 0x10 != 0 {
                        self.apply_channel(chip, channel);
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_read(&self, reg: u8) -> u8 {
        self.registers[(reg as usize) & 0x0F]
    }

    fn set_clock_hz(&mut self, clock_hz: f64) {
        self.clock_hz = clock_hz;
    }

    fn reset(&mut self, chip: &mut SoundChip) {
        self.registers = [0; REGISTER_COUNT];
        for channel in 0..3 {
            chip.channels[channel].gate_off();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_period_one_at_two_mhz_silences_above_cap() {
        let mut engine = PsgEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.set_clock_hz(2_000_000.0);
        engine.handle_write(&mut chip, 0, 0x01);
        engine.handle_write(&mut chip, 1, 0x00);
        engine.handle_write(&mut chip, 8, 0x0F);
        engine.handle_write(&mut chip, 7, 0b11_111_110);
        assert_eq!(chip.channels[0].frequency_hz, 0.0);
    }

    #[test]
    fn audible_tone_period_sets_expected_frequency() {
        let mut engine = PsgEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.set_clock_hz(2_000_000.0);
        engine.handle_write(&mut chip, 0, 0xF4);
        engine.handle_write(&mut chip, 1, 0x00);
        engine.handle_write(&mut chip, 8, 0x0F);
        engine.handle_write(&mut chip, 7, 0b11_111_110);
        let expected = 2_000_000.0 / (16.0 * 244.0);
        assert!((chip.channels[0].frequency_hz as f64 - expected).abs() < 1.0);
    }

    #[test]
    fn mixer_disabling_both_tone_and_noise_gates_channel_off() {
        let mut engine = PsgEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 0, 0x10);
        engine.handle_write(&mut chip, 8, 0x0F);
        engine.handle_write(&mut chip, 7, 0xFF);
        for _ in 0..10 {
            assert_eq!(chip.channels[0].generate_sample(), 0.0);
        }
    }

    #[test]
    fn reset_silences_all_three_channels() {
        let mut engine = PsgEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 0, 0x01);
        engine.handle_write(&mut chip, 8, 0x0F);
        engine.handle_write(&mut chip, 7, 0b11_111_110);
        engine.reset(&mut chip);
        for channel in 0..3 {
            assert_eq!(chip.channels[channel].generate_sample(), 0.0);
        }
    }
}
