//! TED (Commodore 264-series) sound register front end, driving
//! `SoundChip` channels 0-1 (§4.3). Six registers: two 10-bit frequency
//! pairs, a control byte (square/noise select per channel), and a
//! shared volume register.

use ie_audio::synth::SoundChip;
use ie_audio::wave::{NoiseMode, WaveType};

use crate::engine::{clamp_audible, ChipEngine};

const REGISTER_COUNT: usize = 6;

const CTRL_CH1_NOISE: u8 = 0b0000_0001;
const CTRL_CH2_NOISE: u8 = 0b0000_0010;
const CTRL_CH1_DISCRETE: u8 = 0b0001_0000;

pub struct TedEngine {
    registers: [u8; REGISTER_COUNT],
    main_clock_hz: f64,
    enhanced: bool,
}

impl TedEngine {
    pub fn new() -> Self {
        TedEngine { registers: [0; REGISTER_COUNT], main_clock_hz: 17_734_475.0 / 4.0, enhanced: false }
    }

    pub fn set_enhanced(&mut self, enhanced: bool) {
        self.enhanced = enhanced;
    }

    fn freq_reg(&self, channel: usize) -> u16 {
        let lo = self.registers[channel * 2] as u16;
        let hi = (self.registers[channel * 2 + 1] & 0x03) as u16;
        (hi << 8) | lo
    }

    fn apply_channel(&self, chip: &mut SoundChip, channel: usize) {
        let sound_clock = self.main_clock_hz / 4.0;
        let reg = self.freq_reg(channel).min(1023);
        let divisor = (1024 - reg as u32).max(1);
        let freq = (sound_clock / divisor as f64) as f32;

        let control = self.registers[4];
        let noise = match channel {
            0 => control & CTRL_CH1_NOISE != 0,
            _ => control & CTRL_CH2_NOISE != 0,
        };
        let discrete = channel == 0 && control & CTRL_CH1_DISCRETE != 0;

        let volume = (self.registers[5] & 0x0F) as f32 / 15.0;

        let ch = &mut chip.channels[channel];
        ch.volume = volume;
        ch.frequency_hz = clamp_audible(freq);
        if discrete {
            // "Discrete" mode outputs a fixed DC-ish level rather than a
            // tone; approximate with a very low duty square.
            ch.wave_type = WaveType::Square;
            ch.duty_cycle = 0.02;
        } else if noise {
            ch.wave_type = WaveType::Noise;
            ch.set_noise_mode(NoiseMode::White);
        } else {
            ch.wave_type = WaveType::Square;
            ch.duty_cycle = 0.5;
        }

        ch.envelope.attack_samples = 0;
        ch.envelope.decay_samples = 0;
        ch.envelope.sustain_level = 1.0;
        if volume > 0.0 {
            ch.gate_on();
        } else {
            ch.gate_off();
        }
    }
}

impl Default for TedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipEngine for TedEngine {
    fn handle_write(&mut self, chip: &mut SoundChip, reg: u8, value: u8) {
        let idx = (reg as usize).min(REGISTER_COUNT - 1);
        self.registers[idx] = value;
        match idx {
            0 | 1 => self.apply_channel(chip, 0),
            2 | 3 => self.apply_channel(chip, 1),
            4 | 5 => {
                self.apply_channel(chip, 0);
                self.apply_channel(chip, 1);
            }
            _ => {}
        }
    }

    fn handle_read(&self, reg: u8) -> u8 {
        self.registers[(reg as usize).min(REGISTER_COUNT - 1)]
    }

    fn set_clock_hz(&mut self, clock_hz: f64) {
        self.main_clock_hz = clock_hz;
    }

    fn reset(&mut self, chip: &mut SoundChip) {
        self.registers = [0; REGISTER_COUNT];
        chip.channels[0].gate_off();
        chip.channels[1].gate_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_matches_the_ted_clock_formula() {
        let mut engine = TedEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.set_clock_hz(17_734_475.0);
        engine.handle_write(&mut chip, 0, 0x00);
        engine.handle_write(&mut chip, 1, 0x00);
        engine.handle_write(&mut chip, 5, 0x0F);
        let sound_clock = 17_734_475.0 / 4.0;
        let expected = (sound_clock / 1024.0) as f32;
        assert!((chip.channels[0].frequency_hz - expected).abs() < 1.0);
    }

    #[test]
    fn noise_bit_selects_noise_waveform() {
        let mut engine = TedEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 4, CTRL_CH1_NOISE);
        engine.handle_write(&mut chip, 5, 0x0F);
        assert_eq!(chip.channels[0].wave_type, WaveType::Noise);
        assert_eq!(chip.channels[1].wave_type, WaveType::Square);
    }

    #[test]
    fn zero_volume_silences_both_channels() {
        let mut engine = TedEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 5, 0x00);
        for _ in 0..10 {
            assert_eq!(chip.channels[0].generate_sample(), 0.0);
            assert_eq!(chip.channels[1].generate_sample(), 0.0);
        }
    }
}
