//! POKEY register front end, driving all four `SoundChip` channels
//! (§4.3). Ten registers: AUDF1-4, AUDC1-4, AUDCTL, plus a write-only
//! STIMER-style reset register.

use ie_audio::synth::SoundChip;
use ie_audio::wave::{NoiseMode, WaveType};

use crate::engine::{clamp_audible, ChipEngine};

const REGISTER_COUNT: usize = 10;

const AUDCTL_POLY9: u8 = 0x80;
const AUDCTL_CH1_FAST: u8 = 0x40;
const AUDCTL_CH3_FAST: u8 = 0x20;
const AUDCTL_CH12_LINKED: u8 = 0x10;
const AUDCTL_CH34_LINKED: u8 = 0x08;
const AUDCTL_CLOCK_15KHZ: u8 = 0x01;

const BASE_CLOCK_179MHZ: f64 = 1_789_773.0;
const BASE_CLOCK_64KHZ: f64 = 63_921.0;
const BASE_CLOCK_15KHZ: f64 = 15_700.0;

pub struct PokeyEngine {
    registers: [u8; REGISTER_COUNT],
    enhanced: bool,
}

impl PokeyEngine {
    pub fn new() -> Self {
        PokeyEngine { registers: [0; REGISTER_COUNT], enhanced: false }
    }

    pub fn set_enhanced(&mut self, enhanced: bool) {
        self.enhanced = enhanced;
    }

    fn audf(&self, channel: usize) -> u8 {
        self.registers[channel * 2]
    }

    fn audc(&self, channel: usize) -> u8 {
        self.registers[channel * 2 + 1]
    }

    fn audctl(&self) -> u8 {
        self.registers[8]
    }

    fn base_clock_for(&self, channel: usize) -> f64 {
        let audctl = self.audctl();
        let fast_bit = match channel {
            0 => AUDCTL_CH1_FAST,
            2 => AUDCTL_CH3_FAST,
            _ => 0,
        };
        if fast_bit != 0 && audctl & fast_bit != 0 {
            BASE_CLOCK_179MHZ
        } else if audctl & AUDCTL_CLOCK_15KHZ != 0 {
            BASE_CLOCK_15KHZ
        } else {
            BASE_CLOCK_64KHZ
        }
    }

    fn apply_channel(&self, chip: &mut SoundChip, channel: usize) {
        let audctl = self.audctl();
        let linked_12 = audctl & AUDCTL_CH12_LINKED != 0;
        let linked_34 = audctl & AUDCTL_CH34_LINKED != 0;

        // A channel that is the high half of a 16-bit linked pair produces
        // no audio of its own; its AUDC still carries the pair's volume.
        if (channel == 1 && linked_12) || (channel == 3 && linked_34) {
            chip.channels[channel].gate_off();
            return;
        }

        let divider: u32 = if channel == 0 && linked_12 {
            ((self.audf(1) as u32) << 8) | self.audf(0) as u32
        } else if channel == 2 && linked_34 {
            ((self.audf(3) as u32) << 8) | self.audf(2) as u32
        } else {
            self.audf(channel) as u32
        };

        let base_clock = self.base_clock_for(channel);
        let freq = (base_clock / (2.0 * (divider as f64 + 1.0))) as f32;

        let audc = self.audc(channel);
        let volume = (audc & 0x0F) as f32 / 15.0;
        let distortion = (audc >> 5) & 0x07;
        let volume_only = audc & 0x10 != 0;

        let ch = &mut chip.channels[channel];
        ch.volume = volume;
        ch.frequency_hz = clamp_audible(freq);

        if volume_only {
            ch.wave_type = WaveType::Square;
            ch.duty_cycle = 0.5;
        } else {
            match distortion {
                5 | 7 => {
                    ch.wave_type = WaveType::Square;
                    ch.duty_cycle = 0.5;
                }
                6 => {
                    ch.wave_type = WaveType::Noise;
                    ch.set_noise_mode(NoiseMode::Metallic);
                }
                1 | 3 => {
                    ch.wave_type = WaveType::Noise;
                    ch.set_noise_mode(NoiseMode::Periodic);
                }
                _ => {
                    ch.wave_type = WaveType::Noise;
                    ch.set_noise_mode(NoiseMode::White);
                }
            }
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

impl Default for PokeyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipEngine for PokeyEngine {
    fn handle_write(&mut self, chip: &mut SoundChip, reg: u8, value: u8) {
        let idx = (reg as usize).min(REGISTER_COUNT - 1);
        self.registers[idx] = value;
        match idx {
            0..=7 => self.apply_channel(chip, idx / 2),
            8 => {
                for channel in 0..4 {
                    self.apply_channel(chip, channel);
                }
            }
            9 => {
                // STIMER: reload all channel dividers from current AUDF values.
                for channel in 0..4 {
                    self.apply_channel(chip, channel);
                }
            }
            _ => {}
        }
    }

    fn handle_read(&self, reg: u8) -> u8 {
        self.registers[(reg as usize).min(REGISTER_COUNT - 1)]
    }

    fn set_clock_hz(&mut self, _clock_hz: f64) {
        // POKEY's base clock is fixed by hardware (NTSC 1.79 MHz); callers
        // select 64/15 kHz/1.79 MHz divisions through AUDCTL instead.
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
    fn base_frequency_uses_64khz_clock_by_default() {
        let mut engine = PokeyEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 0, 9);
        engine.handle_write(&mut chip, 1, 0x0F);
        let expected = (BASE_CLOCK_64KHZ / (2.0 * 10.0)) as f32;
        assert!((chip.channels[0].frequency_hz - expected).abs() < 1.0);
    }

    #[test]
    fn linked_mode_combines_two_channels_into_sixteen_bits() {
        let mut engine = PokeyEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 8, AUDCTL_CH12_LINKED);
        engine.handle_write(&mut chip, 0, 0x00);
        engine.handle_write(&mut chip, 2, 0x01);
        engine.handle_write(&mut chip, 1, 0x0F);
        let divider = (1u32 << 8) | 0x00;
        let expected = (BASE_CLOCK_64KHZ / (2.0 * (divider as f64 + 1.0))) as f32;
        assert!((chip.channels[0].frequency_hz - expected).abs() < 1.0);
        assert!(!chip.channels[1].generate_sample().is_nan());
    }

    #[test]
    fn zero_volume_gates_channel_off() {
        let mut engine = PokeyEngine::new();
        let mut chip = SoundChip::new(44_100);
        engine.handle_write(&mut chip, 1, 0x00);
        for _ in 0..10 {
            assert_eq!(chip.channels[0].generate_sample(), 0.0);
        }
    }
}
