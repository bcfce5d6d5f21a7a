//! Oscillator waveform generation, including polyBLEP anti-aliasing for
//! the sharp-edged waveforms (§4.2 "Waveform generation").

use std::sync::OnceLock;

const SINE_LUT_SIZE: usize = 2048;

fn sine_lut() -> &'static [f32; SINE_LUT_SIZE] {
    static LUT: OnceLock<[f32; SINE_LUT_SIZE]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut table = [0.0f32; SINE_LUT_SIZE];
        for (i, slot) in table.iter_mut().enumerate() {
            let phase = i as f32 / SINE_LUT_SIZE as f32;
            *slot = (phase * std::f32::consts::TAU).sin();
        }
        table
    })
}

/// The set of oscillator waveforms a [crate::channel::SoundChannel] can
/// select (§3 SoundChannel).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveType {
    Square,
    Triangle,
    Sine,
    Sawtooth,
    Noise,
}

/// LFSR noise generation modes (§4.2 "Noise").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoiseMode {
    White,
    Periodic,
    Metallic,
}

bitflags::bitflags! {
    /// SID-style combined-waveform selection: when more than one bit is
    /// set, the channel's output is the AND of every selected waveform
    /// in 12-bit DAC space rather than a single [WaveType] (§4.3
    /// "combined waveforms"). Empty means "use `wave_type` as-is".
    pub struct WaveMix: u8 {
        const TRIANGLE = 0b0001;
        const SAWTOOTH = 0b0010;
        const PULSE    = 0b0100;
        const NOISE    = 0b1000;
    }
}

/// The SID's 12-bit output DAC has 4096 representable levels evenly
/// spaced across `[-1, 1]`.
const DAC12_STEPS: f32 = 4095.0;

/// Maps a bipolar `[-1, 1]` sample to its 12-bit unsigned DAC code.
#[inline]
pub fn quantize_dac12(value: f32) -> u16 {
    (((value.clamp(-1.0, 1.0) + 1.0) * 0.5 * DAC12_STEPS).round()) as u16
}

/// Maps a 12-bit unsigned DAC code back to a bipolar `[-1, 1]` sample.
#[inline]
pub fn dac12_to_signed(code: u16) -> f32 {
    (2.0 / DAC12_STEPS) * (code.min(DAC12_STEPS as u16) as f32) - 1.0
}

/// PolyBLEP correction for a single discontinuity, given the fractional
/// phase distance `t` (in cycles, `[0, 1)`) from the edge and the phase
/// increment per sample `dt`.
///
/// Standard two-sided polynomial approximation of the band-limited step.
#[inline]
fn poly_blep(t: f32, dt: f32) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    if t < dt {
        let x = t / dt;
        x + x - x * x - 1.0
    } else if t > 1.0 - dt {
        let x = (t - 1.0) / dt;
        x * x + x + x + 1.0
    } else {
        0.0
    }
}

/// Sine wave sample, LUT-indexed by `phase` in `[0, 1)`.
#[inline]
pub fn sine(phase: f32) -> f32 {
    let lut = sine_lut();
    let idx = ((phase.rem_euclid(1.0)) * SINE_LUT_SIZE as f32) as usize % SINE_LUT_SIZE;
    lut[idx]
}

/// Anti-aliased square wave, `phase` and `duty` both in `[0, 1)`, `dt` the
/// phase increment per sample (`freq / sample_rate`).
#[inline]
pub fn square(phase: f32, duty: f32, dt: f32) -> f32 {
    let mut value = if phase < duty { 1.0 } else { -1.0 };
    value += poly_blep(phase, dt);
    let duty_edge_phase = (phase - duty).rem_euclid(1.0);
    value -= poly_blep(duty_edge_phase, dt);
    value
}

/// Anti-aliased sawtooth, ramping from -1 to 1 across `[0, 1)`.
#[inline]
pub fn sawtooth(phase: f32, dt: f32) -> f32 {
    let mut value = 2.0 * phase - 1.0;
    value -= poly_blep(phase, dt);
    value
}

/// Naturally band-limited triangle wave; no polyBLEP needed.
#[inline]
pub fn triangle(phase: f32) -> f32 {
    4.0 * (phase - 0.5).abs() - 1.0
}

/// A 23-bit Galois LFSR driving the three noise modes.
#[derive(Clone, Copy, Debug)]
pub struct NoiseGenerator {
    lfsr: u32,
    mode: NoiseMode,
    accumulated_phase: f32,
    output: f32,
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        NoiseGenerator { lfsr: 0x7FF_FFF, mode: NoiseMode::White, accumulated_phase: 0.0, output: 0.0 }
    }
}

impl NoiseGenerator {
    pub fn set_mode(&mut self, mode: NoiseMode) {
        self.mode = mode;
    }

    /// Advances the LFSR by `dt` worth of phase (the noise output rate is
    /// gated by frequency, §4.2) and returns the current output sample in
    /// `[-1, 1]`.
    pub fn step(&mut self, dt: f32) -> f32 {
        self.accumulated_phase += dt;
        while self.accumulated_phase >= 1.0 {
            self.accumulated_phase -= 1.0;
            let tap_bits = match self.mode {
                NoiseMode::White => (self.lfsr >> 22) ^ (self.lfsr >> 17),
                NoiseMode::Periodic => (self.lfsr >> 22) ^ (self.lfsr >> 12),
                NoiseMode::Metallic => (self.lfsr >> 22) ^ (self.lfsr >> 9) ^ (self.lfsr >> 2),
            };
            let bit = tap_bits & 1;
            self.lfsr = ((self.lfsr << 1) | bit) & 0x7F_FFFF;
            self.output = if bit != 0 { 1.0 } else { -1.0 };
        }
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_is_zero_at_phase_zero_and_peaks_at_quarter() {
        assert!(sine(0.0).abs() < 0.01);
        assert!(sine(0.25) > 0.95);
    }

    #[test]
    fn square_without_blep_correction_matches_duty_cutoff() {
        // with dt -> 0 polyBLEP vanishes, leaving the naive step function
        assert_eq!(square(0.1, 0.5, 0.0), 1.0);
        assert_eq!(square(0.6, 0.5, 0.0), -1.0);
    }

    #[test]
    fn triangle_is_band_limited_naturally_and_bounded() {
        for i in 0..100 {
            let phase = i as f32 / 100.0;
            let v = triangle(phase);
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn noise_output_is_always_plus_or_minus_one() {
        let mut n = NoiseGenerator::default();
        for _ in 0..1000 {
            let v = n.step(0.3);
            assert!(v == 1.0 || v == -1.0);
        }
    }

    #[test]
    fn dac12_round_trips_through_its_own_grid() {
        for code in [0u16, 1, 2048, 4094, 4095] {
            let signed = dac12_to_signed(code);
            assert_eq!(quantize_dac12(signed), code);
        }
    }

    #[test]
    fn dac12_clamps_out_of_range_input() {
        assert_eq!(quantize_dac12(-5.0), 0);
        assert_eq!(quantize_dac12(5.0), 4095);
    }
}
