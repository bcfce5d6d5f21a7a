//! ADSR envelope generation, with both a plain time-based mode and the
//! SID-authentic rate-counter mode (§4.2 "Envelope").

/// The envelope's current phase. Transitions are monotonic within one
/// gate cycle: `Attack -> Decay -> Sustain -> Release`, except that a
/// rising gate edge always restarts at `Attack` regardless of the
/// current phase, and `test` forces an immediate jump to `Off`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopePhase {
    Attack,
    Decay,
    Sustain,
    Release,
    Off,
}

/// Selects which of the two envelope update strategies a channel uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeMode {
    /// Linear ramps (with a gentle exponential curvature baked in on
    /// decay/release) driven by plain sample counts.
    TimeBased,
    /// The SID's 16-bit rate counter with table-indexed exponential
    /// multipliers at thresholds 93/54/26/14/6 (§4.2).
    RateCounter,
}

/// Exponential-curve thresholds and their per-hit divisors, reproducing
/// the SID's "bent" decay/release/sustain-hold shape.
const RATE_COUNTER_THRESHOLDS: [(u16, u8); 5] =
    [(93, 1), (54, 2), (26, 4), (14, 8), (6, 16)];

#[derive(Clone, Copy, Debug)]
pub struct Envelope {
    pub mode: EnvelopeMode,
    pub phase: EnvelopePhase,
    pub level: f32,
    /// Attack/decay/release durations, expressed as a sample count.
    pub attack_samples: u32,
    pub decay_samples: u32,
    pub release_samples: u32,
    pub sustain_level: f32,
    gate: bool,
    progress: u32,
    rate_counter: u16,
    exp_hits: u8,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope {
            mode: EnvelopeMode::TimeBased,
            phase: EnvelopePhase::Off,
            level: 0.0,
            attack_samples: 0,
            decay_samples: 0,
            release_samples: 0,
            sustain_level: 1.0,
            gate: false,
            progress: 0,
            rate_counter: 0,
            exp_hits: 0,
        }
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the gate bit. A rising edge starts attack from the current
    /// level; a falling edge starts release from the current level
    /// (§4.2 "The gate bit edges drive transitions").
    pub fn set_gate(&mut self, gate: bool) {
        if gate && !self.gate {
            self.phase = EnvelopePhase::Attack;
            // Seed progress from the current level so TimeBased attack
            // continues upward from here instead of snapping to 0.
            self.progress = if self.attack_samples > 0 {
                (self.level.clamp(0.0, 1.0) * self.attack_samples as f32).round() as u32
            } else {
                0
            };
            self.rate_counter = 0;
            self.exp_hits = 0;
        } else if !gate && self.gate {
            self.phase = EnvelopePhase::Release;
            self.progress = 0;
            self.rate_counter = 0;
            self.exp_hits = 0;
        }
        self.gate = gate;
    }

    /// The SID `test` bit forces an immediate release to silence
    /// regardless of gate state.
    pub fn force_release(&mut self) {
        self.phase = EnvelopePhase::Off;
        self.level = 0.0;
    }

    /// Advances the envelope by one sample and returns the new level,
    /// always in `[0, 1]`.
    pub fn advance(&mut self) -> f32 {
        match self.mode {
            EnvelopeMode::TimeBased => self.advance_time_based(),
            EnvelopeMode::RateCounter => self.advance_rate_counter(),
        }
        self.level = self.level.clamp(0.0, 1.0);
        self.level
    }

    fn advance_time_based(&mut self) {
        match self.phase {
            EnvelopePhase::Attack => {
                if self.attack_samples == 0 {
                    self.level = 1.0;
                    self.phase = EnvelopePhase::Decay;
                    self.progress = 0;
                    return;
                }
                self.progress += 1;
                self.level = self.progress as f32 / self.attack_samples as f32;
                if self.progress >= self.attack_samples {
                    self.level = 1.0;
                    self.phase = EnvelopePhase::Decay;
                    self.progress = 0;
                }
            }
            EnvelopePhase::Decay => {
                if self.decay_samples == 0 {
                    self.level = self.sustain_level;
                    self.phase = EnvelopePhase::Sustain;
                    return;
                }
                self.progress += 1;
                let t = (self.progress as f32 / self.decay_samples as f32).min(1.0);
                // exponential-ish curvature toward sustain level
                let eased = 1.0 - (1.0 - t).powf(2.0);
                self.level = 1.0 - eased * (1.0 - self.sustain_level);
                if self.progress >= self.decay_samples {
                    self.level = self.sustain_level;
                    self.phase = EnvelopePhase::Sustain;
                }
            }
            EnvelopePhase::Sustain => {
                self.level = self.sustain_level;
            }
            EnvelopePhase::Release => {
                if self.release_samples == 0 {
                    self.level = 0.0;
                    self.phase = EnvelopePhase::Off;
                    return;
                }
                self.progress += 1;
                let t = (self.progress as f32 / self.release_samples as f32).min(1.0);
                let start = self.level;
                let eased = 1.0 - (1.0 - t).powf(2.0);
                self.level = start * (1.0 - eased);
                if self.progress >= self.release_samples {
                    self.level = 0.0;
                    self.phase = EnvelopePhase::Off;
                }
            }
            EnvelopePhase::Off => {
                self.level = 0.0;
            }
        }
    }

    /// Amount subtracted from the 16-bit rate counter's target each
    /// sample, per the SID's bent-curve table (§4.2).
    fn exp_divisor_for(level_u8: u8) -> u8 {
        for &(threshold, divisor) in RATE_COUNTER_THRESHOLDS.iter() {
            if (level_u8 as u16) <= threshold {
                return divisor;
            }
        }
        1
    }

    fn advance_rate_counter(&mut self) {
        let rate_period = match self.phase {
            EnvelopePhase::Attack => self.attack_samples.max(1) as u16,
            EnvelopePhase::Decay => self.decay_samples.max(1) as u16,
            EnvelopePhase::Release => self.release_samples.max(1) as u16,
            EnvelopePhase::Sustain | EnvelopePhase::Off => {
                self.level = if self.phase == EnvelopePhase::Sustain { self.sustain_level } else { 0.0 };
                return;
            }
        };
        self.rate_counter = self.rate_counter.wrapping_add(1);
        if self.rate_counter < rate_period {
            return;
        }
        self.rate_counter = 0;

        let level_u8 = (self.level * 255.0) as u8;
        let divisor = if matches!(self.phase, EnvelopePhase::Attack) { 1 } else { Self::exp_divisor_for(level_u8) };
        self.exp_hits = self.exp_hits.wrapping_add(1);
        if self.exp_hits < divisor {
            return;
        }
        self.exp_hits = 0;

        match self.phase {
            EnvelopePhase::Attack => {
                self.level += 1.0 / 255.0;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.phase = EnvelopePhase::Decay;
                }
            }
            EnvelopePhase::Decay => {
                self.level -= 1.0 / 255.0;
                if self.level <= self.sustain_level {
                    self.level = self.sustain_level;
                    self.phase = EnvelopePhase::Sustain;
                }
            }
            EnvelopePhase::Release => {
                self.level -= 1.0 / 255.0;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.phase = EnvelopePhase::Off;
                }
            }
            EnvelopePhase::Sustain | EnvelopePhase::Off => {}
        }
    }
}

/// SID 4-bit attack/decay/release index -> milliseconds tables (§4.3).
pub const ATTACK_MS_TABLE: [u32; 16] =
    [2, 8, 16, 24, 38, 56, 68, 80, 100, 250, 500, 800, 1000, 3000, 5000, 8000];

/// decay/release use 6x the attack table's values at the same index.
pub fn decay_release_ms(index: u8) -> u32 {
    ATTACK_MS_TABLE[(index & 0x0F) as usize] * 6
}

pub fn ms_to_samples(ms: u32, sample_rate: u32) -> u32 {
    ((ms as u64 * sample_rate as u64) / 1000).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_level_always_in_unit_range() {
        let mut env = Envelope::new();
        env.attack_samples = 10;
        env.decay_samples = 10;
        env.release_samples = 10;
        env.sustain_level = 0.5;
        env.set_gate(true);
        for _ in 0..15 {
            let l = env.advance();
            assert!((0.0..=1.0).contains(&l));
        }
        env.set_gate(false);
        for _ in 0..15 {
            let l = env.advance();
            assert!((0.0..=1.0).contains(&l));
        }
    }

    #[test]
    fn rising_gate_restarts_attack_from_current_level() {
        let mut env = Envelope::new();
        env.attack_samples = 100;
        env.decay_samples = 10;
        env.release_samples = 10;
        env.set_gate(true);
        for _ in 0..50 {
            env.advance();
        }
        assert_eq!(env.phase, EnvelopePhase::Attack);
        env.set_gate(false);
        env.advance();
        assert_eq!(env.phase, EnvelopePhase::Release);
        env.set_gate(true);
        assert_eq!(env.phase, EnvelopePhase::Attack);
    }

    #[test]
    fn rising_gate_edge_continues_from_current_level_instead_of_snapping_to_zero() {
        let mut env = Envelope::new();
        env.attack_samples = 1000;
        env.decay_samples = 10;
        env.release_samples = 1000;
        env.set_gate(true);
        for _ in 0..500 {
            env.advance();
        }
        env.set_gate(false);
        env.advance();
        let level_before_regate = env.level;
        assert!(level_before_regate > 0.1);

        env.set_gate(true);
        // The level doesn't move until the next advance() call, but the
        // very next sample must continue upward from here, not from 0.
        let next = env.advance();
        assert!(
            next >= level_before_regate - 0.01,
            "attack after re-gate should continue from {}, got {}",
            level_before_regate,
            next
        );
    }

    #[test]
    fn test_bit_forces_immediate_release() {
        let mut env = Envelope::new();
        env.set_gate(true);
        env.level = 0.8;
        env.force_release();
        assert_eq!(env.level, 0.0);
        assert_eq!(env.phase, EnvelopePhase::Off);
    }

    #[test]
    fn decay_release_table_is_six_times_attack() {
        for i in 0..16u8 {
            assert_eq!(decay_release_ms(i), ATTACK_MS_TABLE[i as usize] * 6);
        }
    }
}
