//! Per-channel and global state-variable filters, plus the soft-clip
//! overdrive stage (§4.2 "Filtering").

use std::sync::OnceLock;

const CUTOFF_LUT_SIZE: usize = 2048;

/// The filter topology selectable per channel or globally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    LowPass,
    BandPass,
    HighPass,
    Notch,
}

bitflags::bitflags! {
    /// Which filter outputs are summed into the final mix; mirrors the
    /// SID's filter-select-per-voice register bits (§4.3).
    pub struct FilterRouting: u8 {
        const LOW_PASS  = 0b0001;
        const BAND_PASS = 0b0010;
        const HIGH_PASS = 0b0100;
    }
}

/// Distinguishes the two historical SID filter curves (§9 Open Question:
/// default chip model).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterCurve {
    /// 6581: nonlinear cutoff mapping and asymmetric soft clipping.
    Mos6581,
    /// 8580: linear cutoff mapping, symmetric clipping.
    Mos8580,
}

fn cutoff_lut(curve: FilterCurve) -> &'static [f32; CUTOFF_LUT_SIZE] {
    static LUT_6581: OnceLock<[f32; CUTOFF_LUT_SIZE]> = OnceLock::new();
    static LUT_8580: OnceLock<[f32; CUTOFF_LUT_SIZE]> = OnceLock::new();
    let cell = match curve {
        FilterCurve::Mos6581 => &LUT_6581,
        FilterCurve::Mos8580 => &LUT_8580,
    };
    cell.get_or_init(|| {
        let mut table = [0.0f32; CUTOFF_LUT_SIZE];
        for (i, slot) in table.iter_mut().enumerate() {
            let x = i as f32 / (CUTOFF_LUT_SIZE - 1) as f32;
            *slot = match curve {
                // the 6581's cutoff DAC is famously nonlinear; approximate
                // with a steep curve biased toward the low end.
                FilterCurve::Mos6581 => x.powf(2.2),
                FilterCurve::Mos8580 => x,
            };
        }
        table
    })
}

fn resonance_lut() -> &'static [f32; CUTOFF_LUT_SIZE] {
    static LUT: OnceLock<[f32; CUTOFF_LUT_SIZE]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut table = [0.0f32; CUTOFF_LUT_SIZE];
        for (i, slot) in table.iter_mut().enumerate() {
            let x = i as f32 / (CUTOFF_LUT_SIZE - 1) as f32;
            // resonance saturates toward the top of the 4-bit range
            *slot = 0.7 + 1.8 * x;
        }
        table
    })
}

/// Maps an 11-bit cutoff register value and 4-bit resonance register
/// value to normalized cutoff (Hz fraction of Nyquist) and Q.
pub fn lookup_cutoff_resonance(cutoff_reg: u16, resonance_reg: u8, curve: FilterCurve) -> (f32, f32) {
    let cutoff_idx = (cutoff_reg as usize).min(CUTOFF_LUT_SIZE - 1);
    let resonance_idx = ((resonance_reg as usize) * (CUTOFF_LUT_SIZE - 1) / 15).min(CUTOFF_LUT_SIZE - 1);
    (cutoff_lut(curve)[cutoff_idx], resonance_lut()[resonance_idx])
}

/// A chamberlin-style state-variable filter producing LP/BP/HP/notch
/// outputs simultaneously from one pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct StateVariableFilter {
    low: f32,
    band: f32,
}

impl StateVariableFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }

    /// Processes one sample. `cutoff` is the normalized cutoff frequency
    /// in `(0, 0.5)` (fraction of sample rate), `q` is resonance (higher
    /// is more resonant, should stay below the self-oscillation point).
    pub fn process(&mut self, input: f32, cutoff: f32, q: f32) -> (f32, f32, f32, f32) {
        let f = (2.0 * std::f32::consts::PI * cutoff.clamp(0.0001, 0.49)).sin();
        let damp = (1.0 / q.max(0.1)).min(2.0);

        let high = input - self.low - damp * self.band;
        self.band += f * high;
        self.low += f * self.band;
        let notch = high + self.low;

        (self.low, self.band, high, notch)
    }

    /// Produces the routed sum of whichever outputs `routing` selects.
    pub fn process_routed(&mut self, input: f32, cutoff: f32, q: f32, routing: FilterRouting) -> f32 {
        let (low, band, high, notch) = self.process(input, cutoff, q);
        let mut out = 0.0;
        if routing.contains(FilterRouting::LOW_PASS) {
            out += low;
        }
        if routing.contains(FilterRouting::BAND_PASS) {
            out += band;
        }
        if routing.contains(FilterRouting::HIGH_PASS) {
            out += high;
        }
        if routing.is_empty() {
            out = notch;
        }
        out
    }
}

/// Soft-clip overdrive, with the 6581's characteristic asymmetric
/// clipping thresholds available as an option (§4.2 "Overdrive").
pub fn soft_clip(input: f32, drive: f32, curve: FilterCurve) -> f32 {
    let driven = input * (1.0 + drive.max(0.0));
    match curve {
        FilterCurve::Mos8580 => driven.tanh(),
        FilterCurve::Mos6581 => {
            if driven >= 0.0 {
                (driven / (1.0 + driven.abs())).min(0.85) * (1.0 / 0.85)
            } else {
                (driven / (1.0 + driven.abs())).max(-0.75) * (1.0 / 0.75)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_lut_is_monotonic_for_both_curves() {
        for curve in [FilterCurve::Mos6581, FilterCurve::Mos8580] {
            let lut = cutoff_lut(curve);
            for w in lut.windows(2) {
                assert!(w[1] >= w[0]);
            }
        }
    }

    #[test]
    fn lowpass_attenuates_high_frequency_relative_to_low() {
        let mut hi = StateVariableFilter::new();
        let mut lo = StateVariableFilter::new();
        let mut hi_energy = 0.0f32;
        let mut lo_energy = 0.0f32;
        for n in 0..512 {
            let t = n as f32;
            let fast = (t * 0.45 * std::f32::consts::TAU).sin();
            let slow = (t * 0.01 * std::f32::consts::TAU).sin();
            hi_energy += hi.process_routed(fast, 0.05, 0.8, FilterRouting::LOW_PASS).abs();
            lo_energy += lo.process_routed(slow, 0.05, 0.8, FilterRouting::LOW_PASS).abs();
        }
        assert!(lo_energy > hi_energy);
    }

    #[test]
    fn soft_clip_stays_within_unit_range_for_large_input() {
        let v = soft_clip(10.0, 5.0, FilterCurve::Mos8580);
        assert!((-1.0..=1.0).contains(&v));
        let v6581 = soft_clip(10.0, 5.0, FilterCurve::Mos6581);
        assert!((-1.01..=1.01).contains(&v6581));
    }

    #[test]
    fn asymmetric_6581_clip_differs_positive_from_negative() {
        let pos = soft_clip(5.0, 1.0, FilterCurve::Mos6581);
        let neg = soft_clip(-5.0, 1.0, FilterCurve::Mos6581);
        assert!((pos.abs() - neg.abs()).abs() > 0.001);
    }
}
