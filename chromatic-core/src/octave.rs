//! # Octave Correction Module
//!
//! Strong upper partials of plucked bass and low guitar strings sometimes
//! make the estimator lock onto the second or third harmonic instead of the
//! fundamental. This module applies a best-effort heuristic: if an estimate
//! divided by two (or, failing that, three) lands inside a band of plausible
//! low fundamentals, the divided value is reported instead.
//!
//! The heuristic cannot tell a real note from a harmonic of a lower one, so a
//! genuine note whose half or third falls inside the band will be moved down.
//! Keep the band narrow, or disable the correction for instruments without
//! low fundamentals.

use crate::config::OctaveCorrection;

#[derive(Debug, Clone)]
pub struct OctaveCorrector {
    enabled: bool,
    trigger_hz: f32,
    band_low_hz: f32,
    band_high_hz: f32,
}

impl OctaveCorrector {
    pub fn new(config: &OctaveCorrection) -> Self {
        Self {
            enabled: config.enabled,
            trigger_hz: config.trigger_hz,
            band_low_hz: config.band_low_hz,
            band_high_hz: config.band_high_hz,
        }
    }

    fn in_band(&self, freq: f32) -> bool {
        freq > self.band_low_hz && freq < self.band_high_hz
    }

    /// Returns the corrected fundamental for an estimate.
    ///
    /// Halving takes precedence over dividing by three.
    pub fn correct(&self, freq: f32) -> f32 {
        if !self.enabled || !(freq > self.trigger_hz) {
            return freq;
        }
        for divisor in [2.0, 3.0] {
            let candidate = freq / divisor;
            if self.in_band(candidate) {
                log::trace!("Octave correction {:.2} Hz -> {:.2} Hz", freq, candidate);
                return candidate;
            }
        }
        freq
    }
}
