//! Configuration parameters for the tuner engine.
//!
//! Every numeric threshold of the pipeline lives here. The defaults are tuned
//! for a guitar/bass/voice range at 44.1 kHz; none of them is a hard
//! requirement, so all are exposed for callers to adjust.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TunerError;

/// Sub-harmonic correction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctaveCorrection {
    /// Enable sub-harmonic correction (default: true)
    pub enabled: bool,

    /// Only estimates strictly above this frequency are candidates (default: 110.0 Hz, A2)
    pub trigger_hz: f32,

    /// Lower edge of the plausible fundamental band, exclusive (default: 40.0 Hz)
    pub band_low_hz: f32,

    /// Upper edge of the plausible fundamental band, exclusive (default: 70.0 Hz)
    pub band_high_hz: f32,
}

impl Default for OctaveCorrection {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_hz: 110.0,
            band_low_hz: 40.0,
            band_high_hz: 70.0,
        }
    }
}

/// Tuner configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    // Capture
    /// Samples per analysis window, must be a power of two (default: 16384)
    /// Larger windows resolve lower notes at the cost of latency and CPU
    pub buffer_size: usize,

    /// Interval between analysis ticks in milliseconds (default: 16, ~60 per second)
    pub tick_interval_ms: u64,

    // Autocorrelation
    /// Lowest detectable fundamental in Hz (default: 40.0)
    pub min_frequency: f32,

    /// Highest detectable fundamental in Hz (default: 1200.0)
    pub max_frequency: f32,

    /// RMS level below which a window is treated as silence (default: 0.01)
    pub silence_rms: f32,

    /// Minimum normalized correlation of the chosen peak (default: 0.3)
    pub confidence_threshold: f32,

    /// Fraction of the strongest peak a shorter-lag peak must reach to be
    /// preferred over it (default: 0.9)
    pub peak_pick_ratio: f32,

    /// Sub-harmonic correction
    pub octave_correction: OctaveCorrection,

    // Smoothing
    /// Number of accepted frequencies kept for the median (default: 5)
    pub history_depth: usize,

    /// Median is used while the newest estimate is within this many cents of it (default: 30.0)
    pub smoothing_gate_cents: f32,

    // Display
    /// How long the last note stays displayed after the signal drops (default: 2000 ms)
    pub fade_timeout_ms: u64,

    /// Readings closer than this to the reference count as in tune (default: 5)
    pub in_tune_cents: i32,

    /// Number of spectrum bins published for visualization, 0 disables (default: 64)
    pub visualizer_bins: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16384,
            tick_interval_ms: 16,
            min_frequency: 40.0,
            max_frequency: 1200.0,
            silence_rms: 0.01,
            confidence_threshold: 0.3,
            peak_pick_ratio: 0.9,
            octave_correction: OctaveCorrection::default(),
            history_depth: 5,
            smoothing_gate_cents: 30.0,
            fade_timeout_ms: 2000,
            in_tune_cents: 5,
            visualizer_bins: 64,
        }
    }
}

impl TunerConfig {
    /// Grace period before the held note is cleared.
    pub fn fade_timeout(&self) -> Duration {
        Duration::from_millis(self.fade_timeout_ms)
    }

    /// Period of the analysis tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Checks the configuration for values the pipeline cannot work with.
    ///
    /// # Returns
    /// * `Ok(())` - Configuration is usable
    /// * `Err(TunerError::InvalidConfig)` - Describes the first offending field
    pub fn validate(&self) -> Result<(), TunerError> {
        let invalid = |msg: String| Err(TunerError::InvalidConfig(msg));

        if !self.buffer_size.is_power_of_two() || self.buffer_size < 256 {
            return invalid(format!(
                "buffer_size must be a power of two >= 256, got {}",
                self.buffer_size
            ));
        }
        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency) {
            return invalid(format!(
                "frequency range must satisfy 0 < min < max, got {}..{}",
                self.min_frequency, self.max_frequency
            ));
        }
        if !(self.silence_rms >= 0.0) {
            return invalid(format!("silence_rms must be >= 0, got {}", self.silence_rms));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if !(self.peak_pick_ratio > 0.0 && self.peak_pick_ratio <= 1.0) {
            return invalid(format!(
                "peak_pick_ratio must be within (0, 1], got {}",
                self.peak_pick_ratio
            ));
        }
        let octave = &self.octave_correction;
        if octave.enabled && !(octave.band_low_hz < octave.band_high_hz) {
            return invalid(format!(
                "octave band must satisfy low < high, got {}..{}",
                octave.band_low_hz, octave.band_high_hz
            ));
        }
        if self.history_depth == 0 {
            return invalid("history_depth must be at least 1".to_string());
        }
        if !(self.smoothing_gate_cents >= 0.0) {
            return invalid(format!(
                "smoothing_gate_cents must be >= 0, got {}",
                self.smoothing_gate_cents
            ));
        }
        if self.visualizer_bins > self.buffer_size / 2 {
            return invalid(format!(
                "visualizer_bins must not exceed buffer_size / 2, got {}",
                self.visualizer_bins
            ));
        }
        Ok(())
    }
}
