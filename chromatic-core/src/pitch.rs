//! # Pitch Detection Module
//!
//! This module implements the time-domain pitch estimator used by the tuner.
//! It finds the period of the dominant note with an energy-normalized
//! autocorrelation and refines it to sub-sample precision.
//!
//! ## Features
//! - RMS noise gate to filter out silence
//! - DC offset removal before correlating
//! - Lag search restricted to a musical frequency band
//! - Shortest-period peak selection to avoid octave-low errors
//! - Parabolic interpolation for sub-sample accuracy

use crate::buffer::SignalBuffer;
use crate::config::TunerConfig;
use crate::fft::remove_dc_offset;

/// Relative slack on the band edges, so interpolation rounding at exactly
/// `min_frequency` or `max_frequency` is not rejected (about 1.7 cents).
const BAND_TOLERANCE: f32 = 1e-3;

/// An accepted pitch estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pitch {
    /// Estimated fundamental frequency in Hz.
    pub frequency: f32,
    /// Normalized correlation of the chosen peak (up to 1.0 for a pure tone).
    pub clarity: f32,
}

/// Why a buffer produced no pitch. None of these are errors; each one simply
/// means "nothing to show this tick".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// RMS below the silence threshold.
    NoSignal,
    /// No correlation peak strong enough to trust.
    WeakPeriodicity,
    /// The period lies outside the configured frequency band.
    OutOfRange,
    /// Empty buffer, bad sample rate or a non-finite intermediate value.
    InternalInconsistency,
}

/// Energy-normalized autocorrelation pitch estimator.
#[derive(Debug, Clone)]
pub struct Autocorrelator {
    min_frequency: f32,
    max_frequency: f32,
    silence_rms: f32,
    confidence_threshold: f32,
    peak_pick_ratio: f32,
}

impl Autocorrelator {
    pub fn new(config: &TunerConfig) -> Self {
        Self {
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            silence_rms: config.silence_rms,
            confidence_threshold: config.confidence_threshold,
            peak_pick_ratio: config.peak_pick_ratio,
        }
    }

    /// Estimates the fundamental frequency of a buffer.
    ///
    /// # Returns
    /// * `Some(frequency)` - Detected frequency in Hz
    /// * `None` - No pitch detected (silence, noise, or out-of-band signal)
    pub fn estimate(&self, buffer: &SignalBuffer) -> Option<f32> {
        self.analyze(buffer).ok().map(|pitch| pitch.frequency)
    }

    /// Runs the full estimator and reports why a buffer was rejected.
    ///
    /// The correlation window is the first half of the buffer; every lag
    /// compares it against an equally long slice starting `lag` samples later.
    /// Each correlation is divided by the geometric mean energy of the two
    /// slices, so all lags share the [-1, 1] scale.
    ///
    /// # Arguments
    /// * `buffer` - Captured samples and their sample rate
    ///
    /// # Returns
    /// * `Ok(Pitch)` - Frequency and clarity of the accepted peak
    /// * `Err(Rejection)` - The reason no pitch is reported
    pub fn analyze(&self, buffer: &SignalBuffer) -> Result<Pitch, Rejection> {
        let frame_size = buffer.len();
        let sample_rate = buffer.sample_rate() as f32;
        if frame_size < 8 || sample_rate <= 0.0 {
            return Err(Rejection::InternalInconsistency);
        }

        // --- Noise Gate: Calculate RMS to filter out silence/noise ---
        let rms = buffer.rms();
        if !rms.is_finite() {
            return Err(Rejection::InternalInconsistency);
        }
        if rms < self.silence_rms {
            return Err(Rejection::NoSignal);
        }

        let mut signal = buffer.samples().to_vec();
        remove_dc_offset(&mut signal);

        // --- Lag range from the musical band, leaving one neighbour on each side ---
        let window = frame_size / 2;
        let min_lag = ((sample_rate / self.max_frequency).floor() as usize).max(2);
        // Rounded up so a period of e.g. 1102.5 samples still has its peak inside the range.
        let max_lag = ((sample_rate / self.min_frequency).ceil() as usize).min(frame_size - window - 1);
        if min_lag >= max_lag {
            return Err(Rejection::OutOfRange);
        }

        // Prefix sums of squared samples give each slice's energy in O(1).
        let mut energy = Vec::with_capacity(frame_size + 1);
        energy.push(0.0_f64);
        for &s in &signal {
            let last = energy[energy.len() - 1];
            energy.push(last + (s as f64) * (s as f64));
        }
        let head_energy = energy[window];
        if head_energy <= f64::EPSILON {
            return Err(Rejection::WeakPeriodicity);
        }

        let first_lag = min_lag - 1;
        let correlations: Vec<f32> = (first_lag..=max_lag + 1)
            .map(|lag| {
                let dot: f32 = signal[..window]
                    .iter()
                    .zip(&signal[lag..lag + window])
                    .map(|(a, b)| a * b)
                    .sum();
                let tail_energy = energy[lag + window] - energy[lag];
                let norm = (head_energy * tail_energy).sqrt();
                if norm > f64::EPSILON {
                    (dot as f64 / norm) as f32
                } else {
                    0.0
                }
            })
            .collect();
        let corr = |lag: usize| correlations[lag - first_lag];

        if correlations.iter().any(|c| !c.is_finite()) {
            return Err(Rejection::InternalInconsistency);
        }

        // --- Peak picking: local maxima inside the band ---
        let peaks: Vec<usize> = (min_lag..=max_lag)
            .filter(|&lag| corr(lag) >= corr(lag - 1) && corr(lag) >= corr(lag + 1))
            .collect();
        // A tone whose period lies outside the lag range only shows a slope here.
        let strongest = peaks
            .iter()
            .map(|&lag| corr(lag))
            .fold(f32::NEG_INFINITY, f32::max);
        if peaks.is_empty() {
            return Err(Rejection::OutOfRange);
        }
        if strongest < self.confidence_threshold {
            return Err(Rejection::WeakPeriodicity);
        }

        // Multiples of the period correlate almost as well as the period itself,
        // and an integer lag near 4T can edge out the one near T. Take the
        // shortest lag whose peak is close to the strongest.
        let cutoff = strongest * self.peak_pick_ratio;
        let best_lag = peaks
            .iter()
            .copied()
            .find(|&lag| corr(lag) >= cutoff)
            .ok_or(Rejection::InternalInconsistency)?;

        // --- Parabolic interpolation for better precision ---
        let y0 = corr(best_lag - 1);
        let y1 = corr(best_lag);
        let y2 = corr(best_lag + 1);
        let denominator = y0 - 2.0 * y1 + y2;
        let peak_shift = if denominator.abs() > 1e-12 {
            (0.5 * (y0 - y2) / denominator).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        let refined_lag = best_lag as f32 + peak_shift;

        let frequency = sample_rate / refined_lag;
        if !frequency.is_finite() {
            return Err(Rejection::InternalInconsistency);
        }
        let slack = 1.0 + BAND_TOLERANCE;
        if frequency * slack < self.min_frequency || frequency > self.max_frequency * slack {
            return Err(Rejection::OutOfRange);
        }

        log::trace!(
            "Pitch {:.2} Hz (lag {:.3}, clarity {:.3}, rms {:.4})",
            frequency,
            refined_lag,
            y1,
            rms
        );

        Ok(Pitch {
            frequency,
            clarity: y1,
        })
    }
}
