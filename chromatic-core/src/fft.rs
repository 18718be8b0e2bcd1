//! # Fast Fourier Transform (FFT) Module
//!
//! This module produces the coarse magnitude spectrum shown next to the
//! tuner readout. It handles windowing, the forward transform and the
//! decibel scaling of the lowest bins.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per buffer size
//! - DC offset removal and Hann windowing
//! - Decibel scaling into a normalized [0, 1] range
//! - Per-bin temporal smoothing so bars decay instead of flickering

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

use crate::buffer::SignalBuffer;

/// Level mapped to 0.0 in the visualizer output.
const MIN_DECIBELS: f32 = -100.0;
/// Level mapped to 1.0 in the visualizer output.
const MAX_DECIBELS: f32 = -30.0;
/// Weight of the previous frame in the per-bin smoothing.
const SMOOTHING_TIME_CONSTANT: f32 = 0.8;

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset adds a large component at 0 Hz to the spectrum and a constant
/// bias to every autocorrelation lag.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub(crate) fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Hann window coefficients for a frame of `n` samples.
fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Computes smoothed, normalized spectrum bins for visualization.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    bins: usize,
    smoothed: Vec<f32>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("size", &self.window.len())
            .field("bins", &self.bins)
            .finish()
    }
}

impl SpectrumAnalyzer {
    /// Plans the transform for `size`-sample frames and `bins` output values.
    pub fn new(size: usize, bins: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let bins = bins.min(size / 2);
        Self {
            fft,
            window: hann_window(size),
            bins,
            smoothed: vec![0.0; bins],
        }
    }

    /// Transforms one buffer and returns the lowest `bins` bins in [0, 1].
    ///
    /// Buffers whose length differs from the planned size yield an empty
    /// vector and leave the smoothing state untouched.
    pub fn process(&mut self, buffer: &SignalBuffer) -> Vec<f32> {
        let size = self.window.len();
        if self.bins == 0 || buffer.len() != size {
            return Vec::new();
        }

        let mut processed = buffer.samples().to_vec();
        remove_dc_offset(&mut processed);

        let mut spectrum: Vec<Complex<f32>> = processed
            .iter()
            .zip(&self.window)
            .map(|(&sample, &w)| Complex {
                re: sample * w,
                im: 0.0,
            })
            .collect();
        self.fft.process(&mut spectrum);

        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (slot, bin) in self.smoothed.iter_mut().zip(&spectrum[..self.bins]) {
            let magnitude = bin.norm() / size as f32;
            let decibels = 20.0 * magnitude.max(1e-12).log10();
            let level = ((decibels - MIN_DECIBELS) / range).clamp(0.0, 1.0);
            *slot = SMOOTHING_TIME_CONSTANT * *slot + (1.0 - SMOOTHING_TIME_CONSTANT) * level;
        }
        self.smoothed.clone()
    }

    /// Forgets the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }
}
