//! # Signal Buffer Module
//!
//! Fixed-size snapshots of captured audio, and the rolling window they are
//! taken from. The capture callback delivers blocks of arbitrary length; the
//! detection loop keeps the most recent `buffer_size` samples and freezes a
//! copy of them once per tick.

use std::collections::VecDeque;
use std::sync::Arc;

/// An immutable snapshot of time-domain samples captured for one analysis tick.
#[derive(Debug, Clone)]
pub struct SignalBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl SignalBuffer {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level of the buffer, 0.0 when empty.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.samples.iter().map(|&s| s * s).sum::<f32>() / self.samples.len() as f32).sqrt()
    }
}

/// Rolling window holding the most recent `capacity` captured samples.
///
/// Starts out filled with silence so a snapshot can be taken before the
/// device has delivered a full window.
#[derive(Debug)]
pub struct SampleWindow {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let mut samples = VecDeque::with_capacity(capacity);
        samples.resize(capacity, 0.0);
        Self { samples, capacity }
    }

    /// Appends a captured block, discarding the oldest samples beyond capacity.
    pub fn push(&mut self, block: &[f32]) {
        if block.len() >= self.capacity {
            self.samples.clear();
            self.samples
                .extend(block[block.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (self.samples.len() + block.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(block.iter().copied());
    }

    /// Freezes the current window contents into a [`SignalBuffer`].
    pub fn snapshot(&self, sample_rate: u32) -> SignalBuffer {
        let samples: Vec<f32> = self.samples.iter().copied().collect();
        SignalBuffer::new(samples, sample_rate)
    }
}
