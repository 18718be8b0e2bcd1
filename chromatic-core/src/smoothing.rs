//! Temporal smoothing of frequency estimates.
//!
//! Keeps a short history of accepted estimates and reports its median while
//! the newest estimate stays close to it. A jump larger than the gate is a
//! real pitch change and passes through unsmoothed.

use std::collections::VecDeque;

use crate::tuning::calculate_cents_deviation;

/// Fewest history entries for which a median is meaningful.
const MIN_MEDIAN_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct FrequencySmoother {
    history: VecDeque<f32>,
    capacity: usize,
    gate_cents: f32,
}

impl FrequencySmoother {
    pub fn new(capacity: usize, gate_cents: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            gate_cents,
        }
    }

    /// Feeds one tick's estimate and returns the value to display.
    ///
    /// `None` leaves the history untouched so a brief dropout inside a
    /// sustained note does not reset it.
    pub fn smooth(&mut self, freq: Option<f32>) -> Option<f32> {
        let recent = freq.filter(|f| f.is_finite() && *f > 0.0)?;

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(recent);

        if self.history.len() < MIN_MEDIAN_LEN {
            return Some(recent);
        }

        let median = self.median();
        let cents_diff = calculate_cents_deviation(median, recent);
        if cents_diff.abs() < self.gate_cents {
            Some(median)
        } else {
            Some(recent)
        }
    }

    /// Median of the history; the mean of the middle pair for even lengths.
    fn median(&self) -> f32 {
        let mut sorted: Vec<f32> = self.history.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Accepted estimates, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().copied()
    }
}
