//! Error types for the tuner engine.
//!
//! Per-tick failures (silence, weak periodicity, out-of-range estimates) are
//! not errors; they surface as an empty [`crate::tuning::NoteReading`]. Only
//! the conditions below keep a [`crate::detection::DetectionLoop`] from
//! entering the listening state.

use thiserror::Error;

/// Errors surfaced to the caller of the tuner engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TunerError {
    /// The microphone could not be opened (permission denied, no device,
    /// unsupported format). Recoverable: the caller may retry `start()`.
    #[error("Microphone access denied or unavailable: {0}")]
    DeviceUnavailable(String),

    /// A configuration value is out of range or inconsistent with another.
    #[error("Invalid tuner configuration: {0}")]
    InvalidConfig(String),

    /// Capture was aborted by a stop request while the input was being opened.
    #[error("Capture start was cancelled")]
    Cancelled,
}
