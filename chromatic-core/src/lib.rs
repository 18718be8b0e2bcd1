// chromatic-core/src/lib.rs

//! The core logic for the chromatic tuner.
//! This crate is responsible for audio capture, pitch detection,
//! note mapping and the listening loop that ties them together.
//! It is completely headless and contains no UI code.

pub mod audio;
pub mod buffer;
pub mod config;
pub mod detection;
pub mod error;
pub mod fft;
pub mod octave;
pub mod pitch;
pub mod session;
pub mod smoothing;
pub mod tuning;

use serde::{Deserialize, Serialize};

pub use config::{OctaveCorrection, TunerConfig};
pub use detection::{DetectionLoop, StopHandle};
pub use error::TunerError;
pub use tuning::{NoteReading, PitchClass, TuningStatus};

/// Whether microphone capture is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopState {
    /// No capture; readings are empty.
    #[default]
    Idle,
    /// Capture active and ticking.
    Listening,
}

/// The display state published after every analysis tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunerSnapshot {
    pub state: LoopState,
    /// This tick's reading, empty as soon as the pitch is lost.
    pub current: NoteReading,
    /// The reading to show, held through short dropouts.
    pub last_displayed: NoteReading,
    /// Normalized correlation of this tick's pitch (0.0 to 1.0).
    pub clarity: Option<f32>,
    /// Data for the spectrum visualization, one value in [0, 1] per bin.
    pub spectrum: Vec<f32>,
}
