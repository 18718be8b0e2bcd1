//! # Musical Tuning Module
//!
//! This module converts frequencies into chromatic note readings for the
//! tuner display. It handles note naming, octave numbering and cent
//! deviation measurements based on twelve-tone equal temperament with
//! A4 = 440 Hz.
//!
//! ## Features
//! - Nearest-semitone mapping for any audible frequency
//! - Scientific pitch octave numbering (octaves change at C)
//! - Cent deviation from the nearest equal-tempered semitone
//! - Chromatic reference tones for octave 4
//! - In tune / flat / sharp classification

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concert pitch for A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// Frequencies below this are reported as "no note".
pub const MIN_AUDIBLE_FREQUENCY: f32 = 20.0;

/// Index of A within the C-based chromatic scale.
const A_INDEX: i32 = 9;

/// The twelve pitch classes of the chromatic scale, starting at C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Position within the scale, C = 0 through B = 11.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Sharp-spelled note name (e.g., "C#").
    pub fn name(self) -> &'static str {
        const NOTE_NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        NOTE_NAMES[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a reading relates to its reference pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningStatus {
    InTune,
    Flat,
    Sharp,
}

/// A single tuner reading: nearest note, octave and deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteReading {
    /// Nearest pitch class, `None` when no pitch is detected.
    pub note: Option<PitchClass>,
    /// Scientific pitch octave, `None` when no pitch is detected.
    pub octave: Option<i32>,
    /// Deviation from the nearest semitone, always within [-50, 50].
    pub cents: i32,
    /// The measured frequency in Hz, 0.0 when no pitch is detected.
    pub frequency_hz: f32,
}

impl NoteReading {
    /// The "no pitch" sentinel.
    pub const NONE: NoteReading = NoteReading {
        note: None,
        octave: None,
        cents: 0,
        frequency_hz: 0.0,
    };

    pub fn is_none(&self) -> bool {
        self.note.is_none()
    }

    pub fn is_some(&self) -> bool {
        self.note.is_some()
    }

    /// Classifies the reading against an in-tune window of `in_tune_cents`.
    pub fn status(&self, in_tune_cents: i32) -> Option<TuningStatus> {
        self.note?;
        Some(if self.cents.abs() < in_tune_cents {
            TuningStatus::InTune
        } else if self.cents < 0 {
            TuningStatus::Flat
        } else {
            TuningStatus::Sharp
        })
    }
}

impl Default for NoteReading {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for NoteReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.note, self.octave) {
            (Some(note), Some(octave)) => write!(
                f,
                "{}{} {:.2} Hz {:+} cents",
                note, octave, self.frequency_hz, self.cents
            ),
            _ => f.write_str("-"),
        }
    }
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// # Arguments
/// * `freq` - Measured frequency in Hz
/// * `target_freq` - Target frequency in Hz
///
/// # Returns
/// * Cent deviation (positive = sharp, negative = flat)
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Equal-tempered frequency `semitones` away from A4.
fn equal_tempered(semitones: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf(semitones as f32 / 12.0)
}

/// The chromatic scale of octave 4 (C4 to B4) with reference frequencies.
///
/// These are the pitches a reference-tone player offers next to the tuner.
static REFERENCE_TONES: Lazy<[(PitchClass, f32); 12]> = Lazy::new(|| {
    PitchClass::ALL.map(|pc| (pc, equal_tempered(pc.index() as i32 - A_INDEX)))
});

/// Maps frequencies onto the equal-tempered chromatic scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteMapper;

impl NoteMapper {
    pub fn new() -> Self {
        Self
    }

    /// Converts a frequency estimate into a note reading.
    ///
    /// The nearest semitone `n` (relative to A4) is found first; note and
    /// octave follow from `n + 9` with floor division, so negative offsets
    /// wrap correctly and the octave number changes at C.
    ///
    /// # Arguments
    /// * `freq` - Frequency in Hz, or `None` when nothing was detected
    ///
    /// # Returns
    /// * `NoteReading` - The nearest note, or [`NoteReading::NONE`] for
    ///   missing, non-finite or sub-audible input
    pub fn to_note(&self, freq: Option<f32>) -> NoteReading {
        let freq = match freq {
            Some(f) if f.is_finite() && f >= MIN_AUDIBLE_FREQUENCY => f,
            _ => return NoteReading::NONE,
        };

        let n = (12.0 * (freq / A4_FREQUENCY).log2()).round() as i32;
        let from_c = n + A_INDEX;
        let note = PitchClass::ALL[from_c.rem_euclid(12) as usize];
        let octave = 4 + from_c.div_euclid(12);

        let reference = equal_tempered(n);
        let cents = calculate_cents_deviation(freq, reference)
            .round()
            .clamp(-50.0, 50.0) as i32;

        NoteReading {
            note: Some(note),
            octave: Some(octave),
            cents,
            frequency_hz: freq,
        }
    }

    /// Equal-tempered reference frequency of a note.
    ///
    /// # Arguments
    /// * `note` - Pitch class
    /// * `octave` - Scientific pitch octave (A4 = 440 Hz)
    pub fn frequency_of(&self, note: PitchClass, octave: i32) -> f32 {
        equal_tempered((octave - 4) * 12 + note.index() as i32 - A_INDEX)
    }

    /// Reference tones for the chromatic scale of octave 4.
    pub fn reference_tones(&self) -> &'static [(PitchClass, f32); 12] {
        &*REFERENCE_TONES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reading(freq: f32) -> NoteReading {
        NoteMapper::new().to_note(Some(freq))
    }

    #[test]
    fn test_concert_a() {
        let r = reading(440.0);
        assert_eq!(r.note, Some(PitchClass::A));
        assert_eq!(r.octave, Some(4));
        assert_eq!(r.cents, 0);
        assert_eq!(r.frequency_hz, 440.0);
    }

    #[test]
    fn test_a3() {
        let r = reading(220.0);
        assert_eq!((r.note, r.octave, r.cents), (Some(PitchClass::A), Some(3), 0));
    }

    #[test]
    fn test_octave_boundary_at_c() {
        let b3 = reading(246.94);
        assert_eq!((b3.note, b3.octave), (Some(PitchClass::B), Some(3)));
        let c4 = reading(261.63);
        assert_eq!((c4.note, c4.octave), (Some(PitchClass::C), Some(4)));
        // Low E of a bass guitar sits well below A4.
        let e1 = reading(41.2);
        assert_eq!((e1.note, e1.octave), (Some(PitchClass::E), Some(1)));
    }

    #[test]
    fn test_sharp_and_flat_cents() {
        let sharp = reading(440.0 * 2f32.powf(12.0 / 1200.0));
        assert_eq!((sharp.note, sharp.cents), (Some(PitchClass::A), 12));
        let flat = reading(440.0 * 2f32.powf(-30.0 / 1200.0));
        assert_eq!((flat.note, flat.cents), (Some(PitchClass::A), -30));
        // 60 cents sharp of A4 is 40 cents flat of A#4.
        let next = reading(440.0 * 2f32.powf(60.0 / 1200.0));
        assert_eq!((next.note, next.cents), (Some(PitchClass::ASharp), -40));
    }

    #[test]
    fn test_cents_range_and_reference_round_trip() {
        let mapper = NoteMapper::new();
        let mut freq = 25.0_f32;
        while freq < 5000.0 {
            let r = mapper.to_note(Some(freq));
            assert!((-50..=50).contains(&r.cents), "{freq} Hz gave {} cents", r.cents);

            let reference = mapper.frequency_of(r.note.unwrap(), r.octave.unwrap());
            let back = mapper.to_note(Some(reference));
            assert_eq!(back.cents, 0, "reference {reference} Hz for {freq} Hz");
            assert_eq!((back.note, back.octave), (r.note, r.octave));

            freq *= 1.0137;
        }
    }

    #[test]
    fn test_none_and_sub_audible() {
        let mapper = NoteMapper::new();
        assert_eq!(mapper.to_note(None), NoteReading::NONE);
        assert_eq!(mapper.to_note(Some(19.9)), NoteReading::NONE);
        assert_eq!(mapper.to_note(Some(f32::NAN)), NoteReading::NONE);
        assert_eq!(NoteReading::NONE.cents, 0);
        assert_eq!(NoteReading::NONE.to_string(), "-");
    }

    #[test]
    fn test_reference_tones_cover_octave_four() {
        let tones = NoteMapper::new().reference_tones();
        assert_eq!(tones[0].0, PitchClass::C);
        assert_relative_eq!(tones[0].1, 261.6256, epsilon = 1e-3);
        assert_eq!(tones[9], (PitchClass::A, 440.0));
    }

    #[test]
    fn test_status_window() {
        let mut r = reading(440.0);
        assert_eq!(r.status(5), Some(TuningStatus::InTune));
        r.cents = -5;
        assert_eq!(r.status(5), Some(TuningStatus::Flat));
        r.cents = 7;
        assert_eq!(r.status(5), Some(TuningStatus::Sharp));
        assert_eq!(NoteReading::NONE.status(5), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(reading(440.0).to_string(), "A4 440.00 Hz +0 cents");
    }
}
