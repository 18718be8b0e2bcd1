//! # Tuner Session Module
//!
//! The per-capture state of the tuner: frequency history, the current and
//! held readings, and the fade-out deadline. `start`, `stop` and `tick` are
//! the only operations that change it, which keeps the listening state
//! machine testable without a device or a clock.
//!
//! ## Tick pipeline
//! `SignalBuffer` → [`Autocorrelator`] → [`OctaveCorrector`] →
//! [`FrequencySmoother`] → [`NoteMapper`] → `current` / `last_displayed`

use std::time::{Duration, Instant};

use crate::buffer::SignalBuffer;
use crate::config::TunerConfig;
use crate::error::TunerError;
use crate::fft::SpectrumAnalyzer;
use crate::octave::OctaveCorrector;
use crate::pitch::{Autocorrelator, Rejection};
use crate::smoothing::FrequencySmoother;
use crate::tuning::{NoteMapper, NoteReading};
use crate::{LoopState, TunerSnapshot};

#[derive(Debug)]
pub struct TunerSession {
    config: TunerConfig,
    state: LoopState,
    sample_rate: u32,

    autocorrelator: Autocorrelator,
    octave: OctaveCorrector,
    smoother: FrequencySmoother,
    mapper: NoteMapper,
    spectrum: SpectrumAnalyzer,

    current: NoteReading,
    last_displayed: NoteReading,
    clarity: Option<f32>,
    spectrum_bins: Vec<f32>,
    /// When armed, `last_displayed` is cleared by the first tick at or after it.
    fade_deadline: Option<Instant>,
}

impl TunerSession {
    /// Creates an idle session from a validated configuration.
    pub fn new(config: TunerConfig) -> Result<Self, TunerError> {
        config.validate()?;
        Ok(Self {
            autocorrelator: Autocorrelator::new(&config),
            octave: OctaveCorrector::new(&config.octave_correction),
            smoother: FrequencySmoother::new(config.history_depth, config.smoothing_gate_cents),
            mapper: NoteMapper::new(),
            spectrum: SpectrumAnalyzer::new(config.buffer_size, config.visualizer_bins),
            state: LoopState::Idle,
            sample_rate: 0,
            current: NoteReading::NONE,
            last_displayed: NoteReading::NONE,
            clarity: None,
            spectrum_bins: Vec::new(),
            fade_deadline: None,
            config,
        })
    }

    /// Enters the listening state for a stream at `sample_rate`.
    ///
    /// Calling it while already listening changes nothing.
    pub fn start(&mut self, sample_rate: u32) {
        if self.state == LoopState::Listening {
            return;
        }
        self.reset();
        self.sample_rate = sample_rate;
        self.state = LoopState::Listening;
        log::debug!("Session listening at {} Hz", sample_rate);
    }

    /// Returns to idle and forgets everything observed while listening.
    pub fn stop(&mut self) {
        if self.state == LoopState::Idle {
            return;
        }
        self.reset();
        self.state = LoopState::Idle;
        log::debug!("Session stopped");
    }

    fn reset(&mut self) {
        self.smoother.clear();
        self.spectrum.reset();
        self.current = NoteReading::NONE;
        self.last_displayed = NoteReading::NONE;
        self.clarity = None;
        self.spectrum_bins.clear();
        self.fade_deadline = None;
    }

    /// Analyzes one buffer and updates the readings.
    ///
    /// Ticks while idle are ignored. Buffers that do not match the session's
    /// window size or sample rate count as a tick without pitch.
    ///
    /// # Arguments
    /// * `buffer` - The samples captured for this tick
    /// * `now` - Tick time, used for the fade-out deadline
    ///
    /// # Returns
    /// * `TunerSnapshot` - The display state after this tick
    pub fn tick(&mut self, buffer: &SignalBuffer, now: Instant) -> TunerSnapshot {
        if self.state != LoopState::Listening {
            return self.snapshot();
        }

        let detection = if buffer.len() != self.config.buffer_size
            || buffer.sample_rate() != self.sample_rate
        {
            Err(Rejection::InternalInconsistency)
        } else {
            self.autocorrelator.analyze(buffer)
        };

        if let Err(reason) = detection {
            log::trace!("No pitch this tick: {:?}", reason);
        }
        self.clarity = detection.ok().map(|pitch| pitch.clarity);
        let raw = detection.ok().map(|pitch| self.octave.correct(pitch.frequency));
        let smoothed = self.smoother.smooth(raw);
        let reading = self.mapper.to_note(smoothed);

        self.spectrum_bins = self.spectrum.process(buffer);
        self.apply_reading(reading, now);
        self.snapshot()
    }

    /// Records a tick that produced no usable buffer.
    ///
    /// Used when capture delivered nothing analyzable or analysis failed;
    /// the held reading still fades on schedule.
    pub fn tick_without_signal(&mut self, now: Instant) -> TunerSnapshot {
        if self.state != LoopState::Listening {
            return self.snapshot();
        }
        self.clarity = None;
        self.apply_reading(NoteReading::NONE, now);
        self.snapshot()
    }

    fn apply_reading(&mut self, reading: NoteReading, now: Instant) {
        self.current = reading;
        if reading.is_some() {
            self.last_displayed = reading;
            self.fade_deadline = None;
            return;
        }

        let deadline = *self
            .fade_deadline
            .get_or_insert_with(|| now + self.config.fade_timeout());
        if now >= deadline {
            log::debug!("Signal lost for {:?}, clearing display", self.config.fade_timeout());
            self.last_displayed = NoteReading::NONE;
            self.smoother.clear();
            self.fade_deadline = None;
        }
    }

    pub fn snapshot(&self) -> TunerSnapshot {
        TunerSnapshot {
            state: self.state,
            current: self.current,
            last_displayed: self.last_displayed,
            clarity: self.clarity,
            spectrum: self.spectrum_bins.clone(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn last_displayed(&self) -> NoteReading {
        self.last_displayed
    }

    pub fn history_len(&self) -> usize {
        self.smoother.len()
    }

    /// Time left before the held reading is cleared, if a fade is pending.
    pub fn fade_remaining(&self, now: Instant) -> Option<Duration> {
        self.fade_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::PitchClass;

    const SAMPLE_RATE: u32 = 44100;
    const TICK: Duration = Duration::from_millis(16);

    fn config() -> TunerConfig {
        TunerConfig {
            buffer_size: 8192,
            visualizer_bins: 16,
            ..Default::default()
        }
    }

    fn tone(frequency: f32) -> SignalBuffer {
        let samples: Vec<f32> = (0..8192)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
            .collect();
        SignalBuffer::new(samples, SAMPLE_RATE)
    }

    fn silence() -> SignalBuffer {
        SignalBuffer::new(vec![0.0_f32; 8192], SAMPLE_RATE)
    }

    fn is_a4(reading: NoteReading) -> bool {
        reading.note == Some(PitchClass::A) && reading.octave == Some(4) && reading.cents == 0
    }

    #[test]
    fn test_idle_session_ignores_ticks() {
        let mut session = TunerSession::new(config()).unwrap();
        let snapshot = session.tick(&tone(440.0), Instant::now());
        assert_eq!(snapshot.state, LoopState::Idle);
        assert!(snapshot.current.is_none());
        assert_eq!(session.history_len(), 0);
    }

    #[test]
    fn test_start_records_sample_rate() {
        let mut session = TunerSession::new(config()).unwrap();
        session.start(48000);
        assert_eq!(session.sample_rate(), 48000);

        // A 44.1 kHz buffer no longer matches the stream.
        let snapshot = session.tick(&tone(440.0), Instant::now());
        assert!(snapshot.current.is_none());
    }

    #[test]
    fn test_held_note_survives_short_dropout_then_fades() {
        let mut session = TunerSession::new(config()).unwrap();
        session.start(SAMPLE_RATE);
        let t0 = Instant::now();
        let a4 = tone(440.0);

        for i in 0..5 {
            let snapshot = session.tick(&a4, t0 + TICK * i);
            assert!(is_a4(snapshot.current), "tick {i}: {}", snapshot.current);
        }
        assert_eq!(session.history_len(), 5);

        let quiet = silence();
        for i in 5..8 {
            let snapshot = session.tick(&quiet, t0 + TICK * i);
            assert!(snapshot.current.is_none());
            assert!(is_a4(snapshot.last_displayed), "tick {i}: {}", snapshot.last_displayed);
        }
        // Silent ticks do not touch the history.
        assert_eq!(session.history_len(), 5);

        // The fade was armed by the first silent tick (t0 + 5 ticks).
        let expiry = t0 + TICK * 5 + config().fade_timeout();
        let snapshot = session.tick(&quiet, expiry - Duration::from_millis(1));
        assert!(is_a4(snapshot.last_displayed));

        let snapshot = session.tick(&quiet, expiry);
        assert!(snapshot.last_displayed.is_none());
        assert_eq!(session.history_len(), 0);
    }

    #[test]
    fn test_new_detection_cancels_pending_fade() {
        let mut session = TunerSession::new(config()).unwrap();
        session.start(SAMPLE_RATE);
        let t0 = Instant::now();

        session.tick(&tone(440.0), t0);
        session.tick(&silence(), t0 + TICK);
        assert!(session.fade_remaining(t0 + TICK).is_some());

        session.tick(&tone(440.0), t0 + TICK * 2);
        assert!(session.fade_remaining(t0 + TICK * 2).is_none());

        // A deadline from the first dropout must not clear the display later.
        let late = t0 + TICK + config().fade_timeout();
        let snapshot = session.tick(&silence(), late);
        assert!(is_a4(snapshot.last_displayed));
    }

    #[test]
    fn test_stop_resets_everything() {
        let mut session = TunerSession::new(config()).unwrap();
        session.start(SAMPLE_RATE);
        let t0 = Instant::now();
        session.tick(&tone(440.0), t0);
        session.tick(&silence(), t0 + TICK);

        session.stop();
        assert_eq!(session.state(), LoopState::Idle);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, LoopState::Idle);
        assert!(snapshot.current.is_none());
        assert!(snapshot.last_displayed.is_none());
        assert!(snapshot.spectrum.is_empty());
        assert_eq!(session.history_len(), 0);
        assert!(session.fade_remaining(t0).is_none());
    }

    #[test]
    fn test_restart_is_idempotent() {
        let mut session = TunerSession::new(config()).unwrap();
        session.start(SAMPLE_RATE);
        session.tick(&tone(440.0), Instant::now());
        session.start(SAMPLE_RATE);
        assert_eq!(session.history_len(), 1);
        assert!(is_a4(session.last_displayed()));
    }

    #[test]
    fn test_mismatched_buffer_counts_as_silence() {
        let mut session = TunerSession::new(config()).unwrap();
        session.start(SAMPLE_RATE);
        let short = SignalBuffer::new(vec![0.3_f32; 1024], SAMPLE_RATE);
        let snapshot = session.tick(&short, Instant::now());
        assert_eq!(snapshot.state, LoopState::Listening);
        assert!(snapshot.current.is_none());
        assert!(session.fade_remaining(Instant::now()).is_some());
    }

    #[test]
    fn test_spectrum_published_per_tick() {
        let mut session = TunerSession::new(config()).unwrap();
        session.start(SAMPLE_RATE);
        let snapshot = session.tick(&tone(440.0), Instant::now());
        assert_eq!(snapshot.spectrum.len(), 16);
        assert!(snapshot.clarity.unwrap() > 0.9);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let bad = TunerConfig {
            history_depth: 0,
            ..Default::default()
        };
        assert!(matches!(TunerSession::new(bad), Err(TunerError::InvalidConfig(_))));
    }
}
