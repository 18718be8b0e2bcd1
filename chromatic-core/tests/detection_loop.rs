//! Integration tests for the threaded detection loop, driven by scripted
//! inputs instead of a microphone.

use chromatic_core::audio::{AudioInput, CaptureStream};
use chromatic_core::{DetectionLoop, LoopState, PitchClass, TunerConfig, TunerError, TunerSnapshot};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SAMPLE_RATE: u32 = 44100;

fn test_config() -> TunerConfig {
    TunerConfig {
        buffer_size: 8192,
        tick_interval_ms: 10,
        visualizer_bins: 32,
        ..Default::default()
    }
}

/// Sets its flag when the capture stream is released.
struct ReleaseGuard {
    released: Arc<AtomicBool>,
    // Keeps the block channel open for as long as the stream lives.
    _sink: Sender<Vec<f32>>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Delivers two windows of a sine tone as soon as it is opened.
struct ToneInput {
    frequency: f32,
    released: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl ToneInput {
    fn new(frequency: f32) -> Self {
        Self {
            frequency,
            released: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AudioInput for ToneInput {
    fn open(&self, sink: Sender<Vec<f32>>) -> Result<CaptureStream, TunerError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.released.store(false, Ordering::SeqCst);
        for block in sine_block(self.frequency, 16384).chunks(512) {
            let _ = sink.send(block.to_vec());
        }
        Ok(CaptureStream::new(
            SAMPLE_RATE,
            ReleaseGuard {
                released: Arc::clone(&self.released),
                _sink: sink,
            },
        ))
    }
}

fn sine_block(frequency: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.4 * (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

/// Plays a tone, then goes quiet once the test says so.
struct ToneThenSilence {
    frequency: f32,
    silence: Receiver<()>,
    released: Arc<AtomicBool>,
}

impl AudioInput for ToneThenSilence {
    fn open(&self, sink: Sender<Vec<f32>>) -> Result<CaptureStream, TunerError> {
        let feeder_sink = sink.clone();
        let silence = self.silence.clone();
        let tone = sine_block(self.frequency, 16384);
        thread::spawn(move || {
            for block in tone.chunks(512) {
                let _ = feeder_sink.send(block.to_vec());
            }
            if silence.recv().is_ok() {
                for _ in 0..32 {
                    let _ = feeder_sink.send(vec![0.0; 512]);
                }
            }
        });
        Ok(CaptureStream::new(
            SAMPLE_RATE,
            ReleaseGuard {
                released: Arc::clone(&self.released),
                _sink: sink,
            },
        ))
    }
}

/// Behaves like a microphone whose permission was denied.
struct DeniedInput;

impl AudioInput for DeniedInput {
    fn open(&self, _sink: Sender<Vec<f32>>) -> Result<CaptureStream, TunerError> {
        Err(TunerError::DeviceUnavailable("permission denied".to_string()))
    }
}

/// Blocks in `open` until released by the test.
struct SlowInput {
    opening: Sender<()>,
    go: Receiver<()>,
    released: Arc<AtomicBool>,
}

impl AudioInput for SlowInput {
    fn open(&self, sink: Sender<Vec<f32>>) -> Result<CaptureStream, TunerError> {
        let _ = self.opening.send(());
        let _ = self.go.recv();
        Ok(CaptureStream::new(
            SAMPLE_RATE,
            ReleaseGuard {
                released: Arc::clone(&self.released),
                _sink: sink,
            },
        ))
    }
}

fn wait_for(
    updates: &Receiver<TunerSnapshot>,
    timeout: Duration,
    predicate: impl Fn(&TunerSnapshot) -> bool,
) -> Option<TunerSnapshot> {
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match updates.recv_timeout(remaining) {
            Ok(snapshot) if predicate(&snapshot) => return Some(snapshot),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn test_detects_tone_and_releases_on_stop() {
    let input = ToneInput::new(440.0);
    let released = Arc::clone(&input.released);
    let mut tuner = DetectionLoop::new(test_config(), input);
    let updates = tuner.updates();

    assert_eq!(tuner.state(), LoopState::Idle);
    tuner.start().expect("scripted input opens");
    assert_eq!(tuner.state(), LoopState::Listening);

    let snapshot = wait_for(&updates, Duration::from_secs(10), |s| s.last_displayed.is_some())
        .expect("a reading within the timeout");
    assert_eq!(snapshot.last_displayed.note, Some(PitchClass::A));
    assert_eq!(snapshot.last_displayed.octave, Some(4));
    assert_eq!(snapshot.last_displayed.cents, 0);
    assert_eq!(snapshot.spectrum.len(), 32);
    assert!(!released.load(Ordering::SeqCst));

    tuner.stop();
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(tuner.state(), LoopState::Idle);
    let idle = tuner.snapshot();
    assert!(idle.current.is_none());
    assert!(idle.last_displayed.is_none());
}

#[test]
fn test_start_twice_keeps_one_stream() {
    let input = ToneInput::new(220.0);
    let opens = Arc::clone(&input.opens);
    let mut tuner = DetectionLoop::new(test_config(), input);

    tuner.start().unwrap();
    tuner.start().unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(tuner.state(), LoopState::Listening);

    tuner.stop();
    tuner.stop();
    assert_eq!(tuner.state(), LoopState::Idle);

    // A fresh start after stop opens the input again.
    tuner.start().unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

#[test]
fn test_denied_device_stays_idle() {
    let mut tuner = DetectionLoop::new(test_config(), DeniedInput);

    let err = tuner.start().unwrap_err();
    assert!(matches!(err, TunerError::DeviceUnavailable(_)));
    assert_eq!(tuner.state(), LoopState::Idle);
    assert_eq!(tuner.last_error(), Some(&err));

    // Retrying is allowed and fails the same way.
    assert!(matches!(tuner.start(), Err(TunerError::DeviceUnavailable(_))));
}

#[test]
fn test_invalid_config_is_reported() {
    let config = TunerConfig {
        buffer_size: 1000,
        ..test_config()
    };
    let mut tuner = DetectionLoop::new(config, ToneInput::new(440.0));
    assert!(matches!(tuner.start(), Err(TunerError::InvalidConfig(_))));
    assert_eq!(tuner.state(), LoopState::Idle);
}

#[test]
fn test_stop_handle_cancels_pending_open() {
    let (opening_tx, opening_rx) = crossbeam_channel::bounded(1);
    let (go_tx, go_rx) = crossbeam_channel::bounded(1);
    let released = Arc::new(AtomicBool::new(false));
    let mut tuner = DetectionLoop::new(
        test_config(),
        SlowInput {
            opening: opening_tx,
            go: go_rx,
            released: Arc::clone(&released),
        },
    );

    let stop = tuner.stop_handle();
    let helper = thread::spawn(move || {
        // Stop only once the device open is underway.
        let _ = opening_rx.recv();
        stop.stop();
        let _ = go_tx.send(());
    });

    assert_eq!(tuner.start(), Err(TunerError::Cancelled));
    helper.join().unwrap();
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(tuner.state(), LoopState::Idle);
}

#[test]
fn test_stop_handle_ends_running_loop() {
    let input = ToneInput::new(440.0);
    let released = Arc::clone(&input.released);
    let mut tuner = DetectionLoop::new(test_config(), input);
    let updates = tuner.updates();
    tuner.start().unwrap();

    tuner.stop_handle().stop();
    let idle = wait_for(&updates, Duration::from_secs(10), |s| s.state == LoopState::Idle);
    assert!(idle.is_some());
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(tuner.state(), LoopState::Idle);

    // The loop can be started again after stopping itself.
    tuner.start().unwrap();
    assert_eq!(tuner.state(), LoopState::Listening);
}

#[test]
fn test_drop_releases_stream() {
    let input = ToneInput::new(440.0);
    let released = Arc::clone(&input.released);
    {
        let mut tuner = DetectionLoop::new(test_config(), input);
        tuner.start().unwrap();
    }
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn test_held_note_fades_after_signal_stops() {
    let (silence_tx, silence_rx) = crossbeam_channel::bounded(1);
    let config = TunerConfig {
        fade_timeout_ms: 500,
        ..test_config()
    };
    let mut tuner = DetectionLoop::new(
        config,
        ToneThenSilence {
            frequency: 440.0,
            silence: silence_rx,
            released: Arc::new(AtomicBool::new(false)),
        },
    );
    let updates = tuner.updates();
    tuner.start().unwrap();

    let is_a4 = |s: &TunerSnapshot| {
        s.last_displayed.note == Some(PitchClass::A) && s.last_displayed.octave == Some(4)
    };
    wait_for(&updates, Duration::from_secs(10), |s| is_a4(s) && s.current.is_some())
        .expect("tone detected");

    silence_tx.send(()).unwrap();
    let held = wait_for(&updates, Duration::from_secs(10), |s| s.current.is_none())
        .expect("signal loss observed");
    assert!(is_a4(&held), "display should hold A4, got {}", held.last_displayed);
    let silent_since = Instant::now();

    let faded = wait_for(&updates, Duration::from_secs(10), |s| s.last_displayed.is_none())
        .expect("display cleared after the fade timeout");
    assert!(silent_since.elapsed() >= Duration::from_millis(250));
    assert_eq!(faded.state, LoopState::Listening);
    assert!(faded.current.is_none());
}

#[test]
fn test_restart_discards_queued_snapshots() {
    let mut tuner = DetectionLoop::new(test_config(), ToneInput::new(440.0));
    let updates = tuner.updates();
    tuner.start().unwrap();

    // Leave the updates unread until a reading has been queued.
    let deadline = Instant::now() + Duration::from_secs(10);
    while tuner.snapshot().last_displayed.is_none() {
        assert!(Instant::now() < deadline, "no reading within the timeout");
        thread::sleep(Duration::from_millis(5));
    }
    tuner.stop();
    assert!(!updates.is_empty());

    tuner.start().unwrap();
    let first = updates
        .recv_timeout(Duration::from_secs(10))
        .expect("snapshot from the new session");
    assert_eq!(first.state, LoopState::Listening);
    assert!(first.last_displayed.is_none());
    assert!(first.spectrum.is_empty());
}
