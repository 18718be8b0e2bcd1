//! # Detection Loop Module
//!
//! Runs a [`TunerSession`] against a live input on a dedicated capture thread.
//!
//! ## Architecture
//! - **Caller thread**: `start` / `stop`, reads snapshots
//! - **Capture thread**: opens the input, owns the session and the stream,
//!   ticks at a fixed interval until told to stop
//! - **Communication**: crossbeam channels for sample blocks, shutdown and
//!   snapshot updates
//!
//! One thread owns the session, so a tick always completes before the next
//! begins. The stream guard lives on the capture thread and is dropped on
//! every way out of it.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::audio::{AudioInput, CpalInput};
use crate::buffer::SampleWindow;
use crate::config::TunerConfig;
use crate::error::TunerError;
use crate::session::TunerSession;
use crate::{LoopState, TunerSnapshot};

/// Snapshots kept for slow readers of [`DetectionLoop::updates`].
const UPDATE_QUEUE_DEPTH: usize = 64;

/// State shared between the loop handle and its capture thread.
#[derive(Debug, Default)]
struct Shared {
    latest: Mutex<TunerSnapshot>,
    stop_requested: AtomicBool,
}

impl Shared {
    fn latest(&self) -> MutexGuard<'_, TunerSnapshot> {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Capture thread management structure.
#[derive(Debug)]
struct Worker {
    shutdown_tx: Sender<()>,
    thread_handle: JoinHandle<()>,
}

/// Requests a stop from any thread, including while `start` is still
/// waiting for the device to open.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }
}

/// Listening loop driving pitch detection from an [`AudioInput`].
pub struct DetectionLoop {
    config: TunerConfig,
    input: Arc<dyn AudioInput>,
    worker: Option<Worker>,
    shared: Arc<Shared>,
    updates_tx: Sender<TunerSnapshot>,
    updates_rx: Receiver<TunerSnapshot>,
    last_error: Option<TunerError>,
}

impl std::fmt::Debug for DetectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionLoop")
            .field("config", &self.config)
            .field("worker", &self.worker)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl DetectionLoop {
    pub fn new(config: TunerConfig, input: impl AudioInput) -> Self {
        let (updates_tx, updates_rx) = crossbeam_channel::bounded(UPDATE_QUEUE_DEPTH);
        Self {
            config,
            input: Arc::new(input),
            worker: None,
            shared: Arc::new(Shared::default()),
            updates_tx,
            updates_rx,
            last_error: None,
        }
    }

    /// A loop that captures from the default microphone.
    pub fn with_default_input(config: TunerConfig) -> Self {
        Self::new(config, CpalInput::default())
    }

    /// Opens the input and starts ticking.
    ///
    /// This function:
    /// 1. Returns immediately if the loop is already listening
    /// 2. Spawns the capture thread, which opens the input
    /// 3. Waits until the input is open (or failed to open)
    ///
    /// # Returns
    /// * `Ok(())` - The loop is listening
    /// * `Err(TunerError::DeviceUnavailable)` - The input could not be opened;
    ///   the loop stays idle and `start` may be retried
    /// * `Err(TunerError::InvalidConfig)` - The configuration was rejected
    /// * `Err(TunerError::Cancelled)` - A [`StopHandle`] fired while opening
    pub fn start(&mut self) -> Result<(), TunerError> {
        if let Some(worker) = &self.worker {
            let ended = worker.thread_handle.is_finished()
                || self.shared.stop_requested.load(Ordering::SeqCst);
            if !ended {
                log::debug!("Start requested while already listening");
                return Ok(());
            }
            // The capture thread ended, or is ending, on its own (input
            // closed or stop handle).
            self.join_worker();
        }

        let result = self.spawn_worker();
        self.last_error = result.as_ref().err().cloned();
        result
    }

    fn spawn_worker(&mut self) -> Result<(), TunerError> {
        let session = TunerSession::new(self.config.clone())?;
        self.shared.stop_requested.store(false, Ordering::SeqCst);

        // Snapshots still queued from an earlier session would describe readings
        // that no longer exist.
        let stale = self.updates_rx.try_iter().count();
        if stale > 0 {
            log::debug!("Discarded {} queued snapshots from the previous session", stale);
        }

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let worker = CaptureWorker {
            input: Arc::clone(&self.input),
            session,
            shared: Arc::clone(&self.shared),
            shutdown_rx,
            ready_tx,
            updates_tx: self.updates_tx.clone(),
        };

        let thread_handle = thread::Builder::new()
            .name("chromatic-capture".to_string())
            .spawn(move || worker.run())
            .map_err(|e| TunerError::DeviceUnavailable(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    shutdown_tx,
                    thread_handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(TunerError::DeviceUnavailable(
                    "capture thread exited before the input opened".to_string(),
                ))
            }
        }
    }

    /// Stops capture, releases the input and clears all readings.
    ///
    /// Does nothing while idle.
    pub fn stop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if let Some(worker) = &self.worker {
            let _ = worker.shutdown_tx.try_send(());
        }
        self.join_worker();
        log::info!("Detection loop stopped");
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.thread_handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
        *self.shared.latest() = TunerSnapshot::default();
    }

    pub fn state(&self) -> LoopState {
        match &self.worker {
            Some(_) => self.shared.latest().state,
            None => LoopState::Idle,
        }
    }

    /// The most recent display state.
    pub fn snapshot(&self) -> TunerSnapshot {
        self.shared.latest().clone()
    }

    /// Receiver of per-tick snapshots. Snapshots are dropped while it is full.
    pub fn updates(&self) -> Receiver<TunerSnapshot> {
        self.updates_rx.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The error from the last failed `start`, cleared by a successful one.
    pub fn last_error(&self) -> Option<&TunerError> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the capture thread owns.
struct CaptureWorker {
    input: Arc<dyn AudioInput>,
    session: TunerSession,
    shared: Arc<Shared>,
    shutdown_rx: Receiver<()>,
    ready_tx: Sender<Result<(), TunerError>>,
    updates_tx: Sender<TunerSnapshot>,
}

impl CaptureWorker {
    fn run(mut self) {
        log::debug!("Capture thread starting, opening input");
        let (raw_audio_tx, raw_audio_rx) = crossbeam_channel::unbounded::<Vec<f32>>();

        let stream = match self.input.open(raw_audio_tx) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("Could not open audio input: {}", e);
                let _ = self.ready_tx.send(Err(e));
                return;
            }
        };

        if self.stop_requested() || self.shutdown_rx.try_recv().is_ok() {
            log::debug!("Stop requested while opening input, releasing it");
            drop(stream);
            let _ = self.ready_tx.send(Err(TunerError::Cancelled));
            return;
        }

        let sample_rate = stream.sample_rate();
        let config = self.session.config().clone();
        self.session.start(sample_rate);
        let mut window = SampleWindow::new(config.buffer_size);
        self.publish(self.session.snapshot());
        let _ = self.ready_tx.send(Ok(()));
        log::info!(
            "Listening at {} Hz, {} sample window, tick every {:?}",
            self.session.sample_rate(),
            config.buffer_size,
            config.tick_interval()
        );

        let ticker = crossbeam_channel::tick(config.tick_interval());
        loop {
            crossbeam_channel::select! {
                recv(self.shutdown_rx) -> _ => {
                    log::debug!("Capture thread received shutdown signal");
                    break;
                },
                recv(ticker) -> msg => {
                    let Ok(now) = msg else { break };
                    if self.stop_requested() {
                        log::debug!("Capture thread observed stop request");
                        break;
                    }

                    let mut input_closed = false;
                    loop {
                        match raw_audio_rx.try_recv() {
                            Ok(block) => window.push(&block),
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => {
                                input_closed = true;
                                break;
                            }
                        }
                    }
                    if input_closed {
                        log::warn!("Audio input closed, stopping");
                        break;
                    }

                    let buffer = window.snapshot(sample_rate);
                    let session = &mut self.session;
                    let snapshot = match panic::catch_unwind(AssertUnwindSafe(|| session.tick(&buffer, now))) {
                        Ok(snapshot) => snapshot,
                        Err(_) => {
                            log::error!("Analysis panicked, treating tick as silent");
                            session.tick_without_signal(now)
                        }
                    };
                    self.publish(snapshot);
                },
            }
        }

        self.session.stop();
        drop(stream);
        self.publish(self.session.snapshot());
        log::debug!("Capture thread finished");
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }

    fn publish(&self, snapshot: TunerSnapshot) {
        *self.shared.latest() = snapshot.clone();
        let _ = self.updates_tx.try_send(snapshot);
    }
}
