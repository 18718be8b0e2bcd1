//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! It defines the [`AudioInput`] seam the detection loop opens its microphone
//! through, and the default CPAL-backed implementation.
//!
//! ## Features
//! - Automatic default input device selection
//! - Closest supported sample rate to the 44.1 kHz target
//! - Multi-channel input downmixed to mono
//! - Stream released when the [`CaptureStream`] guard is dropped

use anyhow::{Context, Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use std::any::Any;

use crate::error::TunerError;

/// Preferred capture rate in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 44100;

/// An open capture stream.
///
/// Holds whatever keeps the underlying device running; dropping it releases
/// the device. It is created and dropped on the capture thread, so the guard
/// does not need to be `Send`.
pub struct CaptureStream {
    sample_rate: u32,
    _guard: Box<dyn Any>,
}

impl CaptureStream {
    pub fn new<G: Any>(sample_rate: u32, guard: G) -> Self {
        Self {
            sample_rate,
            _guard: Box::new(guard),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl std::fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

/// A source of mono f32 sample blocks.
pub trait AudioInput: Send + Sync + 'static {
    /// Opens the input and starts delivering sample blocks to `sink`.
    ///
    /// May block while the device opens. The stream ends when the returned
    /// guard is dropped; an input that drops `sink` earlier signals that the
    /// device went away.
    ///
    /// # Returns
    /// * `Ok(CaptureStream)` - Guard for the running stream and its sample rate
    /// * `Err(TunerError::DeviceUnavailable)` - No device, permission denied
    ///   or no usable format
    fn open(&self, sink: Sender<Vec<f32>>) -> Result<CaptureStream, TunerError>;
}

/// Captures from the host's default input device.
#[derive(Debug, Clone)]
pub struct CpalInput {
    target_sample_rate: u32,
}

impl Default for CpalInput {
    fn default() -> Self {
        Self {
            target_sample_rate: TARGET_SAMPLE_RATE,
        }
    }
}

impl CpalInput {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    /// Starts audio capture from the default input device.
    ///
    /// This function:
    /// 1. Selects the default audio input device
    /// 2. Picks the f32 configuration closest to the target sample rate
    /// 3. Sets up a callback that downmixes each block to mono and sends it on
    ///
    /// Blocks are sent with `try_send`; a full channel drops the block.
    fn start_capture(&self, sink: Sender<Vec<f32>>) -> Result<CaptureStream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        log::info!("Using audio input device: {}", device.name()?);

        let configs = device
            .supported_input_configs()
            .context("Failed to query input configurations")?
            .collect::<Vec<_>>();
        let supported_config = find_supported_config(configs, self.target_sample_rate)
            .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

        let rate = self.target_sample_rate.clamp(
            supported_config.min_sample_rate().0,
            supported_config.max_sample_rate().0,
        );
        let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
        let channels = config.channels().max(1) as usize;
        let config: cpal::StreamConfig = config.into();

        log::info!("Selected sample rate: {} Hz, {} channel(s)", rate, channels);

        let err_fn = |err| log::error!("An error occurred on the audio stream: {}", err);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let block = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks_exact(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    };
                    // Send the block, ignoring errors if the channel is full.
                    let _ = sink.try_send(block);
                },
                err_fn,
                None,
            )
            .context("Failed to build input stream")?;

        stream.play().context("Failed to start input stream")?;

        Ok(CaptureStream::new(rate, CpalStreamGuard(stream)))
    }
}

impl AudioInput for CpalInput {
    fn open(&self, sink: Sender<Vec<f32>>) -> Result<CaptureStream, TunerError> {
        self.start_capture(sink)
            .map_err(|e| TunerError::DeviceUnavailable(format!("{:#}", e)))
    }
}

/// Pauses the stream before CPAL tears it down.
struct CpalStreamGuard(cpal::Stream);

impl Drop for CpalStreamGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.pause() {
            log::warn!("Error pausing stream: {}", e);
        }
        log::debug!("Input stream released");
    }
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Only 32-bit float formats qualify. Among those, a range containing the
/// target rate wins, then the range whose edge is closest to it; mono is
/// preferred on ties.
///
/// # Arguments
/// * `configs` - List of supported audio configurations from the device
/// * `target_rate` - Desired sample rate in Hz
///
/// # Returns
/// * `Some(config)` - Best matching configuration
/// * `None` - No suitable configuration found
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (distance, c.channels() != 1)
        })
}
