// chromatic-cli/src/main.rs

//! Terminal front-end for the chromatic tuner.
//!
//! Listens on the default microphone and prints the held reading whenever it
//! changes, either as a human-readable line or as one JSON snapshot per line.

use anyhow::{Context, Result};
use chromatic_core::audio::CpalInput;
use chromatic_core::tuning::NoteMapper;
use chromatic_core::{DetectionLoop, LoopState, NoteReading, TunerConfig, TunerSnapshot, TuningStatus};
use clap::Parser;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Characters used to draw the spectrum, from quiet to loud.
const BAR_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Parser, Debug)]
#[command(name = "chromatic", version, about = "Real-time chromatic tuner")]
struct Args {
    /// JSON file with tuner settings; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Samples per analysis window (power of two)
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Lowest detectable frequency in Hz
    #[arg(long)]
    min_freq: Option<f32>,

    /// Highest detectable frequency in Hz
    #[arg(long)]
    max_freq: Option<f32>,

    /// Capture rate to request from the device in Hz (default: 44100)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Disable sub-harmonic correction
    #[arg(long)]
    no_octave_correction: bool,

    /// Stop after this many seconds instead of running until interrupted
    #[arg(short, long)]
    seconds: Option<u64>,

    /// Print every snapshot as a JSON line
    #[arg(long)]
    json: bool,

    /// Draw the spectrum next to each reading
    #[arg(long)]
    visualizer: bool,

    /// Print the reference tones of octave 4 and exit
    #[arg(long)]
    list_notes: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_notes {
        for (note, frequency) in NoteMapper::new().reference_tones() {
            println!("{:<3}{:>9.2} Hz", format!("{}4", note), frequency);
        }
        return Ok(());
    }

    let config = build_config(&args)?;
    config.validate()?;
    log::debug!("Tuner configuration: {:?}", config);

    let mut tuner = match args.sample_rate {
        Some(rate) => DetectionLoop::new(config, CpalInput::new(rate)),
        None => DetectionLoop::with_default_input(config),
    };
    let in_tune_cents = tuner.config().in_tune_cents;
    let updates = tuner.updates();

    if let Err(e) = tuner.start() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    log::info!("Listening, press Ctrl+C to quit");

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut shown = NoteReading::NONE;

    loop {
        let timeout = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => break,
            },
            None => Duration::from_secs(1),
        };

        let snapshot = match updates.recv_timeout(timeout) {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_timeout() => continue,
            Err(_) => break,
        };

        if args.json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else if snapshot.last_displayed != shown {
            shown = snapshot.last_displayed;
            println!("{}", render_line(&snapshot, in_tune_cents, args.visualizer));
        }

        if input_lost(&snapshot) {
            eprintln!("Audio input was lost, stopping");
            break;
        }
    }

    tuner.stop();
    Ok(())
}

/// Merges the optional config file with command-line overrides.
fn build_config(args: &Args) -> Result<TunerConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TunerConfig::default(),
    };

    if let Some(buffer_size) = args.buffer_size {
        config.buffer_size = buffer_size;
    }
    if let Some(min) = args.min_freq {
        config.min_frequency = min;
    }
    if let Some(max) = args.max_freq {
        config.max_frequency = max;
    }
    if args.no_octave_correction {
        config.octave_correction.enabled = false;
    }
    Ok(config)
}

/// Loads tuner settings from a JSON file.
///
/// # Arguments
/// * `path` - File to read (e.g., "tuner.json")
///
/// # Returns
/// * `Ok(TunerConfig)` - Settings from the file, defaults for absent fields
/// * `Err` - File I/O error or malformed JSON
fn load_config(path: &Path) -> Result<TunerConfig> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut data = String::new();
    file.read_to_string(&mut data)?;
    let config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

/// The capture thread publishes an idle snapshot when it ends on its own.
fn input_lost(snapshot: &TunerSnapshot) -> bool {
    snapshot.state == LoopState::Idle
}

fn render_line(snapshot: &TunerSnapshot, in_tune_cents: i32, visualizer: bool) -> String {
    let reading = snapshot.last_displayed;
    let status = match reading.status(in_tune_cents) {
        Some(TuningStatus::InTune) => "in tune",
        Some(TuningStatus::Flat) => "flat",
        Some(TuningStatus::Sharp) => "sharp",
        None => "",
    };

    let mut line = format!("{:<28} {:<7}", reading.to_string(), status);
    if visualizer {
        line.push(' ');
        line.extend(snapshot.spectrum.iter().map(|&level| spectrum_bar(level)));
    }
    line
}

fn spectrum_bar(level: f32) -> char {
    let index = (level.clamp(0.0, 1.0) * (BAR_LEVELS.len() - 1) as f32).round() as usize;
    BAR_LEVELS[index]
}
