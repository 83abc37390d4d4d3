//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::dsp::impulse::{synthesize, synthesize_with_rng};
use crate::dsp::pan::pan_at;
use crate::engine::buffer::{linear_to_db, SampleBuffer};
use crate::engine::device::ManualDevice;
use crate::engine::pcm;
use crate::engine::transport::{PlaybackController, PlaybackState};
use crate::engine::wav::{self, sha256_hex, Download};
use crate::error::{ReverieError, Result};

/// Load speech audio by file extension
///
/// Raw and base64 PCM use the sample rate and channel count from `config`.
/// `force_base64` reads any file as a base64 payload.
pub fn load_input(path: &Path, force_base64: bool, config: &EngineConfig) -> Result<SampleBuffer> {
    let extension = if force_base64 {
        "b64".to_string()
    } else {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default()
    };

    match extension.as_str() {
        "wav" => wav::read_wav(path),
        "b64" | "txt" => {
            let text = fs::read_to_string(path)?;
            Ok(pcm::decode_base64(&text, config.sample_rate, config.channels)?)
        }
        "pcm" | "raw" => {
            let bytes = fs::read(path)?;
            let report = pcm::decode_report(&bytes, config.sample_rate, config.channels)?;
            if let Some(warning) = report.warning {
                warn!("{}: {}", path.display(), warning);
            }
            Ok(report.buffer)
        }
        other => Err(ReverieError::UnsupportedFormat {
            format: format!("'.{}' input (expected wav, b64, txt, pcm or raw)", other),
        }),
    }
}

/// Download name with a local timestamp before the extension
///
/// `Meditation.wav` becomes `Meditation-2026-01-31_2130.wav`.
pub fn stamped_filename(name: &str) -> String {
    let stamp = Local::now().format("%Y-%m-%d_%H%M");
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Meditation");
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}-{}.{}", stem, stamp, ext),
        None => format!("{}-{}.wav", stem, stamp),
    }
}

/// Switches for [`render`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderArgs {
    pub base64: bool,
    pub dry: bool,
    pub seed: Option<u64>,
}

fn controller_for(
    config: &EngineConfig,
    sample_rate: u32,
    seed: Option<u64>,
) -> Result<(PlaybackController, ManualDevice)> {
    let device = ManualDevice::new(sample_rate);
    let controller = PlaybackController::new(config.clone(), Box::new(device.clone()))?;
    let controller = match seed {
        Some(seed) => controller.with_impulse_seed(seed),
        None => controller,
    };
    Ok((controller, device))
}

/// Decode a base64 payload straight to WAV.
pub fn decode(input: &Path, output: &Path, config: &EngineConfig) -> Result<()> {
    info!("Decoding: {}", input.display());

    let text = fs::read_to_string(input)?;
    let buffer = pcm::decode_base64(&text, config.sample_rate, config.channels)?;
    wav::write_wav(output, &buffer)?;

    println!("Decoded: {}", output.display());
    println!(
        "  {} frames, {:.2}s at {} Hz",
        buffer.frame_count(),
        buffer.duration_secs(),
        buffer.sample_rate()
    );

    Ok(())
}

/// Render the reverb offline and write the download file.
pub fn render(
    input: &Path,
    output: Option<&Path>,
    options: RenderArgs,
    config: &EngineConfig,
) -> Result<()> {
    info!("Rendering: {}", input.display());

    let buffer = load_input(input, options.base64, config)?;
    let download = if options.dry {
        Download::wav(config.download_filename.clone(), wav::encode(&buffer))
    } else {
        let (mut controller, _device) =
            controller_for(config, buffer.sample_rate(), options.seed)?;
        controller.load(buffer)?;
        controller.stop()?;
        controller.download()?
    };

    let output_path = match output {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(stamped_filename(&download.filename)),
    };
    fs::write(&output_path, &download.bytes)?;

    println!("=== Reverie Render ===");
    println!("Input: {}", input.display());
    println!("Effects: {}", if options.dry { "off" } else { "reverb" });
    println!("Output: {}", output_path.display());
    println!("Size: {} bytes ({})", download.bytes.len(), download.content_type);
    println!("SHA-256: {}", download.sha256_hex());

    Ok(())
}

/// Run the live chain against a manual clock and save what it played.
pub fn simulate(
    input: &Path,
    output: &Path,
    rate: f32,
    binaural: bool,
    loop_secs: Option<f64>,
    seed: Option<u64>,
    config: &EngineConfig,
) -> Result<()> {
    info!("Simulating playback: {}", input.display());

    let buffer = load_input(input, false, config)?;
    let sample_rate = buffer.sample_rate();
    // Generous bound for a non-looping run at any rate
    let limit = loop_secs.unwrap_or(buffer.duration_secs() / rate.max(0.1) as f64 + 10.0);

    let (mut controller, device) = controller_for(config, sample_rate, seed)?;
    controller.set_loop(loop_secs.is_some());
    controller.set_binaural(binaural);
    controller.load(buffer)?;
    if rate != 1.0 {
        controller.set_rate(rate)?;
    }

    let step = config.pan.poll_interval_ms as f64 / 1000.0;
    let mut elapsed = 0.0;
    while elapsed < limit {
        device.advance(step);
        elapsed += step;
        if controller.tick() == PlaybackState::Ready {
            break;
        }
    }
    if controller.state() != PlaybackState::Ready {
        controller.stop()?;
    }

    let [left, right] = device.captured();
    let rendered = SampleBuffer::from_channels(vec![left, right], sample_rate)?;
    wav::write_wav(output, &rendered)?;

    println!("=== Reverie Simulation ===");
    println!("Input: {}", input.display());
    println!("Output: {}", output.display());
    println!("Rate: {}x | Binaural: {}", rate, if binaural { "on" } else { "off" });
    println!(
        "Played {:.2}s over {} polls",
        rendered.duration_secs(),
        controller.tick_count()
    );

    Ok(())
}

/// Write a synthesized impulse response.
pub fn impulse(output: &Path, seed: Option<u64>, config: &EngineConfig) -> Result<()> {
    let effects = &config.effects;
    let ir = match seed {
        Some(seed) => synthesize_with_rng(
            &mut StdRng::seed_from_u64(seed),
            config.sample_rate,
            effects.impulse_duration_secs,
            effects.impulse_decay,
        )?,
        None => synthesize(
            config.sample_rate,
            effects.impulse_duration_secs,
            effects.impulse_decay,
        )?,
    };
    wav::write_wav(output, ir.as_buffer())?;

    println!("Impulse written: {}", output.display());
    println!(
        "  {} frames ({:.2}s) at {} Hz, decay {}",
        ir.len(),
        effects.impulse_duration_secs,
        ir.sample_rate(),
        effects.impulse_decay
    );

    Ok(())
}

/// Print the pan schedule.
pub fn pan_trace(seconds: Option<f64>, step: f64, config: &EngineConfig) -> Result<()> {
    let params = config.pan.params();
    params.validate()?;
    if !step.is_finite() || step <= 0.0 {
        return Err(ReverieError::InvalidConfig {
            reason: format!("step must be positive, got {}", step),
        });
    }
    let duration = seconds.unwrap_or_else(|| params.cycle_secs());

    println!("{:>8}  {:>6}  L{:^21}R", "time", "pan", "");
    println!("{:-<48}", "");

    let mut t = 0.0;
    while t <= duration + 1e-9 {
        let pan = pan_at(t, &params);
        let column = ((pan + 1.0) * 10.0).round() as usize;
        let mut track = vec![' '; 21];
        track[10] = '|';
        track[column.min(20)] = '*';
        println!(
            "{:>7.1}s  {:>+6.2}  [{}]",
            t,
            pan,
            track.into_iter().collect::<String>()
        );
        t += step;
    }

    Ok(())
}

/// Show details of a WAV file.
pub fn info(path: &Path) -> Result<()> {
    let bytes = fs::read(path)?;
    let buffer = wav::read_wav(path)?;

    println!("File: {}", path.display());
    println!("{:-<60}", "");
    println!("Channels: {}", buffer.channel_count());
    println!("Sample rate: {} Hz", buffer.sample_rate());
    println!("Frames: {}", buffer.frame_count());
    println!("Duration: {:.3}s", buffer.duration_secs());
    println!("Peak: {:.1} dBFS", linear_to_db(buffer.peak()));
    println!(
        "RMS: {:.1} dBFS",
        linear_to_db(buffer.rms_range(0..buffer.frame_count()))
    );
    println!("SHA-256: {}", sha256_hex(&bytes));

    Ok(())
}

/// Print or save the effective configuration.
pub fn write_config(output: Option<&Path>, config: &EngineConfig) -> Result<()> {
    match output {
        Some(path) => {
            config.save(path)?;
            println!("Config written: {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Play through the default output until the end (or forever when looping).
#[cfg(feature = "device")]
pub fn play(
    input: &Path,
    looping: bool,
    rate: f32,
    binaural: bool,
    config: &EngineConfig,
) -> Result<()> {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::engine::device::CpalDevice;
    use crate::engine::poll::PanPoller;

    let buffer = load_input(input, false, config)?;
    let device = CpalDevice::new(buffer.sample_rate());
    let mut controller = PlaybackController::new(config.clone(), Box::new(device))?;
    controller.set_loop(looping);
    controller.set_binaural(binaural);
    controller.load(buffer)?;
    if rate != 1.0 {
        controller.set_rate(rate)?;
    }

    println!("Playing: {}", input.display());
    if looping {
        println!("Looping; press Ctrl-C to stop");
    }

    let controller = Arc::new(Mutex::new(controller));
    let interval = Duration::from_millis(config.pan.poll_interval_ms);
    let poller = PanPoller::spawn(Arc::clone(&controller), interval)?;

    while !poller.is_finished() {
        thread::sleep(Duration::from_millis(200));
    }
    let ticks = poller.join();
    println!("Finished after {} polls", ticks);

    Ok(())
}
