//! CLI Module
//!
//! Command-line interface for the Reverie speech pipeline.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Reverie - reverb, 8D panning and WAV export for synthesized speech
#[derive(Parser, Debug)]
#[command(name = "reverie")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON config file (defaults are used for missing fields)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a base64 PCM payload to a WAV file without effects
    #[command(name = "decode")]
    Decode {
        /// Text file holding the base64 payload
        input: PathBuf,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Apply reverb offline and export a WAV (the download path)
    #[command(name = "render")]
    Render {
        /// Input audio (.wav, .b64/.txt base64 PCM, or .pcm/.raw bytes)
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV path (defaults to a date-stamped download name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat the input as base64 PCM whatever its extension
        #[arg(long)]
        base64: bool,

        #[command(flatten)]
        pcm: PcmArgs,

        /// Export the decoded input without effects
        #[arg(long)]
        dry: bool,

        /// Seed for the reverb impulse
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Render the live chain (panning, rate, binaural bed) to a WAV
    #[command(name = "simulate")]
    Simulate {
        /// Input audio
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// Playback rate (pitch preserved)
        #[arg(long, default_value_t = 1.0)]
        rate: f32,

        /// Mix in the binaural bed
        #[arg(long)]
        binaural: bool,

        /// Loop for this many seconds instead of stopping at the end
        #[arg(long)]
        loop_secs: Option<f64>,

        /// Seed for the reverb impulse
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Synthesize a reverb impulse response and write it as WAV
    #[command(name = "impulse")]
    Impulse {
        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// Sample rate in Hz (overrides the config)
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Length in seconds
        #[arg(long)]
        duration: Option<f32>,

        /// Envelope exponent
        #[arg(long)]
        decay: Option<f32>,

        /// Seed for the noise generator
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the pan schedule over time
    #[command(name = "pan-trace")]
    PanTrace {
        /// Seconds to trace (defaults to one full cycle)
        #[arg(long)]
        seconds: Option<f64>,

        /// Seconds between rows
        #[arg(long, default_value_t = 2.5)]
        step: f64,

        /// Seconds each waypoint is held
        #[arg(long)]
        hold: Option<f64>,

        /// Seconds spent moving between waypoints
        #[arg(long)]
        transition: Option<f64>,
    },

    /// Show details of a WAV file
    #[command(name = "info")]
    Info {
        /// WAV file to inspect
        path: PathBuf,
    },

    /// Write the effective configuration as JSON
    #[command(name = "config")]
    Config {
        /// Output path (prints to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Play through the default output device
    #[cfg(feature = "device")]
    #[command(name = "play")]
    Play {
        /// Input audio
        #[arg(short, long)]
        input: PathBuf,

        /// Loop until interrupted
        #[arg(short, long)]
        r#loop: bool,

        /// Playback rate (pitch preserved)
        #[arg(long, default_value_t = 1.0)]
        rate: f32,

        /// Mix in the binaural bed
        #[arg(long)]
        binaural: bool,
    },
}

/// Format of raw or base64 PCM input
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct PcmArgs {
    /// Sample rate of PCM input in Hz (overrides the config)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Channel count of PCM input (overrides the config)
    #[arg(long)]
    pub channels: Option<usize>,
}
