//! Reverie CLI - Speech Audio Pipeline
//!
//! Command-line interface for decoding, rendering and playing speech audio.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reverie::cli::commands::{self, RenderArgs};
use reverie::cli::{Cli, Commands};
use reverie::EngineConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("Reverie v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Some(cmd) => handle_command(cmd, &config),
        None => {
            println!("Reverie v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config: &EngineConfig) -> anyhow::Result<()> {
    match cmd {
        Commands::Decode { input, output } => commands::decode(&input, &output, config)?,
        Commands::Render {
            input,
            output,
            base64,
            pcm,
            dry,
            seed,
        } => {
            let mut config = config.clone();
            config.sample_rate = pcm.sample_rate.unwrap_or(config.sample_rate);
            config.channels = pcm.channels.unwrap_or(config.channels);
            config.validate().context("invalid PCM arguments")?;
            let options = RenderArgs { base64, dry, seed };
            commands::render(&input, output.as_deref(), options, &config)?
        }
        Commands::Simulate {
            input,
            output,
            rate,
            binaural,
            loop_secs,
            seed,
        } => commands::simulate(&input, &output, rate, binaural, loop_secs, seed, config)?,
        Commands::Impulse {
            output,
            sample_rate,
            duration,
            decay,
            seed,
        } => {
            let mut config = config.clone();
            config.sample_rate = sample_rate.unwrap_or(config.sample_rate);
            if let Some(duration) = duration {
                config.effects.impulse_duration_secs = duration;
            }
            if let Some(decay) = decay {
                config.effects.impulse_decay = decay;
            }
            config.validate().context("invalid impulse arguments")?;
            commands::impulse(&output, seed, &config)?
        }
        Commands::PanTrace {
            seconds,
            step,
            hold,
            transition,
        } => {
            let mut config = config.clone();
            config.pan.hold_secs = hold.unwrap_or(config.pan.hold_secs);
            config.pan.transition_secs = transition.unwrap_or(config.pan.transition_secs);
            commands::pan_trace(seconds, step, &config)?
        }
        Commands::Info { path } => commands::info(&path)?,
        Commands::Config { output } => commands::write_config(output.as_deref(), config)?,
        #[cfg(feature = "device")]
        Commands::Play {
            input,
            r#loop,
            rate,
            binaural,
        } => commands::play(&input, r#loop, rate, binaural, config)?,
    }
    Ok(())
}
