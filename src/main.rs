use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use voicestream::cli::{Cli, Commands, SessionArgs};
use voicestream::config::Config;
use voicestream::defaults;
use voicestream::{AudioSource, CaptureSession, ChunkFormat, ChunkWriter, WavFileSource};

/// How long the main loop waits for a frame before checking for Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    tracing::debug!(version = %voicestream::version_string(), "voicestream starting");

    let mut config = load_config(cli.config.as_deref())?;
    cli.session.apply(&mut config);

    match cli.command.clone().unwrap_or(Commands::Mic) {
        Commands::Mic => run_mic(&config, &cli.session),
        Commands::File { path, realtime } => run_file(&config, &cli.session, &path, realtime),
        Commands::Devices => list_audio_devices(),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries only chunks.
fn init_logging(quiet: bool, verbose: u8) {
    let default_filter = if quiet {
        "voicestream=error"
    } else {
        match verbose {
            0 => defaults::LOG_FILTER,
            1 => "voicestream=debug",
            _ => "voicestream=trace",
        }
    };

    let filter = EnvFilter::try_from_env("VOICESTREAM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path())?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

#[cfg(feature = "cpal-audio")]
fn run_mic(config: &Config, args: &SessionArgs) -> Result<()> {
    let source = voicestream::CpalAudioSource::new(config.audio.device.as_deref())?;
    run_session(source, config, args)
}

#[cfg(not(feature = "cpal-audio"))]
fn run_mic(_config: &Config, _args: &SessionArgs) -> Result<()> {
    anyhow::bail!(
        "Microphone capture needs the `cpal-audio` feature. \
         Rebuild with --features cpal-audio, or stream a file with `voicestream file <PATH>`."
    )
}

fn run_file(config: &Config, args: &SessionArgs, path: &Path, realtime: bool) -> Result<()> {
    let source = WavFileSource::open(path)?.with_realtime(realtime);
    tracing::info!(
        path = %path.display(),
        sample_rate = source.sample_rate(),
        duration = %humantime::format_duration(source.duration()),
        "Streaming WAV file"
    );
    run_session(source, config, args)
}

/// Runs a session until the source ends, silence auto-stops it, Ctrl-C is
/// pressed, `--max-duration` elapses or stdout goes away.
fn run_session<S: AudioSource>(source: S, config: &Config, args: &SessionArgs) -> Result<()> {
    let format = if args.json {
        ChunkFormat::Json
    } else {
        ChunkFormat::Plain
    };
    let writer = ChunkWriter::new(std::io::stdout(), format);
    let mut session = CaptureSession::new(source, config.session.clone(), writer)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    session.start()?;
    let deadline = args.max_duration.map(|limit| Instant::now() + limit);

    while session.is_active() {
        if !running.load(Ordering::SeqCst) {
            tracing::info!("Interrupted");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::info!("Maximum duration reached");
            break;
        }
        if session.events().write_errors() > 0 {
            tracing::warn!("Output closed, stopping");
            break;
        }
        session.pump_timeout(POLL_INTERVAL);
    }
    session.stop();

    let stats = session.stats();
    tracing::debug!(
        chunks = session.events().written(),
        failed = stats.frames_failed,
        dropped = stats.frames_dropped,
        silences = stats.silences,
        "Session summary"
    );

    Ok(())
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = voicestream::audio::capture::list_devices()?;

    if devices.is_empty() {
        anyhow::bail!("No audio input devices found");
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("Listing devices needs the `cpal-audio` feature")
}
