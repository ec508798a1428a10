mod cli;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};

use cli::{Args, Command, OutputArgs, TrackArgs};
use tickwave::audio::open_wav;
use tickwave::config::{PlaybackConfig, TrackField};
use tickwave::io::audio::{default_output_sample_rate, output_device_names};
use tickwave::io::{DatagramReceiver, DatagramSender, DeviceSink};
use tickwave::playback::Volume;
use tickwave::session::{PlaybackFeed, SessionId, SessionManager, SessionStatus, TickListener, Track};
use tickwave::spectral::SpectralEncoder;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run(Args::parse()) {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Play { wav, track, output } => play(&wav, &track, &output),
        Command::Send { wav, to, track } => send(&wav, to, &track),
        Command::Listen { bind, output } => listen(bind, &output),
        Command::Inspect {
            wav,
            track,
            summary,
        } => inspect(&wav, &track, summary),
        Command::Devices => {
            for name in output_device_names().context("Failed to enumerate devices")? {
                println!("{name}");
            }
            Ok(())
        }
        Command::Fields => {
            for field in TrackField::ALL {
                println!(
                    "{:<30} {:<26} {}",
                    field.key(),
                    field.display_name(),
                    field.description()
                );
            }
            Ok(())
        }
    }
}

fn playback_config(output: &OutputArgs) -> Result<PlaybackConfig> {
    let mut config = match &output.playback_config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            PlaybackConfig::from_json(&json)
                .with_context(|| format!("Invalid playback config in {}", path.display()))?
        }
        None => PlaybackConfig::default(),
    };
    config.output_sample_rate = default_output_sample_rate(output.device.as_deref())
        .context("Failed to query output device")?;
    Ok(config)
}

fn device_feed(output: &OutputArgs, config: PlaybackConfig, volume: Arc<Volume>) -> PlaybackFeed {
    let device = output.device.clone();
    let buffer_secs = config.device_buffer_secs;
    PlaybackFeed::spawn(move || DeviceSink::new(device, buffer_secs), volume, config)
}

fn play(wav: &Path, track_args: &TrackArgs, output: &OutputArgs) -> Result<()> {
    let track = Track::wav(wav).with_config(track_args.to_config()?);
    let manager = SessionManager::new(playback_config(output)?);
    manager.volume().set_master(output.volume);

    let feed = manager.local_feed({
        let device = output.device.clone();
        let buffer_secs = manager.playback_config().device_buffer_secs;
        move || DeviceSink::new(device, buffer_secs)
    });
    let id = manager
        .play(&track, Box::new(feed))
        .with_context(|| format!("Failed to play {}", wav.display()))?;
    finish(&manager, id)
}

fn send(wav: &Path, to: std::net::SocketAddr, track_args: &TrackArgs) -> Result<()> {
    let track = Track::wav(wav).with_config(track_args.to_config()?);
    let manager = SessionManager::default();
    let sender = DatagramSender::new(to)?;
    let id = manager
        .play(&track, Box::new(sender))
        .with_context(|| format!("Failed to send {}", wav.display()))?;
    finish(&manager, id)
}

fn finish(manager: &SessionManager, id: SessionId) -> Result<()> {
    while manager.status(id)?.is_active() {
        info!("Played {:.1}%", manager.played_fraction(id)? * 100.0);
        thread::sleep(PROGRESS_INTERVAL);
    }
    match manager.wait(id)? {
        SessionStatus::Failed(reason) => bail!("Session {} failed: {}", id, reason),
        status => {
            info!("Session {} ended: {:?}", id, status);
            Ok(())
        }
    }
}

fn listen(bind: std::net::SocketAddr, output: &OutputArgs) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let receiver = DatagramReceiver::bind(bind, shutdown.clone())?;

    let volume = Arc::new(Volume::default());
    volume.set_master(output.volume);
    let mut feed = device_feed(output, playback_config(output)?, volume);

    receiver.run(&mut feed).context("Receiving frames failed")?;
    feed.wait(&shutdown).context("Playback failed")?;
    info!("Listener done");
    Ok(())
}

fn inspect(wav: &Path, track_args: &TrackArgs, summary: bool) -> Result<()> {
    let config = track_args.to_config()?;
    let mut reader = open_wav(wav, config.preload)
        .with_context(|| format!("Failed to open {}", wav.display()))?;
    let mut encoder = SpectralEncoder::new(reader.sample_rate(), config);

    let mut ticks = 0u64;
    let mut items = 0u64;
    let mut bytes = 0u64;
    let mut largest = 0usize;
    while let Some(tick) = encoder.encode_next(&mut reader)? {
        if !summary {
            let dominant = tick
                .dominant()
                .map(|item| format!("{:>9.1} Hz", tick.bin_frequency(item.index)))
                .unwrap_or_else(|| "  silent".to_string());
            println!(
                "{:>6}  {:>5} samples  {:>5} items  {}  {:>6} bytes",
                ticks,
                tick.sample_count,
                tick.items.len(),
                dominant,
                tick.encoded_len()
            );
        }
        ticks += 1;
        items += tick.items.len() as u64;
        bytes += tick.encoded_len() as u64;
        largest = largest.max(tick.encoded_len());
    }

    if ticks == 0 {
        println!("{}: no audio", wav.display());
        return Ok(());
    }
    let seconds = reader.frames_read() as f64 / reader.sample_rate() as f64;
    println!(
        "{}: {} ticks, {:.1} items/tick, largest frame {} bytes, {:.1} kbit/s",
        wav.display(),
        ticks,
        items as f64 / ticks as f64,
        largest,
        bytes as f64 * 8.0 / seconds / 1000.0
    );
    Ok(())
}
