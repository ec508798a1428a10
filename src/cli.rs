//! Command-line argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tickwave::config::{TrackConfig, TrackField};
use tickwave::io::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "tickwave")]
#[command(about = "Spectral tick audio streaming", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode a WAV file and play it back through the local pipeline
    Play {
        wav: PathBuf,
        #[command(flatten)]
        track: TrackArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Encode a WAV file and stream the frames over UDP
    Send {
        wav: PathBuf,
        /// Receiver address
        #[arg(long, value_name = "ADDR")]
        to: SocketAddr,
        #[command(flatten)]
        track: TrackArgs,
    },

    /// Receive frames over UDP and play them
    Listen {
        #[arg(long, value_name = "ADDR", default_value_t = default_bind())]
        bind: SocketAddr,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print per-tick statistics of an encoded WAV file
    Inspect {
        wav: PathBuf,
        #[command(flatten)]
        track: TrackArgs,
        /// Only print the summary
        #[arg(long)]
        summary: bool,
    },

    /// List audio output devices
    Devices,

    /// Describe the track configuration fields accepted by --set
    Fields,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

#[derive(clap::Args, Debug)]
pub struct TrackArgs {
    /// Track configuration as JSON
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Ticks per second
    #[arg(long, value_name = "N")]
    pub tps: Option<u32>,

    /// Maximum spectral items per tick
    #[arg(long, value_name = "N")]
    pub max_items: Option<usize>,

    /// Absolute magnitude floor
    #[arg(long, value_name = "F")]
    pub abs: Option<f64>,

    /// Relative magnitude floor, as a fraction of each tick's range
    #[arg(long, value_name = "F")]
    pub rel: Option<f64>,

    /// Read the source per tick instead of decoding it up front
    #[arg(long)]
    pub stream: bool,

    /// Set any field by key, e.g. --set ticksPerSecond=25
    #[arg(long, value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

impl TrackArgs {
    pub fn to_config(&self) -> Result<TrackConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                TrackConfig::from_json(&json)
                    .with_context(|| format!("Invalid track config in {}", path.display()))?
            }
            None => TrackConfig::default(),
        };

        if let Some(tps) = self.tps {
            config.set(TrackField::TicksPerSecond, &tps.to_string())?;
        }
        if let Some(max_items) = self.max_items {
            config.set(TrackField::MaxSoundNumber, &max_items.to_string())?;
        }
        if let Some(abs) = self.abs {
            config.set(TrackField::MinimumVolumeAbsolute, &abs.to_string())?;
        }
        if let Some(rel) = self.rel {
            config.set(TrackField::MinimumVolumeRelativePercent, &rel.to_string())?;
        }
        if self.stream {
            config.preload = false;
        }
        for assignment in &self.set {
            let (key, value) = assignment
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got {assignment:?}"))?;
            let field: TrackField = key.parse()?;
            config.set(field, value)?;
        }
        Ok(config)
    }
}

#[derive(clap::Args, Debug)]
pub struct OutputArgs {
    /// Output device name (default device if omitted)
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,

    /// Master volume in 0..=1
    #[arg(long, value_name = "F", default_value = "1.0")]
    pub volume: f32,

    /// Playback tuning as JSON
    #[arg(long, value_name = "FILE")]
    pub playback_config: Option<PathBuf>,
}
