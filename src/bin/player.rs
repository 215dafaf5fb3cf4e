//! Mixer Player
//!
//! Streams a tone or a raw s16le file to a running mixer.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use net_audio_mixer::{
    constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE},
    network::client::{chunk_samples, sine_tone, MixerClient},
};

#[derive(Parser)]
#[command(name = "player")]
#[command(about = "Stream audio to a mixer server", long_about = None)]
struct Cli {
    /// Mixer address
    #[arg(short, long, default_value = "127.0.0.1:8888")]
    addr: SocketAddr,

    /// Linear gain applied by the mixer
    #[arg(short, long, default_value_t = 1.0)]
    gain: f32,

    /// Frames per chunk; must match the server's period
    #[arg(long, default_value_t = 512)]
    period_frames: usize,

    /// Interleaved channels; must match the server
    #[arg(long, default_value_t = DEFAULT_CHANNELS)]
    channels: u16,

    #[command(subcommand)]
    source: Source,
}

#[derive(Subcommand)]
enum Source {
    /// Sine tone
    Tone {
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f32,

        /// Seconds
        #[arg(short, long, default_value_t = 1.0)]
        duration: f32,

        #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
        sample_rate: u32,
    },
    /// Raw signed 16-bit little-endian PCM file
    File { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let channels = cli.channels.max(1) as usize;

    let samples: Vec<i16> = match &cli.source {
        Source::Tone {
            frequency,
            duration,
            sample_rate,
        } => {
            let frames = (duration.max(0.0) * *sample_rate as f32) as usize;
            let mono = sine_tone(*frequency, *sample_rate, frames, 0.5);
            mono.iter()
                .flat_map(|&s| std::iter::repeat(s).take(channels))
                .collect()
        }
        Source::File { path } => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mut samples = vec![0i16; bytes.len() / 2];
            net_audio_mixer::protocol::decode_samples(&bytes[..samples.len() * 2], &mut samples)?;
            samples
        }
    };

    let periods = chunk_samples(&samples, cli.period_frames * channels);
    tracing::info!(
        "Streaming {} period(s) of {} frames to {}",
        periods.len(),
        cli.period_frames,
        cli.addr
    );

    let start = Instant::now();
    let mut client = MixerClient::connect(cli.addr)?;
    for period in &periods {
        if let Err(e) = client.send_chunk(cli.gain, period) {
            tracing::warn!("Mixer dropped the stream after {} chunk(s): {}", client.chunks_sent(), e);
            return Ok(());
        }
    }
    client.finish()?;

    tracing::info!("Done in {:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}
