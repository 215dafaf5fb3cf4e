//! Mixer Server
//!
//! Accepts producer connections on TCP and plays their mixed audio on the
//! system output device.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use net_audio_mixer::{
    audio::{list_output_devices, sink_from_config, AudioSink, SinkFormat},
    config::{MixerConfig, SinkBackend},
    mixer::{MixerState, MixingEngine},
    network::Acceptor,
};

#[derive(Parser)]
#[command(name = "mixer")]
#[command(about = "Multi-client networked audio mixer", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum simultaneous clients
    #[arg(long)]
    max_clients: Option<usize>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Discard audio instead of opening a device
    #[arg(long)]
    null_sink: bool,

    /// Print output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        println!("\n=== Available Output Devices ===");
        for device in list_output_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    let mut config = MixerConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(max_clients) = cli.max_clients {
        config.network.max_clients = max_clients;
    }
    if cli.device.is_some() {
        config.audio.device = cli.device;
    }
    if cli.null_sink {
        config.audio.backend = SinkBackend::Null;
    }
    config.validate()?;

    tracing::info!("Starting mixer");

    let format = SinkFormat::from(&config.audio);
    let mut sink = sink_from_config(&config.audio);
    let period = sink
        .configure(&format)
        .context("audio sink configuration failed")?;

    tracing::info!(
        "Audio: {:?} backend, {} Hz, {} channel(s), buffer {} frames, period {} frames",
        config.audio.backend,
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.buffer_frames,
        period
    );

    let acceptor = Acceptor::bind(&config.network).context("listener setup failed")?;
    let state: Arc<MixerState<TcpStream>> = Arc::new(MixerState::new(config.network.max_clients));

    let engine = MixingEngine::new(state.clone(), sink, period, config.audio.channels)
        .with_config(&config.mixer);

    // Both workers run forever; the first one to come back ends the process
    let (exit_tx, exit_rx) = bounded::<String>(2);

    let engine_exit = exit_tx.clone();
    thread::Builder::new()
        .name("mixer-engine".to_string())
        .spawn(move || {
            let reason = match engine.run() {
                Ok(()) => "mixing engine stopped".to_string(),
                Err(e) => format!("mixing engine failed: {}", e),
            };
            let _ = engine_exit.send(reason);
        })
        .context("failed to spawn mixing engine thread")?;

    let acceptor_state = state.clone();
    thread::Builder::new()
        .name("connection-acceptor".to_string())
        .spawn(move || {
            acceptor.run(acceptor_state);
            let _ = exit_tx.send("connection acceptor stopped".to_string());
        })
        .context("failed to spawn acceptor thread")?;

    let reason = exit_rx
        .recv()
        .unwrap_or_else(|_| "worker threads disconnected".to_string());
    tracing::error!("{}", reason);
    std::process::exit(1);
}
