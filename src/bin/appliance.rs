//! Voice Appliance
//!
//! Streams the microphone to a realtime voice assistant and plays its
//! reply. Any session failure restarts the process.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_appliance::{
    audio::{list_devices, open_board},
    codec::{OpusDecoder, OpusEncoder},
    config::AppConfig,
    network::HttpSignaling,
    peer::{AudioCodec, PeerConfig, RtcEngine},
    scheduler::MainLoop,
    session::{Coordinator, CoordinatorSettings, ProcessRestarter, Restarter, SessionContext},
    ui::StatusBoard,
};

#[derive(Parser, Debug)]
#[command(name = "voice-appliance", version, about = "Realtime voice assistant runtime")]
struct Cli {
    /// Configuration file; defaults to the platform config directory
    #[arg(short, long, env = "VOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// List audio devices and exit
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

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if cli.list_devices {
        println!("\n=== Available Audio Devices ===");
        for device in list_devices() {
            let device_type = match (device.is_input, device.is_output) {
                (true, true) => "Input/Output",
                (true, false) => "Input",
                (false, true) => "Output",
                _ => "Unknown",
            };
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {} ({}){}", device.name, device_type, default_marker);
        }
        println!();
        return Ok(());
    }

    tracing::info!("Starting voice appliance");

    let sample_rate = config.audio.sample_rate();
    let frame_size = config.audio.frame_size();
    tracing::info!(
        "Board {:?}: {}Hz, {} samples/frame ({:.1}ms)",
        config.audio.board,
        sample_rate,
        frame_size,
        config.audio.frame_duration().as_secs_f64() * 1000.0
    );

    let device = open_board(&config.audio, &config.debug_tap).context("Failed to open audio device")?;

    // A codec that fails to initialize disables its direction for this run
    let encoder = match OpusEncoder::new(&config.codec, sample_rate, frame_size) {
        Ok(encoder) => Some(encoder),
        Err(e) => {
            tracing::error!("Opus encoder unavailable, microphone disabled: {}", e);
            None
        }
    };
    let decoder = match OpusDecoder::new(sample_rate, frame_size) {
        Ok(decoder) => Some(decoder),
        Err(e) => {
            tracing::error!("Opus decoder unavailable, speaker disabled: {}", e);
            None
        }
    };

    let signaling = HttpSignaling::new(&config.signaling).context("Failed to create signaling client")?;
    if config.signaling.api_key.is_none() {
        tracing::warn!("No API key configured; signaling requests are unauthenticated");
    }

    let status = Arc::new(StatusBoard::new());

    #[cfg(feature = "web-ui")]
    {
        if config.ui.enabled {
            let server = voice_appliance::ui::WebServer::new(config.ui.clone(), status.clone());
            server.start_background().context("Failed to start web UI")?;
        }
    }

    let restarter: Arc<dyn Restarter> = Arc::new(ProcessRestarter::new(&config.restart));

    let settings = CoordinatorSettings {
        peer: PeerConfig {
            audio_codec: AudioCodec::Opus,
            sample_rate,
            frame_size,
            data_channel_label: config.session.data_channel_label.clone(),
            bind_address: config.session.bind_ip(),
        },
        send_interval: config.session.send_interval(&config.audio),
        greeting_instructions: config.session.greeting_instructions.clone(),
        log_datachannel_messages: config.session.log_datachannel_messages,
    };
    let context = SessionContext {
        engine: Box::new(RtcEngine::new()),
        device,
        signaling: Arc::new(signaling),
        restarter,
        status: status.clone(),
    };
    let coordinator = Coordinator::new(settings, context, encoder, decoder);

    let mut main_loop = MainLoop::new(coordinator, status, config.session.tick_interval());
    if config.monitor.enabled {
        main_loop = main_loop.with_monitor(std::time::Duration::from_secs(config.monitor.interval_secs));
    }

    // Only returns if the restarter did
    let reason = main_loop.run();
    tracing::error!(%reason, "Main loop ended without restart");
    std::process::exit(config.restart.exit_code);
}
