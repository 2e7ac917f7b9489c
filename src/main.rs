//! # MSP Link
//!
//! Ground station telemetry engine for MSP flight controllers.
//!
//! Opens the configured serial port, runs the telemetry engine against
//! it, and reports engine notices on the log until the channel closes or
//! Ctrl+C is pressed.

use anyhow::{Context, Result};
use tracing::{info, warn};

use msp_link::alarm::TracingSpeech;
use msp_link::config::Config;
use msp_link::engine::{EngineSettings, Notice, TelemetryEngine};
use msp_link::flightlog::FlightLogRecorder;
use msp_link::transport::{SerialByteLink, Transport};

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("MSP Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let link = SerialByteLink::open_with_paths(&[config.serial.port.as_str()], config.serial.baud_rate)
        .context("failed to open flight controller serial port")?;
    info!("serial port opened at: {}", link.device_path());

    let recorder = if config.recording.enabled {
        match FlightLogRecorder::create(&config.recording.log_dir) {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                warn!("flight log unavailable, continuing without: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (transport, events) = Transport::open(Box::new(link));
    let settings = EngineSettings::from(&config);
    let (engine, handle, mut notices) =
        TelemetryEngine::new(transport, events, settings, Box::new(TracingSpeech), None, recorder);

    let engine_task = tokio::spawn(engine.run());

    info!("telemetry engine running, press Ctrl+C to exit");
    loop {
        tokio::select! {
            notice = notices.recv() => {
                match notice {
                    Some(Notice::NoDataReceived) => warn!("no data received from flight controller"),
                    Some(Notice::DataResumed) => info!("telemetry data resumed"),
                    Some(Notice::Disconnected) => {
                        warn!("flight controller disconnected");
                        break;
                    }
                    Some(Notice::DisableIdleTimer(_)) => {}
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                handle.stop();
                break;
            }
        }
    }

    engine_task.await.context("engine task panicked")?;
    info!("shutdown complete");
    Ok(())
}
