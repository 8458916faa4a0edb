//! # USBL Relay
//!
//! Command-line runner for the relay: load a TOML configuration, connect
//! the controller, print attribute-change notifications, and tear down on
//! Ctrl+C.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use usbl_relay::config::Config;
use usbl_relay::controller::{ControllerSettings, RelayController};
use usbl_relay::event::ControllerEvent;

/// Default configuration path when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Set up tracing to stderr, plus a rolling file when configured
///
/// Returns the appender guard; dropping it stops the background writer, so
/// the caller holds it for the life of the process.
fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match &config.log.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "usbl-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).with_context(|| format!("loading {}", config_path))?
    } else {
        Config::default()
    };

    let _log_guard = init_logging(&config);
    info!("USBL relay v{} starting...", env!("CARGO_PKG_VERSION"));

    let devices = usbl_relay::serial::list_serial_devices().await;
    if devices.is_empty() {
        info!("no serial devices detected");
    } else {
        info!("serial devices detected: {}", devices.join(", "));
    }

    let (mut controller, mut events) =
        RelayController::new(ControllerSettings::from(&config.relay));

    // Attribute changes go to the log the way the original CLI reported
    // them; log events are already mirrored to tracing at the source
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ControllerEvent::AttrChanged { key, value } = event {
                info!("{} is now {}", key, value.as_deref().unwrap_or("null"));
            }
        }
    });

    if let Err(e) = controller.connect(config.controller.clone()).await {
        // A degraded session keeps running; only a dead one is fatal
        if controller.is_connected() {
            warn!("connected degraded: {}", e);
        } else {
            return Err(anyhow::Error::from(e)).context("connect failed");
        }
    }

    info!("relay running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;

    info!("received Ctrl+C, shutting down...");
    controller.disconnect().await;

    Ok(())
}
