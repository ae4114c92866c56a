//! CLI entry point for the device registry daemon.
//!
//! The registry's transport adapters (real bus servers, the message-bus
//! manager) live outside this crate, so the binary ships a demo mode that
//! runs the full discovery path against simulated hardware:
//!
//! ```bash
//! device_registry run
//! device_registry run --config config/registry.toml
//! ```
//!
//! The demo attaches a few scripted instruments, performs the bootstrap
//! rescan, registers a sample subscriber, and then serves until Ctrl-C,
//! logging every notification it delivers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use device_registry::bus::Messenger;
use device_registry::config::Settings;
use device_registry::error::BusError;
use device_registry::logging;
use device_registry::manager::DeviceManager;
use device_registry::messages::{DeviceChange, ServiceId, SessionId};
use device_registry::mock::{MockBusServer, MockDevice, MockDirectory};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "device_registry")]
#[command(about = "Identification and discovery registry for instrument buses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry against simulated bus servers
    Run {
        /// Optional settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Delivers notifications to the log instead of a message bus.
struct LoggingMessenger;

#[async_trait]
impl Messenger for LoggingMessenger {
    async fn notify(
        &self,
        target: ServiceId,
        session: SessionId,
        message_id: u32,
        change: &DeviceChange,
    ) -> Result<(), BusError> {
        let payload =
            serde_json::to_string(change).map_err(|e| BusError::Transport(e.to_string()))?;
        info!(subscriber = target, session, message_id, payload = %payload, "notify");
        Ok(())
    }

    async fn broadcast(&self, change: &DeviceChange) -> Result<(), BusError> {
        let payload =
            serde_json::to_string(change).map_err(|e| BusError::Transport(e.to_string()))?;
        info!(payload = %payload, "broadcast");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await,
    }
}

async fn run(config: Option<PathBuf>) -> Result<()> {
    let settings = match config {
        Some(path) => Settings::load_from(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load().context("failed to load settings")?,
    };
    settings
        .validate()
        .map_err(|msg| anyhow::anyhow!("invalid settings: {msg}"))?;
    logging::init_from_settings(&settings).map_err(|msg| anyhow::anyhow!(msg))?;

    info!(name = %settings.application.name, "starting registry");

    // Simulated hardware: one bus with a modern instrument, a vintage
    // sweeper, and a channel that answers nothing.
    let bus = Arc::new(MockBusServer::new("gpib0"));
    bus.attach(
        "7",
        MockDevice::new().with_response("*IDN?", "ACME,MODEL7,1.0,A"),
    )
    .await;
    bus.attach(
        "14",
        MockDevice::new().with_response("OI", "08341BREV 01 AUG 86"),
    )
    .await;
    bus.attach("22", MockDevice::silent()).await;

    let directory = Arc::new(MockDirectory::new());
    directory.add(bus).await;

    let (handle, task) = DeviceManager::spawn(&settings, directory, Arc::new(LoggingMessenger));

    // A sample consumer: interested in the ACME instrument, session 1.
    let snapshot = handle
        .register_interest(vec!["ACME MODEL7".to_string()], 100, 1, 55)
        .await?;
    info!(?snapshot, "demo subscriber registered");

    let (devices, subscribers, procedures) = handle.dump_state().await?;
    info!("known devices:\n{devices}");
    info!("subscribers:\n{subscribers}");
    info!("ident procedures:\n{procedures}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    handle.shutdown().await?;
    task.await.context("manager task panicked")?;
    Ok(())
}
