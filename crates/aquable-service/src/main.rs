//! aquable - control BLE aquarium dosers and lights.
//!
//! Run with: `cargo run -p aquable-service -- --help`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use aquable_core::{AquaController, CommandRequest, CommandStatus, DeviceEvent, DeviceKind};
use aquable_service::{Config, JsonFileStore};

/// Control BLE aquarium dosing pumps and LED lights.
#[derive(Parser, Debug)]
#[command(name = "aquable")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller in the foreground until Ctrl-C (default behavior).
    Run,

    /// Scan for supported devices.
    Scan {
        /// Scan duration in seconds.
        #[arg(short, long)]
        timeout: Option<f64>,
    },

    /// Connect to a device and print its status.
    Status {
        /// Device address.
        address: String,

        /// Expected device kind.
        #[arg(short, long, value_parser = parse_kind)]
        kind: Option<DeviceKind>,
    },

    /// Run one command against a device.
    Command {
        /// Device address.
        address: String,

        /// Action name, e.g. `turn_on` or `set_schedule`.
        action: String,

        /// Action arguments as a JSON object.
        #[arg(short, long)]
        args: Option<String>,

        /// Timeout in seconds (1-30).
        #[arg(short, long)]
        timeout: Option<f64>,
    },
}

fn parse_kind(value: &str) -> Result<DeviceKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "doser" => Ok(DeviceKind::Doser),
        "light" => Ok(DeviceKind::Light),
        other => Err(format!("unknown device kind '{other}', expected doser or light")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env();
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    config.validate()?;

    init_logging(&config.logging.level)?;

    let store_path = config.storage.devices_path();
    info!("Opening device store at {:?}", store_path);
    let store = JsonFileStore::open(&store_path)
        .await
        .with_context(|| format!("failed to open {}", store_path.display()))?;
    let controller = AquaController::with_ble(Arc::new(store), config.controller_settings());

    let result = match args.command {
        Some(Command::Run) | None => run(&controller).await,
        Some(Command::Scan { timeout }) => scan(&controller, timeout).await,
        Some(Command::Status { address, kind }) => status(&controller, &address, kind).await,
        Some(Command::Command {
            address,
            action,
            args,
            timeout,
        }) => command(&controller, &address, action, args, timeout).await,
    };

    controller.shutdown().await;
    result
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("aquable={level}")))?,
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run(controller: &AquaController) -> anyhow::Result<()> {
    let mut events = controller.subscribe();
    controller.start().await;
    info!("Controller running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(DeviceEvent::Status { device, status }) => {
                    info!(
                        "{} status updated ({})",
                        device.address,
                        status.raw_payload.as_deref().unwrap_or("no payload")
                    );
                }
                Ok(event) => info!("{}", serde_json::to_string(&event)?),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn scan(controller: &AquaController, timeout: Option<f64>) -> anyhow::Result<()> {
    let timeout = timeout.map(Duration::from_secs_f64);
    let devices = controller.scan(timeout).await?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

async fn status(
    controller: &AquaController,
    address: &str,
    kind: Option<DeviceKind>,
) -> anyhow::Result<()> {
    let status = controller.connect(address, kind).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn command(
    controller: &AquaController,
    address: &str,
    action: String,
    args: Option<String>,
    timeout: Option<f64>,
) -> anyhow::Result<()> {
    let args = args
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("--args must be a JSON object")?;
    let request = CommandRequest {
        id: None,
        action,
        args,
        timeout,
    };

    let record = controller.execute_command(address, request).await;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.status != CommandStatus::Success {
        anyhow::bail!(
            "command {}: {}",
            serde_json::to_value(record.status)?.as_str().unwrap_or("failed"),
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
