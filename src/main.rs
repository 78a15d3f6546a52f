//! # interchat
//!
//! Chat fan-out server binary: loads settings, starts the room and serves
//! WebSocket connections until Ctrl-C.

#![deny(unsafe_code)]

mod build_info;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interchat_core::{FailureReporter, TracingReporter};
use interchat_server::{ChatServer, ServerConfig, start_room};
use interchat_settings::{LogFormat, TelemetrySettings, load_settings};
use interchat_telemetry::{Format, TelemetryConfig, init_telemetry};

/// Time allowed for the listener and the room to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time chat fan-out server.
#[derive(Parser, Debug)]
#[command(name = "interchat", about = "Real-time chat fan-out server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server.
    Run {
        /// Path to a JSON settings file.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print version information.
    Version {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn telemetry_config(settings: &TelemetrySettings) -> TelemetryConfig {
    TelemetryConfig {
        level: settings.level.clone(),
        format: match settings.format {
            LogFormat::Json => Format::Json,
            LogFormat::Pretty => Format::Pretty,
        },
    }
}

fn print_version(json: bool) -> Result<()> {
    if json {
        let info = serde_json::to_string_pretty(&build_info::BuildInfo::default())?;
        println!("{info}");
    } else {
        println!("interchat {}", build_info::version_string());
    }
    Ok(())
}

async fn run(config: Option<&Path>) -> Result<()> {
    let settings = load_settings(config).context("Failed to load settings")?;
    init_telemetry(&telemetry_config(&settings.telemetry))
        .context("Failed to initialise logging")?;
    let metrics = interchat_telemetry::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    tracing::info!(
        version = build_info::VERSION,
        commit = build_info::COMMIT,
        build_date = build_info::BUILD_DATE,
        "starting interchat"
    );

    let reporter: Arc<dyn FailureReporter> = Arc::new(TracingReporter);
    let (room, room_task) =
        start_room(&settings, Arc::clone(&reporter)).context("Failed to open room log")?;

    let server = ChatServer::new(
        ServerConfig::from_settings(&settings),
        room,
        reporter,
        Some(metrics),
    );
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("interchat listening on ws://{addr}/room");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = server.shutdown().drain(handle, SHUTDOWN_TIMEOUT).await;
    drop(server);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, room_task).await.is_err() {
        tracing::warn!("room did not stop before timeout");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(config.as_deref()).await,
        Command::Version { json } => print_version(json),
    }
}
