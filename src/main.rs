// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// - config:       Optional JSON configuration with defaults
// - geo:          Coordinates and the validated bounding box
// - grid:         Shared 2D histogram (place / snapshot)
// - feed:         BaseStation parser + reconnecting TCP reader
// - export:       Snapshot encoders and the periodic writer
// - orchestrator: Task wiring and graceful shutdown
// - metrics:      Global counters and their periodic log line
//
mod config;
mod export;
mod feed;
mod geo;
mod grid;
mod metrics;
mod orchestrator;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;

use config::Config;
use export::{format::ExportFormat, writer::SnapshotWriter};
use feed::connection::TcpConnector;
use grid::GridAccumulator;
use orchestrator::{Orchestrator, shutdown_signal};

/// Builds an aircraft position heatmap from a BaseStation (SBS-1) feed
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// File the heatmap snapshot is written to (overwritten each time)
    filename: PathBuf,

    /// Seconds between scheduled snapshots
    #[arg(short, long)]
    seconds: Option<u64>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// BaseStation feed host
    #[arg(long)]
    host: Option<String>,

    /// BaseStation feed port
    #[arg(long)]
    port: Option<u16>,

    /// Snapshot encoding
    #[arg(long, value_enum)]
    format: Option<ExportFormat>,
}

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize logging
// - Resolve configuration (file, then CLI overrides)
// - Build the grid and run until Ctrl-C / SIGTERM
//
// The process only ever stops on an operator signal, and always
// writes one last snapshot before exiting.
//
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let config = resolve_config(&args)?;

    let grid = Arc::new(GridAccumulator::new(config.bounding_box()?, config.grid.size)?);

    let writer = Arc::new(SnapshotWriter::new(
        &args.filename,
        config.export.format,
        config.snapshot_interval(),
    ));

    let connector = TcpConnector::new(config.feed.host.clone(), config.feed.port);

    info!(
        "Collecting {}:{} into a {n}x{n} grid, snapshot every {}s (Ctrl-C to stop)",
        config.feed.host,
        config.feed.port,
        config.export.interval_secs,
        n = config.grid.size,
    );
    info!("Snapshot file: {}", args.filename.display());

    Orchestrator::new(
        grid,
        connector,
        writer,
        config.reconnect_delay(),
        config.metrics_interval(),
    )
    .run(shutdown_signal())
    .await
}

/// Loads the config file (if any), applies CLI overrides, validates.
fn resolve_config(args: &CliArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(seconds) = args.seconds {
        config.export.interval_secs = seconds;
    }
    if let Some(host) = &args.host {
        config.feed.host = host.clone();
    }
    if let Some(port) = args.port {
        config.feed.port = port;
    }
    if let Some(format) = args.format {
        config.export.format = format;
    }

    config.validate()?;
    Ok(config)
}
