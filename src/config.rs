use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::{
    export::format::ExportFormat,
    feed::connection::DEFAULT_RECONNECT_DELAY,
    export::writer::DEFAULT_SNAPSHOT_INTERVAL,
    geo::{BoundingBox, Coordinate},
    grid::{DEFAULT_GRID_SIZE, MAX_GRID_SIZE},
};

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Optionally loaded from a JSON file (`--config`). Every field
// has a default, so an empty object `{}` is a valid file and
// running without a file at all is the common case.
//
// It defines:
// - Where the BaseStation feed lives
// - The monitored region and grid resolution
// - How often snapshots are written
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub grid: GridConfig,
    pub export: ExportConfig,
    pub metrics: MetricsConfig,
}

// ------------------------------------------------------------
// Feed configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    /// Host running the BaseStation output (dump1090, readsb, ...)
    pub host: String,

    pub port: u16,

    /// Fixed delay before reconnecting after a failure
    pub reconnect_delay_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 33001,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY.as_secs(),
        }
    }
}

// ------------------------------------------------------------
// Grid configuration
// ------------------------------------------------------------
//
// IMPORTANT:
// - upper_right must be north-east of lower_left
// - Inverted corners are rejected at startup, never swapped
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GridConfig {
    /// Cells per axis, 1..=MAX_GRID_SIZE (4096)
    pub size: usize,

    pub upper_right: Coordinate,
    pub lower_left: Coordinate,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_GRID_SIZE,
            upper_right: Coordinate::new(40.0, -30.0),
            lower_left: Coordinate::new(30.0, -40.0),
        }
    }
}

// ------------------------------------------------------------
// Export configuration
// ------------------------------------------------------------
//
// The destination path is not part of the file: it is always
// given on the command line.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub interval_secs: u64,
    pub format: ExportFormat,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SNAPSHOT_INTERVAL.as_secs(),
            format: ExportFormat::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between metrics log lines; 0 disables them
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Checks everything that would otherwise fail after startup.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.feed.host.is_empty(), "feed.host must not be empty");
        ensure!(self.feed.reconnect_delay_secs > 0, "feed.reconnect_delay_secs must be > 0");
        ensure!(
            (1..=MAX_GRID_SIZE).contains(&self.grid.size),
            "grid.size must be between 1 and {MAX_GRID_SIZE}, got {}",
            self.grid.size
        );
        ensure!(self.export.interval_secs > 0, "export.interval_secs must be > 0");
        self.bounding_box()?;
        Ok(())
    }

    pub fn bounding_box(&self) -> Result<BoundingBox> {
        BoundingBox::new(self.grid.upper_right, self.grid.lower_left)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.feed.reconnect_delay_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.export.interval_secs)
    }

    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics.interval_secs > 0).then(|| Duration::from_secs(self.metrics.interval_secs))
    }
}
