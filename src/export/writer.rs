use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::{
    export::format::ExportFormat,
    grid::GridAccumulator,
    metrics::{METRICS, RuntimeMetrics},
};

/// Default time between two scheduled snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodically persists the grid.
///
/// Each write replaces the whole file: the snapshot is rendered to
/// `<path>.tmp` and renamed over the destination.
///
/// GUARANTEES:
/// - The grid lock is held only while copying cells
/// - A failed write never stops the schedule
pub struct SnapshotWriter {
    path: PathBuf,
    format: ExportFormat,
    interval: Duration,
    writes: AtomicU64,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>, format: ExportFormat, interval: Duration) -> Self {
        Self {
            path: path.into(),
            format,
            interval,
            writes: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Takes a snapshot and writes it out once.
    pub async fn write(&self, grid: &GridAccumulator) -> Result<()> {
        let snapshot = grid.snapshot();
        let body = self.format.render(&snapshot, Utc::now())?;

        // The blocking task runs to completion even if this future is
        // aborted, so the tmp file is either renamed or removed.
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist(&path, body.as_bytes()))
            .await
            .context("snapshot persist task failed")??;

        self.writes.fetch_add(1, Ordering::Relaxed);
        RuntimeMetrics::incr(&METRICS.snapshots_written);

        if snapshot.is_empty() {
            info!("Wrote {} (no observations yet)", self.path.display());
        } else {
            info!(
                "Wrote {} ({} cells, {} observations)",
                self.path.display(),
                snapshot.len(),
                snapshot.total()
            );
        }

        Ok(())
    }

    /// Writes every `interval`, starting one interval from now.
    /// Never returns.
    pub async fn run(&self, grid: &GridAccumulator) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.write(grid).await {
                RuntimeMetrics::incr(&METRICS.snapshot_errors);
                error!("Snapshot write failed: {e:#}");
            }
        }
    }
}

/// Writes `body` to `<path>.tmp` and renames it over `path`.
/// The tmp file never outlives a failed call.
fn persist(path: &Path, body: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);

    let result = std::fs::write(&tmp, body)
        .with_context(|| format!("writing {}", tmp.display()))
        .and_then(|()| {
            std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))
        });

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }

    result
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::geo::{BoundingBox, Coordinate};

    fn grid() -> Arc<GridAccumulator> {
        let bounds =
            BoundingBox::new(Coordinate::new(40.0, -30.0), Coordinate::new(30.0, -40.0)).unwrap();
        Arc::new(GridAccumulator::new(bounds, 10).unwrap())
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sbs-heatmap-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("heatmap.json")
    }

    fn read_points(path: &Path) -> Vec<Value> {
        let v: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        v["points"].as_array().unwrap().clone()
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(tmp_path(Path::new("/a/b/heat.json")), PathBuf::from("/a/b/heat.json.tmp"));
    }

    #[tokio::test]
    async fn write_replaces_previous_content() {
        let path = scratch("replace");
        std::fs::write(&path, "stale content that is much longer than what follows").unwrap();

        let grid = grid();
        grid.place(35.0, -35.0);

        let writer = SnapshotWriter::new(&path, ExportFormat::Json, DEFAULT_SNAPSHOT_INTERVAL);
        writer.write(&grid).await.unwrap();

        let points = read_points(&path);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0]["weight"], 1);
        assert_eq!(writer.writes(), 1);
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let path = scratch("missing").join("no-such-dir").join("heatmap.json");
        let writer = SnapshotWriter::new(&path, ExportFormat::Json, DEFAULT_SNAPSHOT_INTERVAL);

        let err = writer.write(&grid()).await.unwrap_err();
        assert!(format!("{err:#}").contains("writing"));
        assert_eq!(writer.writes(), 0);
    }

    #[tokio::test]
    async fn failed_rename_removes_tmp_file() {
        // A non-empty directory at the destination cannot be replaced by a file.
        let path = scratch("rename").with_file_name("occupied");
        std::fs::create_dir_all(path.join("child")).unwrap();

        let grid = grid();
        grid.place(35.0, -35.0);

        let writer = SnapshotWriter::new(&path, ExportFormat::Json, DEFAULT_SNAPSHOT_INTERVAL);
        let err = writer.write(&grid).await.unwrap_err();

        assert!(format!("{err:#}").contains("replacing"));
        assert!(!tmp_path(&path).exists());
        assert!(path.join("child").is_dir());
        assert_eq!(writer.writes(), 0);
    }

    #[tokio::test]
    async fn empty_grid_still_writes_a_snapshot() {
        let path = scratch("empty");
        let writer = SnapshotWriter::new(&path, ExportFormat::Json, DEFAULT_SNAPSHOT_INTERVAL);

        writer.write(&grid()).await.unwrap();

        assert!(read_points(&path).is_empty());
        assert_eq!(writer.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_writes_once_per_interval() {
        let path = scratch("interval");
        let grid = grid();
        grid.place(35.0, -35.0);

        let writer = Arc::new(SnapshotWriter::new(
            &path,
            ExportFormat::Json,
            Duration::from_secs(60),
        ));

        let task = tokio::spawn({
            let writer = writer.clone();
            let grid = grid.clone();
            async move { writer.run(&grid).await }
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(writer.writes(), 0);

        for _ in 0..200 {
            if writer.writes() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        task.abort();

        assert!(writer.writes() >= 2);
        assert_eq!(read_points(&path)[0]["weight"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_write_failures() {
        let path = scratch("survive").join("gone").join("heatmap.json");
        let writer = Arc::new(SnapshotWriter::new(
            &path,
            ExportFormat::Json,
            Duration::from_secs(10),
        ));
        let grid = grid();

        let task = tokio::spawn({
            let writer = writer.clone();
            let grid = grid.clone();
            async move { writer.run(&grid).await }
        });

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(!task.is_finished());
        task.abort();

        assert_eq!(writer.writes(), 0);
    }
}
