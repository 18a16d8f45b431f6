use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::task::JoinSet;

use crate::{
    export::writer::SnapshotWriter,
    feed::connection::{FeedConnection, FeedConnector},
    grid::GridAccumulator,
    metrics,
};

/// Runs the collector: one feed task and one export task over a
/// shared grid, until `shutdown` resolves.
///
/// SHUTDOWN:
/// - Both tasks are aborted (an in-flight read is simply dropped)
/// - Exactly one final snapshot is written afterwards
pub struct Orchestrator<C: FeedConnector> {
    grid: Arc<GridAccumulator>,
    connector: C,
    writer: Arc<SnapshotWriter>,
    reconnect_delay: Duration,

    /// `None` disables the periodic metrics line
    metrics_interval: Option<Duration>,
}

impl<C: FeedConnector + 'static> Orchestrator<C> {
    pub fn new(
        grid: Arc<GridAccumulator>,
        connector: C,
        writer: Arc<SnapshotWriter>,
        reconnect_delay: Duration,
        metrics_interval: Option<Duration>,
    ) -> Self {
        Self {
            grid,
            connector,
            writer,
            reconnect_delay,
            metrics_interval,
        }
    }

    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            grid,
            connector,
            writer,
            reconnect_delay,
            metrics_interval,
        } = self;

        let mut tasks = JoinSet::new();

        tasks.spawn(FeedConnection::new(connector, grid.clone(), reconnect_delay).run());

        tasks.spawn({
            let writer = writer.clone();
            let grid = grid.clone();
            async move { writer.run(&grid).await }
        });

        if let Some(every) = metrics_interval {
            tasks.spawn(metrics::report_loop(every));
        }

        // None of the tasks ever finishes on its own; if one does,
        // flush what we have and stop.
        tokio::select! {
            _ = shutdown => warn!("Shutdown requested"),
            Some(res) = tasks.join_next() => {
                error!("Collector task stopped unexpectedly: {res:?}");
            }
        }

        tasks.shutdown().await;

        info!("Writing final snapshot to {}", writer.path().display());
        writer
            .write(&grid)
            .await
            .context("final snapshot write failed")
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
