use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::sleep;

use crate::{
    feed::parser::parse_line,
    grid::GridAccumulator,
    metrics::{METRICS, RuntimeMetrics},
};

/// Default delay between a lost/failed connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Longest accepted record, terminator included. SBS lines are ~150 bytes.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Opens the byte stream the feed is read from.
///
/// `TcpConnector` is the only production implementation; the trait
/// exists so the reconnect loop can be driven by scripted streams.
///
/// THREAD SAFETY:
/// - Must be Send + Sync, the connector lives inside a spawned task
#[async_trait]
pub trait FeedConnector: Send + Sync {
    type Stream: AsyncRead + Unpin + Send;

    /// Human-readable endpoint, used for logging.
    fn describe(&self) -> String;

    /// One connection attempt. Never retries on its own.
    async fn connect(&self) -> io::Result<Self::Stream>;
}

/// Plain TCP client for a BaseStation port (usually 30003 / 33001).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

#[async_trait]
impl FeedConnector for TcpConnector {
    type Stream = TcpStream;

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        TcpStream::connect((self.host.as_str(), self.port)).await
    }
}

// ------------------------------------------------------------
// Connection state machine
// ------------------------------------------------------------
//
//   Disconnected ──(delay if backoff)──▶ Connecting
//   Connecting   ──ok──▶ Streaming
//   Connecting   ──err─▶ Disconnected { backoff: true }
//   Streaming    ──eof/err/oversized──▶ Disconnected { backoff: true }
//
// There is no terminal state.
//
pub enum ConnectionState<S> {
    Disconnected { backoff: bool },
    Connecting,
    Streaming(S),
}

/// Why a streaming session ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// Clean close on a record boundary
    Eof,

    /// Closed in the middle of a record; the bytes are dropped
    PartialRecord(usize),

    /// No terminator within `MAX_RECORD_LEN` bytes; the peer is not
    /// speaking BaseStation
    Oversized(usize),

    /// Read error (reset, broken pipe, ...)
    Error(io::Error),
}

impl std::fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamEnd::Eof => write!(f, "connection closed"),
            StreamEnd::PartialRecord(n) => {
                write!(f, "connection closed mid-record ({n} bytes dropped)")
            }
            StreamEnd::Oversized(n) => {
                write!(f, "no record terminator within {n} bytes")
            }
            StreamEnd::Error(e) => write!(f, "read error: {e}"),
        }
    }
}

/// Keeps one feed connection alive forever and feeds every accepted
/// observation into the grid.
///
/// RESPONSIBILITIES:
/// - Connection lifecycle (connect, detect loss, back off, retry)
/// - Splitting the stream into lines
/// - Forwarding parsed positions to `GridAccumulator::place`
///
/// NOT RESPONSIBLE FOR:
/// - Message parsing rules (see `feed::parser`)
/// - Cancellation (the task is aborted by the orchestrator)
pub struct FeedConnection<C: FeedConnector> {
    connector: C,
    grid: Arc<GridAccumulator>,
    reconnect_delay: Duration,
}

impl<C: FeedConnector> FeedConnection<C> {
    pub fn new(connector: C, grid: Arc<GridAccumulator>, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            grid,
            reconnect_delay,
        }
    }

    /// Runs the state machine. Never returns.
    pub async fn run(self) {
        let endpoint = self.connector.describe();
        let mut state = ConnectionState::Disconnected { backoff: false };

        loop {
            state = match state {
                ConnectionState::Disconnected { backoff } => {
                    if backoff {
                        sleep(self.reconnect_delay).await;
                    }
                    ConnectionState::Connecting
                }

                ConnectionState::Connecting => match self.connector.connect().await {
                    Ok(stream) => {
                        info!("Connected to feed {endpoint}");
                        ConnectionState::Streaming(stream)
                    }
                    Err(e) => {
                        RuntimeMetrics::incr(&METRICS.connect_failures);
                        warn!(
                            "Connection to {endpoint} failed: {e} - retry in {}s",
                            self.reconnect_delay.as_secs()
                        );
                        ConnectionState::Disconnected { backoff: true }
                    }
                },

                ConnectionState::Streaming(stream) => {
                    let end = self.stream(stream).await;
                    RuntimeMetrics::incr(&METRICS.disconnects);
                    warn!(
                        "Lost connection to {endpoint} ({end}) - reconnect in {}s",
                        self.reconnect_delay.as_secs()
                    );
                    ConnectionState::Disconnected { backoff: true }
                }
            };
        }
    }

    /// Reads records until the stream ends.
    async fn stream(&self, stream: C::Stream) -> StreamEnd {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();

            let mut record = (&mut reader).take(MAX_RECORD_LEN as u64);

            match record.read_until(b'\n', &mut buf).await {
                Ok(0) => return StreamEnd::Eof,
                Ok(n) if buf.last() != Some(&b'\n') && n >= MAX_RECORD_LEN => {
                    return StreamEnd::Oversized(n);
                }
                Ok(n) if buf.last() != Some(&b'\n') => return StreamEnd::PartialRecord(n),
                Ok(_) => self.handle_record(&buf),
                Err(e) => return StreamEnd::Error(e),
            }
        }
    }

    fn handle_record(&self, record: &[u8]) {
        RuntimeMetrics::incr(&METRICS.lines_received);

        // Feed is ASCII; anything else cannot be a position line.
        let Some(obs) = std::str::from_utf8(record).ok().and_then(parse_line) else {
            RuntimeMetrics::incr(&METRICS.lines_discarded);
            return;
        };

        if self.grid.place(obs.lat, obs.lon) {
            RuntimeMetrics::incr(&METRICS.observations_placed);
        } else {
            RuntimeMetrics::incr(&METRICS.observations_out_of_bounds);
        }
    }
}
