//! Prometheus metrics for the broadcast daemon.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use nix::libc;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Error reason labels for copy failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    /// Client disconnected (EPIPE, ECONNRESET, BrokenPipe, ConnectionReset)
    ClientDisconnected,
    /// Timeout (deadline exceeded, ETIMEDOUT)
    Timeout,
    /// Operation was canceled
    Canceled,
    /// Network error (other network-related errors)
    Network,
    /// Other/unknown error
    Other,
}

impl ErrorReason {
    /// Convert to static string for metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::ClientDisconnected => "client_disconnected",
            ErrorReason::Timeout => "timeout",
            ErrorReason::Canceled => "canceled",
            ErrorReason::Network => "network",
            ErrorReason::Other => "other",
        }
    }

    /// Classify an I/O error into an ErrorReason.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                ErrorReason::ClientDisconnected
            }
            io::ErrorKind::TimedOut => ErrorReason::Timeout,
            io::ErrorKind::Interrupted => ErrorReason::Canceled,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => ErrorReason::Network,
            _ => match err.raw_os_error() {
                Some(libc::EPIPE) | Some(libc::ECONNRESET) => ErrorReason::ClientDisconnected,
                Some(libc::ETIMEDOUT) => ErrorReason::Timeout,
                Some(libc::ECANCELED) => ErrorReason::Canceled,
                _ => ErrorReason::Other,
            },
        }
    }
}

/// Which side of a file transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    /// Reading the file into the pipe.
    Read,
    /// Writing the pipe out to the client.
    Write,
}

impl CopyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStage::Read => "read",
            CopyStage::Write => "write",
        }
    }
}

/// Initialize metrics descriptions.
pub fn init_metrics() {
    describe_gauge!(
        "broadcastd_active_connections",
        "Number of connections currently being served"
    );
    describe_counter!(
        "broadcastd_connections_total",
        "Total number of connections accepted"
    );
    describe_histogram!(
        "broadcastd_connection_duration_seconds",
        "Time from accept until the last matched file was written"
    );

    describe_histogram!(
        "broadcastd_enumerate_duration_seconds",
        "Time spent expanding the glob pattern"
    );
    describe_counter!(
        "broadcastd_files_served_total",
        "Files copied completely to a client"
    );
    describe_counter!(
        "broadcastd_open_errors_total",
        "Matched files that could not be opened"
    );
    describe_counter!(
        "broadcastd_copy_errors_total",
        "File transfers abandoned part way"
    );
    describe_counter!("broadcastd_bytes_sent_total", "Total bytes sent to clients");
}

/// Start the Prometheus metrics HTTP server.
pub fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // 1ms to ~16s, exponential
    let duration_buckets: [f64; 15] = [
        0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096,
        8.192, 16.384,
    ];

    PrometheusBuilder::new()
        .set_buckets(&duration_buckets)
        .map_err(|e| anyhow::anyhow!("Invalid histogram buckets: {}", e))?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

/// Record connection accepted.
pub fn record_connection_accepted() {
    counter!("broadcastd_connections_total").increment(1);
}

/// Update active connection gauge.
pub fn set_active_connections(count: u64) {
    gauge!("broadcastd_active_connections").set(count as f64);
}

/// Record how long one connection took to serve.
pub fn record_connection_duration(duration: Duration) {
    histogram!("broadcastd_connection_duration_seconds").record(duration.as_secs_f64());
}

/// Record glob expansion time.
pub fn record_enumerate_duration(duration: Duration) {
    histogram!("broadcastd_enumerate_duration_seconds").record(duration.as_secs_f64());
}

/// Record a file fully copied to a client.
pub fn record_file_served() {
    counter!("broadcastd_files_served_total").increment(1);
}

/// Record a matched file that failed to open.
pub fn record_open_error() {
    counter!("broadcastd_open_errors_total").increment(1);
}

/// Record an abandoned transfer.
pub fn record_copy_error(stage: CopyStage, reason: ErrorReason) {
    counter!(
        "broadcastd_copy_errors_total",
        "stage" => stage.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record bytes sent to client.
pub fn record_bytes_sent(bytes: u64) {
    counter!("broadcastd_bytes_sent_total").increment(bytes);
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_disconnect() {
        let err = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(ErrorReason::from_io_error(&err), ErrorReason::ClientDisconnected);

        let err = io::Error::from_raw_os_error(libc::ECONNRESET);
        assert_eq!(ErrorReason::from_io_error(&err), ErrorReason::ClientDisconnected);
    }

    #[test]
    fn test_classify_timeout_and_other() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "Write timeout");
        assert_eq!(ErrorReason::from_io_error(&err), ErrorReason::Timeout);

        let err = io::Error::new(io::ErrorKind::InvalidData, "bad");
        assert_eq!(ErrorReason::from_io_error(&err), ErrorReason::Other);
    }

    #[test]
    fn test_labels() {
        assert_eq!(CopyStage::Read.as_str(), "read");
        assert_eq!(CopyStage::Write.as_str(), "write");
        assert_eq!(ErrorReason::Canceled.as_str(), "canceled");
    }
}
