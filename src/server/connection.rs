//! Connection handler: runs one feeder/writer pair per accepted client.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::DaemonError;
use crate::metrics::{self, Timer};
use crate::server::tracker::ConnectionGuard;
use crate::streaming::ContentFeeder;

/// Serves accepted connections and reports fatal errors to the acceptor.
pub struct ConnectionHandler {
    feeder: ContentFeeder,
    fatal: mpsc::UnboundedSender<DaemonError>,
}

impl ConnectionHandler {
    /// Create a handler. Fatal errors are sent on `fatal`.
    pub fn new(feeder: ContentFeeder, fatal: mpsc::UnboundedSender<DaemonError>) -> Self {
        Self { feeder, fatal }
    }

    /// Stream the current matches to `stream`, then close it.
    ///
    /// Per-file problems are handled inside the feeder. A panic is logged
    /// and only costs this connection.
    pub async fn handle(&self, stream: UnixStream, guard: ConnectionGuard) {
        let conn_id = guard.id();
        let span = tracing::info_span!("connection", id = conn_id);

        async move {
            let timer = Timer::new();
            let result = AssertUnwindSafe(self.feeder.feed(stream)).catch_unwind().await;

            match result {
                Ok(Ok(summary)) => {
                    metrics::record_connection_duration(timer.elapsed());
                    tracing::debug!(
                        matched = summary.matched,
                        skipped = summary.skipped,
                        sent = summary.writer.files_sent,
                        failed = summary.writer.files_failed,
                        bytes = summary.writer.bytes_written,
                        duration_ms = timer.elapsed().as_millis() as u64,
                        "Connection completed"
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Fatal error while serving connection");
                    let _ = self.fatal.send(e);
                }
                Err(panic) => {
                    let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    tracing::error!(panic = %panic_msg, "Connection handler panicked");
                }
            }

            drop(guard);
        }
        .instrument(span)
        .await
    }
}
