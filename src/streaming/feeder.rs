//! Drives one connection: enumerate, open, hand off, wait for the writer.

use std::time::Duration;

use tokio::io::AsyncWrite;

use super::enumerate::FileEnumerator;
use super::handoff;
use super::source::ContentSource;
use super::writer::{ContentWriter, WriterSummary};
use crate::error::DaemonError;
use crate::metrics::{self, Timer};

/// Outcome of feeding one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    /// Paths the pattern matched.
    pub matched: usize,
    /// Matched paths that could not be opened.
    pub skipped: usize,
    /// What the writer managed to deliver.
    pub writer: WriterSummary,
}

/// Feeds the files matching one pattern to a connection.
#[derive(Debug, Clone)]
pub struct ContentFeeder {
    enumerator: FileEnumerator,
    source: ContentSource,
    write_timeout: Option<Duration>,
}

impl ContentFeeder {
    pub fn new(
        enumerator: FileEnumerator,
        source: ContentSource,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            enumerator,
            source,
            write_timeout,
        }
    }

    /// Stream every current match of the pattern to `conn`, in sorted order.
    ///
    /// The writer runs as its own task and owns `conn`; this side opens the
    /// files and blocks on each handoff until the writer takes it. Files that
    /// fail to open are skipped. The only error is a malformed pattern, which
    /// is fatal to the whole daemon; the connection is still closed cleanly
    /// before it is returned.
    pub async fn feed<W>(&self, conn: W) -> Result<FeedSummary, DaemonError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = handoff::channel();
        let writer = tokio::spawn(ContentWriter::new(conn, self.write_timeout).drain(rx));

        let enumerator = self.enumerator.clone();
        let timer = Timer::new();
        let enumerated = match tokio::task::spawn_blocking(move || enumerator.enumerate()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(DaemonError::Io(std::io::Error::other(e.to_string()))),
        };
        metrics::record_enumerate_duration(timer.elapsed());

        let paths = match enumerated {
            Ok(paths) => paths,
            Err(e) => {
                drop(tx);
                let _ = join_writer(writer).await;
                return Err(e);
            }
        };

        let mut summary = FeedSummary {
            matched: paths.len(),
            ..FeedSummary::default()
        };
        tracing::debug!(
            pattern = self.enumerator.pattern(),
            matched = paths.len(),
            "Pattern expanded"
        );

        for (index, path) in paths.iter().enumerate() {
            let stream = match self.source.open(path).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping file");
                    metrics::record_open_error();
                    summary.skipped += 1;
                    continue;
                }
            };

            if tx.send(stream).await.is_err() {
                tracing::warn!(
                    remaining = paths.len() - index - 1,
                    "Writer went away, abandoning remaining files"
                );
                break;
            }
        }

        drop(tx);
        summary.writer = join_writer(writer).await;
        Ok(summary)
    }
}

/// Wait for the writer task, re-raising its panic on this task.
async fn join_writer(writer: tokio::task::JoinHandle<WriterSummary>) -> WriterSummary {
    match writer.await {
        Ok(summary) => summary,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            tracing::warn!(error = %e, "Writer task cancelled");
            WriterSummary::default()
        }
    }
}
