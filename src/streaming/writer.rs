//! Single writer per connection.
//!
//! Writes directly to the client socket without extra buffering, one file
//! at a time, in the order the streams arrive.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::handoff::HandoffReceiver;
use super::source::ContentStream;
use super::COPY_BUF_SIZE;
use crate::error::{ContentError, StreamError};
use crate::metrics::{self, CopyStage, ErrorReason};

/// What one connection's writer got through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSummary {
    /// Files copied in full.
    pub files_sent: usize,
    /// Files whose transfer was abandoned or truncated.
    pub files_failed: usize,
    /// Bytes written to the client.
    pub bytes_written: u64,
}

enum CopyFailure {
    /// The file side failed; the client got a truncated copy.
    Read(ContentError),
    /// The client side failed; the rest of this file was dropped.
    Write(StreamError),
}

/// Copies handed-off streams to the client with an optional per-write deadline.
pub struct ContentWriter<W> {
    conn: W,
    write_timeout: Option<Duration>,
    bytes_written: u64,
}

impl<W> ContentWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a writer for one client connection.
    pub fn new(conn: W, write_timeout: Option<Duration>) -> Self {
        Self {
            conn,
            write_timeout,
            bytes_written: 0,
        }
    }

    /// Copy every stream from `streams` until the feeder closes the channel,
    /// then shut down the write side of the connection.
    ///
    /// A failed file is logged and skipped; the remaining files are still
    /// attempted.
    pub async fn drain(mut self, mut streams: HandoffReceiver<ContentStream>) -> WriterSummary {
        let mut summary = WriterSummary::default();

        while let Some(stream) = streams.recv().await {
            let path = stream.path().to_path_buf();
            match self.copy_stream(stream).await {
                Ok(bytes) => {
                    summary.files_sent += 1;
                    metrics::record_file_served();
                    tracing::trace!(path = %path.display(), bytes, "File sent");
                }
                Err(CopyFailure::Read(e)) => {
                    // Already logged and counted by the pump.
                    summary.files_failed += 1;
                    tracing::debug!(error = %e, "Client received a truncated file");
                }
                Err(CopyFailure::Write(e)) => {
                    summary.files_failed += 1;
                    metrics::record_copy_error(CopyStage::Write, stream_error_reason(&e));
                    tracing::warn!(path = %path.display(), error = %e, "Error copying to socket");
                }
            }
        }

        if let Err(e) = self.shutdown().await {
            tracing::debug!(error = %e, "Failed to shut down client connection");
        }

        summary.bytes_written = self.bytes_written;
        summary
    }

    async fn copy_stream(&mut self, mut stream: ContentStream) -> Result<u64, CopyFailure> {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut copied: u64 = 0;

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(source) => {
                    return Err(CopyFailure::Read(ContentError::Read {
                        path: stream.path().to_path_buf(),
                        source,
                    }))
                }
            };
            self.write_with_timeout(&buf[..n])
                .await
                .map_err(CopyFailure::Write)?;
            copied += n as u64;
        }

        stream.finish().await.map_err(CopyFailure::Read)?;
        Ok(copied)
    }

    async fn write_with_timeout(&mut self, data: &[u8]) -> Result<(), StreamError> {
        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.conn.write_all(data))
                .await
                .map_err(|_| StreamError::Timeout)??,
            None => self.conn.write_all(data).await?,
        }

        self.bytes_written += data.len() as u64;
        metrics::record_bytes_sent(data.len() as u64);
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.conn.shutdown())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Shutdown timeout"))?,
            None => self.conn.shutdown().await,
        }
    }
}

fn stream_error_reason(err: &StreamError) -> ErrorReason {
    match err {
        StreamError::Write(e) => ErrorReason::from_io_error(e),
        StreamError::Timeout => ErrorReason::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{handoff, ContentSource};
    use std::path::Path;

    fn write_files(dir: &Path, files: &[(&str, &[u8])]) {
        for (name, data) in files {
            std::fs::write(dir.join(name), data).unwrap();
        }
    }

    #[tokio::test]
    async fn test_drain_writes_streams_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("a", b"AB"), ("b", b"CD"), ("c", b"EF")]);

        let (client, server) = tokio::io::duplex(1024);
        let (tx, rx) = handoff::channel();
        let writer = tokio::spawn(ContentWriter::new(server, None).drain(rx));

        let source = ContentSource::new(8);
        for name in ["a", "b", "c"] {
            let stream = source.open(&dir.path().join(name)).await.unwrap();
            tx.send(stream).await.unwrap();
        }
        drop(tx);

        let mut client = client;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();

        let summary = writer.await.unwrap();
        assert_eq!(out, b"ABCDEF");
        assert_eq!(summary.files_sent, 3);
        assert_eq!(summary.files_failed, 0);
        assert_eq!(summary.bytes_written, 6);
    }

    #[tokio::test]
    async fn test_truncated_file_counts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("a", b"AB")]);
        std::fs::create_dir(dir.path().join("b")).unwrap();

        let (mut client, server) = tokio::io::duplex(1024);
        let (tx, rx) = handoff::channel();
        let writer = tokio::spawn(ContentWriter::new(server, None).drain(rx));

        let source = ContentSource::new(8);
        for name in ["a", "b"] {
            let stream = source.open(&dir.path().join(name)).await.unwrap();
            tx.send(stream).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();

        let summary = writer.await.unwrap();
        assert_eq!(out, b"AB");
        assert_eq!(summary.files_sent, 1);
        assert_eq!(summary.files_failed, 1);
    }

    #[tokio::test]
    async fn test_client_gone_does_not_stop_drain() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("a", b"AB"), ("b", b"CD")]);

        let (client, server) = tokio::io::duplex(1024);
        drop(client);

        let (tx, rx) = handoff::channel();
        let writer = tokio::spawn(ContentWriter::new(server, None).drain(rx));

        let source = ContentSource::new(8);
        for name in ["a", "b"] {
            let stream = source.open(&dir.path().join(name)).await.unwrap();
            tx.send(stream).await.unwrap();
        }
        drop(tx);

        let summary = writer.await.unwrap();
        assert_eq!(summary.files_sent, 0);
        assert_eq!(summary.files_failed, 2);
        assert_eq!(summary.bytes_written, 0);
    }

    #[tokio::test]
    async fn test_write_timeout_abandons_file() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("big", &[1u8; 4096])]);

        // Nobody reads the client side and its buffer is tiny.
        let (_client, server) = tokio::io::duplex(16);
        let (tx, rx) = handoff::channel();
        let writer = tokio::spawn(
            ContentWriter::new(server, Some(Duration::from_millis(50))).drain(rx),
        );

        let stream = ContentSource::new(64)
            .open(&dir.path().join("big"))
            .await
            .unwrap();
        tx.send(stream).await.unwrap();
        drop(tx);

        let summary = writer.await.unwrap();
        assert_eq!(summary.files_sent, 0);
        assert_eq!(summary.files_failed, 1);
        assert!(summary.bytes_written < 4096);
    }
}
