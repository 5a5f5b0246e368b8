//! Lazy per-file byte streams.
//!
//! Opening a file spawns a pump task that copies it into an in-memory pipe.
//! The consumer reads the other end of the pipe at its own pace; the file
//! handle and the pipe's write half are released when the pump returns,
//! whichever way it returns.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::oneshot;

use super::COPY_BUF_SIZE;
use crate::error::ContentError;
use crate::metrics::{self, CopyStage, ErrorReason};

/// Opens matched files as [`ContentStream`]s.
#[derive(Debug, Clone)]
pub struct ContentSource {
    pipe_capacity: usize,
}

impl ContentSource {
    /// Create a source whose pipes buffer up to `pipe_capacity` bytes.
    pub fn new(pipe_capacity: usize) -> Self {
        Self { pipe_capacity }
    }

    /// Open `path` and start pumping its bytes.
    ///
    /// Only the open itself can fail here. Read failures surface later
    /// through [`ContentStream::finish`].
    pub async fn open(&self, path: &Path) -> Result<ContentStream, ContentError> {
        let file = File::open(path).await.map_err(|source| ContentError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let (pipe, reader) = tokio::io::duplex(self.pipe_capacity);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(pump(path.to_path_buf(), file, pipe, done_tx));

        Ok(ContentStream {
            path: path.to_path_buf(),
            reader,
            outcome: done_rx,
        })
    }
}

/// Readable bytes of one file, fed by a background pump.
///
/// Reads return end-of-data both when the file was fully copied and when the
/// pump gave up part way; [`ContentStream::finish`] tells the two apart.
/// Dropping the stream early stops the pump at its next write.
pub struct ContentStream {
    path: PathBuf,
    reader: DuplexStream,
    outcome: oneshot::Receiver<Result<u64, ContentError>>,
}

impl ContentStream {
    /// Path of the file behind this stream.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the pump and return how many bytes it read from the file.
    ///
    /// Call after reading to end-of-data. An error means the bytes seen so
    /// far are a truncated copy of the file.
    pub async fn finish(self) -> Result<u64, ContentError> {
        let ContentStream { path, reader, outcome } = self;
        let result = outcome.await.unwrap_or_else(|_| {
            Err(ContentError::Read {
                path,
                source: io::Error::other("copy task ended without reporting"),
            })
        });
        drop(reader);
        result
    }
}

impl AsyncRead for ContentStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

async fn pump(
    path: PathBuf,
    mut file: File,
    mut pipe: DuplexStream,
    done: oneshot::Sender<Result<u64, ContentError>>,
) {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total: u64 = 0;

    let result = loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => break Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                break Err(ContentError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };

        if let Err(e) = pipe.write_all(&buf[..n]).await {
            // Reader dropped the stream: nothing left to report to.
            tracing::debug!(path = %path.display(), error = %e, "Stream abandoned by reader");
            return;
        }
        total += n as u64;
    };

    if let Err(e) = &result {
        tracing::warn!(error = %e, "File copy failed");
        let reason = match e {
            ContentError::Read { source, .. } => ErrorReason::from_io_error(source),
            ContentError::Open { .. } => ErrorReason::Other,
        };
        metrics::record_copy_error(CopyStage::Read, reason);
    }

    let _ = pipe.shutdown().await;
    drop(pipe);
    drop(file);
    let _ = done.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_yields_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let source = ContentSource::new(4);
        let mut stream = source.open(&path).await.unwrap();
        assert_eq!(stream.path(), path.as_path());

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(stream.finish().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_large_file_through_small_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let mut stream = ContentSource::new(1024).open(&path).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(stream.finish().await.unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");

        let err = ContentSource::new(64).open(&path).await.unwrap_err();
        assert!(matches!(err, ContentError::Open { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    // A directory opens fine but fails on read: the stream ends empty and the
    // failure is reported by finish() instead of looking like a clean EOF.
    #[tokio::test]
    async fn test_read_failure_reported_by_finish() {
        let dir = tempfile::tempdir().unwrap();

        let mut stream = ContentSource::new(64).open(dir.path()).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();

        assert!(out.is_empty());
        assert!(matches!(
            stream.finish().await,
            Err(ContentError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_pump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![7u8; 1 << 20]).unwrap();

        let source = ContentSource::new(16);
        let stream = source.open(&path).await.unwrap();
        drop(stream);

        // The pump must not hold the file forever; reopening and draining
        // still works and nothing hangs.
        let mut again = source.open(&path).await.unwrap();
        let mut out = Vec::new();
        again.read_to_end(&mut out).await.unwrap();
        assert_eq!(out.len(), 1 << 20);
    }
}
