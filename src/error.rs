//! Error types for the broadcast daemon.
//!
//! `DaemonError` covers everything that is fatal at the process boundary.
//! `ContentError` and `StreamError` are per-file and are only ever logged.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Process-level error. Any of these terminates the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("{0}")]
    Config(String),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Bad file globbing pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Accept error: {0}")]
    Accept(#[source] io::Error),

    #[error("Listener closed")]
    ListenerClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reading one matched file.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Error opening {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error copying from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ContentError {
    /// Path of the file the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            ContentError::Open { path, .. } | ContentError::Read { path, .. } => path,
        }
    }
}

/// Errors writing one file's bytes to the client.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Write error: {0}")]
    Write(#[from] io::Error),

    #[error("Write timeout")]
    Timeout,
}
