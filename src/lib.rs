//! Unix socket file broadcast daemon.
//!
//! Every client that connects receives the concatenated contents of all
//! files matching one glob pattern, expanded fresh for that connection and
//! sent in sorted order with no framing.

pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod streaming;

pub use config::Config;
pub use error::{DaemonError, Result};
