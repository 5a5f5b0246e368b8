//! Interrupt handling.
//!
//! SIGINT closes the shared listener. The accept loop then fails, which is
//! what brings the process down; open connections are not drained.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::server::SharedListener;

/// Closes the listener when the process is interrupted.
#[derive(Clone)]
pub struct ShutdownWatcher {
    listener: SharedListener,
}

impl ShutdownWatcher {
    pub fn new(listener: SharedListener) -> Self {
        Self { listener }
    }

    /// Register for SIGINT and watch for it on a background task.
    ///
    /// Registration happens before this returns, so an interrupt delivered
    /// afterwards is never missed.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            if sigint.recv().await.is_some() {
                self.trigger("SIGINT");
            }
        }))
    }

    /// Close the listener as if `reason` had been received.
    ///
    /// Returns whether a bound listener was actually closed.
    pub fn trigger(&self, reason: &str) -> bool {
        let closed = self.listener.close_if_present();
        tracing::warn!(signal = reason, listener_closed = closed, "Closing upon request");
        closed
    }
}
