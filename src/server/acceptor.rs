//! The accept loop.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::error::DaemonError;
use crate::server::connection::ConnectionHandler;
use crate::server::listener::SharedListener;
use crate::server::tracker::ConnectionTracker;
use crate::streaming::{ContentFeeder, ContentSource, FileEnumerator};

/// Accepts clients on the shared listener and serves each one concurrently.
pub struct Acceptor {
    listener: SharedListener,
    handler: Arc<ConnectionHandler>,
    fatal_rx: mpsc::UnboundedReceiver<DaemonError>,
    tracker: ConnectionTracker,
}

impl Acceptor {
    /// Build an acceptor serving `config.pattern` on an already bound listener.
    pub fn new(listener: SharedListener, config: &ServerConfig) -> Self {
        let feeder = ContentFeeder::new(
            FileEnumerator::new(&config.pattern),
            ContentSource::new(config.pipe_capacity),
            config.write_timeout(),
        );
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        Self {
            listener,
            handler: Arc::new(ConnectionHandler::new(feeder, fatal_tx)),
            fatal_rx,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Accept connections until something fatal happens.
    ///
    /// Never returns while things are healthy. Every accept error, a closed
    /// listener, and a fatal error from any connection ends the loop; the
    /// listener is terminated and the error handed back for the process to
    /// exit on. In-flight connections are not waited for.
    pub async fn serve(mut self) -> DaemonError {
        let err = loop {
            tokio::select! {
                biased;
                Some(err) = self.fatal_rx.recv() => break err,
                accepted = self.listener.accept_next() => match accepted {
                    Ok(stream) => {
                        let guard = self.tracker.register();
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(async move {
                            handler.handle(stream, guard).await;
                        });
                    }
                    Err(err) => break err,
                },
            }
        };

        self.listener.terminate();
        tracing::info!(
            active = self.tracker.active_connections(),
            "Accept loop terminated"
        );
        err
    }
}
