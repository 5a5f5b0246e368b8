//! Server module: shared unix socket listener, accept loop and connection handling.

mod acceptor;
mod connection;
mod listener;
mod tracker;

pub use acceptor::Acceptor;
pub use connection::ConnectionHandler;
pub use listener::{ListenerPhase, SharedListener};
pub use tracker::{ConnectionGuard, ConnectionTracker};
