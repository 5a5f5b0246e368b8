//! Unix socket listener shared between the accept loop and the shutdown watcher.
//!
//! Creation and close both happen under one mutex, so an interrupt that
//! arrives while the socket is being bound either sees no listener (and
//! prevents it from ever being created) or sees the finished one and closes
//! it.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::error::{DaemonError, Result};

/// Lifecycle of the shared listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Not bound yet.
    Uninitialized,
    /// Bound and accepting.
    Listening,
    /// Closed on request; the accept loop is about to fail.
    Closing,
    /// Done for good. Nothing can be bound any more.
    Terminated,
}

/// Handle to the process-wide listener. Cheap to clone.
#[derive(Clone)]
pub struct SharedListener {
    inner: Arc<Inner>,
}

struct Inner {
    slot: Mutex<Slot>,
    closed: watch::Sender<bool>,
}

struct Slot {
    phase: ListenerPhase,
    socket: Option<Arc<BoundSocket>>,
}

struct BoundSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl SharedListener {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    phase: ListenerPhase::Uninitialized,
                    socket: None,
                }),
                closed,
            }),
        }
    }

    /// Bind the unix socket described by `config`. Only succeeds once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self, config: &ServerConfig) -> Result<PathBuf> {
        let mut slot = self.lock();
        match slot.phase {
            ListenerPhase::Uninitialized => {}
            ListenerPhase::Listening => {
                return Err(DaemonError::Listener("listener already created".to_string()))
            }
            ListenerPhase::Closing | ListenerPhase::Terminated => {
                return Err(DaemonError::ListenerClosed)
            }
        }

        let socket_path = PathBuf::from(&config.socket_path);

        if config.unlink_stale_socket && socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|e| {
                DaemonError::Listener(format!(
                    "Failed to remove stale socket {}: {}",
                    socket_path.display(),
                    e
                ))
            })?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            DaemonError::Listener(format!(
                "Failed to bind socket {}: {}",
                socket_path.display(),
                e
            ))
        })?;

        // From here on the socket file is ours and is removed on drop.
        let socket = BoundSocket {
            listener,
            path: socket_path.clone(),
        };

        if let Some(mode) = config.socket_mode {
            set_socket_permissions(&socket_path, mode)?;
        }

        tracing::info!(socket_path = %socket_path.display(), "Unix socket listener bound");

        slot.socket = Some(Arc::new(socket));
        slot.phase = ListenerPhase::Listening;
        Ok(socket_path)
    }

    /// Close the listener if one is open.
    ///
    /// Returns true when a bound listener was closed. When nothing has been
    /// bound yet the listener moves straight to `Terminated` so a later
    /// `bind` fails. Either way any pending `accept_next` returns
    /// `DaemonError::ListenerClosed`.
    pub fn close_if_present(&self) -> bool {
        let mut slot = self.lock();
        let closed = match slot.phase {
            ListenerPhase::Listening => {
                slot.phase = ListenerPhase::Closing;
                if let Some(socket) = slot.socket.take() {
                    socket.unlink();
                }
                true
            }
            ListenerPhase::Uninitialized => {
                slot.phase = ListenerPhase::Terminated;
                false
            }
            ListenerPhase::Closing | ListenerPhase::Terminated => false,
        };
        drop(slot);

        self.inner.closed.send_replace(true);
        closed
    }

    /// Wait for the next client.
    ///
    /// Every error is final: a closed listener reports `ListenerClosed`, an
    /// OS failure reports `Accept`.
    pub async fn accept_next(&self) -> Result<UnixStream> {
        let socket = {
            let slot = self.lock();
            match (&slot.socket, slot.phase) {
                (Some(socket), ListenerPhase::Listening) => Arc::clone(socket),
                _ => return Err(DaemonError::ListenerClosed),
            }
        };
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(DaemonError::ListenerClosed);
        }

        tokio::select! {
            biased;
            _ = closed.changed() => Err(DaemonError::ListenerClosed),
            result = socket.listener.accept() => {
                result.map(|(stream, _addr)| stream).map_err(DaemonError::Accept)
            }
        }
    }

    /// Record that the daemon is going down and drop the listener.
    pub fn terminate(&self) {
        let mut slot = self.lock();
        slot.phase = ListenerPhase::Terminated;
        slot.socket = None;
        drop(slot);
        self.inner.closed.send_replace(true);
    }

    pub fn phase(&self) -> ListenerPhase {
        self.lock().phase
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot is always left consistent, so a poisoned lock is usable.
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SharedListener {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundSocket {
    fn unlink(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "Failed to remove socket file"
                );
            }
        }
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        self.unlink();
    }
}

/// Set socket file permissions.
fn set_socket_permissions(path: &Path, mode: u32) -> Result<()> {
    let permissions = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, permissions).map_err(|e| {
        DaemonError::Listener(format!(
            "Failed to set socket permissions on {}: {}",
            path.display(),
            e
        ))
    })
}
