//! Shutdown Coordination
//!
//! Shutdown is driven by an explicit cancellation handle. OS termination
//! signals are observed by a separate task that simply triggers the handle, so
//! a signal and a programmatic stop take exactly the same path.
//!
//! ```text
//! SIGINT / SIGTERM ──► signal watcher task ──┐
//!                                            ├──► ShutdownHandle::trigger
//! caller (tests, embedding code) ────────────┘          │
//!                                                       ▼
//!                                   accept loop stops, connections drain
//! ```

use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Cloneable cancellation handle shared by the server and its controllers
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown.
    ///
    /// Returns `true` only for the call that actually initiated it; later
    /// calls are no-ops.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once shutdown has been requested (immediately if it already was)
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Process interrupt and terminate signal listeners.
///
/// Handlers are registered at construction, so a signal delivered after
/// `install` returns is never lost.
pub struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Register the handlers. Must be called inside a Tokio runtime.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next signal and return its name
    #[cfg(unix)]
    pub async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending().await
            }
        }
    }
}

/// Spawn the task that turns the first termination signal into a shutdown
/// request. The task exits on its own once shutdown is requested elsewhere.
pub fn spawn_signal_watcher(signals: TerminationSignals, shutdown: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            name = signals.recv() => {
                info!(signal = name, "Received termination signal");
                shutdown.trigger();
            }
            _ = shutdown.cancelled() => {}
        }
    })
}
