//! Shutdown coordination.
//!
//! One external interrupt becomes one stop token on every registered listener's own channel.
//! Each channel buffers a token, so the broadcast never blocks on a slow listener.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Receiving half of a per-listener stop channel.
#[derive(Debug)]
pub struct StopSignal {
    rx: mpsc::Receiver<()>,
}

impl StopSignal {
    /// Completes once a stop token arrives. A coordinator that went away without
    /// broadcasting is not a stop request, so this then never completes.
    pub async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    /// Non-blocking check, for loops that poll between units of work.
    pub fn is_stopped(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    listeners: Vec<mpsc::Sender<()>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it gets its own channel with room for one token.
    pub fn register(&mut self) -> StopSignal {
        let (tx, rx) = mpsc::channel(1);
        self.listeners.push(tx);
        StopSignal { rx }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Send a stop token to every listener without blocking.
    pub fn broadcast(&self) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            match listener.try_send(()) {
                Ok(()) => trace!(listener = idx, "stop token delivered"),
                // a token is already queued, which is all the listener needs
                Err(mpsc::error::TrySendError::Full(())) => {
                    trace!(listener = idx, "stop token already pending")
                }
                Err(mpsc::error::TrySendError::Closed(())) => {
                    trace!(listener = idx, "listener already gone")
                }
            }
        }
    }

    /// Wait for `interrupt` once, then broadcast.
    pub fn spawn<F>(self, interrupt: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            trace!("signal handler started");
            interrupt.await;
            trace!("signal handler received interrupt");
            self.broadcast();
            trace!("signal handler exiting");
        })
    }
}

/// Resolves on the first Ctrl-C (SIGINT). Further interrupts force the process to exit, so a
/// stuck drain can still be aborted from the terminal.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for interrupt; shutdown must come from elsewhere");
        std::future::pending::<()>().await;
    }
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt received, exiting immediately");
            std::process::exit(130);
        }
    });
}
