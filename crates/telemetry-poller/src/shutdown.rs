//! Shared Shutdown Signal

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Why the dashboard is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator asked to quit
    OperatorQuit,
    /// The OBD link died while polling
    LinkLost,
    /// The render surface could not draw
    SurfaceFailed,
}

/// One-shot broadcast observed by the poller and the render loop.
///
/// The first trigger wins; later triggers are ignored.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
    rx: watch::Receiver<Option<ShutdownReason>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Raise the signal. Returns `false` if it was already raised.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!("Shutdown requested: {:?}", reason);
        }
        first
    }

    /// Reason of the first trigger, if any
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.rx.borrow()
    }

    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the signal is raised
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.rx.clone();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        reason.unwrap_or(ShutdownReason::OperatorQuit)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
