//! Termination signalling for in-flight runs.
//!
//! SIGINT/SIGTERM are forwarded onto a broadcast channel. Runs subscribe
//! while they are deferred or running, abandon their current wait and go
//! straight to cleanup.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::broadcast;

use crate::Result;

/// Shutdown signal that can be sent to all active runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Graceful shutdown requested (first SIGINT/SIGTERM)
    Graceful,
    /// Force shutdown requested (signal repeated)
    Force,
}

/// Broadcasts termination to every subscribed run
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a listener for shutdown signals
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.shutdown_tx.subscribe(),
            requested: Arc::clone(&self.requested),
        }
    }

    /// Tell every run to stop
    pub fn trigger(&self, signal: ShutdownSignal) {
        self.requested.store(true, Ordering::SeqCst);
        tracing::info!(?signal, "shutdown requested");
        let _ = self.shutdown_tx.send(signal);
    }

    /// Check if shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Forward process signals to this coordinator.
    ///
    /// The first SIGINT/SIGTERM triggers `Graceful`, any later one `Force`.
    pub async fn forward_signals(&self) -> Result<()> {
        let (mut sigint, mut sigterm) = signal_channels().await?;
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut signal = ShutdownSignal::Graceful;
            loop {
                let received = tokio::select! {
                    r = sigint.recv() => r,
                    r = sigterm.recv() => r,
                };
                if matches!(received, Err(broadcast::error::RecvError::Closed)) {
                    break;
                }
                coordinator.trigger(signal);
                signal = ShutdownSignal::Force;
            }
        });
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One run's view of the shutdown channel
#[derive(Debug)]
pub struct ShutdownListener {
    rx: broadcast::Receiver<ShutdownSignal>,
    requested: Arc<AtomicBool>,
}

impl ShutdownListener {
    /// Resolve once shutdown is requested; immediately if it already was.
    pub async fn triggered(&mut self) -> ShutdownSignal {
        if self.requested.load(Ordering::SeqCst) {
            return ShutdownSignal::Graceful;
        }
        loop {
            match self.rx.recv().await {
                Ok(signal) => return signal,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

/// Create signal channels for SIGINT and SIGTERM
///
/// Returns receivers that get a value every time the signal arrives
pub async fn signal_channels() -> Result<(broadcast::Receiver<()>, broadcast::Receiver<()>)> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to setup SIGINT: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to setup SIGTERM: {e}")))?;

        let (sigint_tx, sigint_rx) = broadcast::channel(4);
        let (sigterm_tx, sigterm_rx) = broadcast::channel(4);

        tokio::spawn(async move {
            while sigint.recv().await.is_some() {
                tracing::info!("Received SIGINT");
                let _ = sigint_tx.send(());
            }
        });

        tokio::spawn(async move {
            while sigterm.recv().await.is_some() {
                tracing::info!("Received SIGTERM");
                let _ = sigterm_tx.send(());
            }
        });

        Ok((sigint_rx, sigterm_rx))
    }

    #[cfg(not(unix))]
    {
        let (sigint_tx, sigint_rx) = broadcast::channel(4);
        let (sigterm_tx, sigterm_rx) = broadcast::channel(4);

        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
                let _ = sigint_tx.send(());
                // On non-Unix, treat both the same
                let _ = sigterm_tx.send(());
            }
        });

        Ok((sigint_rx, sigterm_rx))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::default();
        assert!(!coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_listener_receives_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let mut listener = coordinator.subscribe();

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger(ShutdownSignal::Force);
        });

        match tokio::time::timeout(Duration::from_secs(2), listener.triggered()).await {
            Ok(signal) => assert_eq!(signal, ShutdownSignal::Force),
            Err(e) => unreachable!("should receive signal within timeout: {e}"),
        }
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_earlier_trigger() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger(ShutdownSignal::Graceful);

        let mut listener = coordinator.subscribe();
        let signal = tokio::time::timeout(Duration::from_millis(100), listener.triggered()).await;
        assert_eq!(signal.ok(), Some(ShutdownSignal::Graceful));
    }

    #[tokio::test]
    async fn test_untriggered_listener_stays_pending() {
        let coordinator = ShutdownCoordinator::new();
        let mut listener = coordinator.subscribe();
        let waited = tokio::time::timeout(Duration::from_millis(30), listener.triggered()).await;
        assert!(waited.is_err());
    }
}
