//! Application lifecycle and graceful shutdown.
//!
//! 1. **Startup**: spawn every [`DeliveryConsumer`]
//! 2. **Runtime**: serve HTTP until Ctrl+C or SIGTERM
//! 3. **Shutdown**: broadcast to consumers, wait for each to drain its
//!    in-flight deliveries, up to the configured timeout
//!
//! The purchase service runs with no consumers; the persistence consumer
//! runs one consumer behind its ops listener.

use seatguard_runtime::DeliveryConsumer;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A configured process ready to run.
pub struct Application {
    listener: tokio::net::TcpListener,
    router: axum::Router,
    consumers: Vec<DeliveryConsumer>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Create an application.
    ///
    /// `shutdown_tx` must be the sender whose receivers were handed to the
    /// consumers.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        router: axum::Router,
        consumers: Vec<DeliveryConsumer>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            router,
            consumers,
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until<S>(self, signal: S) -> Result<(), Box<dyn std::error::Error>>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        if let Ok(address) = self.listener.local_addr() {
            info!(%address, "HTTP server listening");
        }

        info!(consumer_count = self.consumers.len(), "Starting consumers");
        let handles: Vec<(String, JoinHandle<()>)> = self
            .consumers
            .into_iter()
            .map(|consumer| (consumer.name().to_string(), consumer.spawn()))
            .collect();

        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown...");
        // No receivers left is fine: every consumer may already have exited.
        let _ = self.shutdown_tx.send(());
        Self::await_shutdown(handles, self.shutdown_timeout).await;

        served?;
        info!("Graceful shutdown complete");
        Ok(())
    }

    async fn await_shutdown(handles: Vec<(String, JoinHandle<()>)>, timeout: Duration) {
        for (consumer, handle) in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(%consumer, "Consumer stopped gracefully"),
                Ok(Err(e)) => warn!(%consumer, error = %e, "Consumer task failed"),
                Err(_) => warn!(%consumer, "Consumer shutdown timed out"),
            }
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
