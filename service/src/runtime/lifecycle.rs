//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: spawn the reconciler consumer, the outbox relay and the expiry sweeper
//! 2. **Runtime**: serve HTTP until Ctrl+C or SIGTERM
//! 3. **Shutdown**: stop accepting connections, broadcast shutdown, then wait for the
//!    background tasks (bounded by the configured shutdown timeout)

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A background task the application owns.
pub struct BackgroundTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Wraps a spawned task.
    #[must_use]
    pub const fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }
}

/// Running application with all background tasks.
pub struct Application {
    /// TCP listener for HTTP server
    listener: tokio::net::TcpListener,

    /// Axum router with all HTTP routes
    app: axum::Router,

    /// Consumer, relay and sweeper tasks
    tasks: Vec<BackgroundTask>,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,

    /// How long to wait for each background task on shutdown
    shutdown_timeout: Duration,
}

impl Application {
    /// Create a new application instance.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        app: axum::Router,
        tasks: Vec<BackgroundTask>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            app,
            tasks,
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Serve HTTP until a shutdown signal, then stop the background tasks.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the HTTP server fails.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Like [`run`](Self::run), but stops when `signal` completes.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the HTTP server fails.
    pub async fn run_until<F>(self, signal: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let address = self.listener.local_addr()?;
        info!(address = %address, tasks = self.tasks.len(), "HTTP server listening for requests");

        let served = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());
        Self::await_shutdown(self.tasks, self.shutdown_timeout).await;
        info!("Graceful shutdown complete");

        served
    }

    async fn await_shutdown(tasks: Vec<BackgroundTask>, timeout: Duration) {
        for task in tasks {
            match tokio::time::timeout(timeout, task.handle).await {
                Ok(Ok(())) => info!(task = task.name, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = task.name, error = %e, "Task failed"),
                Err(_) => warn!(task = task.name, "Task shutdown timed out"),
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed the error is logged and that signal is ignored.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
