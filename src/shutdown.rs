//! Graceful shutdown support for the gateway.
//!
//! On SIGTERM or SIGINT the server stops accepting connections and waits for
//! in-flight GraphQL requests to finish, up to a configurable timeout.

use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Configuration for graceful shutdown behavior.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight requests to complete (default: 30 seconds)
    pub timeout: Duration,
    /// Whether to handle OS signals (SIGTERM, SIGINT) automatically (default: true)
    pub handle_signals: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            handle_signals: true,
        }
    }
}

/// Current state of the shutdown process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Shutdown,
}

/// Tracks in-flight requests and broadcasts the shutdown state.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    state_tx: Arc<watch::Sender<ShutdownState>>,
    active_count: Arc<AtomicUsize>,
    is_shutting_down: Arc<AtomicBool>,
    config: ShutdownConfig,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &*self.state_tx.borrow())
            .field("active_count", &self.active_count())
            .finish()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(ShutdownConfig::default())
    }
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            state_tx: Arc::new(state_tx),
            active_count: Arc::new(AtomicUsize::new(0)),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Number of requests currently holding a [`RequestGuard`]
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn watch_state(&self) -> watch::Receiver<ShutdownState> {
        self.state_tx.subscribe()
    }

    /// Track a request until the returned guard is dropped.
    pub fn request_guard(&self) -> RequestGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            coordinator: self.clone(),
        }
    }

    /// Move to `Draining`, wait for in-flight requests, then mark `Shutdown`.
    pub async fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }

        info!("Initiating graceful shutdown");
        self.state_tx.send_replace(ShutdownState::Draining);

        let start = std::time::Instant::now();
        loop {
            let active = self.active_count();
            if active == 0 {
                info!("All requests completed");
                break;
            }
            if start.elapsed() >= self.config.timeout {
                warn!(active_count = active, "Shutdown timeout reached with requests still active");
                break;
            }
            debug!(active_count = active, "Waiting for in-flight requests");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.state_tx.send_replace(ShutdownState::Shutdown);
        info!("Graceful shutdown complete");
    }

    /// Future that completes once shutdown has been initiated.
    ///
    /// Pass it to `axum::serve(..).with_graceful_shutdown()`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.watch_state();
        async move {
            // An error means the sender is gone, which only happens when the
            // coordinator itself was dropped.
            let _ = rx.wait_for(|state| *state != ShutdownState::Running).await;
        }
    }
}

/// Decrements the active request count when dropped.
pub struct RequestGuard {
    coordinator: ShutdownCoordinator,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let prev = self.coordinator.active_count.fetch_sub(1, Ordering::SeqCst);
        debug!(active_count = prev.saturating_sub(1), "Request completed");
    }
}

/// Completes on SIGTERM or SIGINT.
///
/// If a handler cannot be installed the error is logged and the future
/// never resolves, leaving the process to be stopped externally.
#[cfg(unix)]
pub async fn signal_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
    }
}

/// Completes on Ctrl+C.
#[cfg(not(unix))]
pub async fn signal_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return std::future::pending().await;
    }
    info!("Received Ctrl+C");
}

/// Serve `app` until a shutdown signal, then drain in-flight requests.
///
/// Connections still open `timeout` after shutdown began are abandoned.
pub async fn run_with_graceful_shutdown(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    coordinator: ShutdownCoordinator,
) -> std::io::Result<()> {
    if coordinator.config.handle_signals {
        let on_signal = coordinator.clone();
        tokio::spawn(async move {
            signal_shutdown().await;
            on_signal.shutdown().await;
        });
    }

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(coordinator.shutdown_signal())
        .into_future();

    let timeout = coordinator.config.timeout;
    let started = coordinator.shutdown_signal();
    let drain_deadline = async move {
        started.await;
        tokio::time::sleep(timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "Drain timeout reached, closing open connections"
            );
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
