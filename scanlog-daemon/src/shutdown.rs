//! Graceful shutdown coordination.
//!
//! The [`ShutdownCoordinator`] owns the daemon's shutdown state and runs the
//! shutdown sequence exactly once:
//!
//! 1. Cancel the acceptor and wait for it to exit (listener socket closed).
//! 2. Cancel every connection task and wait until all have settled. Each
//!    connection flushes its remaining lines before it settles.
//! 3. Drain the worker pool.
//! 4. Enter `Drained`.
//!
//! Shutdown requests arrive on an mpsc channel. Signal handlers and the
//! acceptor supervisor only enqueue a [`ShutdownRequest`]; they never touch
//! the state directly.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use scanlog_collector::{CollectorError, ConnectionSet, SettleSummary, WorkerPool};
use scanlog_core::metrics as m;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const DRAINED: u8 = 2;

/// Daemon lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accepting connections.
    Running,
    /// Shutdown sequence in progress.
    ShuttingDown,
    /// All connections settled and the pool drained.
    Drained,
}

impl ShutdownState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            RUNNING => Self::Running,
            SHUTTING_DOWN => Self::ShuttingDown,
            _ => Self::Drained,
        }
    }
}

/// Why a shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRequest {
    /// An OS signal (`SIGTERM` or `SIGINT`).
    Signal(&'static str),
    /// The acceptor stopped on its own after a fatal accept error.
    ListenerExited,
    /// Requested programmatically through a shutdown handle.
    Requested,
    /// Every request sender was dropped.
    ChannelClosed,
}

impl fmt::Display for ShutdownRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::ListenerExited => f.write_str("listener exited"),
            Self::Requested => f.write_str("requested"),
            Self::ChannelClosed => f.write_str("request channel closed"),
        }
    }
}

/// Result of the shutdown sequence, returned once to the caller that ran it.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// The request that triggered the shutdown.
    pub reason: ShutdownRequest,
    /// How the connection tasks ended.
    pub connections: SettleSummary,
    /// Time from the start of the sequence to `Drained`.
    pub elapsed: Duration,
}

/// Runs the shutdown sequence at most once.
pub struct ShutdownCoordinator {
    state: AtomicU8,
    listener_cancel: CancellationToken,
    listener_task: Mutex<Option<JoinHandle<Result<(), CollectorError>>>>,
    connections: ConnectionSet,
    pool: WorkerPool,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the `Running` state.
    ///
    /// `listener_cancel` must be the token the acceptor was bound with.
    pub fn new(
        listener_cancel: CancellationToken,
        connections: ConnectionSet,
        pool: WorkerPool,
    ) -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            listener_cancel,
            listener_task: Mutex::new(None),
            connections,
            pool,
        }
    }

    /// Register the task running the acceptor so shutdown can wait for it.
    pub fn attach_listener(&self, task: JoinHandle<Result<(), CollectorError>>) {
        *self
            .listener_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run the shutdown sequence.
    ///
    /// Only the first call performs the sequence and returns `Some(report)`.
    /// Every other call, concurrent or later, is a no-op returning `None`.
    pub async fn shutdown(&self, reason: ShutdownRequest) -> Option<ShutdownReport> {
        if self
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%reason, "shutdown already in progress, ignoring request");
            return None;
        }

        let started = Instant::now();
        tracing::info!(%reason, "shutting down");

        // 1. Stop accepting.
        self.listener_cancel.cancel();
        let listener = self
            .listener_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = listener {
            match task.await {
                Ok(Ok(())) => tracing::debug!("acceptor stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "acceptor had already failed"),
                Err(e) => tracing::error!(error = %e, "acceptor task failed"),
            }
        }

        // 2. Settle connections.
        let connections = self.connections.cancel_and_settle().await;
        tracing::info!(
            completed = connections.completed,
            cancelled = connections.cancelled,
            failed = connections.failed,
            panicked = connections.panicked,
            "connections settled"
        );

        // 3. Drain pool.
        self.pool.drain().await;

        // 4. Drained.
        self.state.store(DRAINED, Ordering::Release);
        let elapsed = started.elapsed();
        metrics::gauge!(m::DAEMON_SHUTDOWN_DURATION_SECONDS).set(elapsed.as_secs_f64());
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "shutdown complete");

        Some(ShutdownReport {
            reason,
            connections,
            elapsed,
        })
    }

    /// Wait for the first shutdown request and run the sequence.
    ///
    /// Requests arriving while the sequence runs are logged and ignored.
    pub async fn run(&self, mut requests: mpsc::Receiver<ShutdownRequest>) -> Option<ShutdownReport> {
        let reason = requests
            .recv()
            .await
            .unwrap_or(ShutdownRequest::ChannelClosed);

        let shutdown = self.shutdown(reason);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                report = &mut shutdown => return report,
                Some(extra) = requests.recv() => {
                    tracing::info!(request = %extra, "shutdown already in progress, ignoring request");
                }
            }
        }
    }
}

/// Spawn a task that turns `SIGTERM`/`SIGINT` into shutdown requests.
///
/// Each delivered signal enqueues one request. The task exits when the
/// request channel is closed.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
#[cfg(unix)]
pub fn spawn_signal_listener(requests: mpsc::Sender<ShutdownRequest>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                else => break,
            };
            tracing::info!(signal = name, "shutdown signal received");
            if requests.send(ShutdownRequest::Signal(name)).await.is_err() {
                break;
            }
        }
    }))
}

/// Spawn a task that turns Ctrl-C into shutdown requests.
#[cfg(not(unix))]
pub fn spawn_signal_listener(requests: mpsc::Sender<ShutdownRequest>) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(signal = "ctrl-c", "shutdown signal received");
            if requests.send(ShutdownRequest::Signal("ctrl-c")).await.is_err() {
                break;
            }
        }
    }))
}
