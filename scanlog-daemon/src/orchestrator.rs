//! Daemon assembly and lifecycle management.
//!
//! The [`Orchestrator`] wires the collector components together:
//!
//! ```text
//! Acceptor ──> ConnectionSet ──> WorkerPool ──> EventSink (FileSink)
//!     ▲              ▲                ▲
//!     └──────── ShutdownCoordinator ──┘
//! ```
//!
//! # Startup Order
//!
//! 1. Metrics recorder (when enabled)
//! 2. Storage root (`FileSink::open`)
//! 3. Worker pool and connection set
//! 4. Listener bind (a bind failure is a startup error)
//!
//! # Shutdown Order
//!
//! See [`ShutdownCoordinator`]: acceptor, then connections, then pool.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use scanlog_collector::{Acceptor, ConnectionSet, EventSink, FileSink, WorkerPool};
use scanlog_core::config::ScanlogConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics_server;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownRequest, spawn_signal_listener};

/// Shutdown request channel capacity.
const SHUTDOWN_CHANNEL_CAPACITY: usize = 8;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: ScanlogConfig,
    /// Bound acceptor, started by [`run`](Self::run).
    acceptor: Acceptor,
    /// Shutdown sequence owner.
    coordinator: Arc<ShutdownCoordinator>,
    /// Request sender kept until `run` hands clones to the signal and listener tasks.
    shutdown_tx: mpsc::Sender<ShutdownRequest>,
    shutdown_rx: mpsc::Receiver<ShutdownRequest>,
}

impl Orchestrator {
    /// Build the daemon with the filesystem sink described by `[storage]`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The storage root cannot be created
    /// - The metrics recorder cannot be installed
    /// - The listener cannot bind
    pub async fn build(config: ScanlogConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let sink = FileSink::open(&config.storage)
            .with_context(|| format!("failed to open storage root '{}'", config.storage.log_dir))?;
        tracing::info!(
            log_dir = %sink.root().display(),
            marker = sink.marker(),
            reject_unmatched = config.storage.reject_unmatched,
            "storage ready"
        );

        Self::assemble(config, Arc::new(sink)).await
    }

    /// Build the daemon with a caller-provided sink.
    ///
    /// Useful for testing with counting or failing sinks.
    pub async fn build_with_sink(config: ScanlogConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        Self::assemble(config, sink).await
    }

    /// Wire the components together. `config` is already validated.
    async fn assemble(config: ScanlogConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }
        record_daemon_metrics();

        let pool = WorkerPool::new(sink, config.pool.workers)?;
        let connections = ConnectionSet::new(config.listener.max_connections);
        let listener_cancel = CancellationToken::new();

        let acceptor = Acceptor::bind(
            &config.listener,
            pool.clone(),
            connections.clone(),
            listener_cancel.clone(),
        )
        .await
        .context("failed to start listener")?;

        let coordinator = Arc::new(ShutdownCoordinator::new(listener_cancel, connections, pool));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(SHUTDOWN_CHANNEL_CAPACITY);

        tracing::info!(
            local_addr = %acceptor.local_addr(),
            workers = config.pool.workers,
            max_connections = config.listener.max_connections,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            acceptor,
            coordinator,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// A sender that requests shutdown when sent [`ShutdownRequest::Requested`].
    pub fn shutdown_handle(&self) -> mpsc::Sender<ShutdownRequest> {
        self.shutdown_tx.clone()
    }

    /// The shutdown coordinator, for observing the lifecycle state.
    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &ScanlogConfig {
        &self.config
    }

    /// Start accepting and block until the shutdown sequence completes.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` / `SIGINT`
    /// - A fatal accept error
    /// - A request on a [`shutdown_handle`](Self::shutdown_handle)
    pub async fn run(self) -> Result<ShutdownReport> {
        let signals = spawn_signal_listener(self.shutdown_tx.clone())?;
        let listener = spawn_listener_supervisor(self.acceptor, self.shutdown_tx.clone());
        self.coordinator.attach_listener(listener);
        drop(self.shutdown_tx);

        tracing::info!("scanlog-daemon running");
        let report = self.coordinator.run(self.shutdown_rx).await;
        signals.abort();

        report.ok_or_else(|| anyhow::anyhow!("shutdown was already performed elsewhere"))
    }
}

/// Run the acceptor and request shutdown if it stops on its own.
fn spawn_listener_supervisor(
    acceptor: Acceptor,
    requests: mpsc::Sender<ShutdownRequest>,
) -> JoinHandle<Result<(), scanlog_collector::CollectorError>> {
    tokio::spawn(async move {
        let result = acceptor.run().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "listener stopped unexpectedly");
            if requests.try_send(ShutdownRequest::ListenerExited).is_err() {
                tracing::debug!("shutdown already requested");
            }
        }
        result
    })
}

/// Record daemon-level metrics (build info).
fn record_daemon_metrics() {
    use scanlog_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}
