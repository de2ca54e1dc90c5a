use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api;
use crate::config::DaemonConfig;
use crate::store::ContentsStore;

/// A server running on a background task; dropping it requests shutdown.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Request shutdown and wait for in-flight requests to drain.
    pub async fn wait(mut self) -> Result<()> {
        self.shutdown();
        match self.task.take() {
            Some(task) => task.await.context("server task panicked")?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open the store and serve until Ctrl+C or SIGTERM.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let store = ContentsStore::open(config.store.clone())?;
    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.server.listen_addr))?;

    info!(
        listen_addr = %config.server.listen_addr,
        root = %store.root().display(),
        "nbstore daemon started"
    );
    axum::serve(listener, api::router(store, &config.server))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")
}

/// Serve on an already bound listener from a background task.
pub async fn spawn(
    listener: TcpListener,
    store: ContentsStore,
    config: &DaemonConfig,
) -> Result<ServerHandle> {
    let local_addr = listener.local_addr().context("listener has no local address")?;
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(4);
    let app = api::router(store, &config.server);

    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("server exited with error")
    });

    info!(listen_addr = %local_addr, "nbstore server spawned");
    Ok(ServerHandle { local_addr, shutdown_tx, task: Some(task) })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
