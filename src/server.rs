//! Server Orchestration
//!
//! [`Server`] owns the listening socket, the shared [`ServerContext`], the
//! worker pool, and the shutdown channel every session watches.
//!
//! ## Lifecycle
//!
//! ```text
//! bind()        validate config, bind listener, start workers
//!   │
//!   ▼
//! run_until()   start stats monitor, accept loop ──spawn──> sessions
//!   │
//!   │ shutdown future resolves
//!   ▼
//! signal sessions ──> wait for sessions ──> close queue, wait for workers
//! ```

use crate::config::{ConfigError, ServerConfig};
use crate::connection::handle_connection;
use crate::context::ServerContext;
use crate::state::StatsMonitor;
use crate::worker::{run_job, WorkerPool};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound, ready-to-run file server.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    pool: Arc<WorkerPool>,
    config: ServerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("files_dir", &self.ctx.files_dir)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Server {
    /// Validates `config`, binds the listener and starts the worker pool.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;

        let ctx = Arc::new(ServerContext::new(&config));
        let pool = Arc::new(WorkerPool::start(config.workers, config.queue_capacity, {
            let ctx = Arc::clone(&ctx);
            move |job| run_job(Arc::clone(&ctx), job)
        }));
        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Worker pool initialized"
        );

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            ctx,
            pool,
            config,
            shutdown_tx,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the shared server state.
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Serves connections until `shutdown` resolves, then shuts down
    /// gracefully.
    ///
    /// Shutdown closes every open connection, closes the job queue and waits
    /// for all workers to finish their in-flight jobs before returning.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let monitor = StatsMonitor::start(Arc::clone(&self.ctx.stats), self.config.monitor_interval);

        info!(
            address = %self.local_addr()?,
            files_dir = %self.ctx.files_dir.display(),
            "Listening"
        );

        let mut sessions = JoinSet::new();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        sessions.spawn(handle_connection(
                            stream,
                            addr,
                            Arc::clone(&self.ctx),
                            Arc::clone(&self.pool),
                            self.shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }

            // Reap finished sessions so the set does not grow without bound
            while let Some(result) = sessions.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "Session task failed");
                }
            }
        }

        info!("Shutdown signal received, stopping server...");
        drop(monitor);

        self.shutdown_tx.send_replace(true);
        // Unblock workers parked on peers that stopped reading
        for client in self.ctx.registry.clients() {
            client.cancel();
        }
        debug!(sessions = sessions.len(), "Waiting for sessions to close");
        while let Some(result) = sessions.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Session task failed");
            }
        }

        self.pool.shutdown().await;

        let snapshot = self.ctx.stats.snapshot();
        info!(
            connections_accepted = snapshot.connections_accepted,
            bytes_transferred = snapshot.bytes_transferred,
            "Server shutdown complete"
        );
        Ok(())
    }
}
