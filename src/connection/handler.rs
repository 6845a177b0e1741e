//! Connection Handler Module
//!
//! This module handles individual client connections. Each client gets its
//! own handler task that reads frames in a loop and either answers them
//! inline or hands them to the worker pool.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler created, client registered
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read one frame          │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Dispatch by type        │ │
//!    │  │  heartbeat  -> ack      │ │
//!    │  │  chat       -> log      │ │
//!    │  │  quality    -> registry │ │
//!    │  │  filereq    -> job pool │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Update last_seen        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. EOF / corrupt frame / write failure / shutdown
//!        │
//!        ▼
//! 5. Client unregistered, socket closed, handler task ends
//! ```
//!
//! Messages from one connection are handled strictly in arrival order.

use crate::context::ServerContext;
use crate::protocol::{read_message, FrameError, Message};
use crate::state::ClientHandle;
use crate::transfer::NetworkQuality;
use crate::worker::{Job, PoolError, WorkerPool};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Reading or decoding a frame failed
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// Writing a reply failed
    #[error("write error: {0}")]
    Write(#[source] FrameError),

    /// The server is shutting down
    #[error("server shutting down")]
    Shutdown,
}

/// Handles a single client connection.
///
/// The write half lives in the [`ClientHandle`] stored in the registry so
/// workers can reach it. The read half stays here.
pub struct ConnectionHandler<R> {
    /// Read half of the connection
    reader: R,

    /// This client's registry entry
    client: Arc<ClientHandle>,

    /// Shared server state
    ctx: Arc<ServerContext>,

    /// Where file requests go
    pool: Arc<WorkerPool>,

    /// Flips to `true` when the server shuts down
    shutdown: watch::Receiver<bool>,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin,
{
    /// Creates a handler and registers the client.
    pub fn new(
        reader: R,
        client: Arc<ClientHandle>,
        ctx: Arc<ServerContext>,
        pool: Arc<WorkerPool>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        ctx.stats.connection_opened();
        if ctx.registry.add(Arc::clone(&client)).is_some() {
            warn!(client = %client.id(), "Replaced stale registry entry");
        }

        Self {
            reader,
            client,
            ctx,
            pool,
            shutdown,
        }
    }

    /// Runs the main connection loop until the client goes away.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.client.id(), "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.client.id(), "Client disconnected"),
            Err(e) => match e {
                ConnectionError::Shutdown => {
                    debug!(client = %self.client.id(), "Closing connection for shutdown")
                }
                ConnectionError::Protocol(FrameError::Io(io_err))
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.client.id(), "Connection reset by client")
                }
                _ => warn!(client = %self.client.id(), error = %e, "Connection error"),
            },
        }

        self.close().await;
        result
    }

    /// Unregisters the client and closes the socket.
    ///
    /// Called once, from `run`. A newer connection that took over this id
    /// keeps its registry entry.
    async fn close(&self) {
        if !self.ctx.registry.remove_handle(&self.client) {
            debug!(client = %self.client.id(), "Registry entry already replaced");
        }
        self.ctx.stats.connection_closed();
        self.client.close().await;
    }

    /// The read-dispatch loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if *self.shutdown.borrow() {
                return Err(ConnectionError::Shutdown);
            }

            let result = tokio::select! {
                _ = shutdown_signal(&mut self.shutdown) => return Err(ConnectionError::Shutdown),
                result = read_message(&mut self.reader) => result,
            };

            let message = match result {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(e) if !e.is_fatal() => {
                    warn!(client = %self.client.id(), error = %e, "Ignoring message");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.ctx.stats.frame_received();
            trace!(client = %self.client.id(), message = %message, "Received message");

            self.dispatch(message).await?;
            self.ctx.registry.touch(self.client.id());
        }
    }

    /// Handles one decoded message.
    async fn dispatch(&mut self, message: Message) -> Result<(), ConnectionError> {
        let id = self.client.id();

        match message {
            Message::Heartbeat => {
                // A peer that stops reading must not pin the session past shutdown
                tokio::select! {
                    result = self.client.send(&Message::HeartbeatAck) => {
                        result.map_err(ConnectionError::Write)?;
                    }
                    _ = shutdown_signal(&mut self.shutdown) => return Err(ConnectionError::Shutdown),
                }
                self.ctx.stats.frame_sent();
            }
            Message::Chat(text) => {
                info!(client = %id, text = %text, "Chat message");
            }
            message @ Message::FileRequest(_) => {
                let job = Job::new(id, message);
                tokio::select! {
                    result = self.pool.submit(job) => {
                        if let Err(PoolError::Closed(job)) = result {
                            warn!(client = %job.client_id, "Job queue closed, dropping file request");
                        }
                    }
                    _ = shutdown_signal(&mut self.shutdown) => return Err(ConnectionError::Shutdown),
                }
            }
            Message::NetworkQuality(value) => match NetworkQuality::new(value) {
                Some(quality) => {
                    self.ctx.registry.update_quality(id, quality);
                    info!(client = %id, quality = %quality, "Network quality updated");
                }
                None => warn!(client = %id, value, "Ignoring non-finite network quality"),
            },
            Message::Unrecognized { kind } => {
                warn!(client = %id, kind = %kind, "Unknown message type");
            }
            other => {
                warn!(client = %id, kind = other.kind(), "Unexpected message from client");
            }
        }

        Ok(())
    }
}

/// Resolves once the server asks connections to close, or the server is
/// gone altogether.
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Handles a client connection.
///
/// Splits the stream, registers the write half, and runs a
/// [`ConnectionHandler`] on the read half to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    pool: Arc<WorkerPool>,
    shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();

    let client = Arc::new(ClientHandle::new(addr, BufWriter::new(write_half)));
    let handler = ConnectionHandler::new(BufReader::new(read_half), client, ctx, pool, shutdown);

    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}
