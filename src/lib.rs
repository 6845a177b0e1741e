//! # filecast - A TCP File Distribution Server
//!
//! filecast holds a directory of files and pushes them to connected clients
//! over a length-prefixed JSON message protocol. Clients can exchange short
//! chat notices and report a network-quality score that the server uses to
//! throttle their transfers.
//!
//! ## Features
//!
//! - **Framed Protocol**: 4-byte big-endian length + `{type, content}` JSON
//! - **Bounded Worker Pool**: file requests queue up with backpressure
//! - **Adaptive Pacing**: chunk size and inter-chunk delay follow each
//!   client's live network quality
//! - **Async I/O**: Built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              filecast                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│ WorkerPool  │                  │
//! │  │ (Listener)  │    │  Handler    │    │ (N workers) │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │ send_all_files          │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   Frame     │    │              ClientRegistry                  │    │
//! │  │   Codec     │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │    │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                                                         │
//! │                     ┌─────────────────────────────────────────────────┐ │
//! │                     │           StatsMonitor                          │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use filecast::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), filecast::ServerError> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! | type              | direction        | content                         |
//! |-------------------|------------------|---------------------------------|
//! | `heartbeat`       | client -> server | none                            |
//! | `heartbeat_ack`   | server -> client | none                            |
//! | `chat`            | either           | text                            |
//! | `filerequest`     | client -> server | `"all"`                         |
//! | `network_quality` | client -> server | number in `[0, 1]`              |
//! | `file_start`      | server -> client | `{filename, filesize}`          |
//! | `file_chunk`      | server -> client | base64 text                     |
//! | `file_end`        | server -> client | `{filename}`                    |
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame codec and typed messages
//! - [`state`]: client registry, counters and the stats monitor
//! - [`transfer`]: pacing controller and the file sender
//! - [`worker`]: bounded worker pool and file-request jobs
//! - [`connection`]: per-client read loop
//! - [`server`]: listener, startup and graceful shutdown
//! - [`client`]: the companion downloader
//!
//! ## Design Highlights
//!
//! ### Shared Context
//!
//! Every session and worker receives an `Arc<ServerContext>` holding the
//! registry, the counters and the transfer settings. There is no global
//! state.
//!
//! ### One Writer Per Client
//!
//! Heartbeat acks come from the session, file frames come from a worker.
//! Both go through the client's registry handle, whose writer sits behind an
//! async mutex, so frames never interleave on the wire.

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod protocol;
pub mod server;
pub mod state;
pub mod transfer;
pub mod worker;

// Re-export commonly used types for convenience
pub use client::{ClientConfig, ClientError, ClientEvent, FileClient};
pub use config::{ConfigError, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use connection::handle_connection;
pub use context::ServerContext;
pub use protocol::{FrameError, Message};
pub use server::{Server, ServerError};
pub use state::{ClientRegistry, Stats, StatsMonitor};
pub use transfer::{NetworkQuality, TransferConfig};
pub use worker::{Job, WorkerPool};

/// Version of filecast
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
