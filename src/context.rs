//! Shared Server Context
//!
//! One [`ServerContext`] is created per server and handed (as an `Arc`) to
//! every connection session and every worker. It replaces any process-wide
//! global: components only reach shared state through the context they were
//! given.

use crate::config::ServerConfig;
use crate::state::{ClientRegistry, Stats};
use crate::transfer::TransferConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// State shared by sessions and workers.
#[derive(Debug)]
pub struct ServerContext {
    /// Live connections by client id
    pub registry: ClientRegistry,
    /// Connection and transfer counters
    pub stats: Arc<Stats>,
    /// Chunk sizing and pacing
    pub transfer: TransferConfig,
    /// Directory whose files are pushed to clients
    pub files_dir: PathBuf,
    /// Files larger than this are skipped
    pub max_file_size: u64,
}

impl ServerContext {
    /// Builds a fresh context from the server configuration.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            registry: ClientRegistry::new(),
            stats: Arc::new(Stats::new()),
            transfer: config.transfer.clone(),
            files_dir: config.files_dir.clone(),
            max_file_size: config.max_file_size,
        }
    }
}
