//! Server Configuration
//!
//! All tunables for the server in one place. Every field has a default that
//! matches the reference deployment: port 11011, files served from
//! `./files`, 50 workers draining a queue of 1000 jobs.

use crate::state::DEFAULT_MONITOR_INTERVAL;
use crate::transfer::{TransferConfig, TransferConfigError, MAX_FILE_SIZE};
use crate::worker::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The default port the server listens on
pub const DEFAULT_PORT: u16 = 11011;

/// The default host the server binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// The default directory files are served from
pub const DEFAULT_FILES_DIR: &str = "./files";

/// Errors found while validating a configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("queue capacity must be at least 1")]
    NoQueue,

    #[error("invalid transfer settings: {0}")]
    Transfer(#[from] TransferConfigError),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Directory whose files are pushed to clients
    pub files_dir: PathBuf,
    /// Number of file-transfer workers
    pub workers: usize,
    /// Capacity of the job queue
    pub queue_capacity: usize,
    /// Files larger than this are skipped
    pub max_file_size: u64,
    /// How often the stats monitor logs
    pub monitor_interval: Duration,
    /// Chunk sizing and pacing
    pub transfer: TransferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            files_dir: PathBuf::from(DEFAULT_FILES_DIR),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_file_size: MAX_FILE_SIZE,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            transfer: TransferConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NoQueue);
        }
        self.transfer.validate()?;
        Ok(())
    }
}
