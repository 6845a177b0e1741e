//! Adaptive File Transfer
//!
//! This module decides how fast each client is fed and does the feeding.
//!
//! - `pacing`: Pure chunk-size and delay functions of a client's quality
//! - `sender`: Streams the served directory to one client, file by file
//!
//! ## Example
//!
//! ```
//! use filecast::transfer::{NetworkQuality, TransferConfig};
//! use std::time::Duration;
//!
//! let config = TransferConfig::default();
//! let slow = NetworkQuality::new(0.25).unwrap();
//!
//! assert_eq!(config.chunk_size(slow), 4 * 1024);
//! assert_eq!(config.delay(slow), Duration::from_millis(400));
//! ```

pub mod pacing;
pub mod sender;

// Re-export commonly used types
pub use pacing::{
    NetworkQuality, TransferConfig, TransferConfigError, BASE_DELAY, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, QUALITY_FLOOR,
};
pub use sender::{
    list_files, send_all_files, send_file, TransferError, TransferSummary, MAX_FILE_SIZE,
};
