//! Client Library
//!
//! The companion downloader: connect to a server, ask for its files and
//! write them into a local `Downloads` directory.
//!
//! ## Example
//!
//! ```no_run
//! use filecast::client::{ClientConfig, FileClient};
//!
//! # async fn demo() -> Result<(), filecast::client::ClientError> {
//! let mut client = FileClient::connect("127.0.0.1:11011", ClientConfig::default()).await?;
//! let saved = client.download_all(3).await?;
//! println!("saved {} files", saved.len());
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod connection;

pub use assembler::{save_file, AssemblyError, CompletedFile, FileAssembler};
pub use connection::{
    ClientConfig, ClientError, ClientEvent, FileClient, DEFAULT_DOWNLOAD_DIR,
    DEFAULT_EVENT_CAPACITY, DEFAULT_HEARTBEAT_INTERVAL,
};
