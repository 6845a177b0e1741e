//! File Sender
//!
//! Streams every regular file in the served directory to one client:
//!
//! ```text
//! for each file (sorted by name):
//!     file_start {filename, filesize}
//!     loop {
//!         q     = registry.quality(client)      // live value
//!         chunk = read up to chunk_size(q) bytes
//!         file_chunk <base64 chunk>
//!         sleep(delay(q))
//!     }
//!     file_end {filename}
//! ```
//!
//! Files go out one at a time; a worker never interleaves two files.
//!
//! ## Failure Handling
//!
//! - A file that cannot be opened or read is abandoned and the next file
//!   is tried.
//! - A file larger than `max_file_size` is skipped before `file_start`.
//! - A failed send means the connection is gone, so the whole request ends.

use crate::context::ServerContext;
use crate::protocol::Message;
use crate::state::SendError;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, trace, warn};

/// Largest file the server will send (100 MB)
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Errors that can occur while sending files.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Listing, opening or reading failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exceeds the configured size limit
    #[error("file too large: {} is {size} bytes (max: {max})", .path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    /// The client could not be reached
    #[error(transparent)]
    Send(#[from] SendError),
}

impl TransferError {
    /// Returns true if the client connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, TransferError::Send(_))
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of one `filerequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSummary {
    /// Files sent completely
    pub files_sent: usize,
    /// Files skipped (too large or unreadable)
    pub files_skipped: usize,
    /// File bytes sent in chunks
    pub bytes_sent: u64,
}

/// Lists the regular files in `dir`, sorted by file name.
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, TransferError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| TransferError::io(dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| TransferError::io(dir, e))?
    {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Cannot stat directory entry");
                continue;
            }
        };
        if !file_type.is_dir() {
            files.push(entry.path());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Sends every file in the served directory to `client_id`.
///
/// Returns an error only if the directory cannot be listed or the client
/// becomes unreachable.
pub async fn send_all_files(
    ctx: &ServerContext,
    client_id: &str,
) -> Result<TransferSummary, TransferError> {
    let files = list_files(&ctx.files_dir).await?;
    let mut summary = TransferSummary::default();

    debug!(client = %client_id, files = files.len(), "Serving file request");

    for path in files {
        match send_file(ctx, client_id, &path).await {
            Ok(bytes) => {
                summary.files_sent += 1;
                summary.bytes_sent += bytes;
            }
            Err(e) if e.is_connection_lost() => return Err(e),
            Err(e) => {
                warn!(client = %client_id, error = %e, "Skipping file");
                summary.files_skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Sends one file to `client_id`.
///
/// Returns the number of file bytes sent.
pub async fn send_file(
    ctx: &ServerContext,
    client_id: &str,
    path: &Path,
) -> Result<u64, TransferError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| TransferError::io(path, e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| TransferError::io(path, e))?
        .len();

    if size > ctx.max_file_size {
        return Err(TransferError::TooLarge {
            path: path.to_path_buf(),
            size,
            max: ctx.max_file_size,
        });
    }

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!(client = %client_id, file = %filename, size, "Starting file transfer");
    send(ctx, client_id, &Message::file_start(&filename, size)).await?;

    let mut sent = 0u64;
    loop {
        let quality = ctx
            .registry
            .quality(client_id)
            .ok_or_else(|| SendError::UnknownClient(client_id.to_string()))?;
        let chunk_size = ctx.transfer.chunk_size(quality);

        let mut buf = Vec::with_capacity(chunk_size);
        let n = (&mut file)
            .take(chunk_size as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| TransferError::io(path, e))?;
        if n == 0 {
            break;
        }

        send(ctx, client_id, &Message::file_chunk(Bytes::from(buf))).await?;
        sent += n as u64;
        ctx.stats.bytes_transferred(n);

        trace!(
            client = %client_id,
            file = %filename,
            sent,
            size,
            chunk_size,
            quality = %quality,
            "Sent chunk"
        );

        tokio::time::sleep(ctx.transfer.delay(quality)).await;
    }

    send(ctx, client_id, &Message::file_end(&filename)).await?;
    info!(client = %client_id, file = %filename, bytes = sent, "File transfer complete");

    Ok(sent)
}

async fn send(ctx: &ServerContext, client_id: &str, message: &Message) -> Result<(), SendError> {
    ctx.registry.send_to(client_id, message).await?;
    ctx.stats.frame_sent();
    Ok(())
}
