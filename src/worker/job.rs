//! File-Request Jobs
//!
//! A [`Job`] is one queued request from one client. Today the only job a
//! worker knows how to run is `filerequest`; anything else is logged and
//! dropped without affecting other jobs.

use crate::context::ServerContext;
use crate::protocol::Message;
use crate::state::ClientId;
use crate::transfer::send_all_files;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A unit of work for the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// The client that asked for the work
    pub client_id: ClientId,
    /// The message that triggered it
    pub message: Message,
}

impl Job {
    pub fn new(client_id: impl Into<ClientId>, message: Message) -> Self {
        Self {
            client_id: client_id.into(),
            message,
        }
    }
}

/// Runs one job to completion.
///
/// Never fails: every error is logged here, so a bad job cannot take its
/// worker down.
pub async fn run_job(ctx: Arc<ServerContext>, job: Job) {
    match &job.message {
        Message::FileRequest(_) => {
            info!(client = %job.client_id, "File request received");

            match send_all_files(&ctx, &job.client_id).await {
                Ok(summary) => info!(
                    client = %job.client_id,
                    files_sent = summary.files_sent,
                    files_skipped = summary.files_skipped,
                    bytes = summary.bytes_sent,
                    "File request complete"
                ),
                Err(e) if e.is_connection_lost() => {
                    warn!(client = %job.client_id, error = %e, "File request aborted")
                }
                Err(e) => error!(client = %job.client_id, error = %e, "File request failed"),
            }
        }
        other => warn!(client = %job.client_id, kind = other.kind(), "Unknown job type, dropping"),
    }
}
