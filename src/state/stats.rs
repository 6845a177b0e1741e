//! Server Statistics
//!
//! Process-wide counters shared by every session and worker. Each counter is
//! an independent atomic, so updates never block and never perform I/O.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for connections, frames and transferred file bytes.
#[derive(Debug, Default)]
pub struct Stats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total frames decoded from clients
    pub frames_received: AtomicU64,
    /// Total frames written to clients
    pub frames_sent: AtomicU64,
    /// Total file bytes sent in `file_chunk` frames (monotonic)
    pub bytes_transferred: AtomicU64,
}

/// A point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_transferred: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate instead of wrapping if a caller ever double-closes.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_transferred(&self, count: usize) {
        self.bytes_transferred
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns the number of currently active connections.
    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Returns the cumulative number of file bytes sent.
    pub fn transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}
