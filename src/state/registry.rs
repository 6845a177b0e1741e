//! Concurrent Connection Registry
//!
//! Maps each client identifier to its live [`ClientHandle`]. Connection
//! sessions add and remove entries; file-transfer workers look them up to
//! send frames and to read the client's current network quality.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ClientRegistry                          │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!          │
//!          ▼  Arc<ClientHandle>
//!   ┌───────────────────────────────────┐
//!   │ status: Mutex<ClientStatus>       │  quality, last_seen
//!   │ writer: tokio Mutex<FrameWriter>  │  one frame at a time
//!   └───────────────────────────────────┘
//! ```
//!
//! Shard locks are held only long enough to clone or remove an `Arc`. All
//! socket writes happen after the shard lock is released, under the
//! per-client writer lock. That lock keeps a session's `heartbeat_ack` from
//! landing in the middle of a worker's `file_chunk` frame.
//!
//! ## Closing
//!
//! A peer that stops reading can leave a writer parked on the lock forever.
//! [`ClientHandle::close`] first flips the handle's `closed` signal, which
//! aborts every pending or in-flight [`ClientHandle::send`], and only then
//! takes the lock to shut the socket down.

use crate::protocol::{write_message, FrameError, Message};
use crate::transfer::NetworkQuality;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::debug;

/// Number of registry shards.
const NUM_SHARDS: usize = 16;

/// How long `close` waits for buffered bytes to drain before giving up.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifier of a connected client (its remote address as text).
pub type ClientId = String;

/// The write half of a client connection.
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors returned when sending to a registered client.
#[derive(Debug, Error)]
pub enum SendError {
    /// No live connection has this identifier
    #[error("client not found: {0}")]
    UnknownClient(ClientId),

    /// Writing the frame failed
    #[error("failed to send frame: {0}")]
    Frame(#[from] FrameError),
}

/// Mutable per-client fields, updated only through the registry.
#[derive(Debug, Clone, Copy)]
pub struct ClientStatus {
    /// When the connection was accepted
    pub connected_at: Instant,
    /// When the last inbound message was processed
    pub last_seen: Instant,
    /// Latest reported network quality
    pub quality: NetworkQuality,
}

/// A live client connection.
pub struct ClientHandle {
    id: ClientId,
    addr: SocketAddr,
    status: Mutex<ClientStatus>,
    writer: tokio::sync::Mutex<FrameWriter>,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientHandle {
    /// Creates a handle for a freshly accepted connection.
    ///
    /// The identifier is derived from `addr`. Quality starts at 1.0.
    pub fn new<W>(addr: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let now = Instant::now();
        Self {
            id: addr.to_string(),
            addr,
            status: Mutex::new(ClientStatus {
                connected_at: now,
                last_seen: now,
                quality: NetworkQuality::BEST,
            }),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            closed: watch::channel(false).0,
        }
    }

    /// Returns the client identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the client's remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns a consistent snapshot of the mutable fields.
    pub fn status(&self) -> ClientStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the latest reported network quality.
    pub fn quality(&self) -> NetworkQuality {
        self.status().quality
    }

    fn update_status(&self, f: impl FnOnce(&mut ClientStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    /// Writes one frame to this client.
    ///
    /// Returns the number of bytes written. Fails with `NotConnected` once
    /// the handle is closed, including while waiting on a stalled peer.
    pub async fn send(&self, message: &Message) -> Result<usize, FrameError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(not_connected());
        }

        tokio::select! {
            result = async {
                let mut writer = self.writer.lock().await;
                write_message(&mut *writer, message).await
            } => result,
            _ = closed_signal(&mut closed) => Err(not_connected()),
        }
    }

    /// Aborts pending and future sends without touching the socket.
    pub fn cancel(&self) {
        self.closed.send_replace(true);
    }

    /// Returns true once the handle has been cancelled or closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Cancels outstanding sends, then shuts down the write half.
    pub async fn close(&self) {
        self.cancel();

        let mut writer = self.writer.lock().await;
        if tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown())
            .await
            .is_err()
        {
            debug!(client = %self.id, "Peer not reading, dropping unsent bytes");
        }
    }
}

async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn not_connected() -> FrameError {
    FrameError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "client connection closed",
    ))
}

/// Concurrent map from client identifier to live connection.
pub struct ClientRegistry {
    shards: Vec<RwLock<HashMap<ClientId, Arc<ClientHandle>>>>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("shards", &self.shards.len())
            .field("clients", &self.len())
            .finish()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    #[inline]
    fn shard(&self, id: &str) -> &RwLock<HashMap<ClientId, Arc<ClientHandle>>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Registers a client, replacing any stale entry with the same id.
    ///
    /// Returns the displaced entry, if there was one.
    pub fn add(&self, handle: Arc<ClientHandle>) -> Option<Arc<ClientHandle>> {
        let mut shard = self
            .shard(handle.id())
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        shard.insert(handle.id.clone(), handle)
    }

    /// Removes a client. Removing an absent id is a no-op.
    ///
    /// Returns the removed entry so the caller can tell whether this call
    /// was the one that actually removed it.
    pub fn remove(&self, id: &str) -> Option<Arc<ClientHandle>> {
        let mut shard = self.shard(id).write().unwrap_or_else(PoisonError::into_inner);
        shard.remove(id)
    }

    /// Removes `handle` only if it is still the entry registered under its
    /// id. A handle that was displaced by a newer connection is left alone.
    pub fn remove_handle(&self, handle: &Arc<ClientHandle>) -> bool {
        let mut shard = self
            .shard(handle.id())
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match shard.get(handle.id()) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                shard.remove(handle.id());
                true
            }
            _ => false,
        }
    }

    /// Looks up a client by id.
    pub fn lookup(&self, id: &str) -> Option<Arc<ClientHandle>> {
        let shard = self.shard(id).read().unwrap_or_else(PoisonError::into_inner);
        shard.get(id).cloned()
    }

    /// Records that a message from this client was just processed.
    ///
    /// Returns `false` if the client is not registered.
    pub fn touch(&self, id: &str) -> bool {
        match self.lookup(id) {
            Some(handle) => {
                handle.update_status(|status| status.last_seen = Instant::now());
                true
            }
            None => false,
        }
    }

    /// Stores a new network quality for this client.
    ///
    /// Returns `false` if the client is not registered.
    pub fn update_quality(&self, id: &str, quality: NetworkQuality) -> bool {
        match self.lookup(id) {
            Some(handle) => {
                handle.update_status(|status| status.quality = quality);
                true
            }
            None => false,
        }
    }

    /// Returns the client's current network quality.
    pub fn quality(&self, id: &str) -> Option<NetworkQuality> {
        self.lookup(id).map(|handle| handle.quality())
    }

    /// Sends one frame to a client.
    ///
    /// The shard lock is released before any I/O happens.
    pub async fn send_to(&self, id: &str, message: &Message) -> Result<usize, SendError> {
        let handle = self
            .lookup(id)
            .ok_or_else(|| SendError::UnknownClient(id.to_string()))?;
        Ok(handle.send(message).await?)
    }

    /// Returns the number of registered clients.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Returns true if no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of every registered client.
    pub fn clients(&self) -> Vec<Arc<ClientHandle>> {
        let mut clients = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().unwrap_or_else(PoisonError::into_inner);
            clients.extend(shard.values().cloned());
        }
        clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_message;
    use bytes::Bytes;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn handle(port: u16) -> Arc<ClientHandle> {
        Arc::new(ClientHandle::new(addr(port), tokio::io::sink()))
    }

    #[test]
    fn test_add_lookup_remove() {
        let registry = ClientRegistry::new();
        let client = handle(4000);

        assert!(registry.add(Arc::clone(&client)).is_none());
        assert_eq!(registry.len(), 1);

        let found = registry.lookup("127.0.0.1:4000").unwrap();
        assert!(Arc::ptr_eq(&found, &client));

        assert!(registry.remove("127.0.0.1:4000").is_some());
        assert!(registry.lookup("127.0.0.1:4000").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ClientRegistry::new();
        registry.add(handle(4001));

        assert!(registry.remove("127.0.0.1:4001").is_some());
        assert!(registry.remove("127.0.0.1:4001").is_none());
        assert!(registry.remove("never-added").is_none());
    }

    #[test]
    fn test_same_id_maps_to_one_entry() {
        let registry = ClientRegistry::new();
        registry.add(handle(4002));
        let displaced = registry.add(handle(4002));

        assert!(displaced.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_quality_updates() {
        let registry = ClientRegistry::new();
        registry.add(handle(4003));

        assert_eq!(registry.quality("127.0.0.1:4003"), Some(NetworkQuality::BEST));

        let quarter = NetworkQuality::new(0.25).unwrap();
        assert!(registry.update_quality("127.0.0.1:4003", quarter));
        assert_eq!(registry.quality("127.0.0.1:4003"), Some(quarter));

        assert!(!registry.update_quality("missing", quarter));
        assert_eq!(registry.quality("missing"), None);
    }

    #[test]
    fn test_touch_advances_last_seen() {
        let registry = ClientRegistry::new();
        let client = handle(4004);
        registry.add(Arc::clone(&client));

        let before = client.status().last_seen;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(registry.touch("127.0.0.1:4004"));
        assert!(client.status().last_seen > before);
        assert!(!registry.touch("missing"));
    }

    #[test]
    fn test_concurrent_removal_happens_once() {
        let registry = Arc::new(ClientRegistry::new());
        registry.add(handle(4005));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.remove("127.0.0.1:4005").is_some())
            })
            .collect();

        let removed = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|removed| *removed)
            .count();

        assert_eq!(removed, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_writes_frame() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let registry = ClientRegistry::new();
        registry.add(Arc::new(ClientHandle::new(addr(4006), server_side)));

        registry
            .send_to("127.0.0.1:4006", &Message::HeartbeatAck)
            .await
            .unwrap();

        let mut reader = client_side;
        let received = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(received, Message::HeartbeatAck);
    }

    #[test]
    fn test_remove_handle_ignores_displaced_entry() {
        let registry = ClientRegistry::new();
        let stale = handle(4007);
        let fresh = handle(4007);
        registry.add(Arc::clone(&stale));
        registry.add(Arc::clone(&fresh));

        assert!(!registry.remove_handle(&stale));
        let current = registry.lookup("127.0.0.1:4007").unwrap();
        assert!(Arc::ptr_eq(&current, &fresh));

        assert!(registry.remove_handle(&fresh));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_aborts_send_to_stalled_peer() {
        // Tiny pipe that nobody reads: the first large frame blocks mid-write
        let (_unread, server_side) = tokio::io::duplex(64);
        let client = Arc::new(ClientHandle::new(addr(4008), server_side));

        let stalled = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .send(&Message::file_chunk(Bytes::from(vec![0u8; 64 * 1024])))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stalled.is_finished());

        tokio::time::timeout(Duration::from_secs(5), client.close())
            .await
            .expect("close waited on the stalled writer");

        let result = tokio::time::timeout(Duration::from_secs(1), stalled)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(FrameError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotConnected));
        assert!(client.is_closed());

        // Later sends fail straight away
        assert!(client.send(&Message::HeartbeatAck).await.is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_client() {
        let registry = ClientRegistry::new();
        let err = registry
            .send_to("nobody", &Message::HeartbeatAck)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::UnknownClient(ref id) if id == "nobody"));
    }
}
