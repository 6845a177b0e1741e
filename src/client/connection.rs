//! Client Connection
//!
//! [`FileClient`] connects to a server and runs two background tasks:
//!
//! - a **reader** that decodes frames and pushes them as [`ClientEvent`]s
//!   into a bounded queue, and
//! - a **heartbeat** that sends `heartbeat` every `heartbeat_interval`.
//!
//! The owner of the client is the only consumer of the event queue
//! ([`FileClient::next_event`]); no user code ever runs inside the reader.

use crate::client::assembler::{save_file, AssemblyError, FileAssembler};
use crate::protocol::{read_message, write_message, FrameError, Message};
use crate::transfer::NetworkQuality;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Directory downloads are saved into, relative to the working directory
pub const DEFAULT_DOWNLOAD_DIR: &str = "Downloads";

/// How often the client sends a heartbeat
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// How many undelivered events the reader may queue
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where completed files are written
    pub download_dir: PathBuf,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Capacity of the event queue
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Something that happened on the connection.
#[derive(Debug)]
pub enum ClientEvent {
    /// A message from the server
    Message(Message),
    /// The connection is gone. Carries the error if it did not close cleanly.
    Disconnected(Option<FrameError>),
}

/// Errors returned by [`FileClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[from] FrameError),

    #[error("connection lost: {0}")]
    ConnectionLost(#[source] FrameError),

    #[error("server closed the connection")]
    Closed,

    #[error("transfer error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("failed to save '{filename}': {source}")]
    Save {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// A connected file client.
#[derive(Debug)]
pub struct FileClient {
    writer: SharedWriter,
    events: mpsc::Receiver<ClientEvent>,
    reader_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
    peer_addr: SocketAddr,
    config: ClientConfig,
}

impl FileClient {
    /// Connects to `address` and starts the reader and heartbeat tasks.
    pub async fn connect(address: &str, config: ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ClientError::Connect {
                address: address.to_string(),
                source,
            })?;
        let peer_addr = stream.peer_addr().map_err(|source| ClientError::Connect {
            address: address.to_string(),
            source,
        })?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(write_half)));

        let (event_tx, events) = mpsc::channel(config.event_capacity.max(1));
        let reader_task = tokio::spawn(reader_loop(BufReader::new(read_half), event_tx));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            Arc::clone(&writer),
            config.heartbeat_interval,
        ));

        info!(server = %peer_addr, "Connected to server");

        Ok(Self {
            writer,
            events,
            reader_task,
            heartbeat_task,
            peer_addr,
            config,
        })
    }

    /// Returns the server's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sends one message.
    pub async fn send(&self, message: &Message) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, message).await?;
        Ok(())
    }

    /// Asks the server for every file it holds.
    pub async fn request_files(&self) -> Result<(), ClientError> {
        self.send(&Message::file_request()).await
    }

    /// Sends a chat notice.
    pub async fn chat(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.send(&Message::chat(text)).await
    }

    /// Reports the current network quality.
    pub async fn report_quality(&self, quality: NetworkQuality) -> Result<(), ClientError> {
        self.send(&Message::NetworkQuality(quality.value())).await
    }

    /// Waits for the next event. Returns `None` once the reader has stopped
    /// and every queued event has been consumed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Requests all files and saves them into the download directory.
    ///
    /// Returns once `expected` files have been saved. Chat messages that
    /// arrive meanwhile are logged.
    pub async fn download_all(&mut self, expected: usize) -> Result<Vec<PathBuf>, ClientError> {
        self.request_files().await?;

        let mut assembler = FileAssembler::new();
        let mut saved = Vec::with_capacity(expected);

        while saved.len() < expected {
            let message = match self.next_event().await {
                Some(ClientEvent::Message(message)) => message,
                Some(ClientEvent::Disconnected(Some(e))) => return Err(ClientError::ConnectionLost(e)),
                Some(ClientEvent::Disconnected(None)) | None => return Err(ClientError::Closed),
            };

            match &message {
                Message::Chat(text) => info!(text = %text, "Chat message"),
                Message::HeartbeatAck => trace!("Heartbeat acknowledged"),
                _ => {
                    if let Some(file) = assembler.handle(&message)? {
                        let path = save_file(&self.config.download_dir, &file.filename, &file.data)
                            .await
                            .map_err(|source| ClientError::Save {
                                filename: file.filename.clone(),
                                source,
                            })?;
                        info!(file = %file.filename, bytes = file.data.len(), path = %path.display(), "File received");
                        saved.push(path);
                    }
                }
            }
        }

        Ok(saved)
    }

    /// Closes the connection and stops the background tasks.
    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.heartbeat_task.abort();
        let result = self.writer.lock().await.shutdown().await;
        self.reader_task.abort();

        info!(server = %self.peer_addr, "Disconnected from server");
        result.map_err(|e| ClientError::Send(FrameError::Io(e)))
    }
}

impl Drop for FileClient {
    fn drop(&mut self) {
        self.heartbeat_task.abort();
        self.reader_task.abort();
    }
}

async fn reader_loop<R>(mut reader: R, events: mpsc::Sender<ClientEvent>)
where
    R: AsyncRead + Unpin,
{
    let end = loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => {
                if events.send(ClientEvent::Message(message)).await.is_err() {
                    // Nobody is listening any more
                    return;
                }
            }
            Ok(None) => break None,
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Ignoring message");
            }
            Err(e) => break Some(e),
        }
    };

    match &end {
        None => debug!("Server closed the connection"),
        Some(e) => warn!(error = %e, "Connection lost"),
    }
    let _ = events.send(ClientEvent::Disconnected(end)).await;
}

async fn heartbeat_loop(writer: SharedWriter, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let mut writer = writer.lock().await;
        if let Err(e) = write_message(&mut *writer, &Message::Heartbeat).await {
            debug!(error = %e, "Heartbeat failed, stopping");
            return;
        }
        trace!("Heartbeat sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::Server;
    use crate::transfer::TransferConfig;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn client_config(download_dir: PathBuf) -> ClientConfig {
        ClientConfig {
            download_dir,
            heartbeat_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    async fn start_server(files_dir: &std::path::Path) -> (String, oneshot::Sender<()>, JoinHandle<()>) {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            files_dir: files_dir.to_path_buf(),
            workers: 2,
            queue_capacity: 4,
            transfer: TransferConfig {
                base_delay: Duration::from_millis(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
        });
        (addr, stop_tx, task)
    }

    #[tokio::test]
    async fn test_download_all_saves_identical_files() {
        let files = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let big: Vec<u8> = (0..40_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(files.path().join("big.bin"), &big).unwrap();
        std::fs::write(files.path().join("small.txt"), b"tiny").unwrap();

        let (addr, stop_tx, server) = start_server(files.path()).await;

        let dir = downloads.path().join("Downloads");
        let mut client = FileClient::connect(&addr, client_config(dir.clone()))
            .await
            .unwrap();
        client.chat("hello").await.unwrap();

        let saved = tokio::time::timeout(Duration::from_secs(10), client.download_all(2))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(saved, vec![dir.join("big.bin"), dir.join("small.txt")]);
        assert_eq!(std::fs::read(dir.join("big.bin")).unwrap(), big);
        assert_eq!(std::fs::read(dir.join("small.txt")).unwrap(), b"tiny");

        client.disconnect().await.unwrap();
        stop_tx.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeats_are_acknowledged() {
        let files = tempfile::tempdir().unwrap();
        let (addr, stop_tx, server) = start_server(files.path()).await;

        let config = ClientConfig {
            heartbeat_interval: Duration::from_millis(20),
            ..client_config(files.path().join("unused"))
        };
        let mut client = FileClient::connect(&addr, config).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .unwrap();
        assert!(matches!(event, Some(ClientEvent::Message(Message::HeartbeatAck))));

        client.disconnect().await.unwrap();
        stop_tx.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_frame_disconnects_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&3u32.to_be_bytes()).await.unwrap();
            stream.write_all(b"%%%").await.unwrap();
            // Hold the socket open so only the corruption ends the session
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let mut client = FileClient::connect(&addr, client_config(dir.path().to_path_buf()))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .unwrap();
        assert!(matches!(
            event,
            Some(ClientEvent::Disconnected(Some(FrameError::Malformed(_))))
        ));
    }

    #[tokio::test]
    async fn test_server_close_ends_download() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let dir = tempfile::tempdir().unwrap();
        let mut client = FileClient::connect(&addr, client_config(dir.path().to_path_buf()))
            .await
            .unwrap();

        let result = client.download_all(1).await;
        assert!(matches!(
            result,
            Err(ClientError::Closed) | Err(ClientError::ConnectionLost(_)) | Err(ClientError::Send(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = FileClient::connect(&addr, ClientConfig::default()).await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }
}
