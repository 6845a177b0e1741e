//! Message Types
//!
//! This module defines the typed messages exchanged between the server and
//! its clients, plus the JSON envelope they travel in.
//!
//! ## Envelope Format
//!
//! Every frame body is a JSON object with two fields:
//!
//! ```text
//! {"type": "<kind>", "content": <value or absent>}
//! ```
//!
//! The shape of `content` depends on `type`:
//!
//! | type              | content                                  |
//! |-------------------|------------------------------------------|
//! | `heartbeat`       | absent                                   |
//! | `heartbeat_ack`   | absent                                   |
//! | `chat`            | text                                     |
//! | `filerequest`     | marker text (`"all"`)                    |
//! | `network_quality` | number in `[0, 1]`                       |
//! | `file_start`      | `{"filename": text, "filesize": integer}`|
//! | `file_chunk`      | base64 text of the chunk bytes           |
//! | `file_end`        | `{"filename": text}`                     |
//!
//! Envelopes are converted into [`Message`] exactly once, at the frame
//! boundary. Nothing past the codec sees an untyped payload.

use crate::protocol::codec::FrameError;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wire names for each message kind.
pub mod kind {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_ACK: &str = "heartbeat_ack";
    pub const CHAT: &str = "chat";
    pub const FILE_REQUEST: &str = "filerequest";
    pub const NETWORK_QUALITY: &str = "network_quality";
    pub const FILE_START: &str = "file_start";
    pub const FILE_CHUNK: &str = "file_chunk";
    pub const FILE_END: &str = "file_end";
}

/// Marker sent as the content of a `filerequest`.
pub const FILE_REQUEST_ALL: &str = "all";

/// The raw `{type, content}` object carried in a frame body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

/// Announces the file that the following chunks belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStart {
    pub filename: String,
    pub filesize: u64,
}

/// Marks the end of a file's chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEnd {
    pub filename: String,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client liveness probe.
    Heartbeat,

    /// Server reply to a heartbeat.
    HeartbeatAck,

    /// Free-form text notice.
    Chat(String),

    /// Request for every file the server holds. Carries the marker text.
    FileRequest(String),

    /// Client-reported network quality, nominally in `[0, 1]`.
    NetworkQuality(f64),

    /// Start of a file transfer.
    FileStart(FileStart),

    /// One slice of file bytes (base64 on the wire).
    FileChunk(Bytes),

    /// End of a file transfer.
    FileEnd(FileEnd),

    /// A well-formed envelope whose type is not part of the vocabulary.
    Unrecognized { kind: String },
}

impl Message {
    /// Creates a chat message.
    pub fn chat(text: impl Into<String>) -> Self {
        Message::Chat(text.into())
    }

    /// Creates the standard "send me everything" request.
    pub fn file_request() -> Self {
        Message::FileRequest(FILE_REQUEST_ALL.to_string())
    }

    /// Creates a `file_start` message.
    pub fn file_start(filename: impl Into<String>, filesize: u64) -> Self {
        Message::FileStart(FileStart {
            filename: filename.into(),
            filesize,
        })
    }

    /// Creates a `file_chunk` message.
    pub fn file_chunk(data: impl Into<Bytes>) -> Self {
        Message::FileChunk(data.into())
    }

    /// Creates a `file_end` message.
    pub fn file_end(filename: impl Into<String>) -> Self {
        Message::FileEnd(FileEnd {
            filename: filename.into(),
        })
    }

    /// Returns the wire name of this message's kind.
    pub fn kind(&self) -> &str {
        match self {
            Message::Heartbeat => kind::HEARTBEAT,
            Message::HeartbeatAck => kind::HEARTBEAT_ACK,
            Message::Chat(_) => kind::CHAT,
            Message::FileRequest(_) => kind::FILE_REQUEST,
            Message::NetworkQuality(_) => kind::NETWORK_QUALITY,
            Message::FileStart(_) => kind::FILE_START,
            Message::FileChunk(_) => kind::FILE_CHUNK,
            Message::FileEnd(_) => kind::FILE_END,
            Message::Unrecognized { kind } => kind,
        }
    }

    /// Converts this message into its wire envelope.
    pub fn to_envelope(&self) -> Envelope {
        let content = match self {
            Message::Heartbeat | Message::HeartbeatAck | Message::Unrecognized { .. } => {
                Value::Null
            }
            Message::Chat(text) => Value::String(text.clone()),
            Message::FileRequest(marker) => Value::String(marker.clone()),
            Message::NetworkQuality(q) => serde_json::Number::from_f64(*q)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Message::FileStart(start) => serde_json::json!({
                "filename": start.filename,
                "filesize": start.filesize,
            }),
            Message::FileChunk(data) => Value::String(STANDARD.encode(data)),
            Message::FileEnd(end) => serde_json::json!({ "filename": end.filename }),
        };

        Envelope {
            kind: self.kind().to_string(),
            content,
        }
    }

    /// Converts a wire envelope into a typed message.
    ///
    /// Unknown kinds become [`Message::Unrecognized`]. A known kind whose
    /// content has the wrong shape yields [`FrameError::InvalidContent`].
    pub fn from_envelope(envelope: Envelope) -> Result<Self, FrameError> {
        let Envelope { kind: tag, content } = envelope;

        let message = match tag.as_str() {
            kind::HEARTBEAT => Message::Heartbeat,
            kind::HEARTBEAT_ACK => Message::HeartbeatAck,
            kind::CHAT => match content {
                Value::String(text) => Message::Chat(text),
                other => return Err(invalid(&tag, format!("expected text, got {}", other))),
            },
            kind::FILE_REQUEST => match content {
                Value::Null => Message::file_request(),
                Value::String(marker) => Message::FileRequest(marker),
                other => return Err(invalid(&tag, format!("expected marker, got {}", other))),
            },
            kind::NETWORK_QUALITY => match content.as_f64() {
                Some(q) => Message::NetworkQuality(q),
                None => return Err(invalid(&tag, format!("expected number, got {}", content))),
            },
            kind::FILE_START => {
                let start: FileStart =
                    serde_json::from_value(content).map_err(|e| invalid(&tag, e.to_string()))?;
                Message::FileStart(start)
            }
            kind::FILE_CHUNK => {
                let text = content
                    .as_str()
                    .ok_or_else(|| invalid(&tag, "expected base64 text".to_string()))?;
                let data = STANDARD
                    .decode(text)
                    .map_err(|e| invalid(&tag, e.to_string()))?;
                Message::FileChunk(Bytes::from(data))
            }
            kind::FILE_END => {
                let end: FileEnd =
                    serde_json::from_value(content).map_err(|e| invalid(&tag, e.to_string()))?;
                Message::FileEnd(end)
            }
            _ => Message::Unrecognized { kind: tag },
        };

        Ok(message)
    }
}

fn invalid(kind: &str, reason: String) -> FrameError {
    FrameError::InvalidContent {
        kind: kind.to_string(),
        reason,
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Chat(text) => write!(f, "chat({:?})", text),
            Message::NetworkQuality(q) => write!(f, "network_quality({})", q),
            Message::FileStart(start) => {
                write!(f, "file_start({}, {} bytes)", start.filename, start.filesize)
            }
            Message::FileChunk(data) => write!(f, "file_chunk({} bytes)", data.len()),
            Message::FileEnd(end) => write!(f, "file_end({})", end.filename),
            other => f.write_str(other.kind()),
        }
    }
}
