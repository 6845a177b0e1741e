//! Length-Prefixed Frame Codec
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! +---------------------+------------------------------+
//! | length (4 bytes BE) | JSON envelope (length bytes) |
//! +---------------------+------------------------------+
//! ```
//!
//! The fixed-width prefix bounds each read to exactly one message, so the
//! reader never scans for delimiters.
//!
//! ## End-of-Stream Rules
//!
//! - Stream ends before any prefix byte: clean close, `Ok(None)`.
//! - Stream ends inside the prefix or the body: [`FrameError::Truncated`].
//! - Body is not a JSON envelope: [`FrameError::Malformed`].
//!
//! All of these except [`FrameError::InvalidContent`] leave the stream at an
//! unknown position, so callers treat them as fatal for the connection.

use crate::protocol::message::{Envelope, Message};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame body accepted from a peer (16 MB).
///
/// A 64 KB chunk grows to roughly 88 KB once base64-encoded, so this leaves
/// plenty of headroom while stopping a bogus prefix from allocating gigabytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended part-way through a frame
    #[error("stream ended inside a frame")]
    Truncated,

    /// The length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// The body is not a valid `{type, content}` envelope
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope is valid but its content does not fit its type
    #[error("invalid content for '{kind}': {reason}")]
    InvalidContent { kind: String, reason: String },
}

impl FrameError {
    /// Returns true if the stream can no longer be trusted after this error.
    ///
    /// Only [`FrameError::InvalidContent`] is recoverable: the frame was read
    /// completely, so the next frame starts at a known position.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::InvalidContent { .. })
    }
}

/// Encodes a message into a complete frame (prefix + body).
pub fn encode(message: &Message) -> Result<Bytes, FrameError> {
    let body = serde_json::to_vec(&message.to_envelope())?;

    if body.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.put_u32(body.len() as u32);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}

/// Decodes a frame body (without its prefix) into a message.
pub fn decode_body(body: &[u8]) -> Result<Message, FrameError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    Message::from_envelope(envelope)
}

/// Reads one frame from the stream and decodes it.
///
/// Blocks until the full frame is available.
///
/// # Returns
///
/// - `Ok(Some(message))` - A complete frame was read
/// - `Ok(None)` - The peer closed the stream between frames
/// - `Err(e)` - Truncated frame, oversized frame, or bad payload
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;

    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::Truncated);
        }
        filled += n;
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })?;

    decode_body(&body).map(Some)
}

/// Encodes a message and writes the frame to the stream, then flushes.
///
/// Returns the number of bytes written (prefix included).
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<usize, FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(frame.len())
}
