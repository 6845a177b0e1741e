//! Wire Protocol
//!
//! This module implements the framing and message model shared by the
//! server and the client library.
//!
//! ## Modules
//!
//! - `message`: The typed `Message` enum and its JSON envelope
//! - `codec`: 4-byte length-prefixed framing over any async stream
//!
//! ## Example
//!
//! ```ignore
//! use filecast::protocol::{read_message, write_message, Message};
//!
//! write_message(&mut stream, &Message::Heartbeat).await?;
//! if let Some(reply) = read_message(&mut stream).await? {
//!     assert_eq!(reply, Message::HeartbeatAck);
//! }
//! ```

pub mod codec;
pub mod message;

// Re-export commonly used types for convenience
pub use codec::{
    decode_body, encode, read_message, write_message, FrameError, LENGTH_PREFIX_SIZE,
    MAX_FRAME_SIZE,
};
pub use message::{kind, Envelope, FileEnd, FileStart, Message, FILE_REQUEST_ALL};
