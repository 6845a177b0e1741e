//! File Reassembly
//!
//! Turns the `file_start` / `file_chunk` / `file_end` sequence back into
//! whole files. One [`FileAssembler`] belongs to one connection and holds
//! at most one file in progress.
//!
//! ```text
//!            file_start                 file_end (name + size match)
//!   Idle ──────────────────> Receiving ─────────────────────────────> Idle
//!     ▲                        │    ▲                                 + CompletedFile
//!     │                        └────┘ file_chunk (append)
//!     │    any error                │
//!     └─────────────────────────────┘
//! ```

use crate::protocol::{FileEnd, FileStart, Message};
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors raised while reassembling a file.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// A chunk arrived while no file was in progress
    #[error("file_chunk received with no file in progress")]
    ChunkWithoutStart,

    /// An end marker arrived while no file was in progress
    #[error("file_end for '{0}' received with no file in progress")]
    EndWithoutStart(String),

    /// The end marker names a different file
    #[error("file name mismatch: expected '{expected}', got '{received}'")]
    NameMismatch { expected: String, received: String },

    /// The bytes received do not match the announced size
    #[error("size mismatch for '{filename}': announced {expected} bytes, received {received}")]
    SizeMismatch {
        filename: String,
        expected: u64,
        received: u64,
    },
}

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub filename: String,
    pub data: Bytes,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Receiving {
        filename: String,
        filesize: u64,
        buffer: BytesMut,
    },
}

/// Per-connection reassembly state.
#[derive(Debug, Default)]
pub struct FileAssembler {
    state: State,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no file is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Returns `(received, announced)` for the file in progress.
    pub fn progress(&self) -> Option<(u64, u64)> {
        match &self.state {
            State::Idle => None,
            State::Receiving {
                filesize, buffer, ..
            } => Some((buffer.len() as u64, *filesize)),
        }
    }

    /// Feeds one message through the state machine.
    ///
    /// Returns the completed file when `message` is a matching `file_end`.
    /// Messages unrelated to file transfer are ignored.
    pub fn handle(&mut self, message: &Message) -> Result<Option<CompletedFile>, AssemblyError> {
        match message {
            Message::FileStart(start) => {
                self.start(start);
                Ok(None)
            }
            Message::FileChunk(data) => self.chunk(data).map(|_| None),
            Message::FileEnd(end) => self.end(end).map(Some),
            _ => Ok(None),
        }
    }

    /// Begins a new file. A file still in progress is abandoned.
    pub fn start(&mut self, start: &FileStart) {
        if let State::Receiving { filename, .. } = &self.state {
            warn!(file = %filename, "Abandoning incomplete file");
        }

        debug!(file = %start.filename, size = start.filesize, "File transfer started");

        // Cap the up-front reservation; the announced size is untrusted
        let reserve = start.filesize.min(crate::protocol::MAX_FRAME_SIZE as u64) as usize;
        self.state = State::Receiving {
            filename: start.filename.clone(),
            filesize: start.filesize,
            buffer: BytesMut::with_capacity(reserve),
        };
    }

    /// Appends one chunk to the file in progress.
    ///
    /// A chunk that would carry the file past its announced size abandons
    /// the file and leaves the assembler idle.
    pub fn chunk(&mut self, data: &[u8]) -> Result<(), AssemblyError> {
        if let State::Receiving {
            filesize, buffer, ..
        } = &self.state
        {
            let received = buffer.len() as u64 + data.len() as u64;
            if received > *filesize {
                if let State::Receiving {
                    filename, filesize, ..
                } = std::mem::take(&mut self.state)
                {
                    warn!(file = %filename, size = filesize, received, "Chunk overruns announced size");
                    return Err(AssemblyError::SizeMismatch {
                        filename,
                        expected: filesize,
                        received,
                    });
                }
            }
        }

        match &mut self.state {
            State::Idle => Err(AssemblyError::ChunkWithoutStart),
            State::Receiving {
                filename,
                filesize,
                buffer,
            } => {
                buffer.extend_from_slice(data);
                trace!(
                    file = %filename,
                    received = buffer.len(),
                    size = *filesize,
                    "Received chunk"
                );
                Ok(())
            }
        }
    }

    /// Finishes the file in progress and returns it.
    ///
    /// The assembler is idle afterwards, whether or not this succeeds.
    pub fn end(&mut self, end: &FileEnd) -> Result<CompletedFile, AssemblyError> {
        match std::mem::take(&mut self.state) {
            State::Idle => Err(AssemblyError::EndWithoutStart(end.filename.clone())),
            State::Receiving {
                filename,
                filesize,
                buffer,
            } => {
                if filename != end.filename {
                    return Err(AssemblyError::NameMismatch {
                        expected: filename,
                        received: end.filename.clone(),
                    });
                }
                if buffer.len() as u64 != filesize {
                    return Err(AssemblyError::SizeMismatch {
                        filename,
                        expected: filesize,
                        received: buffer.len() as u64,
                    });
                }

                Ok(CompletedFile {
                    filename,
                    data: buffer.freeze(),
                })
            }
        }
    }
}

/// Writes `data` into `dir` under the final component of `filename`,
/// creating `dir` if it does not exist.
///
/// Any directory part of `filename` is discarded, so a server cannot write
/// outside `dir`.
pub async fn save_file(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unusable file name: {:?}", filename),
            )
        })?;

    tokio::fs::create_dir_all(dir).await?;

    let path = dir.join(name);
    tokio::fs::write(&path, data).await?;

    debug!(path = %path.display(), bytes = data.len(), "File saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(name: &str, size: u64) -> Message {
        Message::file_start(name, size)
    }

    #[test]
    fn test_reassembles_chunks_in_order() {
        let mut asm = FileAssembler::new();
        assert!(asm.is_idle());

        assert_eq!(asm.handle(&start("a.txt", 11)).unwrap(), None);
        asm.handle(&Message::file_chunk(&b"hello "[..])).unwrap();
        asm.handle(&Message::file_chunk(&b"world"[..])).unwrap();
        assert_eq!(asm.progress(), Some((11, 11)));

        let done = asm.handle(&Message::file_end("a.txt")).unwrap().unwrap();
        assert_eq!(done.filename, "a.txt");
        assert_eq!(&done.data[..], b"hello world");
        assert!(asm.is_idle());
    }

    #[test]
    fn test_empty_file() {
        let mut asm = FileAssembler::new();
        asm.handle(&start("empty", 0)).unwrap();
        let done = asm.handle(&Message::file_end("empty")).unwrap().unwrap();
        assert!(done.data.is_empty());
    }

    #[test]
    fn test_chunk_without_start() {
        let mut asm = FileAssembler::new();
        assert_eq!(
            asm.handle(&Message::file_chunk(&b"x"[..])),
            Err(AssemblyError::ChunkWithoutStart)
        );
        assert_eq!(
            asm.handle(&Message::file_end("x")),
            Err(AssemblyError::EndWithoutStart("x".to_string()))
        );
    }

    #[test]
    fn test_name_mismatch_resets() {
        let mut asm = FileAssembler::new();
        asm.handle(&start("a", 1)).unwrap();
        asm.handle(&Message::file_chunk(&b"1"[..])).unwrap();

        let err = asm.handle(&Message::file_end("b")).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::NameMismatch {
                expected: "a".to_string(),
                received: "b".to_string(),
            }
        );
        assert!(asm.is_idle());
    }

    #[test]
    fn test_size_mismatch() {
        let mut asm = FileAssembler::new();
        asm.handle(&start("a", 10)).unwrap();
        asm.handle(&Message::file_chunk(&b"short"[..])).unwrap();

        assert!(matches!(
            asm.handle(&Message::file_end("a")),
            Err(AssemblyError::SizeMismatch {
                expected: 10,
                received: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_chunk_past_announced_size_rejected() {
        let mut asm = FileAssembler::new();
        asm.handle(&start("a", 8)).unwrap();
        asm.handle(&Message::file_chunk(&b"1234"[..])).unwrap();
        asm.handle(&Message::file_chunk(&b"5678"[..])).unwrap();
        assert_eq!(asm.progress(), Some((8, 8)));

        assert_eq!(
            asm.handle(&Message::file_chunk(&b"9"[..])),
            Err(AssemblyError::SizeMismatch {
                filename: "a".to_string(),
                expected: 8,
                received: 9,
            })
        );
        assert!(asm.is_idle());

        // Later chunks for the abandoned file are rejected, not buffered
        assert_eq!(
            asm.handle(&Message::file_chunk(&b"more"[..])),
            Err(AssemblyError::ChunkWithoutStart)
        );
    }

    #[test]
    fn test_new_start_abandons_previous() {
        let mut asm = FileAssembler::new();
        asm.handle(&start("first", 100)).unwrap();
        asm.handle(&Message::file_chunk(&b"partial"[..])).unwrap();

        asm.handle(&start("second", 2)).unwrap();
        asm.handle(&Message::file_chunk(&b"ok"[..])).unwrap();
        let done = asm.handle(&Message::file_end("second")).unwrap().unwrap();
        assert_eq!(&done.data[..], b"ok");
    }

    #[test]
    fn test_other_messages_ignored() {
        let mut asm = FileAssembler::new();
        assert_eq!(asm.handle(&Message::HeartbeatAck).unwrap(), None);
        assert_eq!(asm.handle(&Message::chat("hi")).unwrap(), None);
        assert!(asm.is_idle());
    }

    #[tokio::test]
    async fn test_save_file_creates_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Downloads");

        let path = save_file(&dir, "notes.txt", b"abc").await.unwrap();
        assert_eq!(path, dir.join("notes.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_save_file_strips_directories() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Downloads");

        let path = save_file(&dir, "../../etc/evil.txt", b"x").await.unwrap();
        assert_eq!(path, dir.join("evil.txt"));

        let err = save_file(&dir, "..", b"x").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
