use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of the engine.
///
/// Every layer speaks this one enum so that errors can cross the trait
/// boundaries (memory store, segment, backend, log) without re-wrapping.
/// [`Error::EndOfStream`] is special: it is the normal terminator of a decode
/// loop and never escapes to a caller of the public API.
#[derive(Debug, Error)]
pub enum Error {
    /// The key is not present (or is masked by a tombstone).
    #[error("no such key")]
    NoSuchKey,

    /// A neighbor-range query fell outside the store's [min, max] span.
    #[error("key is out of range")]
    OutOfRange,

    /// The key does not fit the 32-bit length field of the wire format.
    #[error("key exceeds max size")]
    KeyTooLarge,

    /// The value does not fit the 32-bit length field of the wire format.
    #[error("value exceeds max size")]
    ValueTooLarge,

    /// No segment with this id exists.
    #[error("segment not found: {0}")]
    SegmentNotFound(Uuid),

    /// A put-to-level addressed a level past the end of the stack.
    #[error("invalid level {level}: store has {depth} levels")]
    InvalidLevel { level: usize, depth: usize },

    /// Clean end of an encoded stream before any byte of the next record.
    #[error("end of stream")]
    EndOfStream,

    /// The stream ended in the middle of a record; the segment is corrupt.
    #[error("unexpected end of stream")]
    UnexpectedEnd,

    /// The log (or a segment writer) was closed twice, or written after close.
    #[error("already closed")]
    Closed,

    /// The log holds no entry at this index.
    #[error("no log entry at index {0}")]
    NoSuchEntry(u64),

    /// A framed record failed its integrity checks.
    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for the not-found outcome of a lookup.
    pub fn is_no_such_key(&self) -> bool {
        matches!(self, Error::NoSuchKey)
    }

    /// Returns `true` for the clean decode-loop terminator.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }
}
