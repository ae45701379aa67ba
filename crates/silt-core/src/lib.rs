//! Core of the silt storage engine: a log-structured merge store of
//! lowercase string keys to byte values.
//!
//! Writes accumulate in an ordered in-memory store ([`memstore`]); a flush
//! turns the store into an immutable on-disk segment in the sorted-table
//! format ([`sstable`]), logged ahead of time in the segment log ([`wal`]).
//! Reads fall through the [`engine::Engine`]'s memory store into the
//! [`store::SegmentStore`], which routes across the write buffer and the
//! level stack; deletes are tombstones that mask older data until a merge
//! ([`compaction`]) rewrites it.

pub mod codec;
pub mod compaction;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod memstore;
pub mod segment;
pub mod sstable;
pub mod store;
pub mod vfs;
pub mod wal;

pub use codec::{ByteCodec, PairCodec};
pub use cursor::Cursor;
pub use engine::Engine;
pub use error::{Error, Result};
pub use memstore::{MemoryStore, StoreFactory, Tree};
pub use segment::{new_segment_id, Segment, SegmentBackend, SegmentId, SegmentWrite};
pub use store::{SegmentLevel, SegmentStore};
pub use vfs::{MemVfs, OsVfs, Vfs};
pub use wal::{FileLog, Log, LogAction, LogEntry, MemLog};
