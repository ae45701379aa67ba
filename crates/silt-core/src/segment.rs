//! Capability contracts for durable segments.
//!
//! A segment is the durable form of a memory store: an immutable, sorted run
//! of encoded pairs plus a sparse index. These traits keep the segment store
//! independent of the concrete on-disk format, which lives in [`crate::sstable`].

use uuid::Uuid;

use silt_common::types::Pair;

use crate::error::Result;
use crate::memstore::MemoryStore;

/// Opaque 128-bit segment identifier.
pub type SegmentId = Uuid;

/// Allocates a fresh random segment id.
pub fn new_segment_id() -> SegmentId {
    Uuid::new_v4()
}

/// A loaded, immutable segment ready for point lookups.
///
/// `min`/`max` come from the first and last sparse-index entries; only their
/// keys are meaningful to callers (the values are index offsets). Lookups
/// take `&mut self` because they seek the segment's stream.
///
/// `get` returns whatever pair is stored, tombstones included. Mapping a
/// tombstone to not-found is the segment *store*'s job, because a young
/// tombstone has to mask live pairs in older segments.
pub trait Segment: Send {
    /// The unique id of this segment.
    fn id(&self) -> SegmentId;

    /// Sparse-index entry with the segment's smallest key.
    fn min(&self) -> Option<Pair>;

    /// Sparse-index entry with the segment's largest key.
    fn max(&self) -> Option<Pair>;

    /// Searches the segment for `key`.
    fn get(&mut self, key: &str) -> Result<Pair>;
}

/// Streaming builder for a new segment.
///
/// Pairs must be written in ascending key order; the writer maintains the
/// sparse index as it goes and commits it on `close`. A closed writer
/// rejects everything.
pub trait SegmentWrite: Send {
    /// Encodes and appends one pair, returning the number of bytes written.
    fn write(&mut self, pair: &Pair) -> Result<usize>;

    /// Writes a run of pairs, returning the total bytes written.
    fn write_all(&mut self, pairs: &[Pair]) -> Result<usize> {
        let mut total = 0;
        for pair in pairs {
            total += self.write(pair)?;
        }
        Ok(total)
    }

    /// Commits the sparse index and trailer and seals the segment.
    fn close(&mut self) -> Result<()>;
}

/// Persistent storage for segments, keyed by id.
pub trait SegmentBackend: Send {
    /// Opens a writer building the segment `id` from scratch.
    fn new_writer(&self, id: SegmentId) -> Result<Box<dyn SegmentWrite>>;

    /// Persists an entire memory store as the segment `id`.
    fn create(&self, id: SegmentId, store: &dyn MemoryStore) -> Result<()>;

    /// Loads the segment `id`, index and all.
    fn get(&self, id: SegmentId) -> Result<Box<dyn Segment>>;

    /// Removes the segment `id` from storage.
    fn delete(&self, id: SegmentId) -> Result<()>;
}
