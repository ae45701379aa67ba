//! The public key/value surface of the engine.
//!
//! An [`Engine`] is the value an embedder (or the HTTP server) holds: writes
//! land in an ordered memory store, reads fall through from the memory store
//! to the durable segments, deletes are tombstones. When the memory store
//! reaches the flush threshold it is persisted as a new segment through the
//! segment store and swapped for an empty one.

use bytes::Bytes;
use tracing::{debug, info};

use silt_common::types::Pair;

use crate::error::{Error, Result};
use crate::memstore::{MemoryStore, StoreFactory};
use crate::segment::SegmentId;
use crate::store::SegmentStore;

/// An embedded ordered key/value store.
///
/// Keys are case-insensitive: they are lowercased on the way in and
/// lookups lowercase before searching. Single-writer: wrap the engine in a
/// lock to share it.
pub struct Engine {
    memstore: Box<dyn MemoryStore>,
    segments: SegmentStore,
    factory: StoreFactory,
    flush_threshold: usize,
}

impl Engine {
    /// Builds an engine over an existing segment store.
    ///
    /// `factory` supplies the write buffer and its replacements after every
    /// flush; `flush_threshold` is the resident-pair count that triggers one.
    pub fn new(segments: SegmentStore, factory: StoreFactory, flush_threshold: usize) -> Self {
        Self {
            memstore: factory(),
            segments,
            factory,
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Stores `value` under `key`.
    ///
    /// May flush the memory store as a side effect; the write itself always
    /// succeeds first.
    pub fn put(&mut self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        self.memstore.put(Pair::new(key, value));

        if self.memstore.len() >= self.flush_threshold {
            debug!(
                resident = self.memstore.len(),
                threshold = self.flush_threshold,
                "flush threshold reached"
            );
            self.flush()?;
        }

        Ok(())
    }

    /// Returns the value stored under `key`.
    ///
    /// Unknown keys, tombstoned keys and keys outside every segment all
    /// answer [`Error::NoSuchKey`].
    pub fn get(&mut self, key: &str) -> Result<Bytes> {
        let key = key.to_lowercase();

        // The memory store holds the newest version of anything it knows
        match self.memstore.get(&key) {
            Ok(pair) => {
                return if pair.is_tombstone() {
                    Err(Error::NoSuchKey)
                } else {
                    Ok(pair.value().clone())
                };
            }
            Err(Error::NoSuchKey) => {}
            Err(e) => return Err(e),
        }

        self.segments.get(&key).map(Pair::into_value)
    }

    /// Records a tombstone for `key`. Idempotent.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.memstore.delete(&key.to_lowercase());

        if self.memstore.len() >= self.flush_threshold {
            self.flush()?;
        }

        Ok(())
    }

    /// Persists the memory store as a new segment and installs a fresh one.
    ///
    /// A no-op on an empty store. On failure the unflushed store is put
    /// back, so nothing buffered is lost.
    pub fn flush(&mut self) -> Result<Option<SegmentId>> {
        if self.memstore.is_empty() {
            return Ok(None);
        }

        let full = std::mem::replace(&mut self.memstore, (self.factory)());
        match self.segments.new_segment(full.as_ref()) {
            Ok(id) => {
                info!(%id, pairs = full.len(), "memory store flushed");
                Ok(Some(id))
            }
            Err(e) => {
                self.memstore = full;
                Err(e)
            }
        }
    }

    /// Number of pairs currently buffered in memory.
    pub fn resident(&self) -> usize {
        self.memstore.len()
    }

    /// The segment store underneath, e.g. for level maintenance.
    pub fn segments_mut(&mut self) -> &mut SegmentStore {
        &mut self.segments
    }
}
