//! The multi-level segment container.
//!
//! A [`SegmentStore`] routes reads across a write buffer of freshly flushed
//! segments and a stack of levels of older ones, and records every segment
//! lifecycle event to its log before touching any state (log-then-apply).
//! [`SegmentStore::recover`] is the other half of that bargain: it rebuilds
//! the buffer and levels by replaying the log against the backend.

use tracing::{debug, info, warn};

use silt_common::types::Pair;

use crate::error::{Error, Result};
use crate::memstore::MemoryStore;
use crate::segment::{new_segment_id, Segment, SegmentBackend, SegmentId};
use crate::wal::{Log, LogAction, LogEntry};

/// An ordered run of segments with pairwise disjoint key ranges.
///
/// Segments are kept sorted by their minimum key, so the one segment that
/// can hold a key is found by binary search.
#[derive(Default)]
pub struct SegmentLevel {
    segments: Vec<Box<dyn Segment>>,
}

impl SegmentLevel {
    /// Inserts `segment` at its min-key position.
    pub fn insert(&mut self, segment: Box<dyn Segment>) {
        let min_key = segment.min().map(|p| p.key().to_string()).unwrap_or_default();
        let at = self.segments.partition_point(|s| match s.min() {
            Some(pair) => pair.key() < min_key.as_str(),
            None => true,
        });
        self.segments.insert(at, segment);
    }

    /// Looks `key` up in the single segment whose range covers it.
    pub fn get(&mut self, key: &str) -> Result<Pair> {
        let at = self.segments.partition_point(|s| match s.max() {
            Some(pair) => pair.key() < key,
            None => true,
        });

        let Some(segment) = self.segments.get_mut(at) else {
            return Err(Error::NoSuchKey);
        };
        match segment.min() {
            Some(min) if min.key() <= key => segment.get(key),
            _ => Err(Error::NoSuchKey),
        }
    }

    /// Removes and returns the segment with the given id.
    pub fn remove(&mut self, id: SegmentId) -> Option<Box<dyn Segment>> {
        let at = self.segments.iter().position(|s| s.id() == id)?;
        Some(self.segments.remove(at))
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.segments.iter().any(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Coordinator for all durable segments.
///
/// State: the backend that owns the bytes, the lifecycle log, the write
/// buffer (index 0 = newest flush) and the level stack (index 0 = youngest
/// level). Single-writer: callers serialize access; the store holds no
/// locks of its own.
pub struct SegmentStore {
    backend: Box<dyn SegmentBackend>,
    log: Box<dyn Log>,
    buffer: Vec<Box<dyn Segment>>,
    levels: Vec<SegmentLevel>,
}

impl SegmentStore {
    /// Creates an empty store over `backend` and `log`.
    pub fn new(backend: Box<dyn SegmentBackend>, log: Box<dyn Log>) -> Self {
        Self {
            backend,
            log,
            buffer: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Rebuilds a store by replaying `log` against `backend`.
    ///
    /// Entries are applied in index order to an empty store: `New` loads the
    /// segment into the buffer, `Put` moves it into its level, `Delete`
    /// drops it (finishing the file removal when the crash interrupted it).
    /// Events whose segment no longer exists in the backend are dropped with
    /// a warning: the log ran ahead of the mutation, which is exactly what
    /// log-then-apply permits. Replay itself writes nothing to the log.
    pub fn recover(backend: Box<dyn SegmentBackend>, log: Box<dyn Log>) -> Result<Self> {
        let mut store = Self::new(backend, log);

        let (Some(first), Some(last)) = (store.log.first(), store.log.last()) else {
            return Ok(store);
        };

        let mut applied = 0usize;
        for index in first..=last {
            let entry = match store.log.read(index) {
                Ok(entry) => entry,
                Err(Error::NoSuchEntry(_)) => continue,
                Err(e) => return Err(e),
            };

            let Some(id) = entry.segment_id() else {
                warn!(index, action = ?entry.action, "log entry without segment id, skipping");
                continue;
            };

            match entry.action {
                LogAction::New => match store.backend.get(id) {
                    Ok(segment) => {
                        store.buffer.insert(0, segment);
                        applied += 1;
                    }
                    Err(Error::SegmentNotFound(_)) => {
                        warn!(index, %id, "logged segment missing from backend, skipping");
                    }
                    Err(e) => return Err(e),
                },
                LogAction::Put => {
                    let Some(level) = entry.level() else {
                        warn!(index, %id, "put entry without level, skipping");
                        continue;
                    };
                    let level = level as usize;

                    // Prefer the instance already sitting in the buffer
                    let segment = match Self::take_from(&mut store.buffer, id) {
                        Some(segment) => segment,
                        None => match store.backend.get(id) {
                            Ok(segment) => segment,
                            Err(Error::SegmentNotFound(_)) => {
                                warn!(index, %id, "logged segment missing from backend, skipping");
                                continue;
                            }
                            Err(e) => return Err(e),
                        },
                    };

                    if level > store.levels.len() {
                        warn!(index, %id, level, "put entry addresses a level that never existed, skipping");
                        continue;
                    }
                    if level == store.levels.len() {
                        store.levels.push(SegmentLevel::default());
                    }
                    store.levels[level].insert(segment);
                    applied += 1;
                }
                LogAction::Delete => {
                    store.remove_loaded(id);
                    match store.backend.delete(id) {
                        Ok(()) | Err(Error::SegmentNotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                    applied += 1;
                }
            }
        }

        info!(
            applied,
            buffered = store.buffer.len(),
            levels = store.levels.len(),
            "recovered segment store from log"
        );

        Ok(store)
    }

    /// Flushes `store` into a brand-new segment and returns its id.
    ///
    /// The `New` log record lands before the backend is touched; the loaded
    /// segment becomes the newest entry of the write buffer.
    pub fn new_segment(&mut self, store: &dyn MemoryStore) -> Result<SegmentId> {
        let id = new_segment_id();

        self.log
            .write(self.next_index(), LogEntry::segment_new(id))?;
        self.backend.create(id, store)?;

        let segment = self.backend.get(id)?;
        self.buffer.insert(0, segment);

        info!(%id, buffered = self.buffer.len(), "new segment buffered");
        Ok(id)
    }

    /// Places `segment` into `level`, growing the stack by one level at most.
    pub fn put(&mut self, level: usize, segment: Box<dyn Segment>) -> Result<()> {
        let id = segment.id();
        self.log
            .write(self.next_index(), LogEntry::segment_put(id, level as u32))?;

        if level > self.levels.len() {
            return Err(Error::InvalidLevel {
                level,
                depth: self.levels.len(),
            });
        }
        if level == self.levels.len() {
            self.levels.push(SegmentLevel::default());
        }

        self.levels[level].insert(segment);
        debug!(%id, level, "segment placed into level");

        Ok(())
    }

    /// Deletes the segment `id` from the store and the backend.
    pub fn delete(&mut self, id: SegmentId) -> Result<()> {
        self.log
            .write(self.next_index(), LogEntry::segment_delete(id))?;

        if self.buffer.iter().any(|s| s.id() == id) {
            self.backend.delete(id)?;
            Self::take_from(&mut self.buffer, id);
            debug!(%id, "segment deleted from write buffer");
            return Ok(());
        }

        for (depth, level) in self.levels.iter_mut().enumerate() {
            if level.contains(id) {
                self.backend.delete(id)?;
                level.remove(id);
                debug!(%id, level = depth, "segment deleted from level");
                return Ok(());
            }
        }

        Err(Error::SegmentNotFound(id))
    }

    /// Point lookup across the buffer (newest first) and the level stack
    /// (youngest first).
    ///
    /// The first segment that knows the key decides the answer: a live pair
    /// is returned, a tombstone masks everything older and comes back as
    /// [`Error::NoSuchKey`].
    pub fn get(&mut self, key: &str) -> Result<Pair> {
        for segment in &mut self.buffer {
            match segment.get(key) {
                Ok(pair) => return Self::surface(pair),
                Err(Error::NoSuchKey) => continue,
                Err(e) => return Err(e),
            }
        }

        for level in &mut self.levels {
            match level.get(key) {
                Ok(pair) => return Self::surface(pair),
                Err(Error::NoSuchKey) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoSuchKey)
    }

    /// Pops the newest segment off the write buffer, e.g. to hand it to
    /// [`SegmentStore::put`] for level placement.
    pub fn take_newest(&mut self) -> Option<Box<dyn Segment>> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.remove(0))
    }

    /// Number of segments waiting in the write buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of levels in the stack.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    fn surface(pair: Pair) -> Result<Pair> {
        if pair.is_tombstone() {
            Err(Error::NoSuchKey)
        } else {
            Ok(pair)
        }
    }

    fn next_index(&self) -> u64 {
        self.log.last().unwrap_or(0) + 1
    }

    fn take_from(buffer: &mut Vec<Box<dyn Segment>>, id: SegmentId) -> Option<Box<dyn Segment>> {
        let at = buffer.iter().position(|s| s.id() == id)?;
        Some(buffer.remove(at))
    }

    fn remove_loaded(&mut self, id: SegmentId) {
        if Self::take_from(&mut self.buffer, id).is_some() {
            return;
        }
        for level in &mut self.levels {
            if level.remove(id).is_some() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteCodec;
    use crate::memstore::Tree;
    use crate::sstable::Backend;
    use crate::vfs::{MemVfs, OsVfs};
    use crate::wal::{FileLog, MemLog};
    use bytes::Bytes;
    use std::sync::Arc;

    fn new_backend(vfs: MemVfs) -> Box<dyn SegmentBackend> {
        Box::new(Backend::new(
            "data",
            Arc::new(vfs),
            Arc::new(ByteCodec),
            3,
            || Box::new(Tree::new()),
        ))
    }

    fn new_store(vfs: MemVfs) -> SegmentStore {
        SegmentStore::new(new_backend(vfs), Box::new(MemLog::new()))
    }

    fn memstore_with(entries: &[(&str, &str)]) -> Tree {
        let mut store = Tree::new();
        for (key, value) in entries {
            store.put(Pair::new(key, Bytes::copy_from_slice(value.as_bytes())));
        }
        store
    }

    fn memstore_with_tombstone(key: &str) -> Tree {
        let mut store = Tree::new();
        store.delete(key);
        store
    }

    #[test]
    fn test_new_segment_is_searchable() {
        let mut store = new_store(MemVfs::new());

        store
            .new_segment(&memstore_with(&[("a", "1"), ("b", "2")]))
            .unwrap();

        assert_eq!(store.buffered(), 1);
        assert_eq!(store.get("a").unwrap().value(), &Bytes::from("1"));
        assert!(matches!(store.get("zzz"), Err(Error::NoSuchKey)));
    }

    #[test]
    fn test_newest_flush_wins() {
        let mut store = new_store(MemVfs::new());

        store.new_segment(&memstore_with(&[("k", "old")])).unwrap();
        store.new_segment(&memstore_with(&[("k", "new")])).unwrap();

        assert_eq!(store.get("k").unwrap().value(), &Bytes::from("new"));
    }

    #[test]
    fn test_log_records_every_mutation() {
        let vfs = MemVfs::new();
        let mut store = new_store(vfs);

        let id = store.new_segment(&memstore_with(&[("a", "1")])).unwrap();
        assert_eq!(store.log.last(), Some(1));
        let entry = store.log.read(1).unwrap();
        assert_eq!(entry.action, LogAction::New);
        assert_eq!(entry.segment_id(), Some(id));

        let segment = store.take_newest().unwrap();
        store.put(0, segment).unwrap();
        let entry = store.log.read(2).unwrap();
        assert_eq!(entry.action, LogAction::Put);
        assert_eq!(entry.level(), Some(0));

        store.delete(id).unwrap();
        let entry = store.log.read(3).unwrap();
        assert_eq!(entry.action, LogAction::Delete);
        assert_eq!(entry.segment_id(), Some(id));
    }

    #[test]
    fn test_put_grows_levels_one_at_a_time() {
        let mut store = new_store(MemVfs::new());

        store.new_segment(&memstore_with(&[("a", "1")])).unwrap();
        let segment = store.take_newest().unwrap();

        // Level 1 does not exist yet and cannot be created by skipping
        let err = store.put(1, segment).unwrap_err();
        assert!(matches!(err, Error::InvalidLevel { level: 1, depth: 0 }));
        assert_eq!(store.depth(), 0);

        store.new_segment(&memstore_with(&[("b", "2")])).unwrap();
        let segment = store.take_newest().unwrap();
        store.put(0, segment).unwrap();
        assert_eq!(store.depth(), 1);

        assert_eq!(store.get("b").unwrap().value(), &Bytes::from("2"));
    }

    #[test]
    fn test_level_routes_to_covering_segment() {
        let mut store = new_store(MemVfs::new());

        for entries in [
            &[("a", "1"), ("c", "3")][..],
            &[("h", "8"), ("j", "10")][..],
            &[("q", "17"), ("s", "19")][..],
        ] {
            store.new_segment(&memstore_with(entries)).unwrap();
            let segment = store.take_newest().unwrap();
            store.put(0, segment).unwrap();
        }

        assert_eq!(store.get("h").unwrap().value(), &Bytes::from("8"));
        assert_eq!(store.get("s").unwrap().value(), &Bytes::from("19"));

        // Keys between segment ranges fall through to not-found
        assert!(matches!(store.get("e"), Err(Error::NoSuchKey)));
        assert!(matches!(store.get("z"), Err(Error::NoSuchKey)));
    }

    #[test]
    fn test_tombstone_in_buffer_masks_level() {
        let mut store = new_store(MemVfs::new());

        // Older segment with the live pair sits in level 0
        store.new_segment(&memstore_with(&[("k", "old")])).unwrap();
        let segment = store.take_newest().unwrap();
        store.put(0, segment).unwrap();

        // Younger tombstone stays in the write buffer
        store.new_segment(&memstore_with_tombstone("k")).unwrap();

        assert!(matches!(store.get("k"), Err(Error::NoSuchKey)));
    }

    #[test]
    fn test_tombstone_in_young_level_masks_old_level() {
        let mut store = new_store(MemVfs::new());

        store.new_segment(&memstore_with(&[("k", "old")])).unwrap();
        let old = store.take_newest().unwrap();
        store.put(0, old).unwrap();

        store.new_segment(&memstore_with_tombstone("k")).unwrap();
        let young = store.take_newest().unwrap();

        // Grow a second level and move the older segment down
        let old_id = store.levels[0].segments[0].id();
        let moved = store.levels[0].remove(old_id).unwrap();
        store.put(1, moved).unwrap();
        store.put(0, young).unwrap();

        assert!(matches!(store.get("k"), Err(Error::NoSuchKey)));
    }

    #[test]
    fn test_delete_from_buffer_and_level() {
        let vfs = MemVfs::new();
        let mut store = new_store(vfs.clone());

        let buffered = store.new_segment(&memstore_with(&[("a", "1")])).unwrap();
        let leveled = store.new_segment(&memstore_with(&[("b", "2")])).unwrap();
        let segment = store.take_newest().unwrap();
        assert_eq!(segment.id(), leveled);
        store.put(0, segment).unwrap();

        store.delete(buffered).unwrap();
        assert_eq!(store.buffered(), 0);
        assert!(matches!(store.get("a"), Err(Error::NoSuchKey)));

        store.delete(leveled).unwrap();
        assert!(matches!(store.get("b"), Err(Error::NoSuchKey)));
        assert!(vfs.is_empty());

        assert!(matches!(
            store.delete(buffered),
            Err(Error::SegmentNotFound(_))
        ));
    }

    #[test]
    fn test_recover_rebuilds_buffer_and_levels() {
        let vfs = MemVfs::new();

        let (first, second) = {
            let mut store = new_store(vfs.clone());
            let first = store.new_segment(&memstore_with(&[("a", "1")])).unwrap();
            let second = store.new_segment(&memstore_with(&[("b", "2")])).unwrap();
            let segment = store.take_newest().unwrap();
            store.put(0, segment).unwrap();
            (first, second)
        };
        let log = rebuild_log(&vfs, &[first, second]);

        let mut recovered = SegmentStore::recover(new_backend(vfs), log).unwrap();
        assert_eq!(recovered.buffered(), 1);
        assert_eq!(recovered.depth(), 1);
        assert_eq!(recovered.get("a").unwrap().value(), &Bytes::from("1"));
        assert_eq!(recovered.get("b").unwrap().value(), &Bytes::from("2"));
    }

    // Replays the lifecycle of the segments above into a fresh MemLog, the
    // way the original store's log would read after a restart.
    fn rebuild_log(_vfs: &MemVfs, ids: &[SegmentId]) -> Box<dyn Log> {
        let mut log = MemLog::new();
        log.write(1, LogEntry::segment_new(ids[0])).unwrap();
        log.write(2, LogEntry::segment_new(ids[1])).unwrap();
        log.write(3, LogEntry::segment_put(ids[1], 0)).unwrap();
        Box::new(log)
    }

    #[test]
    fn test_recover_skips_missing_segments() {
        let vfs = MemVfs::new();

        let kept = {
            let mut store = new_store(vfs.clone());
            store.new_segment(&memstore_with(&[("a", "1")])).unwrap()
        };
        let ghost = new_segment_id();

        let mut log = MemLog::new();
        log.write(1, LogEntry::segment_new(kept)).unwrap();
        log.write(2, LogEntry::segment_new(ghost)).unwrap();
        log.write(3, LogEntry::segment_put(ghost, 0)).unwrap();

        let mut recovered =
            SegmentStore::recover(new_backend(vfs), Box::new(log)).unwrap();
        assert_eq!(recovered.buffered(), 1);
        assert_eq!(recovered.depth(), 0);
        assert_eq!(recovered.get("a").unwrap().value(), &Bytes::from("1"));
    }

    #[test]
    fn test_recover_applies_deletes() {
        let vfs = MemVfs::new();

        let id = {
            let mut store = new_store(vfs.clone());
            store.new_segment(&memstore_with(&[("a", "1")])).unwrap()
        };

        let mut log = MemLog::new();
        log.write(1, LogEntry::segment_new(id)).unwrap();
        log.write(2, LogEntry::segment_delete(id)).unwrap();

        let mut recovered =
            SegmentStore::recover(new_backend(vfs.clone()), Box::new(log)).unwrap();
        assert_eq!(recovered.buffered(), 0);
        assert!(matches!(recovered.get("a"), Err(Error::NoSuchKey)));

        // The delete was finished against the backend too
        assert!(vfs.is_empty());
    }

    #[test]
    fn test_recover_from_file_log_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        let log_path = data_dir.join("segments.wal");

        let os_backend = |data_dir: &std::path::Path| -> Box<dyn SegmentBackend> {
            Box::new(Backend::new(
                data_dir,
                Arc::new(OsVfs),
                Arc::new(ByteCodec),
                3,
                || Box::new(Tree::new()),
            ))
        };

        // First life: flush one memory store, then go away without ceremony
        let id = {
            let log = Box::new(FileLog::open(&log_path).unwrap());
            let mut store = SegmentStore::new(os_backend(&data_dir), log);
            store
                .new_segment(&memstore_with(&[("a", "1"), ("b", "2")]))
                .unwrap()
        };

        // Second life: everything comes back from the log and the files
        let log = Box::new(FileLog::open(&log_path).unwrap());
        let mut recovered = SegmentStore::recover(os_backend(&data_dir), log).unwrap();

        assert_eq!(recovered.buffered(), 1);
        assert_eq!(recovered.get("a").unwrap().value(), &Bytes::from("1"));
        assert_eq!(recovered.get("b").unwrap().value(), &Bytes::from("2"));

        recovered.delete(id).unwrap();
        assert!(matches!(recovered.get("a"), Err(Error::NoSuchKey)));
    }

    #[test]
    fn test_recover_empty_log() {
        let vfs = MemVfs::new();
        let store =
            SegmentStore::recover(new_backend(vfs), Box::new(MemLog::new())).unwrap();
        assert_eq!(store.buffered(), 0);
        assert_eq!(store.depth(), 0);
    }
}
