//! Append-only log of segment lifecycle events.
//!
//! Every mutation of the segment store is logged *before* it is applied:
//! a `New` record when a memory store is flushed into a fresh segment, a
//! `Put` record when a segment is placed into a level, a `Delete` record
//! when a segment is dropped. On restart the log is replayed against the
//! backend to rebuild the store's buffer and levels (see
//! [`crate::store::SegmentStore::recover`]).
//!
//! # Record Binary Format
//!
//! ```text
//! +----------+------------+------------+--------------+------------+
//! | CRC (4B) | Index (8B) | Action (1B)| MetaLen (4B) | Meta bytes |
//! +----------+------------+------------+--------------+------------+
//! ```
//!
//! Big-endian throughout. The CRC32 covers every field after itself. Meta is
//! a run of codec-encoded pairs carrying the event's parameters:
//!
//! | Action | Meta |
//! |--------|------|
//! | New    | `id → <uuid as string>` |
//! | Put    | `id → <uuid as string>`, `level → <u32 BE>` |
//! | Delete | `id → <uuid as string>` |

mod reader;
mod writer;

use crate::wal::reader::RecordReader;
use crate::wal::writer::RecordWriter;

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::{debug, info, warn};

use silt_common::types::Pair;

use crate::error::{Error, Result};
use crate::segment::SegmentId;

const REC_CRC_SIZE: usize = 4;
const REC_INDEX_SIZE: usize = 8;
const REC_ACTION_SIZE: usize = 1;
const REC_META_LEN_SIZE: usize = 4;
const REC_HEADER_SIZE: usize =
    REC_CRC_SIZE + REC_INDEX_SIZE + REC_ACTION_SIZE + REC_META_LEN_SIZE;

/// Safety cap on the meta section; real records carry a uuid and a level.
const REC_MAX_META_SIZE: usize = 64 * 1024;

const META_ID_KEY: &str = "id";
const META_LEVEL_KEY: &str = "level";

/// The kind of segment lifecycle event a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogAction {
    Delete = 0,
    New = 1,
    Put = 2,
}

impl LogAction {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(LogAction::Delete),
            1 => Some(LogAction::New),
            2 => Some(LogAction::Put),
            _ => None,
        }
    }
}

/// One logged event: an action plus its parameters as an ordered pair list.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub action: LogAction,
    pub meta: Vec<Pair>,
}

impl LogEntry {
    pub fn new(action: LogAction, meta: Vec<Pair>) -> Self {
        Self { action, meta }
    }

    /// Entry recording the creation of segment `id`.
    pub fn segment_new(id: SegmentId) -> Self {
        Self::new(LogAction::New, vec![id_pair(id)])
    }

    /// Entry recording that segment `id` was placed into `level`.
    pub fn segment_put(id: SegmentId, level: u32) -> Self {
        Self::new(
            LogAction::Put,
            vec![
                id_pair(id),
                Pair::new(META_LEVEL_KEY, Bytes::copy_from_slice(&level.to_be_bytes())),
            ],
        )
    }

    /// Entry recording the deletion of segment `id`.
    pub fn segment_delete(id: SegmentId) -> Self {
        Self::new(LogAction::Delete, vec![id_pair(id)])
    }

    /// The segment id carried in the meta, if present and well-formed.
    pub fn segment_id(&self) -> Option<SegmentId> {
        let pair = self.meta.iter().find(|p| p.key() == META_ID_KEY)?;
        let text = std::str::from_utf8(pair.value()).ok()?;
        SegmentId::parse_str(text).ok()
    }

    /// The level carried in the meta, if present and well-formed.
    pub fn level(&self) -> Option<u32> {
        let pair = self.meta.iter().find(|p| p.key() == META_LEVEL_KEY)?;
        let bytes: [u8; 4] = pair.value().as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

fn id_pair(id: SegmentId) -> Pair {
    Pair::new(META_ID_KEY, Bytes::from(id.to_string()))
}

/// A totally ordered log of [`LogEntry`] records keyed by u64 index.
///
/// Writes at arbitrary indices are accepted; the log presents them in index
/// order regardless of append order. `close` is terminal and fails with
/// [`Error::Closed`] the second time.
pub trait Log: Send {
    /// Smallest index in the log, if any.
    fn first(&self) -> Option<u64>;

    /// Largest index in the log, if any.
    fn last(&self) -> Option<u64>;

    /// Returns the entry at `index`.
    fn read(&self, index: u64) -> Result<LogEntry>;

    /// Appends `entry` under `index`.
    fn write(&mut self, index: u64, entry: LogEntry) -> Result<()>;

    /// Flushes and seals the log.
    fn close(&mut self) -> Result<()>;
}

/// File-backed [`Log`].
///
/// Existing records are replayed into an ordered in-memory view at open; a
/// torn final record (the normal shape of a crash mid-append) is dropped
/// with a warning, while a failed checksum is surfaced as corruption.
/// Appends go through a buffered writer and are flushed record by record so
/// the log-then-apply ordering holds across a crash of the process.
pub struct FileLog {
    writer: RecordWriter,
    entries: BTreeMap<u64, LogEntry>,
    path: PathBuf,
    closed: bool,
}

impl FileLog {
    /// Opens (or creates) the log at `path` and replays what is already
    /// there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = BTreeMap::new();

        if path.exists() {
            let file = File::open(&path)?;
            let mut reader = RecordReader::new(file);
            loop {
                match reader.next_record() {
                    Ok(Some((index, entry))) => {
                        entries.insert(index, entry);
                    }
                    Ok(None) => break,
                    Err(Error::UnexpectedEnd) => {
                        warn!(?path, "segment log truncated, dropping partial record");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let writer = RecordWriter::new(&path)?;
        info!(?path, records = entries.len(), "opened segment log");

        Ok(Self {
            writer,
            entries,
            path,
            closed: false,
        })
    }
}

impl Log for FileLog {
    fn first(&self) -> Option<u64> {
        self.entries.keys().next().copied()
    }

    fn last(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    fn read(&self, index: u64) -> Result<LogEntry> {
        self.entries
            .get(&index)
            .cloned()
            .ok_or(Error::NoSuchEntry(index))
    }

    fn write(&mut self, index: u64, entry: LogEntry) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.writer.append(index, &entry)?;
        debug!(index, action = ?entry.action, "appended log record");
        self.entries.insert(index, entry);

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.writer.sync()?;
        self.closed = true;
        info!(path = ?self.path, "closed segment log");

        Ok(())
    }
}

/// Purely in-memory [`Log`], for tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct MemLog {
    entries: BTreeMap<u64, LogEntry>,
    closed: bool,
}

impl MemLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Log for MemLog {
    fn first(&self) -> Option<u64> {
        self.entries.keys().next().copied()
    }

    fn last(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    fn read(&self, index: u64) -> Result<LogEntry> {
        self.entries
            .get(&index)
            .cloned()
            .ok_or(Error::NoSuchEntry(index))
    }

    fn write(&mut self, index: u64, entry: LogEntry) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.entries.insert(index, entry);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::new_segment_id;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn log_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("segments.wal")
    }

    #[test]
    fn test_first_and_last_track_single_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::open(log_path(&dir)).unwrap();

        let id = new_segment_id();
        log.write(1, LogEntry::segment_new(id)).unwrap();

        assert_eq!(log.first(), Some(1));
        assert_eq!(log.last(), Some(1));
        assert_eq!(log.read(1).unwrap().segment_id(), Some(id));
    }

    #[test]
    fn test_empty_log_has_no_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::open(log_path(&dir)).unwrap();

        assert_eq!(log.first(), None);
        assert_eq!(log.last(), None);
        assert!(matches!(log.read(1), Err(Error::NoSuchEntry(1))));
    }

    #[test]
    fn test_indices_stay_ordered_regardless_of_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::open(log_path(&dir)).unwrap();

        for index in [5u64, 2, 9] {
            log.write(index, LogEntry::segment_new(new_segment_id()))
                .unwrap();
        }

        assert_eq!(log.first(), Some(2));
        assert_eq!(log.last(), Some(9));
    }

    #[test]
    fn test_reopen_replays_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        let id = new_segment_id();

        {
            let mut log = FileLog::open(&path).unwrap();
            log.write(1, LogEntry::segment_new(id)).unwrap();
            log.write(2, LogEntry::segment_put(id, 0)).unwrap();
            log.write(3, LogEntry::segment_delete(id)).unwrap();
            log.close().unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.first(), Some(1));
        assert_eq!(log.last(), Some(3));

        let put = log.read(2).unwrap();
        assert_eq!(put.action, LogAction::Put);
        assert_eq!(put.segment_id(), Some(id));
        assert_eq!(put.level(), Some(0));

        assert_eq!(log.read(3).unwrap().action, LogAction::Delete);
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);

        {
            let mut log = FileLog::open(&path).unwrap();
            log.write(1, LogEntry::segment_new(new_segment_id()))
                .unwrap();
            log.close().unwrap();
        }

        // Simulate a crash mid-append: half a header at the end
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 9]).unwrap();
        drop(file);

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.first(), Some(1));
        assert_eq!(log.last(), Some(1));
    }

    #[test]
    fn test_flipped_byte_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);

        {
            let mut log = FileLog::open(&path).unwrap();
            log.write(1, LogEntry::segment_new(new_segment_id()))
                .unwrap();
            log.close().unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(FileLog::open(&path), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_close_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::open(log_path(&dir)).unwrap();

        log.close().unwrap();
        assert!(matches!(log.close(), Err(Error::Closed)));
        assert!(matches!(
            log.write(1, LogEntry::segment_new(new_segment_id())),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_entry_meta_accessors() {
        let id = new_segment_id();

        let entry = LogEntry::segment_put(id, 7);
        assert_eq!(entry.segment_id(), Some(id));
        assert_eq!(entry.level(), Some(7));

        let entry = LogEntry::segment_delete(id);
        assert_eq!(entry.segment_id(), Some(id));
        assert_eq!(entry.level(), None);

        let entry = LogEntry::new(LogAction::New, Vec::new());
        assert_eq!(entry.segment_id(), None);
    }

    #[test]
    fn test_mem_log_mirrors_the_contract() {
        let mut log = MemLog::new();
        assert_eq!(log.first(), None);

        log.write(4, LogEntry::segment_new(new_segment_id()))
            .unwrap();
        log.write(2, LogEntry::segment_new(new_segment_id()))
            .unwrap();

        assert_eq!(log.first(), Some(2));
        assert_eq!(log.last(), Some(4));
        assert!(matches!(log.read(3), Err(Error::NoSuchEntry(3))));

        log.close().unwrap();
        assert!(matches!(log.close(), Err(Error::Closed)));
    }
}
