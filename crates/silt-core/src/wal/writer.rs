use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::codec::{ByteCodec, PairCodec};
use crate::error::Result;

use super::LogEntry;

/// Buffered appender for segment-log records.
///
/// Serializes entries into the record format described in the module docs.
/// Every record is flushed as soon as it is appended: a log record must be
/// on its way to disk before the mutation it describes happens.
pub(crate) struct RecordWriter {
    writer: BufWriter<File>,
}

impl RecordWriter {
    /// Opens `path` for appending, creating it when missing.
    pub(crate) fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Serializes and appends one record.
    pub(crate) fn append(&mut self, index: u64, entry: &LogEntry) -> Result<()> {
        let codec = ByteCodec;
        let mut meta = Vec::new();
        for pair in &entry.meta {
            meta.extend(codec.encode(pair)?);
        }

        let action = entry.action as u8;
        let meta_len = meta.len() as u32;

        // The CRC covers everything after itself
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&index.to_be_bytes());
        hasher.update(&[action]);
        hasher.update(&meta_len.to_be_bytes());
        hasher.update(&meta);
        let crc = hasher.finalize();

        self.writer.write_all(&crc.to_be_bytes())?;
        self.writer.write_all(&index.to_be_bytes())?;
        self.writer.write_all(&[action])?;
        self.writer.write_all(&meta_len.to_be_bytes())?;
        self.writer.write_all(&meta)?;
        self.writer.flush()?;

        Ok(())
    }

    /// Flushes the buffer and fsyncs the file.
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}
