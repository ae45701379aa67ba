use std::fs::File;
use std::io::{BufReader, Read};

use crate::codec::{read_rest, ByteCodec};
use crate::cursor::Cursor;
use crate::error::{Error, Result};

use super::{
    LogAction, LogEntry, REC_ACTION_SIZE, REC_CRC_SIZE, REC_HEADER_SIZE, REC_INDEX_SIZE,
    REC_MAX_META_SIZE,
};

/// Sequential reader over the records in a segment-log file.
pub(crate) struct RecordReader {
    reader: BufReader<File>,
}

impl RecordReader {
    pub(crate) fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
        }
    }

    /// Reads and validates the next record.
    ///
    /// Returns `Ok(None)` on a clean EOF. A record cut short mid-way is
    /// [`Error::UnexpectedEnd`] (the caller decides whether a torn tail is
    /// tolerable); a record whose checksum does not match its bytes is
    /// [`Error::Corrupted`].
    pub(crate) fn next_record(&mut self) -> Result<Option<(u64, LogEntry)>> {
        // Header first. Zero bytes read is a clean end of the log.
        let mut header = [0u8; REC_HEADER_SIZE];
        match self.reader.read(&mut header)? {
            0 => return Ok(None),
            REC_HEADER_SIZE => {}
            n => read_rest(&mut self.reader, &mut header[n..])?,
        }

        let header_crc = u32::from_be_bytes(header[0..REC_CRC_SIZE].try_into().unwrap());
        let index = u64::from_be_bytes(
            header[REC_CRC_SIZE..REC_CRC_SIZE + REC_INDEX_SIZE]
                .try_into()
                .unwrap(),
        );
        let action_byte = header[REC_CRC_SIZE + REC_INDEX_SIZE];
        let meta_len = u32::from_be_bytes(
            header[REC_CRC_SIZE + REC_INDEX_SIZE + REC_ACTION_SIZE..]
                .try_into()
                .unwrap(),
        ) as usize;

        if meta_len > REC_MAX_META_SIZE {
            return Err(Error::Corrupted(format!(
                "log record at index {} declares a {}-byte meta section",
                index, meta_len
            )));
        }

        let mut meta_buf = vec![0u8; meta_len];
        read_rest(&mut self.reader, &mut meta_buf)?;

        // Verify the checksum before trusting any field
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&index.to_be_bytes());
        hasher.update(&[action_byte]);
        hasher.update(&(meta_len as u32).to_be_bytes());
        hasher.update(&meta_buf);
        let crc = hasher.finalize();

        if crc != header_crc {
            return Err(Error::Corrupted(format!(
                "log record checksum mismatch: expected {:08x}, got {:08x}",
                header_crc, crc
            )));
        }

        let action = LogAction::from_u8(action_byte).ok_or_else(|| {
            Error::Corrupted(format!("invalid log action byte: {}", action_byte))
        })?;

        // Checksum passed, so the meta section must decode cleanly
        let codec = ByteCodec;
        let mut slice = meta_buf.as_slice();
        let mut cursor = Cursor::new(&codec, &mut slice);
        let meta = cursor
            .read_to_end()
            .map_err(|_| Error::Corrupted("log record meta does not decode".to_string()))?;

        Ok(Some((index, LogEntry::new(action, meta))))
    }
}
