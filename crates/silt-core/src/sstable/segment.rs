use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::debug;

use silt_common::types::Pair;

use crate::codec::PairCodec;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::memstore::MemoryStore;
use crate::segment::{Segment, SegmentId};
use crate::sstable::TRAILER_SIZE;
use crate::vfs::ReadStream;

/// A loaded sorted-table segment.
///
/// Holds the segment's byte stream and its sparse index. A lookup narrows
/// the search to the window between the two index neighbors of the key and
/// scans only that slice of the data region.
pub struct Table {
    id: SegmentId,
    data: Box<dyn ReadStream>,
    codec: Arc<dyn PairCodec>,
    index: Box<dyn MemoryStore>,
    size: u64,
}

impl Table {
    /// Loads a segment from its byte stream.
    ///
    /// Reads the trailer to find the index region, decodes it into `index`,
    /// and derives the data-region length from what is left.
    pub fn load(
        id: SegmentId,
        mut data: Box<dyn ReadStream>,
        codec: Arc<dyn PairCodec>,
        mut index: Box<dyn MemoryStore>,
    ) -> Result<Self> {
        let total = data.seek(SeekFrom::End(0))?;
        if total < TRAILER_SIZE as u64 {
            return Err(Error::Corrupted(format!(
                "segment {} is shorter than its trailer",
                id
            )));
        }

        // Trailer: length of the index region
        data.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
        let mut buf = [0u8; TRAILER_SIZE];
        data.read_exact(&mut buf)?;
        let index_size = u32::from_be_bytes(buf) as u64;

        if index_size + TRAILER_SIZE as u64 > total {
            return Err(Error::Corrupted(format!(
                "segment {} declares a {}-byte index but holds {} bytes",
                id, index_size, total
            )));
        }

        // Decode the index region; entries arrive in key order
        data.seek(SeekFrom::End(-((index_size + TRAILER_SIZE as u64) as i64)))?;
        let entries = {
            let mut limited = (&mut data).take(index_size);
            let mut cursor = Cursor::new(codec.as_ref(), &mut limited);
            cursor.read_to_end()?
        };
        index.extend_sorted(entries);

        let size = total - TRAILER_SIZE as u64 - index_size;

        debug!(
            %id,
            data_bytes = size,
            index_entries = index.len(),
            "loaded segment"
        );

        Ok(Self {
            id,
            data,
            codec,
            index,
            size,
        })
    }

    /// Data-region length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Resolves `key` to the data-region window `[start, end)` it could
    /// live in.
    ///
    /// Outside the index span the key cannot be present and the lookup is
    /// answered without touching the data region. A missing neighbor clamps
    /// the window to the region boundary, which is what keeps the window
    /// non-empty when `key` equals the smallest or largest indexed key.
    fn search_index(&self, key: &str) -> Result<(u64, u64)> {
        let (min, max) = match (self.index.min(), self.index.max()) {
            (Some(min), Some(max)) => (min, max),
            _ => return Err(Error::NoSuchKey),
        };

        if key < min.key() || key > max.key() {
            return Err(Error::NoSuchKey);
        }

        let (left, right) = match self.index.range(key) {
            Ok(neighbors) => neighbors,
            Err(Error::OutOfRange) => return Err(Error::NoSuchKey),
            Err(e) => return Err(e),
        };

        let start = match &left {
            Some(pair) => decode_offset(pair)? as u64,
            None => 0,
        };
        let end = match &right {
            Some(pair) => decode_offset(pair)? as u64,
            None => self.size,
        };

        Ok((start, end))
    }
}

/// Reads the u32 data-region offset out of an index entry.
fn decode_offset(pair: &Pair) -> Result<u32> {
    let bytes: [u8; 4] = pair.value().as_ref().try_into().map_err(|_| {
        Error::Corrupted(format!(
            "index offset for key {:?} is not 4 bytes",
            pair.key()
        ))
    })?;
    Ok(u32::from_be_bytes(bytes))
}

impl Segment for Table {
    fn id(&self) -> SegmentId {
        self.id
    }

    fn min(&self) -> Option<Pair> {
        self.index.min()
    }

    fn max(&self) -> Option<Pair> {
        self.index.max()
    }

    fn get(&mut self, key: &str) -> Result<Pair> {
        let (start, end) = self.search_index(key)?;

        // Scan the window with a length-limited cursor
        self.data.seek(SeekFrom::Start(start))?;
        let codec = Arc::clone(&self.codec);
        let mut limited = (&mut self.data).take(end - start);
        let mut cursor = Cursor::new(codec.as_ref(), &mut limited);

        loop {
            match cursor.next() {
                Ok(pair) => {
                    if pair.key() == key {
                        return Ok(pair);
                    }
                }
                Err(Error::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoSuchKey)
    }
}
