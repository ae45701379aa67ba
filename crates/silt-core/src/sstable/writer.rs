use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use silt_common::types::Pair;

use crate::codec::PairCodec;
use crate::error::{Error, Result};
use crate::memstore::MemoryStore;
use crate::segment::{SegmentId, SegmentWrite};
use crate::vfs::WriteStream;

/// Streaming segment builder.
///
/// Pairs are encoded straight onto the sink while the sparse index grows in
/// the backing memory store: the first pair is always indexed, then every
/// `index_factor`-th one. `close` tops the index up with the final pair (the
/// last key is always findable through the index), appends the encoded index
/// region and the trailing length word, and seals the writer.
pub struct Writer {
    id: SegmentId,
    codec: Arc<dyn PairCodec>,
    index: Box<dyn MemoryStore>,
    index_factor: usize,
    sink: Box<dyn WriteStream>,
    byte_offset: usize,
    count: usize,
    last_key: String,
    last_offset: usize,
    closed: bool,
}

impl Writer {
    pub fn new(
        id: SegmentId,
        sink: Box<dyn WriteStream>,
        codec: Arc<dyn PairCodec>,
        index: Box<dyn MemoryStore>,
        index_factor: usize,
    ) -> Self {
        Self {
            id,
            codec,
            index,
            index_factor: index_factor.max(1),
            sink,
            byte_offset: 0,
            count: 0,
            last_key: String::new(),
            last_offset: 0,
            closed: false,
        }
    }

    /// Number of pairs written so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Encodes a data-region offset the way the index stores it.
fn offset_value(offset: usize) -> Bytes {
    Bytes::copy_from_slice(&(offset as u32).to_be_bytes())
}

impl SegmentWrite for Writer {
    fn write(&mut self, pair: &Pair) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed);
        }

        // Remember the write in case it turns out to be the last one
        self.last_key = pair.key().to_string();
        self.last_offset = self.byte_offset;

        let encoded = self.codec.encode(pair)?;
        self.sink.write_all(&encoded)?;

        let seq = self.count + 1;
        if seq == 1 || seq % self.index_factor == 0 {
            self.index
                .put(Pair::new(pair.key(), offset_value(self.byte_offset)));
        }

        self.byte_offset += encoded.len();
        self.count += 1;

        Ok(encoded.len())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        // The last key always lands in the index
        if self.count > 0 && self.count % self.index_factor != 0 {
            self.index
                .put(Pair::new(&self.last_key, offset_value(self.last_offset)));
        }

        // Index region, then its length as the trailer
        let mut encoded = Vec::new();
        for pair in self.index.pairs() {
            encoded.extend(self.codec.encode(&pair)?);
        }
        self.sink.write_all(&encoded)?;
        self.sink.write_all(&(encoded.len() as u32).to_be_bytes())?;
        self.sink.flush()?;
        self.closed = true;

        debug!(
            id = %self.id,
            pairs = self.count,
            data_bytes = self.byte_offset,
            index_entries = self.index.len(),
            "sealed segment"
        );

        Ok(())
    }
}
