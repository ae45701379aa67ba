//! Binary wire format for a single [`Pair`].
//!
//! Encoded pairs are concatenated without separators inside a segment's data
//! region, its index region and the segment log's record payloads:
//!
//! ```text
//! +----------------+------------------+-----------+-------------+----------------+
//! | key_len (4B BE)| value_len (4B BE)| key bytes | value bytes | tombstone (1B) |
//! +----------------+------------------+-----------+-------------+----------------+
//! ```
//!
//! The tombstone byte is `0` for a live pair and non-zero for a deletion
//! marker. Keys are stored lowercase; the decoder does not re-normalize.

use bytes::Bytes;
use std::io;
use std::io::Read;

use silt_common::types::Pair;

use crate::error::{Error, Result};

/// Length of the fixed key_len/value_len header.
pub const HEADER_SIZE: usize = 8;

const MAX_KEY_SIZE: usize = u32::MAX as usize;
const MAX_VALUE_SIZE: usize = u32::MAX as usize;

/// A codec turning pairs into bytes and back.
///
/// Object-safe on purpose: segments, writers and the log all hold the codec
/// behind a pointer and never care which one it is.
pub trait PairCodec: Send + Sync {
    /// Decodes a single pair from the stream.
    ///
    /// A clean EOF before any byte of the record is [`Error::EndOfStream`];
    /// running dry anywhere inside the record is [`Error::UnexpectedEnd`].
    fn decode(&self, data: &mut dyn Read) -> Result<Pair>;

    /// Encodes a pair into a single buffer.
    ///
    /// Fails with [`Error::KeyTooLarge`] / [`Error::ValueTooLarge`] when a
    /// field does not fit its 32-bit length slot.
    fn encode(&self, pair: &Pair) -> Result<Vec<u8>>;
}

/// The standard big-endian byte codec described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteCodec;

impl ByteCodec {
    fn decode_header(&self, data: &mut dyn Read) -> Result<(usize, usize)> {
        let mut buf = [0u8; 4];

        // Read key length. A clean EOF on the very first byte means the
        // stream is exhausted; anything partial afterwards is a torn record.
        match data.read(&mut buf)? {
            0 => return Err(Error::EndOfStream),
            4 => {}
            n => read_rest(data, &mut buf[n..])?,
        }
        let key_len = u32::from_be_bytes(buf) as usize;

        // Read value length
        read_rest(data, &mut buf)?;
        let value_len = u32::from_be_bytes(buf) as usize;

        Ok((key_len, value_len))
    }
}

impl PairCodec for ByteCodec {
    fn decode(&self, data: &mut dyn Read) -> Result<Pair> {
        let (key_len, value_len) = self.decode_header(data)?;

        // Read key
        let mut key_buf = vec![0u8; key_len];
        read_rest(data, &mut key_buf)?;
        let key = String::from_utf8(key_buf)
            .map_err(|_| Error::Corrupted("pair key is not valid UTF-8".to_string()))?;

        // Read value
        let mut value_buf = vec![0u8; value_len];
        read_rest(data, &mut value_buf)?;

        // Read tombstone flag
        let mut flag = [0u8; 1];
        read_rest(data, &mut flag)?;

        Ok(Pair::from_parts(key, Bytes::from(value_buf), flag[0] != 0))
    }

    fn encode(&self, pair: &Pair) -> Result<Vec<u8>> {
        let key = pair.key().as_bytes();
        let value = pair.value();

        // Don't exceed the header capacity
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge);
        } else if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge);
        }

        let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len() + 1);
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        buf.push(pair.is_tombstone() as u8);

        Ok(buf)
    }
}

/// `read_exact` with the engine's short-read semantics: the stream running
/// dry mid-record is [`Error::UnexpectedEnd`], never a bare I/O error.
pub(crate) fn read_rest(data: &mut dyn Read, buf: &mut [u8]) -> Result<()> {
    data.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::UnexpectedEnd,
        _ => Error::Io(e),
    })
}
